//! Server configuration, read from TOML.
//!
//! ```toml
//! state = "/var/lib/mirror/state.json"
//!
//! [artifacts.local]
//! path = "/var/lib/mirror/artifacts"
//!
//! [server]
//! listen = "0.0.0.0:5000"
//!
//! [token]
//! server = "https://registry.example.com/token"
//! service = "registry.example.com"
//! private-key = "/etc/registry/token.pem"
//!
//! [[distributions]]
//! base-path = "library/busybox"
//! repository = "busybox"
//! ```

use std::net::SocketAddr;

use artifacts::StoreConfig;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::token::TokenConfig;

/// Error loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading {path}")]
    Io {
        /// Path to the configuration file.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid configuration.
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// A repository served under a name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Distribution {
    /// Name clients pull by, e.g. `library/busybox`.
    pub base_path: String,

    /// Repository whose content is served.
    pub repository: String,

    /// Pinned version. Unset follows the latest version.
    #[serde(default)]
    pub version: Option<u64>,
}

impl Distribution {
    /// Serve the latest version of `repository` as `base_path`.
    pub fn new(base_path: impl Into<String>, repository: impl Into<String>) -> Self {
        Distribution {
            base_path: base_path.into(),
            repository: repository.into(),
            version: None,
        }
    }

    /// Pin the distribution to one version.
    pub fn pinned(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

/// Configuration of the `registry-server` command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryConfig {
    /// Where artifacts are stored.
    #[serde(default)]
    pub artifacts: StoreConfig,

    /// Snapshot file holding the content graph and repositories.
    pub state: Utf8PathBuf,

    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Token authentication. Without it, the registry is open.
    #[serde(default)]
    pub token: Option<TokenConfig>,

    /// Key for signing converted schema-1 manifests. Defaults to the token
    /// key, or a key generated at startup.
    #[serde(default)]
    pub signing_key: Option<Utf8PathBuf>,

    /// Served repositories.
    #[serde(default)]
    pub distributions: Vec<Distribution>,
}

impl RegistryConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read configuration from a file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&text)
    }
}
