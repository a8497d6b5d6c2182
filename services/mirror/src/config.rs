//! Mirror configuration, read from TOML.
//!
//! ```toml
//! state = "/var/lib/mirror/state.json"
//! repository = "busybox"
//!
//! [artifacts.local]
//! path = "/var/lib/mirror/artifacts"
//!
//! [remote]
//! url = "https://registry-1.docker.io"
//! upstream-name = "library/busybox"
//! include-tags = ["1.*"]
//! mode = "mirror"
//! ```

use artifacts::StoreConfig;
use camino::{Utf8Path, Utf8PathBuf};
use http::Uri;
use registry_client::{Backoff, Credentials, RegistryClient, Secret};
use serde::{Deserialize, Deserializer};

use crate::filter::TagFilter;

const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 10;

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

/// How a sync changes the repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Keep existing content; synced tags replace tags of the same name.
    #[default]
    Additive,

    /// The new version holds exactly the synced content.
    Mirror,
}

/// What to synchronize from a remote.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncOptions {
    /// Repository name on the upstream registry.
    pub upstream_name: String,

    /// Tag patterns to include. Empty includes every tag.
    #[serde(default)]
    pub include_tags: Vec<String>,

    /// Tag patterns to exclude.
    #[serde(default)]
    pub exclude_tags: Vec<String>,

    /// Additive or mirror sync.
    #[serde(default)]
    pub mode: SyncMode,

    /// Upper bound on concurrent downloads.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,
}

fn default_max_concurrent_downloads() -> usize {
    DEFAULT_MAX_CONCURRENT_DOWNLOADS
}

impl SyncOptions {
    /// Options which synchronize every tag of `upstream_name`.
    pub fn new(upstream_name: impl Into<String>) -> Self {
        SyncOptions {
            upstream_name: upstream_name.into(),
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
            mode: SyncMode::default(),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        }
    }

    /// Compile the tag filter.
    pub fn filter(&self) -> Result<TagFilter, regex::Error> {
        TagFilter::new(&self.include_tags, &self.exclude_tags)
    }
}

/// An upstream registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Remote {
    /// Registry base URL.
    #[serde(deserialize_with = "deserialize_uri")]
    pub url: Uri,

    /// Username for Basic authentication and token requests.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for `username`.
    #[serde(default)]
    pub password: Option<Secret>,

    /// What to synchronize.
    #[serde(flatten)]
    pub options: SyncOptions,
}

impl Remote {
    /// Credentials, when a username is configured.
    pub fn credentials(&self) -> Option<Credentials> {
        self.username
            .as_ref()
            .map(|username| Credentials::new(username.clone(), self.password.clone()))
    }

    /// A client for this remote.
    pub fn client(&self) -> RegistryClient {
        RegistryClient::new(self.url.clone(), self.credentials(), Backoff::default())
    }
}

fn deserialize_uri<'de, D>(deserializer: D) -> Result<Uri, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    value.parse().map_err(serde::de::Error::custom)
}

/// Configuration of the `mirror` command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MirrorConfig {
    /// Where artifacts are stored.
    #[serde(default)]
    pub artifacts: StoreConfig,

    /// Snapshot file holding the content graph and repositories.
    pub state: Utf8PathBuf,

    /// Local repository synchronized into.
    pub repository: String,

    /// The upstream registry.
    pub remote: Remote,
}

impl MirrorConfig {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config() {
        let config = MirrorConfig::from_toml(
            r#"
            state = "/var/lib/mirror/state.json"
            repository = "busybox"

            [artifacts.local]
            path = "/var/lib/mirror/artifacts"

            [remote]
            url = "https://registry-1.docker.io"
            upstream-name = "library/busybox"
            username = "robot"
            password = "hunter2"
            include-tags = ["1.*"]
            exclude-tags = ["*-musl"]
            mode = "mirror"
            max-concurrent-downloads = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.repository, "busybox");
        assert!(matches!(config.artifacts, StoreConfig::Local { ref path } if path == "/var/lib/mirror/artifacts"));
        assert_eq!(config.remote.url.host(), Some("registry-1.docker.io"));
        assert_eq!(config.remote.options.upstream_name, "library/busybox");
        assert_eq!(config.remote.options.mode, SyncMode::Mirror);
        assert_eq!(config.remote.options.max_concurrent_downloads, 4);

        let credentials = config.remote.credentials().unwrap();
        assert_eq!(credentials.username, "robot");

        let filter = config.remote.options.filter().unwrap();
        assert!(filter.matches("1.36"));
        assert!(!filter.matches("1.36-musl"));
    }

    #[test]
    fn defaults() {
        let config = MirrorConfig::from_toml(
            r#"
            state = "state.json"
            repository = "busybox"

            [remote]
            url = "https://registry.example.com"
            upstream-name = "busybox"
            "#,
        )
        .unwrap();

        assert!(matches!(config.artifacts, StoreConfig::Memory));
        assert_eq!(config.remote.options.mode, SyncMode::Additive);
        assert_eq!(
            config.remote.options.max_concurrent_downloads,
            DEFAULT_MAX_CONCURRENT_DOWNLOADS
        );
        assert!(config.remote.credentials().is_none());
        assert!(config.remote.options.filter().unwrap().matches("anything"));
    }

    #[test]
    fn bad_url() {
        let error = MirrorConfig::from_toml(
            r#"
            state = "state.json"
            repository = "busybox"

            [remote]
            url = "not a url"
            upstream-name = "busybox"
            "#,
        )
        .unwrap_err();
        assert!(matches!(error, ConfigError::Toml(_)));
    }
}
