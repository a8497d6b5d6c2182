//! # Artifact store
//!
//! Durable storage for manifest and blob bytes, keyed by digest. Artifacts
//! are written once; storing the same bytes again is a no-op.

use std::sync::Arc;

use bytes::Bytes;
use camino::Utf8PathBuf;
use content::{compute_digest, Digest};
use serde::Deserialize;
use tokio::io::AsyncReadExt;

mod driver;
mod error;
mod local;
mod memory;

#[doc(inline)]
pub use driver::{Driver, Metadata, Reader};
#[doc(inline)]
pub use error::{ArtifactError, ArtifactErrorBuilder, ArtifactErrorKind};
#[doc(inline)]
pub use local::LocalDriver;
#[doc(inline)]
pub use memory::MemoryDriver;

/// Which driver to use for artifacts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreConfig {
    /// Keep artifacts in memory.
    #[default]
    Memory,

    /// Keep artifacts in a local directory.
    Local {
        /// Root directory.
        path: Utf8PathBuf,
    },
}

impl StoreConfig {
    /// Build the configured store.
    #[tracing::instrument]
    pub fn build(self) -> ArtifactStore {
        match self {
            StoreConfig::Memory => MemoryDriver::new().into(),
            StoreConfig::Local { path } => LocalDriver::new(path).into(),
        }
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// Content-addressed artifact storage over a [`Driver`].
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    driver: ArcDriver,
}

impl<D> From<D> for ArtifactStore
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        ArtifactStore::new(value)
    }
}

impl ArtifactStore {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// Name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// Store `data`, returning its sha256 digest.
    #[tracing::instrument(skip_all, fields(driver = self.driver.name(), size = data.len()))]
    pub async fn put(&self, data: Bytes) -> Result<Digest, ArtifactError> {
        let digest = compute_digest(&data);
        self.store(&digest, data).await?;
        Ok(digest)
    }

    /// Store `data` only if it hashes to `expected`.
    #[tracing::instrument(skip(self, data), fields(driver = self.driver.name(), size = data.len()))]
    pub async fn put_verified(&self, expected: &Digest, data: Bytes) -> Result<(), ArtifactError> {
        if !expected.verify(&data) {
            return Err(ArtifactError::builder(
                self.driver.name(),
                ArtifactErrorKind::DigestMismatch,
                format!("content does not hash to {expected}"),
            )
            .digest(expected.clone())
            .build());
        }
        self.store(expected, data).await
    }

    async fn store(&self, digest: &Digest, data: Bytes) -> Result<(), ArtifactError> {
        if self.driver.exists(digest).await? {
            tracing::trace!(%digest, "artifact already stored");
            return Ok(());
        }
        self.driver.write(digest, data).await
    }

    /// Open an artifact for streaming.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn open(&self, digest: &Digest) -> Result<Box<Reader>, ArtifactError> {
        self.driver.open(digest).await
    }

    /// Read a whole artifact into memory.
    #[tracing::instrument(skip(self), fields(driver = self.driver.name()))]
    pub async fn read(&self, digest: &Digest) -> Result<Bytes, ArtifactError> {
        let mut reader = self.driver.open(digest).await?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|err| ArtifactError::io(self.driver.name(), digest, err))?;
        Ok(buf.into())
    }

    /// Whether an artifact exists.
    pub async fn exists(&self, digest: &Digest) -> Result<bool, ArtifactError> {
        self.driver.exists(digest).await
    }

    /// Size and creation time of an artifact.
    pub async fn metadata(&self, digest: &Digest) -> Result<Metadata, ArtifactError> {
        self.driver.metadata(digest).await
    }
}
