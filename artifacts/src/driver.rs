use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use content::Digest;
use tokio::io;

use crate::error::ArtifactError;

/// A reader stream for artifact contents.
pub type Reader = dyn io::AsyncBufRead + Unpin + Send + Sync;

/// Metadata common to all drivers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// Size in bytes.
    pub size: u64,

    /// When the artifact was stored.
    pub created: DateTime<Utc>,
}

/// Backend storing artifact bytes keyed by digest.
///
/// Drivers trust the digest they are given; hashing happens in
/// [`ArtifactStore`](crate::ArtifactStore).
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// Name of the driver, used in errors and spans.
    fn name(&self) -> &'static str;

    /// Whether an artifact is stored under `digest`.
    async fn exists(&self, digest: &Digest) -> Result<bool, ArtifactError>;

    /// Metadata for a stored artifact.
    async fn metadata(&self, digest: &Digest) -> Result<Metadata, ArtifactError>;

    /// Store `data` under `digest`. Writing an existing digest replaces it
    /// with identical bytes.
    async fn write(&self, digest: &Digest, data: Bytes) -> Result<(), ArtifactError>;

    /// Open a stored artifact for reading.
    async fn open(&self, digest: &Digest) -> Result<Box<Reader>, ArtifactError>;
}
