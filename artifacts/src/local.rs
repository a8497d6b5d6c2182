use bytes::Bytes;
use camino::{Utf8Path, Utf8PathBuf};
use content::Digest;
use tokio::io::AsyncWriteExt;

use crate::driver::{Driver, Metadata, Reader};
use crate::error::{ArtifactError, ArtifactErrorKind};

/// Driver storing artifacts as files under a root directory.
///
/// Files are laid out as `<root>/<algorithm>/<first two hex>/<hex>`.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Store artifacts below `root`.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    /// The root directory.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path(&self, digest: &Digest) -> Utf8PathBuf {
        let hex = digest.hex();
        let mut path = self.root.join(digest.algorithm().name());
        path.push(&hex[..2]);
        path.push(hex);
        path
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn exists(&self, digest: &Digest) -> Result<bool, ArtifactError> {
        tokio::fs::try_exists(self.path(digest))
            .await
            .map_err(|err| ArtifactError::io(self.name(), digest, err))
    }

    async fn metadata(&self, digest: &Digest) -> Result<Metadata, ArtifactError> {
        let metadata = tokio::fs::metadata(self.path(digest))
            .await
            .map_err(|err| ArtifactError::io(self.name(), digest, err))?;

        let created = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(|err| ArtifactError::io(self.name(), digest, err))?;

        Ok(Metadata {
            size: metadata.len(),
            created: created.into(),
        })
    }

    async fn write(&self, digest: &Digest, data: Bytes) -> Result<(), ArtifactError> {
        let path = self.path(digest);
        let parent = path.parent().ok_or_else(|| {
            ArtifactError::builder(self.name(), ArtifactErrorKind::Io, "artifact path has no parent")
                .digest(digest.clone())
                .build()
        })?;

        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| ArtifactError::io(self.name(), digest, err))?;

        // Readers must never observe a partial artifact.
        let partial = parent.join(format!(".{}.{}", digest.hex(), uuid::Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|err| ArtifactError::io(self.name(), digest, err))?;
        file.write_all(&data)
            .await
            .map_err(|err| ArtifactError::io(self.name(), digest, err))?;
        file.shutdown()
            .await
            .map_err(|err| ArtifactError::io(self.name(), digest, err))?;

        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|err| ArtifactError::io(self.name(), digest, err))?;

        tracing::trace!(%digest, %path, "local write");
        Ok(())
    }

    async fn open(&self, digest: &Digest) -> Result<Box<Reader>, ArtifactError> {
        let file = tokio::fs::File::open(self.path(digest))
            .await
            .map_err(|err| ArtifactError::io(self.name(), digest, err))?;
        Ok(Box::new(tokio::io::BufReader::new(file)))
    }
}
