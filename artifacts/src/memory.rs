use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use content::Digest;
use tokio::sync::RwLock;

use crate::driver::{Driver, Metadata, Reader};
use crate::error::ArtifactError;

#[derive(Debug, Clone)]
struct MemoryItem {
    created: DateTime<Utc>,
    data: Bytes,
}

impl From<&MemoryItem> for Metadata {
    fn from(value: &MemoryItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

/// Driver keeping artifacts in memory.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    items: RwLock<HashMap<Digest, MemoryItem>>,
}

impl MemoryDriver {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, digest: &Digest) -> Result<bool, ArtifactError> {
        Ok(self.items.read().await.contains_key(digest))
    }

    async fn metadata(&self, digest: &Digest) -> Result<Metadata, ArtifactError> {
        self.items
            .read()
            .await
            .get(digest)
            .map(Metadata::from)
            .ok_or_else(|| ArtifactError::not_found(self.name(), digest))
    }

    async fn write(&self, digest: &Digest, data: Bytes) -> Result<(), ArtifactError> {
        tracing::trace!(%digest, size = data.len(), "memory write");
        self.items.write().await.insert(
            digest.clone(),
            MemoryItem {
                created: Utc::now(),
                data,
            },
        );
        Ok(())
    }

    async fn open(&self, digest: &Digest) -> Result<Box<Reader>, ArtifactError> {
        let item = self
            .items
            .read()
            .await
            .get(digest)
            .cloned()
            .ok_or_else(|| ArtifactError::not_found(self.name(), digest))?;

        Ok(Box::new(std::io::Cursor::new(item.data)))
    }
}
