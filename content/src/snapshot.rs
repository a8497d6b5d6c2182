//! JSON snapshots of the content store and repositories.

use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{ContentError, ContentResult};
use crate::manifest::Platform;
use crate::model::{Blob, Manifest, Tag};
use crate::repository::{Repositories, Repository};
use crate::store::ContentStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Member {
    list: Digest,
    manifest: Digest,
    platform: Platform,
}

/// Serialized form of a [`ContentStore`] and its [`Repositories`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Snapshot {
    #[serde(default)]
    blobs: Vec<Blob>,
    #[serde(default)]
    manifests: Vec<Manifest>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    layers: Vec<(Digest, Vec<Digest>)>,
    #[serde(default)]
    configs: Vec<(Digest, Digest)>,
    #[serde(default)]
    members: Vec<Member>,
    #[serde(default)]
    repositories: Vec<Repository>,
}

impl Snapshot {
    /// Capture the current state.
    pub fn capture(store: &ContentStore, repositories: &Repositories) -> Self {
        Snapshot {
            blobs: store.all_blobs(),
            manifests: store.all_manifests(),
            tags: store.all_tags(),
            layers: store.all_layers(),
            configs: store.all_configs(),
            members: store
                .all_members()
                .into_iter()
                .map(|(list, manifest, platform)| Member {
                    list,
                    manifest,
                    platform,
                })
                .collect(),
            repositories: repositories.all(),
        }
    }

    /// Rebuild a store and repositories from this snapshot.
    pub fn restore(self) -> ContentResult<(ContentStore, Repositories)> {
        let store = ContentStore::new();
        for blob in self.blobs {
            store.find_or_create_blob(blob);
        }
        for manifest in self.manifests {
            store.find_or_create_manifest(manifest);
        }
        for tag in self.tags {
            store.find_or_create_tag(tag)?;
        }
        for (manifest, layers) in self.layers {
            for layer in layers {
                store.relate_blob(&manifest, &layer)?;
            }
        }
        for (manifest, config) in self.configs {
            store.relate_config(&manifest, &config)?;
        }
        for member in self.members {
            store.relate_list_member(&member.list, &member.manifest, member.platform)?;
        }

        Ok((store, Repositories::from_repositories(self.repositories)))
    }

    /// Write a snapshot of `store` and `repositories` to `path`.
    ///
    /// The file is replaced atomically.
    #[tracing::instrument(skip(store, repositories))]
    pub fn save(
        path: &Path,
        store: &ContentStore,
        repositories: &Repositories,
    ) -> ContentResult<()> {
        let snapshot = Snapshot::capture(store, repositories);
        let data = serde_json::to_vec(&snapshot).map_err(ContentError::SnapshotEncoding)?;

        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        let mut file = tempfile::NamedTempFile::new_in(directory).map_err(ContentError::Snapshot)?;
        file.write_all(&data).map_err(ContentError::Snapshot)?;
        file.persist(path)
            .map_err(|error| ContentError::Snapshot(error.error))?;

        tracing::debug!(bytes = data.len(), "saved snapshot");
        Ok(())
    }

    /// Load a snapshot from `path`. A missing file yields an empty state.
    #[tracing::instrument]
    pub fn load(path: &Path) -> ContentResult<(ContentStore, Repositories)> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no snapshot, starting empty");
                return Ok((ContentStore::new(), Repositories::new()));
            }
            Err(error) => return Err(ContentError::Snapshot(error)),
        };

        let snapshot: Snapshot =
            serde_json::from_slice(&data).map_err(ContentError::SnapshotEncoding)?;
        snapshot.restore()
    }
}
