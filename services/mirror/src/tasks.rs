use std::sync::Arc;

use artifacts::ArtifactStore;
use content::{
    ContentRef, ContentResult, ContentSet, ContentStore, Delta, Digest, Repositories,
    VersionReport,
};
use registry_client::RegistryClient;

use crate::config::{SyncMode, SyncOptions};
use crate::error::{Stage, StageExt, SyncError};
use crate::pipeline::Pipeline;
use crate::report::SyncReport;

/// The content graph, repositories and artifacts the mirror works on.
///
/// Cloning is cheap; clones share state.
#[derive(Debug, Clone)]
pub struct Mirror {
    store: Arc<ContentStore>,
    repositories: Arc<Repositories>,
    artifacts: ArtifactStore,
}

impl Mirror {
    /// Work on the given state.
    pub fn new(
        store: Arc<ContentStore>,
        repositories: Arc<Repositories>,
        artifacts: ArtifactStore,
    ) -> Self {
        Mirror {
            store,
            repositories,
            artifacts,
        }
    }

    /// The content store.
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// The repositories.
    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    /// The artifact store.
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Synchronize `repository` from the upstream registry behind `client`.
    ///
    /// The repository is created if it does not exist. On success exactly one
    /// new version is created; on failure none is.
    #[tracing::instrument(skip(self, client, options), fields(upstream = %options.upstream_name, mode = ?options.mode))]
    pub async fn synchronize(
        &self,
        client: RegistryClient,
        options: &SyncOptions,
        repository: &str,
    ) -> Result<SyncReport, SyncError> {
        let filter = options.filter().stage(Stage::Tags)?;
        self.repositories.ensure(repository);

        let pipeline = Pipeline::new(
            client,
            options.upstream_name.clone(),
            self.store.clone(),
            self.artifacts.clone(),
            options.max_concurrent_downloads,
        );
        let synced = pipeline.run(&filter).await?;

        let version = self
            .publish(repository, options.mode, synced)
            .stage(Stage::Relate)?;
        let report = pipeline.progress().report(version);
        tracing::info!(
            version = report.version.version,
            added = ?report.version.added,
            removed = ?report.version.removed,
            "sync complete"
        );
        Ok(report)
    }

    fn publish(
        &self,
        repository: &str,
        mode: SyncMode,
        synced: ContentSet,
    ) -> ContentResult<VersionReport> {
        let units = units(synced);
        let version = match mode {
            SyncMode::Additive => {
                content::recursive_add(&self.store, &self.repositories, repository, &units)?
            }
            SyncMode::Mirror => {
                let closure = content::add_closure(&self.store, &units)?;
                self.repositories
                    .new_version(&self.store, repository, |current| {
                        Ok(Delta {
                            add: closure,
                            remove: current.clone(),
                        })
                    })?
            }
        };
        Ok(version.report(repository))
    }

    /// Add `units` and everything they reference to `repository`.
    pub fn recursive_add(
        &self,
        repository: &str,
        units: &[ContentRef],
    ) -> ContentResult<VersionReport> {
        content::recursive_add(&self.store, &self.repositories, repository, units)
            .map(|version| version.report(repository))
    }

    /// Remove `units`, and whatever only they referenced, from `repository`.
    pub fn recursive_remove(
        &self,
        repository: &str,
        units: &[ContentRef],
    ) -> ContentResult<VersionReport> {
        content::recursive_remove(&self.store, &self.repositories, repository, units)
            .map(|version| version.report(repository))
    }

    /// Point tag `name` at `manifest` in `repository`.
    pub fn tag_image(
        &self,
        repository: &str,
        name: &str,
        manifest: &Digest,
    ) -> ContentResult<VersionReport> {
        content::tag_image(&self.store, &self.repositories, repository, name, manifest)
            .map(|version| version.report(repository))
    }

    /// Remove tag `name` from `repository`.
    pub fn untag_image(&self, repository: &str, name: &str) -> ContentResult<VersionReport> {
        content::untag_image(&self.store, &self.repositories, repository, name)
            .map(|version| version.report(repository))
    }
}

fn units(synced: ContentSet) -> Vec<ContentRef> {
    let ContentSet {
        tags,
        manifests,
        blobs,
    } = synced;
    tags.into_iter()
        .map(ContentRef::Tag)
        .chain(manifests.into_iter().map(ContentRef::Manifest))
        .chain(blobs.into_iter().map(ContentRef::Blob))
        .collect()
}
