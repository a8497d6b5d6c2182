//! The sync pipeline.
//!
//! Six stages run concurrently on one task, joined by bounded channels:
//!
//! 1. tags: list upstream tags and apply the tag filter
//! 2. manifests: download each tagged manifest
//! 3. classify: declare manifest list members as forward references
//! 4. artifacts: download list members and blobs
//! 5. persist: create content units
//! 6. relate: create relations, waiting on forward references
//!
//! The first error from any stage cancels every other stage. Content units
//! created before the error stay in the store; no repository version is
//! created for a failed sync.

use std::future::Future;
use std::sync::Arc;

use artifacts::ArtifactStore;
use content::manifest::BlobRef;
use content::{
    compute_digest, media, Blob, BlobKind, ContentSet, ContentStore, ContentValidationError,
    Digest, Manifest, ManifestDocument, ManifestKind, Platform, Tag,
};
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use registry_client::RegistryClient;
use tokio::sync::{mpsc, OnceCell, Semaphore};

use crate::error::{Stage, StageExt, SyncError, SyncErrorKind};
use crate::filter::TagFilter;
use crate::forward::{ForwardRefs, Resolution};
use crate::report::Progress;

const QUEUE: usize = 64;

/// A manifest downloaded and verified.
#[derive(Debug)]
struct Fetched {
    reference: String,
    tag: Option<String>,
    digest: Digest,
    artifact: Digest,
    document: ManifestDocument,
}

impl Fetched {
    fn manifest(&self) -> Result<Manifest, SyncErrorKind> {
        Manifest::new(
            self.digest.clone(),
            self.document.media_type.clone(),
            self.artifact.clone(),
        )
        .ok_or_else(|| SyncErrorKind::Validation {
            reference: self.reference.clone(),
            source: ContentValidationError::UnsupportedMediaType(self.document.media_type.clone()),
        })
    }

    fn is_list(&self) -> bool {
        self.document.kind == ManifestKind::List
    }
}

#[derive(Debug)]
enum Declared {
    /// A tagged manifest or list.
    Manifest(Fetched),

    /// A list member to download by digest.
    Member(Digest),
}

/// A manifest whose artifacts are all stored.
#[derive(Debug)]
struct Settled {
    fetched: Fetched,
    layers: Vec<Blob>,
    config: Option<Blob>,
}

#[derive(Debug)]
enum Relation {
    Manifest(Digest),
    Layer {
        manifest: Digest,
        blob: Digest,
    },
    Config {
        manifest: Digest,
        blob: Digest,
    },
    Member {
        list: Digest,
        member: Digest,
        platform: Platform,
    },
    Tagged {
        name: String,
        manifest: Digest,
    },
}

/// State shared by the stages of one sync.
#[derive(Debug)]
pub(crate) struct Pipeline {
    client: RegistryClient,
    upstream: String,
    store: Arc<ContentStore>,
    artifacts: ArtifactStore,
    limit: usize,
    downloads: Semaphore,
    blobs: DashMap<Digest, Arc<OnceCell<()>>>,
    forward: ForwardRefs,
    progress: Progress,
}

impl Pipeline {
    pub(crate) fn new(
        client: RegistryClient,
        upstream: impl Into<String>,
        store: Arc<ContentStore>,
        artifacts: ArtifactStore,
        max_concurrent_downloads: usize,
    ) -> Self {
        let limit = max_concurrent_downloads.max(1);
        Pipeline {
            client,
            upstream: upstream.into(),
            store,
            artifacts,
            limit,
            downloads: Semaphore::new(limit),
            blobs: DashMap::new(),
            forward: ForwardRefs::new(),
            progress: Progress::default(),
        }
    }

    pub(crate) fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Run every stage to completion, returning the content synchronized.
    #[tracing::instrument(skip_all, fields(upstream = %self.upstream))]
    pub(crate) async fn run(&self, filter: &TagFilter) -> Result<ContentSet, SyncError> {
        let (tags_tx, tags_rx) = mpsc::channel(QUEUE);
        let (fetched_tx, fetched_rx) = mpsc::channel(QUEUE);
        let (declared_tx, declared_rx) = mpsc::channel(QUEUE);
        let (settled_tx, settled_rx) = mpsc::channel(QUEUE);
        let (relations_tx, relations_rx) = mpsc::channel(QUEUE);

        let ((), (), (), (), (), synced) = tokio::try_join!(
            self.tags(filter, tags_tx),
            self.manifests(tags_rx, fetched_tx),
            self.classify(fetched_rx, declared_tx),
            self.download(declared_rx, settled_tx),
            self.persist(settled_rx, relations_tx),
            self.relate(relations_rx),
        )?;

        tracing::info!(
            tags = synced.tags.len(),
            manifests = synced.manifests.len(),
            blobs = synced.blobs.len(),
            "pipeline finished"
        );
        Ok(synced)
    }

    async fn tags(&self, filter: &TagFilter, output: mpsc::Sender<String>) -> Result<(), SyncError> {
        let tags = self.client.tags(&self.upstream).await.stage(Stage::Tags)?;
        for tag in tags {
            self.progress.received(Stage::Tags);
            if !filter.matches(&tag) {
                tracing::trace!(tag, "excluded by tag filter");
                continue;
            }
            output
                .send(tag)
                .await
                .map_err(|_| SyncError::closed(Stage::Tags))?;
            self.progress.emitted(Stage::Tags);
        }
        Ok(())
    }

    async fn manifests(
        &self,
        input: mpsc::Receiver<String>,
        output: mpsc::Sender<Fetched>,
    ) -> Result<(), SyncError> {
        fan_out(
            Stage::Manifests,
            &self.progress,
            self.limit,
            input,
            output,
            move |tag: String| async move {
                let fetched = self
                    .fetch_manifest(&tag, Some(tag.clone()))
                    .await
                    .stage(Stage::Manifests)?;
                Ok(vec![fetched])
            },
        )
        .await
    }

    async fn classify(
        &self,
        mut input: mpsc::Receiver<Fetched>,
        output: mpsc::Sender<Declared>,
    ) -> Result<(), SyncError> {
        while let Some(fetched) = input.recv().await {
            self.progress.received(Stage::Classify);
            for declared in self.declare(fetched) {
                output
                    .send(declared)
                    .await
                    .map_err(|_| SyncError::closed(Stage::Classify))?;
                self.progress.emitted(Stage::Classify);
            }
        }
        Ok(())
    }

    /// Members of a list are declared before the list itself is passed on,
    /// so every member reaching the relate stage has a forward reference.
    fn declare(&self, fetched: Fetched) -> Vec<Declared> {
        let mut declared = Vec::new();
        if fetched.is_list() {
            for (member, _, _) in fetched.document.members() {
                if self.store.manifest(&member).is_some() {
                    continue;
                }
                if self.forward.declare(&member) {
                    declared.push(Declared::Member(member));
                }
            }
        }
        declared.push(Declared::Manifest(fetched));
        declared
    }

    async fn download(
        &self,
        input: mpsc::Receiver<Declared>,
        output: mpsc::Sender<Settled>,
    ) -> Result<(), SyncError> {
        fan_out(
            Stage::Artifacts,
            &self.progress,
            self.limit,
            input,
            output,
            move |declared: Declared| async move {
                let settled = self.settle(declared).await.stage(Stage::Artifacts)?;
                Ok(vec![settled])
            },
        )
        .await
    }

    async fn settle(&self, declared: Declared) -> Result<Settled, SyncErrorKind> {
        match declared {
            Declared::Manifest(fetched) if fetched.is_list() => Ok(Settled {
                fetched,
                layers: Vec::new(),
                config: None,
            }),
            Declared::Manifest(fetched) => self.download_blobs(fetched).await,
            Declared::Member(digest) => {
                let fetched = self.fetch_manifest(digest.as_str(), None).await?;
                if fetched.is_list() {
                    return Err(SyncErrorKind::NestedList(digest));
                }
                self.download_blobs(fetched).await
            }
        }
    }

    async fn download_blobs(&self, fetched: Fetched) -> Result<Settled, SyncErrorKind> {
        let layers = futures::future::try_join_all(
            fetched
                .document
                .layers()
                .into_iter()
                .map(|blob| self.blob(blob)),
        )
        .await?;

        let config = match fetched.document.config() {
            Some(config) => Some(self.blob(config).await?),
            None => None,
        };

        Ok(Settled {
            fetched,
            layers,
            config,
        })
    }

    async fn blob(&self, blob: BlobRef) -> Result<Blob, SyncErrorKind> {
        if matches!(BlobKind::from_media_type(&blob.media_type), BlobKind::Foreign) {
            tracing::debug!(digest = %blob.digest, "not downloading foreign layer");
            self.progress.foreign_skipped();
            return Ok(Blob::new(blob.digest, blob.media_type, None));
        }

        // Concurrent requests for one digest share a single download.
        let cell = self.blobs.entry(blob.digest.clone()).or_default().clone();
        cell.get_or_try_init(|| self.download_blob(&blob.digest))
            .await?;

        Ok(Blob::new(
            blob.digest.clone(),
            blob.media_type,
            Some(blob.digest),
        ))
    }

    async fn download_blob(&self, digest: &Digest) -> Result<(), SyncErrorKind> {
        if self.artifacts.exists(digest).await? {
            self.progress.blob_present();
            return Ok(());
        }

        let data = {
            let _permit = self
                .downloads
                .acquire()
                .await
                .map_err(|_| SyncErrorKind::Closed)?;
            self.client.blob(&self.upstream, digest).await?
        };

        let size = data.len();
        self.artifacts.put_verified(digest, data).await?;
        self.progress.blob_downloaded();
        tracing::debug!(%digest, size, "downloaded blob");
        Ok(())
    }

    /// Download a manifest by tag or digest and establish its digest.
    ///
    /// Signed schema-1 manifests are verified, and identified by the digest
    /// of their payload. A manifest requested by digest, or served with a
    /// `Docker-Content-Digest` header, must hash to that digest.
    async fn fetch_manifest(
        &self,
        reference: &str,
        tag: Option<String>,
    ) -> Result<Fetched, SyncErrorKind> {
        let response = {
            let _permit = self
                .downloads
                .acquire()
                .await
                .map_err(|_| SyncErrorKind::Closed)?;
            self.client.manifest(&self.upstream, reference).await?
        };
        self.progress.manifest_downloaded();

        let document = ManifestDocument::parse(&response.bytes, response.media_type.as_deref())
            .map_err(|source| SyncErrorKind::Validation {
                reference: reference.to_owned(),
                source,
            })?;

        let payload = if document.media_type == media::MANIFEST_V1_SIGNED {
            let signature = |source| SyncErrorKind::Signature {
                reference: reference.to_owned(),
                source,
            };
            jose::jws::verify_pretty(&response.bytes).map_err(signature)?;
            Some(jose::jws::payload(&response.bytes).map_err(signature)?)
        } else {
            None
        };
        let content = payload.as_deref().unwrap_or(&response.bytes[..]);

        let digest = match Digest::parse(reference) {
            Ok(expected) if expected.verify(content) => expected,
            Ok(expected) => {
                return Err(SyncErrorKind::DigestMismatch {
                    reference: reference.to_owned(),
                    expected: expected.to_string(),
                    actual: compute_digest(content),
                })
            }
            Err(_) => compute_digest(content),
        };

        if let Some(announced) = response.digest.as_deref() {
            match Digest::parse(announced) {
                Ok(announced) if announced.verify(content) => {}
                Ok(announced) => {
                    return Err(SyncErrorKind::DigestMismatch {
                        reference: reference.to_owned(),
                        expected: announced.to_string(),
                        actual: digest,
                    })
                }
                Err(error) => tracing::warn!(reference, %error, "ignoring malformed content digest"),
            }
        }

        let artifact = self.artifacts.put(response.bytes).await?;
        tracing::debug!(reference, %digest, media_type = %document.media_type, "fetched manifest");

        Ok(Fetched {
            reference: reference.to_owned(),
            tag,
            digest,
            artifact,
            document,
        })
    }

    async fn persist(
        &self,
        mut input: mpsc::Receiver<Settled>,
        output: mpsc::Sender<Relation>,
    ) -> Result<(), SyncError> {
        while let Some(settled) = input.recv().await {
            self.progress.received(Stage::Persist);
            for relation in self.create(settled).stage(Stage::Persist)? {
                output
                    .send(relation)
                    .await
                    .map_err(|_| SyncError::closed(Stage::Persist))?;
                self.progress.emitted(Stage::Persist);
            }
        }
        Ok(())
    }

    fn create(&self, settled: Settled) -> Result<Vec<Relation>, SyncErrorKind> {
        let Settled {
            fetched,
            layers,
            config,
        } = settled;
        let manifest = fetched.manifest()?;
        let digest = manifest.digest.clone();
        let mut relations = Vec::new();

        for layer in layers {
            let (blob, _) = self.store.find_or_create_blob(layer);
            relations.push(Relation::Layer {
                manifest: digest.clone(),
                blob: blob.digest,
            });
        }
        if let Some(config) = config {
            let (blob, _) = self.store.find_or_create_blob(config);
            relations.push(Relation::Config {
                manifest: digest.clone(),
                blob: blob.digest,
            });
        }

        let (_, created) = self.store.find_or_create_manifest(manifest);
        tracing::trace!(%digest, created, "persisted manifest");

        relations.push(Relation::Manifest(digest.clone()));
        for (member, _, platform) in fetched.document.members() {
            relations.push(Relation::Member {
                list: digest.clone(),
                member,
                platform,
            });
        }
        if let Some(name) = fetched.tag {
            relations.push(Relation::Tagged {
                name,
                manifest: digest.clone(),
            });
        }

        self.forward.resolve(&digest);
        Ok(relations)
    }

    async fn relate(&self, mut input: mpsc::Receiver<Relation>) -> Result<ContentSet, SyncError> {
        let mut synced = ContentSet::new();
        let mut waiting = FuturesUnordered::new();
        let mut open = true;

        loop {
            tokio::select! {
                relation = input.recv(), if open => match relation {
                    Some(Relation::Member { list, member, platform })
                        if self.store.manifest(&member).is_none() =>
                    {
                        self.progress.received(Stage::Relate);
                        let resolution = self.forward.wait(&member);
                        waiting.push(async move {
                            (resolution.await, list, member, platform)
                        });
                    }
                    Some(relation) => {
                        self.progress.received(Stage::Relate);
                        self.apply(relation, &mut synced).stage(Stage::Relate)?;
                    }
                    None => {
                        open = false;
                        let abandoned = self.forward.abandon_pending();
                        if abandoned > 0 {
                            tracing::warn!(abandoned, "manifest list members were never stored");
                        }
                    }
                },
                Some((resolution, list, member, platform)) = waiting.next(), if !waiting.is_empty() => {
                    if resolution == Resolution::Abandoned {
                        return Err(SyncError::new(Stage::Relate, SyncErrorKind::Unresolved(member)));
                    }
                    let relation = Relation::Member { list, member, platform };
                    self.apply(relation, &mut synced).stage(Stage::Relate)?;
                }
                else => break,
            }
        }

        Ok(synced)
    }

    fn apply(&self, relation: Relation, synced: &mut ContentSet) -> Result<(), SyncErrorKind> {
        match relation {
            Relation::Manifest(digest) => {
                synced.manifests.insert(digest);
            }
            Relation::Layer { manifest, blob } => {
                self.store.relate_blob(&manifest, &blob)?;
                synced.blobs.insert(blob);
            }
            Relation::Config { manifest, blob } => {
                self.store.relate_config(&manifest, &blob)?;
                synced.blobs.insert(blob);
            }
            Relation::Member {
                list,
                member,
                platform,
            } => {
                self.store.relate_list_member(&list, &member, platform)?;
                synced.manifests.insert(member);
            }
            Relation::Tagged { name, manifest } => {
                let (tag, created) = self.store.find_or_create_tag(Tag::new(name, manifest))?;
                if !created {
                    self.progress.tag_reused();
                }
                synced.tags.insert(tag);
            }
        }
        self.progress.emitted(Stage::Relate);
        Ok(())
    }
}

/// Run `work` on up to `limit` items from `input` at once, forwarding results
/// to `output` as they complete.
async fn fan_out<T, U, F, Fut>(
    stage: Stage,
    progress: &Progress,
    limit: usize,
    mut input: mpsc::Receiver<T>,
    output: mpsc::Sender<U>,
    mut work: F,
) -> Result<(), SyncError>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<Vec<U>, SyncError>>,
{
    let mut running = FuturesUnordered::new();
    let mut open = true;

    loop {
        tokio::select! {
            item = input.recv(), if open && running.len() < limit => match item {
                Some(item) => {
                    progress.received(stage);
                    running.push(work(item));
                }
                None => open = false,
            },
            Some(result) = running.next(), if !running.is_empty() => {
                for item in result? {
                    output.send(item).await.map_err(|_| SyncError::closed(stage))?;
                    progress.emitted(stage);
                }
            }
            else => break,
        }
    }

    Ok(())
}
