//! Repositories and their immutable versions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{ContentError, ContentResult};
use crate::model::Tag;
use crate::store::ContentStore;

/// Membership of content in a repository version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSet {
    /// Tags.
    #[serde(default)]
    pub tags: BTreeSet<Tag>,

    /// Manifests and manifest lists.
    #[serde(default)]
    pub manifests: BTreeSet<Digest>,

    /// Blobs.
    #[serde(default)]
    pub blobs: BTreeSet<Digest>,
}

impl ContentSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the set holds no content.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.manifests.is_empty() && self.blobs.is_empty()
    }

    /// Add everything in `other` to this set.
    pub fn extend(&mut self, other: ContentSet) {
        self.tags.extend(other.tags);
        self.manifests.extend(other.manifests);
        self.blobs.extend(other.blobs);
    }

    /// Content in `self` but not in `other`.
    pub fn difference(&self, other: &ContentSet) -> ContentSet {
        ContentSet {
            tags: self.tags.difference(&other.tags).cloned().collect(),
            manifests: self.manifests.difference(&other.manifests).cloned().collect(),
            blobs: self.blobs.difference(&other.blobs).cloned().collect(),
        }
    }

    /// The tag with the given name, if any.
    pub fn tag(&self, name: &str) -> Option<&Tag> {
        self.tags.iter().find(|t| t.name == name)
    }

    /// Per-kind counts.
    pub fn counts(&self) -> ContentCounts {
        ContentCounts {
            tags: self.tags.len(),
            manifests: self.manifests.len(),
            blobs: self.blobs.len(),
        }
    }
}

/// Number of units of each kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCounts {
    /// Tags.
    pub tags: usize,
    /// Manifests and manifest lists.
    pub manifests: usize,
    /// Blobs.
    pub blobs: usize,
}

/// Content to add and remove when creating a version.
///
/// Removals are applied before additions.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    /// Content to add.
    pub add: ContentSet,

    /// Content to remove.
    pub remove: ContentSet,
}

/// An immutable snapshot of repository content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryVersion {
    number: u64,
    content: ContentSet,
    added: ContentSet,
    removed: ContentSet,
}

impl RepositoryVersion {
    /// Version number, starting at 0 for the empty initial version.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Everything present in this version.
    pub fn content(&self) -> &ContentSet {
        &self.content
    }

    /// Content added relative to the previous version.
    pub fn added(&self) -> &ContentSet {
        &self.added
    }

    /// Content removed relative to the previous version.
    pub fn removed(&self) -> &ContentSet {
        &self.removed
    }

    /// Summarize this version for a task report.
    pub fn report(&self, repository: &str) -> VersionReport {
        VersionReport {
            repository: repository.to_owned(),
            version: self.number,
            added: self.added.counts(),
            removed: self.removed.counts(),
        }
    }
}

/// Summary of a version transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReport {
    /// Repository name.
    pub repository: String,
    /// New version number.
    pub version: u64,
    /// Units added.
    pub added: ContentCounts,
    /// Units removed.
    pub removed: ContentCounts,
}

/// A named, versioned repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    name: String,
    versions: Vec<Arc<RepositoryVersion>>,
}

impl Repository {
    fn new(name: String) -> Self {
        Repository {
            name,
            versions: vec![Arc::new(RepositoryVersion {
                number: 0,
                content: ContentSet::new(),
                added: ContentSet::new(),
                removed: ContentSet::new(),
            })],
        }
    }

    /// Repository name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn latest(&self) -> Arc<RepositoryVersion> {
        // Every repository is created with version 0.
        self.versions
            .last()
            .cloned()
            .unwrap_or_else(|| Repository::new(self.name.clone()).versions[0].clone())
    }
}

/// All repositories.
///
/// Version creation holds the write lock for the whole transition, so
/// readers see either the old latest version or the complete new one.
#[derive(Debug, Default)]
pub struct Repositories {
    inner: RwLock<BTreeMap<String, Repository>>,
}

impl Repositories {
    /// No repositories.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_repositories(repositories: Vec<Repository>) -> Self {
        Repositories {
            inner: RwLock::new(
                repositories
                    .into_iter()
                    .map(|r| (r.name.clone(), r))
                    .collect(),
            ),
        }
    }

    pub(crate) fn all(&self) -> Vec<Repository> {
        self.inner.read().values().cloned().collect()
    }

    /// Create an empty repository.
    pub fn create(&self, name: &str) -> ContentResult<()> {
        let mut inner = self.inner.write();
        if inner.contains_key(name) {
            return Err(ContentError::RepositoryExists(name.to_owned()));
        }
        tracing::debug!(repository = name, "created repository");
        inner.insert(name.to_owned(), Repository::new(name.to_owned()));
        Ok(())
    }

    /// Create the repository if it does not exist yet.
    pub fn ensure(&self, name: &str) {
        self.inner
            .write()
            .entry(name.to_owned())
            .or_insert_with(|| Repository::new(name.to_owned()));
    }

    /// Names of all repositories.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// The highest-numbered version of a repository.
    pub fn latest(&self, name: &str) -> ContentResult<Arc<RepositoryVersion>> {
        self.inner
            .read()
            .get(name)
            .map(Repository::latest)
            .ok_or_else(|| ContentError::RepositoryNotFound(name.to_owned()))
    }

    /// A specific version of a repository.
    pub fn version(&self, name: &str, number: u64) -> ContentResult<Arc<RepositoryVersion>> {
        let inner = self.inner.read();
        let repository = inner
            .get(name)
            .ok_or_else(|| ContentError::RepositoryNotFound(name.to_owned()))?;

        repository
            .versions
            .iter()
            .find(|v| v.number == number)
            .cloned()
            .ok_or_else(|| ContentError::VersionNotFound {
                repository: name.to_owned(),
                version: number,
            })
    }

    /// Create a new version from the latest one.
    ///
    /// `delta` is computed from the latest content while the repository is
    /// locked. The result is validated before it becomes visible: tag names
    /// must be unique and every relation between members must resolve within
    /// the version. On any error no version is created.
    pub fn new_version<F>(
        &self,
        store: &ContentStore,
        name: &str,
        delta: F,
    ) -> ContentResult<Arc<RepositoryVersion>>
    where
        F: FnOnce(&ContentSet) -> ContentResult<Delta>,
    {
        let mut inner = self.inner.write();
        let repository = inner
            .get_mut(name)
            .ok_or_else(|| ContentError::RepositoryNotFound(name.to_owned()))?;

        let previous = repository.latest();
        let Delta { add, remove } = delta(previous.content())?;

        let mut content = previous.content().difference(&remove);
        content.extend(add);
        validate(store, &content)?;

        let version = Arc::new(RepositoryVersion {
            number: previous.number + 1,
            added: content.difference(previous.content()),
            removed: previous.content().difference(&content),
            content,
        });

        tracing::debug!(
            repository = name,
            version = version.number,
            added = ?version.added.counts(),
            removed = ?version.removed.counts(),
            "created repository version"
        );

        repository.versions.push(version.clone());
        Ok(version)
    }
}

fn validate(store: &ContentStore, content: &ContentSet) -> ContentResult<()> {
    let mut names = BTreeSet::new();
    for tag in &content.tags {
        if !names.insert(tag.name.as_str()) {
            return Err(ContentError::DuplicateTag(tag.name.clone()));
        }
        if !content.manifests.contains(&tag.tagged_manifest) {
            return Err(ContentError::DanglingReference {
                from: format!("tag {}", tag.name),
                to: tag.tagged_manifest.clone(),
            });
        }
    }

    for manifest in &content.manifests {
        for blob in store.blobs_of(manifest) {
            if !content.blobs.contains(&blob) {
                return Err(ContentError::DanglingReference {
                    from: manifest.to_string(),
                    to: blob,
                });
            }
        }

        for (member, _) in store.members(manifest) {
            if !content.manifests.contains(&member) {
                return Err(ContentError::DanglingReference {
                    from: manifest.to_string(),
                    to: member,
                });
            }
        }
    }

    Ok(())
}
