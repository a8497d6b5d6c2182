//! Recursive add and remove.
//!
//! Both operations compute a [`Delta`] with plain set algebra over the
//! store's edge lists and apply it as a single version transition.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::digest::Digest;
use crate::error::{ContentError, ContentResult};
use crate::model::{ContentRef, Tag};
use crate::repository::{ContentSet, Delta, Repositories, RepositoryVersion};
use crate::store::ContentStore;

/// Everything which must accompany `units` into a repository version: the
/// units themselves, manifests listed by any list reached, and the layers and
/// config of every manifest reached. Tags pull in the manifest they target.
pub fn add_closure(store: &ContentStore, units: &[ContentRef]) -> ContentResult<ContentSet> {
    let mut closure = ContentSet::new();
    let mut manifests = Vec::new();

    for unit in units {
        match unit {
            ContentRef::Tag(tag) => {
                if !store.has_tag(tag) {
                    return Err(ContentError::TagNotFound(tag.name.clone()));
                }
                closure.tags.insert(tag.clone());
                manifests.push(tag.tagged_manifest.clone());
            }
            ContentRef::Manifest(digest) => manifests.push(digest.clone()),
            ContentRef::Blob(digest) => {
                if store.blob(digest).is_none() {
                    return Err(ContentError::BlobNotFound(digest.clone()));
                }
                closure.blobs.insert(digest.clone());
            }
        }
    }

    while let Some(digest) = manifests.pop() {
        let manifest = store
            .manifest(&digest)
            .ok_or_else(|| ContentError::ManifestNotFound(digest.clone()))?;

        if !closure.manifests.insert(digest.clone()) {
            continue;
        }

        if manifest.is_list() {
            manifests.extend(store.members(&digest).into_iter().map(|(member, _)| member));
        }
        closure.blobs.extend(store.blobs_of(&digest));
    }

    Ok(closure)
}

/// The content which becomes unreachable when `units` are removed from
/// `current`.
///
/// Tiers are evaluated top-down (tags, lists, manifests, blobs). At each tier
/// anything still referenced by a surviving unit of the tier above must
/// remain, even when it was named in `units`.
pub fn remove_plan(store: &ContentStore, current: &ContentSet, units: &[ContentRef]) -> ContentSet {
    let mut user_tags = BTreeSet::new();
    let mut user_lists = BTreeSet::new();
    let mut user_manifests = BTreeSet::new();
    let mut user_blobs = BTreeSet::new();

    for unit in units {
        match unit {
            ContentRef::Tag(tag) => {
                user_tags.insert(tag.clone());
            }
            ContentRef::Manifest(digest) => match store.manifest(digest) {
                Some(manifest) if manifest.is_list() => {
                    user_lists.insert(digest.clone());
                }
                Some(_) => {
                    user_manifests.insert(digest.clone());
                }
                None => {}
            },
            ContentRef::Blob(digest) => {
                user_blobs.insert(digest.clone());
            }
        }
    }

    let is_list = |digest: &Digest| store.manifest(digest).is_some_and(|m| m.is_list());
    let current_lists: BTreeSet<Digest> =
        current.manifests.iter().filter(|d| is_list(d)).cloned().collect();
    let current_plain: BTreeSet<Digest> =
        current.manifests.difference(&current_lists).cloned().collect();

    // Tags
    let removed_tags: BTreeSet<Tag> = user_tags.intersection(&current.tags).cloned().collect();
    let surviving_tags: BTreeSet<&Tag> = current.tags.difference(&removed_tags).collect();
    let targeted_by_surviving: BTreeSet<&Digest> =
        surviving_tags.iter().map(|t| &t.tagged_manifest).collect();
    let targeted_by_removed: BTreeSet<&Digest> =
        removed_tags.iter().map(|t| &t.tagged_manifest).collect();

    // Lists
    let candidate_lists = user_lists
        .iter()
        .chain(targeted_by_removed.iter().copied())
        .filter(|d| current_lists.contains(*d))
        .filter(|d| !targeted_by_surviving.contains(d));
    let removed_lists: BTreeSet<Digest> = candidate_lists.cloned().collect();
    let surviving_lists = current_lists.difference(&removed_lists);

    // Manifests
    let mut listed_by_surviving = BTreeSet::new();
    for list in surviving_lists {
        listed_by_surviving.extend(store.members(list).into_iter().map(|(m, _)| m));
    }
    let mut listed_by_removed = BTreeSet::new();
    for list in &removed_lists {
        listed_by_removed.extend(store.members(list).into_iter().map(|(m, _)| m));
    }

    let removed_manifests: BTreeSet<Digest> = user_manifests
        .iter()
        .chain(listed_by_removed.iter())
        .chain(targeted_by_removed.iter().copied())
        .filter(|d| current_plain.contains(*d))
        .filter(|d| !targeted_by_surviving.contains(d) && !listed_by_surviving.contains(*d))
        .cloned()
        .collect();

    // Blobs
    let mut referenced_by_surviving = BTreeSet::new();
    let mut referenced_by_removed = BTreeSet::new();
    for manifest in &current.manifests {
        let blobs = store.blobs_of(manifest);
        if removed_manifests.contains(manifest) || removed_lists.contains(manifest) {
            referenced_by_removed.extend(blobs);
        } else {
            referenced_by_surviving.extend(blobs);
        }
    }

    let removed_blobs: BTreeSet<Digest> = user_blobs
        .iter()
        .chain(referenced_by_removed.iter())
        .filter(|d| current.blobs.contains(*d))
        .filter(|d| !referenced_by_surviving.contains(*d))
        .cloned()
        .collect();

    let mut manifests = removed_manifests;
    manifests.extend(removed_lists);

    ContentSet {
        tags: removed_tags,
        manifests,
        blobs: removed_blobs,
    }
}

/// Add `units` and everything they reference to `repository` in one new
/// version. Tags already present under an added tag's name are removed in the
/// same transition. With no units, the new version has the same content.
#[tracing::instrument(skip(store, repositories, units), fields(units = units.len()))]
pub fn recursive_add(
    store: &ContentStore,
    repositories: &Repositories,
    repository: &str,
    units: &[ContentRef],
) -> ContentResult<Arc<RepositoryVersion>> {
    let closure = add_closure(store, units)?;

    repositories.new_version(store, repository, |current| {
        let names: BTreeSet<&str> = closure.tags.iter().map(|t| t.name.as_str()).collect();
        let replaced = current
            .tags
            .iter()
            .filter(|t| names.contains(t.name.as_str()) && !closure.tags.contains(*t))
            .cloned()
            .collect();

        Ok(Delta {
            add: closure,
            remove: ContentSet {
                tags: replaced,
                ..ContentSet::new()
            },
        })
    })
}

/// Remove `units` from `repository`, along with content which only they
/// referenced, in one new version.
#[tracing::instrument(skip(store, repositories, units), fields(units = units.len()))]
pub fn recursive_remove(
    store: &ContentStore,
    repositories: &Repositories,
    repository: &str,
    units: &[ContentRef],
) -> ContentResult<Arc<RepositoryVersion>> {
    repositories.new_version(store, repository, |current| {
        Ok(Delta {
            add: ContentSet::new(),
            remove: remove_plan(store, current, units),
        })
    })
}

/// Point `tag` at `manifest`, which must be in the latest version of
/// `repository`. Any existing tag with that name is replaced.
#[tracing::instrument(skip(store, repositories))]
pub fn tag_image(
    store: &ContentStore,
    repositories: &Repositories,
    repository: &str,
    tag: &str,
    manifest: &Digest,
) -> ContentResult<Arc<RepositoryVersion>> {
    let latest = repositories.latest(repository)?;
    if !latest.content().manifests.contains(manifest) {
        return Err(ContentError::ManifestNotFound(manifest.clone()));
    }

    let (tag, _) = store.find_or_create_tag(Tag::new(tag, manifest.clone()))?;
    recursive_add(store, repositories, repository, &[ContentRef::Tag(tag)])
}

/// Remove the tag named `tag` from `repository`. The tagged manifest stays.
#[tracing::instrument(skip(store, repositories))]
pub fn untag_image(
    store: &ContentStore,
    repositories: &Repositories,
    repository: &str,
    tag: &str,
) -> ContentResult<Arc<RepositoryVersion>> {
    repositories.new_version(store, repository, |current| {
        let existing = current
            .tag(tag)
            .ok_or_else(|| ContentError::TagNotFound(tag.to_owned()))?;

        Ok(Delta {
            add: ContentSet::new(),
            remove: ContentSet {
                tags: [existing.clone()].into(),
                ..ContentSet::new()
            },
        })
    })
}
