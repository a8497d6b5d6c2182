//! The global content store.
//!
//! Content units are keyed by their natural key and never change once
//! inserted. Insertion is find-or-create: concurrent writers race on the map
//! entry, the loser reads back and reuses the winner's row. Relations between
//! units are stored as explicit edge lists keyed by digest.

use std::collections::BTreeMap;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};

use crate::digest::Digest;
use crate::error::{ContentError, ContentResult};
use crate::manifest::Platform;
use crate::model::{Blob, Manifest, Tag};

/// Content shared by all repositories.
#[derive(Debug, Default)]
pub struct ContentStore {
    blobs: DashMap<Digest, Blob>,
    manifests: DashMap<Digest, Manifest>,
    tags: DashSet<Tag>,

    layers: DashMap<Digest, Vec<Digest>>,
    configs: DashMap<Digest, Digest>,
    members: DashMap<Digest, BTreeMap<Digest, Platform>>,
}

impl ContentStore {
    /// Create an empty content store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a blob unless one with the same digest exists. Returns the
    /// stored blob and whether this call created it.
    pub fn find_or_create_blob(&self, blob: Blob) -> (Blob, bool) {
        match self.blobs.entry(blob.digest.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                tracing::trace!(digest = %blob.digest, "created blob");
                entry.insert(blob.clone());
                (blob, true)
            }
        }
    }

    /// Insert a manifest unless one with the same digest exists. Returns the
    /// stored manifest and whether this call created it.
    pub fn find_or_create_manifest(&self, manifest: Manifest) -> (Manifest, bool) {
        match self.manifests.entry(manifest.digest.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                tracing::trace!(digest = %manifest.digest, kind = ?manifest.kind, "created manifest");
                entry.insert(manifest.clone());
                (manifest, true)
            }
        }
    }

    /// Insert a tag unless the same (name, manifest) pair exists.
    pub fn find_or_create_tag(&self, tag: Tag) -> ContentResult<(Tag, bool)> {
        if !self.manifests.contains_key(&tag.tagged_manifest) {
            return Err(ContentError::ManifestNotFound(tag.tagged_manifest));
        }

        let created = self.tags.insert(tag.clone());
        if created {
            tracing::trace!(%tag, "created tag");
        }
        Ok((tag, created))
    }

    /// Record that `manifest` references the layer `blob`. Relating the same
    /// pair twice is a no-op; returns whether the edge is new.
    pub fn relate_blob(&self, manifest: &Digest, blob: &Digest) -> ContentResult<bool> {
        self.require_manifest(manifest)?;
        self.require_blob(blob)?;

        let mut layers = self.layers.entry(manifest.clone()).or_default();
        if layers.contains(blob) {
            return Ok(false);
        }
        layers.push(blob.clone());
        Ok(true)
    }

    /// Record the config blob of `manifest`. A manifest has at most one
    /// config; the first one recorded wins.
    pub fn relate_config(&self, manifest: &Digest, blob: &Digest) -> ContentResult<bool> {
        self.require_manifest(manifest)?;
        self.require_blob(blob)?;

        match self.configs.entry(manifest.clone()) {
            Entry::Occupied(entry) => {
                if entry.get() != blob {
                    tracing::warn!(%manifest, existing = %entry.get(), %blob, "ignoring second config blob");
                }
                Ok(false)
            }
            Entry::Vacant(entry) => {
                entry.insert(blob.clone());
                Ok(true)
            }
        }
    }

    /// Record that the list `list` contains `member` for `platform`.
    pub fn relate_list_member(
        &self,
        list: &Digest,
        member: &Digest,
        platform: Platform,
    ) -> ContentResult<bool> {
        self.require_manifest(list)?;
        self.require_manifest(member)?;

        let mut members = self.members.entry(list.clone()).or_default();
        if members.contains_key(member) {
            return Ok(false);
        }
        members.insert(member.clone(), platform);
        Ok(true)
    }

    fn require_manifest(&self, digest: &Digest) -> ContentResult<()> {
        if self.manifests.contains_key(digest) {
            Ok(())
        } else {
            Err(ContentError::ManifestNotFound(digest.clone()))
        }
    }

    fn require_blob(&self, digest: &Digest) -> ContentResult<()> {
        if self.blobs.contains_key(digest) {
            Ok(())
        } else {
            Err(ContentError::BlobNotFound(digest.clone()))
        }
    }

    /// Look up a blob.
    pub fn blob(&self, digest: &Digest) -> Option<Blob> {
        self.blobs.get(digest).map(|b| b.clone())
    }

    /// Look up a manifest.
    pub fn manifest(&self, digest: &Digest) -> Option<Manifest> {
        self.manifests.get(digest).map(|m| m.clone())
    }

    /// Whether the (name, manifest) tag exists.
    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }

    /// Layer blobs of a manifest, in document order.
    pub fn layers(&self, manifest: &Digest) -> Vec<Digest> {
        self.layers
            .get(manifest)
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    /// Config blob of a manifest.
    pub fn config(&self, manifest: &Digest) -> Option<Digest> {
        self.configs.get(manifest).map(|c| c.clone())
    }

    /// Layers and config of a manifest.
    pub fn blobs_of(&self, manifest: &Digest) -> Vec<Digest> {
        let mut blobs = self.layers(manifest);
        blobs.extend(self.config(manifest));
        blobs
    }

    /// Members of a manifest list, with their platforms.
    pub fn members(&self, list: &Digest) -> Vec<(Digest, Platform)> {
        self.members
            .get(list)
            .map(|m| m.iter().map(|(d, p)| (d.clone(), p.clone())).collect())
            .unwrap_or_default()
    }

    /// Number of blobs, manifests and tags stored.
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.blobs.len(), self.manifests.len(), self.tags.len())
    }

    pub(crate) fn all_blobs(&self) -> Vec<Blob> {
        self.blobs.iter().map(|b| b.value().clone()).collect()
    }

    pub(crate) fn all_manifests(&self) -> Vec<Manifest> {
        self.manifests.iter().map(|m| m.value().clone()).collect()
    }

    pub(crate) fn all_tags(&self) -> Vec<Tag> {
        self.tags.iter().map(|t| t.key().clone()).collect()
    }

    pub(crate) fn all_layers(&self) -> Vec<(Digest, Vec<Digest>)> {
        self.layers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub(crate) fn all_configs(&self) -> Vec<(Digest, Digest)> {
        self.configs
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub(crate) fn all_members(&self) -> Vec<(Digest, Digest, Platform)> {
        self.members
            .iter()
            .flat_map(|e| {
                let list = e.key().clone();
                e.value()
                    .iter()
                    .map(|(m, p)| (list.clone(), m.clone(), p.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
