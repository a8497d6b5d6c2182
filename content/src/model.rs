//! Content units stored in the graph.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::media::{BlobKind, ManifestKind};

/// A layer or config blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Blob {
    /// Digest of the blob bytes.
    pub digest: Digest,

    /// Media type as declared by the referencing manifest.
    pub media_type: String,

    /// Role of the blob, derived from the media type.
    pub kind: BlobKind,

    /// Artifact holding the bytes. Foreign layers have none.
    pub artifact: Option<Digest>,
}

impl Blob {
    /// Create a blob record, classifying it by media type.
    pub fn new(digest: Digest, media_type: impl Into<String>, artifact: Option<Digest>) -> Self {
        let media_type = media_type.into();
        Blob {
            kind: BlobKind::from_media_type(&media_type),
            digest,
            media_type,
            artifact,
        }
    }
}

/// An image manifest or manifest list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    /// Manifest digest. For signed schema-1 manifests this is the digest of
    /// the payload without signatures.
    pub digest: Digest,

    /// Manifest media type.
    pub media_type: String,

    /// 1 or 2.
    pub schema_version: u8,

    /// Structural kind, fixed at creation.
    pub kind: ManifestKind,

    /// Artifact holding the bytes exactly as received.
    pub artifact: Digest,
}

impl Manifest {
    /// Create a manifest record. Returns `None` for media types which are not
    /// manifests.
    pub fn new(digest: Digest, media_type: impl Into<String>, artifact: Digest) -> Option<Self> {
        let media_type = media_type.into();
        let kind = ManifestKind::from_media_type(&media_type)?;
        Some(Manifest {
            digest,
            schema_version: kind.schema_version(),
            kind,
            media_type,
            artifact,
        })
    }

    /// Whether this manifest is a list of other manifests.
    pub fn is_list(&self) -> bool {
        self.kind == ManifestKind::List
    }
}

/// A named pointer to a manifest.
///
/// The natural key is the pair of name and manifest, so retagging creates a
/// new `Tag` rather than changing an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Tag {
    /// Tag name, unique within one repository version.
    pub name: String,

    /// The manifest (or list) this tag points at.
    pub tagged_manifest: Digest,
}

impl Tag {
    /// Create a tag.
    pub fn new(name: impl Into<String>, tagged_manifest: Digest) -> Self {
        Tag {
            name: name.into(),
            tagged_manifest,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.tagged_manifest)
    }
}

/// A content unit named by a caller of add / remove.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentRef {
    /// A tag.
    Tag(Tag),

    /// A manifest or manifest list, by digest.
    Manifest(Digest),

    /// A blob, by digest.
    Blob(Digest),
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentRef::Tag(tag) => write!(f, "tag {tag}"),
            ContentRef::Manifest(digest) => write!(f, "manifest {digest}"),
            ContentRef::Blob(digest) => write!(f, "blob {digest}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::compute_digest;
    use crate::media;

    #[test]
    fn manifest_kind_follows_media_type() {
        let digest = compute_digest(b"m");
        let manifest = Manifest::new(digest.clone(), media::MANIFEST_LIST, digest.clone()).unwrap();
        assert!(manifest.is_list());
        assert_eq!(manifest.schema_version, 2);

        let manifest = Manifest::new(digest.clone(), media::MANIFEST_V1_SIGNED, digest.clone()).unwrap();
        assert_eq!(manifest.schema_version, 1);

        assert!(Manifest::new(digest.clone(), media::CONFIG_BLOB, digest).is_none());
    }

    #[test]
    fn blob_kind_follows_media_type() {
        let blob = Blob::new(compute_digest(b"b"), media::FOREIGN_BLOB, None);
        assert_eq!(blob.kind, BlobKind::Foreign);
    }

    #[test]
    fn tags_order_by_name_first() {
        let a = Tag::new("a", compute_digest(b"2"));
        let b = Tag::new("b", compute_digest(b"1"));
        assert!(a < b);
    }
}
