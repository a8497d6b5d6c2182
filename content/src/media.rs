//! Media types used by Docker and OCI registries.
//!
//! These strings are matched byte-for-byte against upstream registries and
//! client `Accept` headers.

use serde::{Deserialize, Serialize};

/// Docker image manifest, schema 1 (unsigned).
pub const MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";

/// Docker image manifest, schema 1, with embedded JWS signatures.
pub const MANIFEST_V1_SIGNED: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";

/// Docker image manifest, schema 2.
pub const MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Docker manifest list.
pub const MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";

/// Docker image config blob.
pub const CONFIG_BLOB: &str = "application/vnd.docker.container.image.v1+json";

/// Docker compressed layer blob.
pub const REGULAR_BLOB: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Docker foreign layer blob, never served by the registry itself.
pub const FOREIGN_BLOB: &str = "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// OCI image index.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// OCI image config blob.
pub const OCI_CONFIG_BLOB: &str = "application/vnd.oci.image.config.v1+json";

/// OCI compressed layer blob.
pub const OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// OCI non-distributable layer blob.
pub const OCI_FOREIGN_LAYER: &str = "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";

/// Manifest media types requested from upstream registries, in order of preference.
pub const ACCEPTED_MANIFESTS: &[&str] = &[
    MANIFEST_LIST,
    OCI_INDEX,
    MANIFEST_V2,
    OCI_MANIFEST,
    MANIFEST_V1_SIGNED,
    MANIFEST_V1,
];

/// Structural kind of a manifest, fixed when the manifest is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManifestKind {
    /// Schema-1 manifest, signed or not.
    Schema1,

    /// Schema-2 or OCI image manifest.
    Image,

    /// Manifest list or OCI index.
    List,
}

impl ManifestKind {
    /// Classify a manifest media type.
    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            MANIFEST_V1 | MANIFEST_V1_SIGNED => Some(ManifestKind::Schema1),
            MANIFEST_V2 | OCI_MANIFEST => Some(ManifestKind::Image),
            MANIFEST_LIST | OCI_INDEX => Some(ManifestKind::List),
            _ => None,
        }
    }

    /// The schema version manifests of this kind carry.
    pub fn schema_version(&self) -> u8 {
        match self {
            ManifestKind::Schema1 => 1,
            ManifestKind::Image | ManifestKind::List => 2,
        }
    }
}

/// Role of a blob within an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlobKind {
    /// Image configuration JSON.
    Config,

    /// Regular filesystem layer.
    Layer,

    /// Layer hosted elsewhere, recorded but never downloaded.
    Foreign,
}

impl BlobKind {
    /// Classify a blob media type. Unknown types are treated as regular layers.
    pub fn from_media_type(media_type: &str) -> Self {
        match media_type {
            CONFIG_BLOB | OCI_CONFIG_BLOB => BlobKind::Config,
            FOREIGN_BLOB | OCI_FOREIGN_LAYER => BlobKind::Foreign,
            _ => BlobKind::Layer,
        }
    }
}

/// Strip parameters (`; charset=...`) and whitespace from a media type.
pub fn essence(media_type: &str) -> &str {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_manifests() {
        assert_eq!(
            ManifestKind::from_media_type(MANIFEST_V1_SIGNED),
            Some(ManifestKind::Schema1)
        );
        assert_eq!(
            ManifestKind::from_media_type(OCI_MANIFEST),
            Some(ManifestKind::Image)
        );
        assert_eq!(
            ManifestKind::from_media_type(MANIFEST_LIST),
            Some(ManifestKind::List)
        );
        assert_eq!(ManifestKind::from_media_type(CONFIG_BLOB), None);
    }

    #[test]
    fn classify_blobs() {
        assert_eq!(BlobKind::from_media_type(CONFIG_BLOB), BlobKind::Config);
        assert_eq!(BlobKind::from_media_type(FOREIGN_BLOB), BlobKind::Foreign);
        assert_eq!(BlobKind::from_media_type(REGULAR_BLOB), BlobKind::Layer);
        assert_eq!(BlobKind::from_media_type("text/plain"), BlobKind::Layer);
    }

    #[test]
    fn essence_strips_parameters() {
        assert_eq!(essence("application/json; charset=utf-8"), "application/json");
        assert_eq!(essence(" application/json "), "application/json");
    }
}
