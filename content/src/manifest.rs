//! Wire formats for manifests, manifest lists and schema-1 documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::Digest;
use crate::error::ContentValidationError;
use crate::media::{self, ManifestKind};

/// A reference from a manifest to a blob or another manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,

    /// Size of the referenced content in bytes.
    #[serde(default)]
    pub size: u64,

    /// Digest of the referenced content.
    pub digest: Digest,

    /// Alternate download locations, used by foreign layers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,

    /// Platform of a manifest list entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// Platform attributes of a manifest list member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    /// CPU architecture, e.g. `amd64`.
    #[serde(default)]
    pub architecture: String,

    /// Operating system, e.g. `linux`.
    #[serde(default)]
    pub os: String,

    /// Operating system version.
    #[serde(
        rename = "os.version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub os_version: Option<String>,

    /// Required operating system features.
    #[serde(rename = "os.features", default, skip_serializing_if = "Vec::is_empty")]
    pub os_features: Vec<String>,

    /// CPU variant, e.g. `v8`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    /// Required CPU features.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

impl Platform {
    /// The default platform served to clients which cannot read manifest lists.
    pub fn is_linux_amd64(&self) -> bool {
        self.os == "linux" && self.architecture == "amd64"
    }
}

/// Schema-2 or OCI image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Always 2.
    pub schema_version: u64,

    /// Manifest media type, optional for OCI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Image configuration blob.
    pub config: Descriptor,

    /// Filesystem layers, base layer first.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

/// Manifest list or OCI image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    /// Always 2.
    pub schema_version: u64,

    /// List media type, optional for OCI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    /// Per-platform image manifests.
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

/// A layer entry of a schema-1 manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsLayer {
    /// Digest of the compressed layer.
    #[serde(rename = "blobSum")]
    pub blob_sum: Digest,
}

/// A history entry of a schema-1 manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct V1Compatibility {
    /// JSON-encoded v1 image metadata for the matching layer.
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// Schema-1 image manifest, without its signatures.
///
/// Field order matches the canonical serialization used for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema1Manifest {
    /// Always 1.
    pub schema_version: u64,

    /// Repository name.
    #[serde(default)]
    pub name: String,

    /// Tag name.
    #[serde(default)]
    pub tag: String,

    /// CPU architecture.
    #[serde(default)]
    pub architecture: String,

    /// Layers, top-most layer first.
    pub fs_layers: Vec<FsLayer>,

    /// v1 metadata, one entry per layer.
    pub history: Vec<V1Compatibility>,
}

/// Parsed body of a manifest, by structural kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedManifest {
    /// Schema-1 manifest.
    Schema1(Schema1Manifest),

    /// Schema-2 / OCI image manifest.
    Image(ImageManifest),

    /// Manifest list / OCI index.
    List(ManifestList),
}

/// A blob referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobRef {
    /// Blob digest.
    pub digest: Digest,

    /// Blob media type.
    pub media_type: String,
}

/// A manifest document with its resolved media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDocument {
    /// The resolved media type.
    pub media_type: String,

    /// The structural kind derived from the media type.
    pub kind: ManifestKind,

    /// The parsed body.
    pub parsed: ParsedManifest,
}

impl ManifestDocument {
    /// Parse manifest bytes, falling back to `content_type` when the document
    /// does not declare its own media type.
    pub fn parse(bytes: &[u8], content_type: Option<&str>) -> Result<Self, ContentValidationError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let object = value
            .as_object()
            .ok_or(ContentValidationError::MissingField("schemaVersion"))?;

        let schema_version = object
            .get("schemaVersion")
            .and_then(Value::as_u64)
            .ok_or(ContentValidationError::MissingField("schemaVersion"))?;

        let declared = object
            .get("mediaType")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| {
                content_type
                    .map(media::essence)
                    .filter(|mt| ManifestKind::from_media_type(mt).is_some())
                    .map(str::to_owned)
            });

        let media_type = match (declared, schema_version) {
            (Some(media_type), _) => media_type,
            (None, 1) if object.contains_key("signatures") => media::MANIFEST_V1_SIGNED.to_owned(),
            (None, 1) => media::MANIFEST_V1.to_owned(),
            (None, 2) if object.contains_key("manifests") => media::OCI_INDEX.to_owned(),
            (None, 2) => media::OCI_MANIFEST.to_owned(),
            (None, other) => return Err(ContentValidationError::UnsupportedSchemaVersion(other)),
        };

        let kind = ManifestKind::from_media_type(&media_type)
            .ok_or_else(|| ContentValidationError::UnsupportedMediaType(media_type.clone()))?;

        if u64::from(kind.schema_version()) != schema_version {
            return Err(ContentValidationError::UnsupportedSchemaVersion(
                schema_version,
            ));
        }

        let parsed = match kind {
            ManifestKind::Schema1 => ParsedManifest::Schema1(serde_json::from_value(value)?),
            ManifestKind::Image => ParsedManifest::Image(serde_json::from_value(value)?),
            ManifestKind::List => ParsedManifest::List(serde_json::from_value(value)?),
        };

        Ok(ManifestDocument {
            media_type,
            kind,
            parsed,
        })
    }

    /// Layer blobs referenced by this manifest, without duplicates, in
    /// document order. Lists reference no blobs.
    pub fn layers(&self) -> Vec<BlobRef> {
        let mut seen = std::collections::BTreeSet::new();
        let refs: Vec<BlobRef> = match &self.parsed {
            ParsedManifest::Schema1(m) => m
                .fs_layers
                .iter()
                .map(|layer| BlobRef {
                    digest: layer.blob_sum.clone(),
                    media_type: media::REGULAR_BLOB.to_owned(),
                })
                .collect(),
            ParsedManifest::Image(m) => m
                .layers
                .iter()
                .map(|layer| BlobRef {
                    digest: layer.digest.clone(),
                    media_type: layer.media_type.clone(),
                })
                .collect(),
            ParsedManifest::List(_) => Vec::new(),
        };

        refs.into_iter()
            .filter(|blob| seen.insert(blob.digest.clone()))
            .collect()
    }

    /// The config blob of an image manifest.
    pub fn config(&self) -> Option<BlobRef> {
        match &self.parsed {
            ParsedManifest::Image(m) => Some(BlobRef {
                digest: m.config.digest.clone(),
                media_type: m.config.media_type.clone(),
            }),
            _ => None,
        }
    }

    /// Members of a manifest list, with their platforms.
    pub fn members(&self) -> Vec<(Digest, String, Platform)> {
        match &self.parsed {
            ParsedManifest::List(list) => list
                .manifests
                .iter()
                .map(|entry| {
                    (
                        entry.digest.clone(),
                        entry.media_type.clone(),
                        entry.platform.clone().unwrap_or_default(),
                    )
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
