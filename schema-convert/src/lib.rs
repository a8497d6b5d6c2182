//! # Schema-2 to schema-1 conversion
//!
//! Older clients only understand signed schema-1 manifests. [`convert`]
//! rebuilds a schema-1 manifest from a schema-2 image manifest and its config
//! blob, and signs it.
//!
//! The output is a pure function of the inputs and the signing key: layer IDs
//! are derived from digests, JSON is emitted with sorted keys, the signature
//! time comes from the image's `created` field and ES256 signatures are
//! deterministic. Converting the same image twice gives the same digest.

use content::manifest::{FsLayer, ImageManifest, Schema1Manifest, V1Compatibility};
use content::{compute_digest, media, Digest, InvalidDigest};
use jose::{JoseError, KeyPair};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::Digest as _;

/// Blob sum used for history entries which did not produce a layer: a gzipped
/// empty tar archive.
pub const EMPTY_LAYER: &str =
    "sha256:a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4";

const EPOCH: &str = "1970-01-01T00:00:00Z";
const DEFAULT_ARCHITECTURE: &str = "amd64";

/// Conversion failed.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The config blob is not valid JSON.
    #[error("config blob: {0}")]
    Json(#[from] serde_json::Error),

    /// The config blob is not a JSON object.
    #[error("config blob is not a JSON object")]
    NotAnObject,

    /// The config's history does not account for every layer.
    #[error("config history describes {history} layers, manifest has {layers}")]
    LayerMismatch {
        /// Non-empty history entries.
        history: usize,
        /// Layers in the manifest.
        layers: usize,
    },

    /// A layer digest is malformed.
    #[error(transparent)]
    Digest(#[from] InvalidDigest),

    /// Signing failed.
    #[error("signing: {0}")]
    Sign(#[from] JoseError),
}

/// A converted, signed schema-1 manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    /// The signed document.
    pub bytes: Vec<u8>,

    /// Digest of the document without signatures.
    pub digest: Digest,

    /// Always the signed schema-1 media type.
    pub media_type: &'static str,
}

#[derive(Debug)]
struct Layer<'a> {
    compressed: Digest,
    uncompressed: Option<&'a str>,
    empty: bool,
    history: Map<String, Value>,
}

/// Synthetic v1 layer ID. The index keeps IDs distinct for repeated empty
/// layers.
fn layer_id(compressed: &str, uncompressed: Option<&str>, index: usize) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(compressed.as_bytes());
    if let Some(uncompressed) = uncompressed {
        hasher.update(uncompressed.as_bytes());
    }
    hasher.update(format!("{index:06}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Rebuild `value` with object keys in sorted order at every level.
fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// Pair each history entry (newest first) with its layer digests.
fn layers<'a>(
    manifest: &'a ImageManifest,
    config: &'a Map<String, Value>,
) -> Result<Vec<Layer<'a>>, ConvertError> {
    let compressed: Vec<&Digest> = manifest.layers.iter().map(|l| &l.digest).collect();
    let diff_ids: Vec<&str> = config
        .get("rootfs")
        .and_then(|r| r.get("diff_ids"))
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut history: Vec<Map<String, Value>> = config
        .get("history")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.as_object().cloned())
                .collect()
        })
        .unwrap_or_default();

    // Images without history get one anonymous entry per layer.
    if history.is_empty() {
        history = vec![Map::new(); compressed.len()];
    }

    let real = history
        .iter()
        .filter(|h| !h.get("empty_layer").and_then(Value::as_bool).unwrap_or(false))
        .count();
    if real != compressed.len() {
        return Err(ConvertError::LayerMismatch {
            history: real,
            layers: compressed.len(),
        });
    }

    let mut compressed = compressed.into_iter().rev();
    let mut diff_ids = diff_ids.into_iter().rev();

    let empty_layer = Digest::parse(EMPTY_LAYER)?;
    let mut layers = Vec::with_capacity(history.len());
    for entry in history.into_iter().rev() {
        let empty = entry
            .get("empty_layer")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let real = if empty { None } else { compressed.next() };
        let (digest, uncompressed) = match real {
            Some(digest) => (digest.clone(), diff_ids.next()),
            None => (empty_layer.clone(), None),
        };

        layers.push(Layer {
            compressed: digest,
            uncompressed,
            empty,
            history: entry,
        });
    }
    Ok(layers)
}

fn v1_compatibility(
    layer: &Layer<'_>,
    id: &str,
    parent: Option<&str>,
    top: Option<&Map<String, Value>>,
) -> Result<String, ConvertError> {
    let mut object = match top {
        Some(config) => {
            let mut config = config.clone();
            config.remove("history");
            config.remove("rootfs");
            config
        }
        None => {
            let mut stub = Map::new();
            if let Some(created) = layer.history.get("created") {
                stub.insert("created".into(), created.clone());
            }
            let created_by = layer
                .history
                .get("created_by")
                .cloned()
                .unwrap_or_else(|| Value::String(String::new()));
            let mut container_config = Map::new();
            container_config.insert("Cmd".into(), Value::Array(vec![created_by]));
            stub.insert("container_config".into(), Value::Object(container_config));
            stub
        }
    };

    object.insert("id".into(), Value::String(id.to_owned()));
    if let Some(parent) = parent {
        object.insert("parent".into(), Value::String(parent.to_owned()));
    }
    if layer.empty {
        object.insert("throwaway".into(), Value::Bool(true));
    }

    Ok(serde_json::to_string(&sorted(Value::Object(object)))?)
}

/// Build the unsigned schema-1 document.
fn schema1(
    manifest: &ImageManifest,
    config: &Map<String, Value>,
    repository: &str,
    tag: &str,
) -> Result<Schema1Manifest, ConvertError> {
    // Newest first, as in schema 1.
    let layers = layers(manifest, config)?;

    let mut fs_layers = Vec::with_capacity(layers.len());
    let mut history = Vec::with_capacity(layers.len());
    let mut parent: Option<String> = None;

    // IDs chain from the base layer upward.
    for (index, layer) in layers.iter().rev().enumerate() {
        let id = layer_id(layer.compressed.as_str(), layer.uncompressed, index);
        // Clients read the image config from the newest entry, history[0].
        let top = (index + 1 == layers.len()).then_some(config);

        history.push(V1Compatibility {
            v1_compatibility: v1_compatibility(layer, &id, parent.as_deref(), top)?,
        });
        fs_layers.push(FsLayer {
            blob_sum: layer.compressed.clone(),
        });
        parent = Some(id);
    }

    fs_layers.reverse();
    history.reverse();

    Ok(Schema1Manifest {
        schema_version: 1,
        name: repository.to_owned(),
        tag: tag.to_owned(),
        architecture: config
            .get("architecture")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_ARCHITECTURE)
            .to_owned(),
        fs_layers,
        history,
    })
}

/// Serialize with three-space indentation, as Docker does for schema 1.
fn indented<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}

/// Convert a schema-2 image manifest and its config blob into a signed
/// schema-1 manifest for `repository:tag`.
#[tracing::instrument(skip(manifest, config, key), fields(layers = manifest.layers.len()))]
pub fn convert(
    manifest: &ImageManifest,
    config: &[u8],
    repository: &str,
    tag: &str,
    key: &KeyPair,
) -> Result<Converted, ConvertError> {
    let config: Value = serde_json::from_slice(config)?;
    let config = config.as_object().ok_or(ConvertError::NotAnObject)?;

    let document = schema1(manifest, config, repository, tag)?;
    let payload = indented(&document)?;

    let time = config
        .get("created")
        .and_then(Value::as_str)
        .unwrap_or(EPOCH);
    let bytes = jose::jws::sign_pretty(&payload, key, time)?;

    tracing::debug!(%repository, %tag, "converted manifest to schema 1");
    Ok(Converted {
        bytes,
        digest: compute_digest(&payload),
        media_type: media::MANIFEST_V1_SIGNED,
    })
}
