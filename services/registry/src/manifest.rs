//! Manifest fetches and content negotiation.
//!
//! Stored manifests are served unmodified when the client accepts their
//! media type. Otherwise a manifest list falls back to its `linux/amd64`
//! member, and a schema-2 image is converted to a signed schema-1 manifest
//! on the fly. Schema-1 manifests are always served as stored under the
//! signed schema-1 media type, and manifests requested by digest are never
//! converted.

use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use content::{media, Digest, Manifest, ManifestDocument, ManifestKind, ParsedManifest};

use crate::api::{RegistryState, CONTENT_DIGEST};
use crate::error::{RegistryError, RegistryResult};

/// A manifest ready to be sent.
#[derive(Debug)]
struct Served {
    digest: Digest,
    media_type: String,
    body: Bytes,
}

impl Served {
    async fn stored(state: &RegistryState, manifest: Manifest) -> RegistryResult<Self> {
        let body = state.artifacts.read(&manifest.artifact).await?;
        Ok(Served {
            digest: manifest.digest,
            media_type: manifest.media_type,
            body,
        })
    }

    fn into_response(self, head: bool) -> Response {
        let length = self.body.len().to_string();
        let headers = [
            (header::CONTENT_TYPE, self.media_type),
            (HeaderName::from_static(CONTENT_DIGEST), self.digest.to_string()),
            (header::CONTENT_LENGTH, length),
        ];

        if head {
            (StatusCode::OK, headers).into_response()
        } else {
            (StatusCode::OK, headers, self.body).into_response()
        }
    }
}

/// Get a manifest by tag or digest
#[tracing::instrument(skip(state, headers))]
pub(crate) async fn get(
    state: &RegistryState,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
    head: bool,
) -> RegistryResult<Response> {
    let version = state.version(name)?;
    let content = version.content();
    let unknown = || RegistryError::ManifestUnknown(reference.to_owned());

    if reference.contains(':') {
        let digest =
            Digest::parse(reference).map_err(|_| RegistryError::DigestInvalid(reference.into()))?;
        if !content.manifests.contains(&digest) {
            return Err(unknown());
        }
        let manifest = state.store.manifest(&digest).ok_or_else(unknown)?;
        return Ok(Served::stored(state, manifest).await?.into_response(head));
    }

    let tag = content.tag(reference).ok_or_else(unknown)?;
    let mut manifest = state
        .store
        .manifest(&tag.tagged_manifest)
        .ok_or_else(unknown)?;
    let accepted = accepted(headers);

    if manifest.kind == ManifestKind::List && !accepts(&accepted, &manifest.media_type) {
        let member = state
            .store
            .members(&manifest.digest)
            .into_iter()
            .find(|(digest, platform)| {
                platform.is_linux_amd64() && content.manifests.contains(digest)
            })
            .and_then(|(digest, _)| state.store.manifest(&digest))
            .ok_or_else(unknown)?;
        tracing::debug!(list = %manifest.digest, member = %member.digest, "serving list member");
        manifest = member;
    }

    let served = match manifest.kind {
        ManifestKind::Schema1 => Served {
            media_type: media::MANIFEST_V1_SIGNED.to_owned(),
            ..Served::stored(state, manifest).await?
        },
        _ if accepts(&accepted, &manifest.media_type) => Served::stored(state, manifest).await?,
        ManifestKind::Image => convert(state, &manifest, name, reference).await?,
        ManifestKind::List => return Err(unknown()),
    };
    Ok(served.into_response(head))
}

/// Convert a stored schema-2 image to schema 1 for `name:tag`.
async fn convert(
    state: &RegistryState,
    manifest: &Manifest,
    name: &str,
    tag: &str,
) -> RegistryResult<Served> {
    let bytes = state.artifacts.read(&manifest.artifact).await?;
    let document = ManifestDocument::parse(&bytes, Some(&manifest.media_type))?;
    let ParsedManifest::Image(image) = document.parsed else {
        return Err(RegistryError::ManifestUnknown(tag.to_owned()));
    };

    let config = state
        .store
        .blob(&image.config.digest)
        .and_then(|blob| blob.artifact)
        .ok_or_else(|| RegistryError::BlobUnknown(image.config.digest.to_string()))?;
    let config = state.artifacts.read(&config).await?;

    let converted =
        schema_convert::convert(&image, &config, name, tag, &state.signing_key)?;
    tracing::debug!(from = %manifest.digest, to = %converted.digest, "converted to schema 1");

    Ok(Served {
        digest: converted.digest,
        media_type: converted.media_type.to_owned(),
        body: converted.bytes.into(),
    })
}

/// Media types listed in `Accept` headers, without parameters.
fn accepted(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|item| media::essence(item).to_owned())
        .filter(|item| !item.is_empty())
        .collect()
}

fn accepts(accepted: &[String], media_type: &str) -> bool {
    accepted.iter().any(|item| item == media_type)
}
