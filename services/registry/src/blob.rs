//! Blob fetches for the registry

use axum::body::Body;
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use content::Digest;
use tokio_util::io::ReaderStream;

use crate::api::{RegistryState, CONTENT_DIGEST};
use crate::error::{RegistryError, RegistryResult};

/// Get a blob, or only its headers for `HEAD`
#[tracing::instrument(skip(state))]
pub(crate) async fn get(
    state: &RegistryState,
    name: &str,
    digest: &str,
    head: bool,
) -> RegistryResult<Response> {
    let version = state.version(name)?;
    let digest = Digest::parse(digest).map_err(|_| RegistryError::DigestInvalid(digest.into()))?;
    let unknown = || RegistryError::BlobUnknown(digest.to_string());

    if !version.content().blobs.contains(&digest) {
        return Err(unknown());
    }
    let blob = state.store.blob(&digest).ok_or_else(unknown)?;
    // Foreign layers are served by their own hosts.
    let artifact = blob.artifact.ok_or_else(unknown)?;
    let metadata = state.artifacts.metadata(&artifact).await?;

    let headers = [
        (header::CONTENT_TYPE, blob.media_type),
        (header::CONTENT_LENGTH, metadata.size.to_string()),
        (HeaderName::from_static(CONTENT_DIGEST), digest.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", digest.as_str()),
        ),
    ];

    if head {
        return Ok((StatusCode::OK, headers).into_response());
    }

    let reader = state.artifacts.open(&artifact).await?;
    let body = Body::from_stream(ReaderStream::new(reader));
    Ok((StatusCode::OK, headers, body).into_response())
}
