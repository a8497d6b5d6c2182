//! Error types for the registry

use artifacts::{ArtifactError, ArtifactErrorKind};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use content::{ContentError, ContentValidationError};
use schema_convert::ConvertError;
use serde_json::{json, Value};

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No distribution is served under this name
    #[error("repository name not known to registry: {0}")]
    NameUnknown(String),

    /// The repository name is malformed
    #[error("invalid repository name: {0}")]
    NameInvalid(String),

    /// The manifest is not part of the repository version
    #[error("manifest unknown: {0}")]
    ManifestUnknown(String),

    /// The blob is not part of the repository version
    #[error("blob unknown to registry: {0}")]
    BlobUnknown(String),

    /// Invalid digest format
    #[error("invalid digest: {0}")]
    DigestInvalid(String),

    /// The pagination parameters are malformed
    #[error("invalid pagination: {0}")]
    PaginationInvalid(String),

    /// The path is not part of the registry API
    #[error("no route for {0}")]
    NotFound(String),

    /// The request carries no token granting the required access
    #[error("authentication required")]
    Unauthorized {
        /// `WWW-Authenticate` challenge telling the client where to get a token
        challenge: String,
        /// The access that was required, if any
        scope: Option<crate::token::Scope>,
    },

    /// A token request was refused
    #[error("requested access denied: {0}")]
    Denied(String),

    /// The stored manifest could not be served in a form the client accepts
    #[error("cannot convert manifest: {0}")]
    Conversion(#[from] ConvertError),

    /// A stored manifest failed to parse
    #[error("stored manifest is invalid: {0}")]
    Validation(#[from] ContentValidationError),

    /// Content graph error
    #[error(transparent)]
    Content(#[from] ContentError),

    /// Artifact store error
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Token signing failed
    #[error("token: {0}")]
    Token(#[from] crate::token::TokenError),
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::NameUnknown(_)
            | RegistryError::ManifestUnknown(_)
            | RegistryError::BlobUnknown(_)
            | RegistryError::NotFound(_)
            | RegistryError::Conversion(_)
            | RegistryError::Validation(_) => StatusCode::NOT_FOUND,
            RegistryError::NameInvalid(_)
            | RegistryError::DigestInvalid(_)
            | RegistryError::PaginationInvalid(_)
            | RegistryError::Denied(_) => StatusCode::BAD_REQUEST,
            RegistryError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            RegistryError::Content(error) => match error {
                ContentError::RepositoryNotFound(_) | ContentError::VersionNotFound { .. } => {
                    StatusCode::NOT_FOUND
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            RegistryError::Artifact(error) if error.kind() == ArtifactErrorKind::NotFound => {
                StatusCode::NOT_FOUND
            }
            RegistryError::Artifact(_) | RegistryError::Token(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error code for registry error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::NameUnknown(_) => "NAME_UNKNOWN",
            RegistryError::NameInvalid(_) => "NAME_INVALID",
            RegistryError::ManifestUnknown(_)
            | RegistryError::Conversion(_)
            | RegistryError::Validation(_) => "MANIFEST_UNKNOWN",
            RegistryError::BlobUnknown(_) => "BLOB_UNKNOWN",
            RegistryError::DigestInvalid(_) => "DIGEST_INVALID",
            RegistryError::PaginationInvalid(_) => "PAGINATION_NUMBER_INVALID",
            RegistryError::NotFound(_) => "UNSUPPORTED",
            RegistryError::Unauthorized { .. } => "UNAUTHORIZED",
            RegistryError::Denied(_) => "DENIED",
            RegistryError::Content(ContentError::RepositoryNotFound(_))
            | RegistryError::Content(ContentError::VersionNotFound { .. }) => "NAME_UNKNOWN",
            RegistryError::Artifact(error) if error.kind() == ArtifactErrorKind::NotFound => {
                "BLOB_UNKNOWN"
            }
            RegistryError::Content(_) | RegistryError::Artifact(_) | RegistryError::Token(_) => {
                "UNKNOWN"
            }
        }
    }

    /// Structured detail for the error body
    pub fn detail(&self) -> Option<Value> {
        match self {
            RegistryError::NameUnknown(name) | RegistryError::NameInvalid(name) => {
                Some(json!({ "name": name }))
            }
            RegistryError::ManifestUnknown(reference) => Some(json!({ "reference": reference })),
            RegistryError::BlobUnknown(digest) | RegistryError::DigestInvalid(digest) => {
                Some(json!({ "digest": digest }))
            }
            RegistryError::Unauthorized {
                scope: Some(scope), ..
            } => Some(Value::Array(
                scope
                    .actions
                    .iter()
                    .map(|action| {
                        json!({ "type": scope.kind, "name": scope.name, "action": action })
                    })
                    .collect(),
            )),
            _ => None,
        }
    }
}

/// Registry error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<Value>,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request refused");
        }

        let body = ErrorResponse {
            errors: vec![ErrorDetail {
                code: self.error_code(),
                message: self.to_string(),
                detail: self.detail(),
            }],
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let RegistryError::Unauthorized { challenge, .. } = &self {
            if let Ok(value) = HeaderValue::from_str(challenge) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_errors_map_to_status() {
        let missing = RegistryError::from(ContentError::RepositoryNotFound("busybox".into()));
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(missing.error_code(), "NAME_UNKNOWN");

        let duplicate = RegistryError::from(ContentError::DuplicateTag("latest".into()));
        assert_eq!(duplicate.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(duplicate.error_code(), "UNKNOWN");
    }

    #[tokio::test]
    async fn unauthorized_carries_challenge() {
        let error = RegistryError::Unauthorized {
            challenge: r#"Bearer realm="https://auth.example.com/token",service="registry""#
                .into(),
            scope: None,
        };
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[header::WWW_AUTHENTICATE],
            r#"Bearer realm="https://auth.example.com/token",service="registry""#
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["errors"][0]["code"], "UNAUTHORIZED");
        assert!(body["errors"][0].get("detail").is_none());
    }
}
