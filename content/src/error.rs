//! Error types for the content graph

use crate::digest::{Digest, InvalidDigest};

/// Result type for content graph operations
pub type ContentResult<T> = Result<T, ContentError>;

/// A single manifest or config document failed validation.
///
/// Validation errors are local to one content unit; callers decide whether
/// that unit is skipped or the whole operation is aborted.
#[derive(Debug, thiserror::Error)]
pub enum ContentValidationError {
    /// The document is not valid JSON, or does not match the expected shape.
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// The media type is not a supported manifest type.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The schema version is not 1 or 2.
    #[error("unsupported schema version: {0}")]
    UnsupportedSchemaVersion(u64),

    /// A digest inside the document is malformed.
    #[error(transparent)]
    Digest(#[from] InvalidDigest),
}

/// Errors from the content store, repositories and graph maintenance
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// A content unit failed validation
    #[error(transparent)]
    Validation(#[from] ContentValidationError),

    /// A referenced blob does not exist in the content store
    #[error("blob not found: {0}")]
    BlobNotFound(Digest),

    /// A referenced manifest does not exist in the content store
    #[error("manifest not found: {0}")]
    ManifestNotFound(Digest),

    /// The repository does not exist
    #[error("repository not found: {0}")]
    RepositoryNotFound(String),

    /// The repository already exists
    #[error("repository already exists: {0}")]
    RepositoryExists(String),

    /// The repository version does not exist
    #[error("repository {repository} has no version {version}")]
    VersionNotFound {
        /// Repository name
        repository: String,
        /// Requested version number
        version: u64,
    },

    /// Two tags with the same name would be present in one version
    #[error("duplicate tag name {0:?} in a single repository version")]
    DuplicateTag(String),

    /// A version would contain an edge to content it does not contain
    #[error("{from} references {to}, which is not part of the repository version")]
    DanglingReference {
        /// The referencing content
        from: String,
        /// The missing content
        to: Digest,
    },

    /// No tag with the given name exists in the repository version
    #[error("tag not found: {0}")]
    TagNotFound(String),

    /// A snapshot could not be read or written
    #[error("snapshot: {0}")]
    Snapshot(#[source] std::io::Error),

    /// A snapshot could not be encoded or decoded
    #[error("snapshot encoding: {0}")]
    SnapshotEncoding(#[source] serde_json::Error),
}
