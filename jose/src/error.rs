use camino::Utf8PathBuf;

/// Errors from key handling, and JWS processing.
#[derive(Debug, thiserror::Error)]
pub enum JoseError {
    /// The key material could not be read.
    #[error("reading key from {path}")]
    Io {
        /// Path of the key file.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The key is not a valid P-256 key.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Base64url data is malformed, including invalid padding.
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A JSON segment is malformed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// A token or signed document does not have the expected structure.
    #[error("malformed: {0}")]
    Malformed(&'static str),

    /// Only ES256 is supported.
    #[error("unsupported algorithm {0:?}")]
    UnsupportedAlgorithm(String),

    /// The signature does not verify.
    #[error("signature verification failed")]
    Signature,
}
