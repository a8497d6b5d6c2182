//! Error types for the registry client.
use std::fmt;

use http::{StatusCode, Uri};
use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error occured while talking to an upstream registry.
#[derive(Debug, Error)]
pub enum Error {
    /// The registry answered with an error status.
    #[error(transparent)]
    Response(HttpResponseError),

    /// An error occured while recieving the response body.
    #[error("error reading response body: {0}")]
    ResponseBody(#[source] BoxError),

    /// An error occured while sending the request.
    #[error(transparent)]
    Request(hyperdriver::client::Error),

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] http::Error),

    /// A URL could not be resolved.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The registry sent a challenge the client cannot answer.
    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    /// Authentication was retried and the registry still refused the request.
    #[error("unauthorized: {uri}")]
    Unauthorized {
        /// The refused request.
        uri: Uri,
    },

    /// Too many redirects.
    #[error("too many redirects: {uri}")]
    Redirects {
        /// The last request.
        uri: Uri,
    },

    /// A JSON response could not be decoded.
    #[error("invalid JSON response from {uri}: {source}")]
    Json {
        /// The request URI.
        uri: Uri,
        /// The decoding error.
        source: serde_json::Error,
    },

    /// The token endpoint answered without a token.
    #[error("no token in response from {uri}")]
    MissingToken {
        /// The token endpoint.
        uri: Uri,
    },
}

impl From<hyperdriver::client::Error> for Error {
    fn from(error: hyperdriver::client::Error) -> Self {
        Error::Request(error)
    }
}

impl Error {
    /// The HTTP status of an error response, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Response(error) => Some(error.status),
            _ => None,
        }
    }
}

/// A `WWW-Authenticate` challenge could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeError {
    /// A 401 response carried no challenge.
    #[error("401 response without a WWW-Authenticate header")]
    Missing,

    /// The challenge header could not be parsed.
    #[error("malformed challenge: {0}")]
    Malformed(String),

    /// A Bearer challenge did not say where to get a token.
    #[error("bearer challenge without a realm")]
    MissingRealm,

    /// The registry asked for an unsupported scheme.
    #[error("unsupported authentication scheme: {0}")]
    UnsupportedScheme(String),

    /// The registry asked for Basic credentials but none are configured.
    #[error("registry requires credentials")]
    NoCredentials,
}

/// A server returned an error response
#[derive(Debug, Clone)]
pub struct HttpResponseError {
    /// The HTTP status code of the response
    pub status: StatusCode,

    /// The request URI
    pub uri: Uri,

    /// The message body of the response
    pub message: String,
}

impl fmt::Display for HttpResponseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HTTP {} from {}: {}", self.status, self.uri, self.message)
    }
}

impl std::error::Error for HttpResponseError {}
