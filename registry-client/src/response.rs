//! Responses from an upstream registry.

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri};
use http_body_util::BodyExt as _;
use hyperdriver::Body;

use crate::error::{Error, HttpResponseError};

/// A response, with the URI of the request which produced it.
#[derive(Debug)]
pub struct Response {
    uri: Uri,
    response: http::response::Parts,
    body: Body,
}

impl Response {
    /// Wrap an HTTP response.
    pub fn new(uri: Uri, response: http::Response<Body>) -> Self {
        let (response, body) = response.into_parts();
        Self {
            uri,
            response,
            body,
        }
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    /// The URI of the request.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// A header value as a string, if present and printable.
    pub fn header_str(&self, name: impl http::header::AsHeaderName) -> Option<&str> {
        self.response.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Collect the body.
    pub async fn bytes(self) -> Result<Bytes, Error> {
        let collected = self
            .body
            .collect()
            .await
            .map_err(|error| Error::ResponseBody(error.into()))?;
        Ok(collected.to_bytes())
    }

    /// Collect the body as text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String, Error> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Collect the body into an error, for a non-success status.
    pub async fn into_error(self) -> HttpResponseError {
        let status = self.status();
        let uri = self.uri.clone();
        let message = self
            .text()
            .await
            .unwrap_or_else(|err| format!("failed to read response body: {err}"));

        HttpResponseError {
            status,
            uri,
            message,
        }
    }

    /// Pass successful responses through, turn anything else into an error.
    pub async fn error_for_status(self) -> Result<Self, Error> {
        if self.status().is_success() {
            Ok(self)
        } else {
            Err(Error::Response(self.into_error().await))
        }
    }
}
