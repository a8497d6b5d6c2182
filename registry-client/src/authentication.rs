//! Authentication against upstream registries.
//!
//! Registries answer unauthenticated requests with `401` and a
//! `WWW-Authenticate` challenge. A [`Challenge`] either asks for Basic
//! credentials or names a token endpoint (`realm`) which issues a Bearer
//! token for a `service` and `scope`. The resulting authorization header is
//! kept in a [`TokenCache`] shared by every request of a client.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use http::header::InvalidHeaderValue;
use http::{HeaderMap, HeaderValue};
use serde::Deserialize;

use crate::error::{ChallengeError, Error};
use crate::secret::Secret;

/// Create a basic authentication header value, with the password being optional.
///
/// Basic authentication Base64 encodes the username and password, separated by a colon.
///
/// # Example
/// ```rust
/// use registry_client::basic_auth;
///
/// let header = basic_auth("username", Some("password")).unwrap();
/// assert_eq!(header.to_str().unwrap(), "Basic dXNlcm5hbWU6cGFzc3dvcmQ=");
/// ```
pub fn basic_auth<U, P>(username: U, password: Option<P>) -> Result<HeaderValue, InvalidHeaderValue>
where
    U: std::fmt::Display,
    P: std::fmt::Display,
{
    use base64::prelude::BASE64_STANDARD;
    use base64::write::EncoderWriter;
    use std::io::Write;

    let mut buf = b"Basic ".to_vec();
    {
        let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
        let _ = write!(encoder, "{}:", username);
        if let Some(password) = password {
            let _ = write!(encoder, "{}", password);
        }
    }
    let mut header = HeaderValue::from_bytes(&buf)?;
    header.set_sensitive(true);
    Ok(header)
}

/// Username and optional password for an upstream registry.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    /// Username.
    pub username: String,

    /// Password or access token.
    #[serde(default)]
    pub password: Option<Secret>,
}

impl Credentials {
    /// Create credentials.
    pub fn new<U, P>(username: U, password: Option<P>) -> Self
    where
        U: Into<String>,
        P: Into<Secret>,
    {
        Credentials {
            username: username.into(),
            password: password.map(Into::into),
        }
    }

    /// The `Basic` authorization header for these credentials.
    pub fn header_value(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        basic_auth(&self.username, self.password.as_ref().map(Secret::revealed))
    }
}

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// The registry wants Basic credentials on every request.
    Basic,

    /// The registry wants a Bearer token from `realm`.
    Bearer {
        /// Token endpoint.
        realm: String,

        /// Audience of the token.
        service: Option<String>,

        /// Requested access, e.g. `repository:library/busybox:pull`.
        scope: Option<String>,
    },
}

/// Split `key="value",key=value` parameters. Quoted values may contain commas.
fn parameters(input: &str) -> Result<BTreeMap<String, String>, ChallengeError> {
    let mut params = BTreeMap::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let (key, after) = rest
            .split_once('=')
            .ok_or_else(|| ChallengeError::Malformed(input.to_owned()))?;
        let key = key.trim().to_ascii_lowercase();
        let after = after.trim_start();

        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted
                .find('"')
                .ok_or_else(|| ChallengeError::Malformed(input.to_owned()))?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            match after.find(',') {
                Some(end) => (after[..end].trim_end(), &after[end..]),
                None => (after.trim_end(), ""),
            }
        };

        params.insert(key, value.to_owned());
        rest = remainder.trim_start().trim_start_matches(',').trim_start();
    }

    Ok(params)
}

impl Challenge {
    /// Parse a challenge header value.
    pub fn parse(header: &str) -> Result<Self, ChallengeError> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));

        match scheme.to_ascii_lowercase().as_str() {
            "basic" => Ok(Challenge::Basic),
            "bearer" => {
                let mut params = parameters(rest)?;
                let realm = params
                    .remove("realm")
                    .filter(|realm| !realm.is_empty())
                    .ok_or(ChallengeError::MissingRealm)?;
                Ok(Challenge::Bearer {
                    realm,
                    service: params.remove("service"),
                    scope: params.remove("scope"),
                })
            }
            _ => Err(ChallengeError::UnsupportedScheme(scheme.to_owned())),
        }
    }

    /// Find the challenge in a 401 response.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ChallengeError> {
        let header = headers
            .get(http::header::WWW_AUTHENTICATE)
            .ok_or(ChallengeError::Missing)?
            .to_str()
            .map_err(|_| ChallengeError::Malformed("non-ASCII challenge".into()))?;
        Challenge::parse(header)
    }
}

/// Body of a token endpoint response. Registries use either field.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_secret(self) -> Option<Secret> {
        self.token
            .or(self.access_token)
            .filter(|token| !token.is_empty())
            .map(Secret::from)
    }
}

/// The authorization header shared by all requests of a client.
///
/// Readers take the current header without locking. Refreshes are
/// serialized, and a refresh started from a stale generation is skipped so
/// that concurrent 401s produce one token request.
#[derive(Debug, Default)]
pub struct TokenCache {
    current: ArcSwapOption<HeaderValue>,
    generation: AtomicU64,
    refresh: tokio::sync::Mutex<()>,
}

impl TokenCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current authorization header, if any.
    pub fn current(&self) -> Option<HeaderValue> {
        self.current.load_full().map(|header| (*header).clone())
    }

    /// The number of refreshes so far. Callers record this before sending a
    /// request and pass it to [`TokenCache::refresh`] when the request fails.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace the authorization header with the result of `fetch`, unless
    /// another refresh completed since `observed`.
    pub async fn refresh<F>(&self, observed: u64, fetch: F) -> Result<(), Error>
    where
        F: Future<Output = Result<HeaderValue, Error>>,
    {
        let _guard = self.refresh.lock().await;
        if self.generation() != observed {
            tracing::trace!("authorization already refreshed");
            return Ok(());
        }

        let header = fetch.await?;
        self.current.store(Some(Arc::new(header)));
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Forget the current header.
    pub fn clear(&self) {
        self.current.store(None);
    }
}
