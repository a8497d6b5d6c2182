//! # Registry client
//!
//! A client for the read side of the registry v2 API: tag lists, manifests
//! and blobs. It drains `Link` pagination, follows redirects to blob
//! storage, answers `401` challenges once per request and retries transient
//! failures with [`Backoff`].

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use content::media;
use content::Digest;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, LOCATION};
use http::{HeaderValue, StatusCode, Uri};
use hyperdriver::client::SharedClientService;
use hyperdriver::service::SharedService;
use hyperdriver::Body;
use serde::Deserialize;
use tower::ServiceExt;
use url::Url;

mod authentication;
mod error;
pub mod mock;
pub mod paginate;
pub mod response;
mod retry;
mod secret;

pub use self::authentication::{basic_auth, Challenge, Credentials, TokenCache};
pub use self::error::{ChallengeError, Error, HttpResponseError};
pub use self::response::Response;
pub use self::retry::{Backoff, BackoffFuture};
pub use self::secret::Secret;

use self::authentication::TokenResponse;

/// Header carrying the registry's digest of a served manifest or blob.
pub const CONTENT_DIGEST: &str = "docker-content-digest";

const MAX_REDIRECTS: usize = 5;

/// A manifest as served by the registry.
#[derive(Debug, Clone)]
pub struct FetchedManifest {
    /// The exact bytes served.
    pub bytes: Bytes,

    /// `Content-Type`, without parameters.
    pub media_type: Option<String>,

    /// `Docker-Content-Digest`, when the registry sent one.
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// A client for one upstream registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base: Uri,
    inner: SharedClientService<Body, Body>,
    credentials: Option<Arc<Credentials>>,
    tokens: Arc<TokenCache>,
}

impl RegistryClient {
    /// Create a client for the registry at `base`, over TCP with TLS.
    pub fn new(base: Uri, credentials: Option<Credentials>, backoff: Backoff) -> Self {
        let inner = hyperdriver::Client::build_tcp_http()
            .with_default_tls()
            .build_service();
        Self::with_service(base, credentials, backoff, inner)
    }

    /// Create a client which sends requests through `inner`.
    pub fn with_service<S>(
        base: Uri,
        credentials: Option<Credentials>,
        backoff: Backoff,
        inner: S,
    ) -> Self
    where
        S: tower::Service<
                http::Request<hyperdriver::Body>,
                Response = http::Response<hyperdriver::Body>,
                Error = hyperdriver::client::Error,
            > + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let service = tower::ServiceBuilder::new()
            .layer(SharedService::layer())
            .layer(tower::retry::RetryLayer::new(backoff))
            .service(inner);

        RegistryClient {
            base,
            inner: service,
            credentials: credentials.map(Arc::new),
            tokens: Arc::new(TokenCache::new()),
        }
    }

    /// The registry base URI.
    pub fn base(&self) -> &Uri {
        &self.base
    }

    /// The authorization cache shared by clones of this client.
    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    fn endpoint(&self, path: &str) -> Result<Uri, Error> {
        let base = Url::parse(&self.base.to_string())?;
        Ok(base.join(path)?.as_str().parse::<Uri>().map_err(http::Error::from)?)
    }

    fn request(
        &self,
        uri: &Uri,
        accept: &[&str],
        authorization: Option<HeaderValue>,
    ) -> Result<http::Request<hyperdriver::Body>, Error> {
        let mut builder = http::Request::get(uri.clone());
        if !accept.is_empty() {
            builder = builder.header(ACCEPT, accept.join(", "));
        }
        if let Some(authorization) = authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        Ok(builder.body(Body::empty())?)
    }

    /// Answer a challenge with a new authorization header.
    async fn authorize(&self, challenge: Challenge) -> Result<HeaderValue, Error> {
        let basic = self
            .credentials
            .as_ref()
            .map(|credentials| credentials.header_value())
            .transpose()
            .map_err(http::Error::from)?;

        let (realm, service, scope) = match challenge {
            Challenge::Basic => return basic.ok_or_else(|| ChallengeError::NoCredentials.into()),
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => (realm, service, scope),
        };

        let mut url = Url::parse(&realm)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &scope {
                query.append_pair("scope", scope);
            }
        }
        let uri: Uri = url.as_str().parse().map_err(http::Error::from)?;
        tracing::debug!(realm = %uri, ?scope, "requesting token");

        let request = self.request(&uri, &[], basic)?;
        let response = Response::new(uri.clone(), self.inner.clone().oneshot(request).await?)
            .error_for_status()
            .await?;
        let body = response.bytes().await?;
        let token: TokenResponse = serde_json::from_slice(&body).map_err(|source| Error::Json {
            uri: uri.clone(),
            source,
        })?;

        let secret = token.into_secret().ok_or(Error::MissingToken { uri })?;
        Ok(secret.bearer().map_err(http::Error::from)?)
    }

    /// Send a GET request, answering one authentication challenge and
    /// following redirects. Non-success responses become errors.
    #[tracing::instrument(level = "debug", skip(self, uri, accept), fields(%uri))]
    pub async fn get(&self, uri: Uri, accept: &[&str]) -> Result<Response, Error> {
        let mut uri = uri;
        let mut challenged = false;
        let mut redirects = 0;

        loop {
            let observed = self.tokens.generation();

            // Credentials stay with the registry; redirects to storage go without.
            let authorization = if uri.authority() == self.base.authority() {
                self.tokens.current()
            } else {
                None
            };

            let request = self.request(&uri, accept, authorization)?;
            let response = Response::new(uri.clone(), self.inner.clone().oneshot(request).await?);
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                if challenged {
                    return Err(Error::Unauthorized { uri });
                }
                let challenge = Challenge::from_headers(response.headers())?;
                self.tokens
                    .refresh(observed, self.authorize(challenge))
                    .await?;
                challenged = true;
                continue;
            }

            if status.is_redirection() {
                if let Some(location) = response.header_str(LOCATION) {
                    redirects += 1;
                    if redirects > MAX_REDIRECTS {
                        return Err(Error::Redirects { uri });
                    }
                    let next = paginate::resolve(&uri, location)?;
                    tracing::trace!(from = %uri, to = %next, "following redirect");
                    uri = next;
                    continue;
                }
            }

            return response.error_for_status().await;
        }
    }

    /// All tags of repository `name`, following pagination to the end.
    #[tracing::instrument(skip(self))]
    pub async fn tags(&self, name: &str) -> Result<Vec<String>, Error> {
        let mut next = Some(self.endpoint(&format!("/v2/{name}/tags/list"))?);
        let mut tags = Vec::new();
        let mut seen = HashSet::new();
        let mut pages = 0usize;

        while let Some(uri) = next.take() {
            let response = self.get(uri.clone(), &[]).await?;
            next = paginate::next_link(response.headers())
                .map(|link| paginate::resolve(&uri, link))
                .transpose()?
                .filter(|link| *link != uri);

            let body = response.bytes().await?;
            let page: TagList = serde_json::from_slice(&body).map_err(|source| Error::Json {
                uri: uri.clone(),
                source,
            })?;
            pages += 1;

            for tag in page.tags.unwrap_or_default() {
                if seen.insert(tag.clone()) {
                    tags.push(tag);
                }
            }
        }

        tracing::debug!(pages, tags = tags.len(), "listed tags");
        Ok(tags)
    }

    /// Fetch a manifest by tag or digest, accepting every supported media type.
    #[tracing::instrument(skip(self))]
    pub async fn manifest(&self, name: &str, reference: &str) -> Result<FetchedManifest, Error> {
        let uri = self.endpoint(&format!("/v2/{name}/manifests/{reference}"))?;
        let response = self.get(uri, media::ACCEPTED_MANIFESTS).await?;

        let media_type = response
            .header_str(CONTENT_TYPE)
            .map(|value| media::essence(value).to_owned())
            .filter(|value| !value.is_empty());
        let digest = response.header_str(CONTENT_DIGEST).map(str::to_owned);

        Ok(FetchedManifest {
            bytes: response.bytes().await?,
            media_type,
            digest,
        })
    }

    /// Fetch a blob. The caller verifies the digest.
    #[tracing::instrument(skip(self, digest), fields(%digest))]
    pub async fn blob(&self, name: &str, digest: &Digest) -> Result<Bytes, Error> {
        let uri = self.endpoint(&format!("/v2/{name}/blobs/{digest}"))?;
        self.get(uri, &[]).await?.bytes().await
    }
}
