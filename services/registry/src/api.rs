//! API server builder and router

use std::sync::Arc;

use artifacts::{ArtifactStore, StoreConfig};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use content::{ContentStore, Repositories, RepositoryVersion};
use jose::KeyPair;
use serde_json::json;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::Distribution;
use crate::error::{RegistryError, RegistryResult};
use crate::path::{validate_name, Route};
use crate::token::TokenService;

/// Header advertising the registry API version.
pub const API_VERSION: &str = "docker-distribution-api-version";

/// Header carrying the digest of a served manifest or blob.
pub const CONTENT_DIGEST: &str = "docker-content-digest";

/// Shared state of the request handlers.
#[derive(Debug, Clone)]
pub(crate) struct RegistryState {
    pub(crate) store: Arc<ContentStore>,
    pub(crate) repositories: Arc<Repositories>,
    pub(crate) artifacts: ArtifactStore,
    pub(crate) distributions: Arc<[Distribution]>,
    pub(crate) signing_key: Arc<KeyPair>,
    pub(crate) tokens: Option<Arc<TokenService>>,
}

impl RegistryState {
    /// The repository version served as `name`.
    pub(crate) fn version(&self, name: &str) -> RegistryResult<Arc<RepositoryVersion>> {
        validate_name(name)?;
        let distribution = self
            .distributions
            .iter()
            .find(|d| d.base_path == name)
            .ok_or_else(|| RegistryError::NameUnknown(name.to_owned()))?;

        let version = match distribution.version {
            Some(number) => self
                .repositories
                .version(&distribution.repository, number)?,
            None => self.repositories.latest(&distribution.repository)?,
        };
        Ok(version)
    }
}

/// Registry builder for configuring and creating the registry service
#[derive(Debug)]
pub struct RegistryBuilder {
    store: Arc<ContentStore>,
    repositories: Arc<Repositories>,
    artifacts: ArtifactStore,
    distributions: Vec<Distribution>,
    signing_key: KeyPair,
    tokens: Option<TokenService>,
}

impl RegistryBuilder {
    /// Create a new registry builder. Converted schema-1 manifests are
    /// signed with `signing_key`.
    pub fn new(signing_key: KeyPair) -> Self {
        Self {
            store: Arc::new(ContentStore::new()),
            repositories: Arc::new(Repositories::new()),
            artifacts: StoreConfig::default().build(),
            distributions: Vec::new(),
            signing_key,
            tokens: None,
        }
    }

    /// Serve content from this store and these repositories
    pub fn content(mut self, store: Arc<ContentStore>, repositories: Arc<Repositories>) -> Self {
        self.store = store;
        self.repositories = repositories;
        self
    }

    /// Set the artifact store
    pub fn artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Serve a distribution
    pub fn distribution(mut self, distribution: Distribution) -> Self {
        self.distributions.push(distribution);
        self
    }

    /// Serve several distributions
    pub fn distributions(mut self, distributions: impl IntoIterator<Item = Distribution>) -> Self {
        self.distributions.extend(distributions);
        self
    }

    /// Require bearer tokens issued by `tokens`, and serve `/token`
    pub fn token_service(mut self, tokens: TokenService) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Router {
        let state = RegistryState {
            store: self.store,
            repositories: self.repositories,
            artifacts: self.artifacts,
            distributions: self.distributions.into(),
            signing_key: Arc::new(self.signing_key),
            tokens: self.tokens.map(Arc::new),
        };

        let mut router = Router::new()
            .route("/v2/", get(api_version_check))
            .route("/v2/{*path}", get(dispatch))
            .route_layer(middleware::from_fn_with_state(
                state.clone(),
                crate::auth::authorize,
            ));

        if state.tokens.is_some() {
            router = router.route("/token", get(crate::auth::token));
        }

        router
            .fallback(not_found)
            .layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static(API_VERSION),
                HeaderValue::from_static("registry/2.0"),
            ))
            .with_state(state)
    }
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}

/// Route a request under `/v2/` by its trailing endpoint keyword.
#[tracing::instrument(skip_all, fields(path = %uri.path()))]
async fn dispatch(
    State(state): State<RegistryState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> RegistryResult<Response> {
    let head = method == Method::HEAD;
    match Route::parse(uri.path()) {
        Some(Route::Tags { name }) => crate::tags::list(&state, name, uri.query()).await,
        Some(Route::Manifest { name, reference }) => {
            crate::manifest::get(&state, name, reference, &headers, head).await
        }
        Some(Route::Blob { name, digest }) => crate::blob::get(&state, name, digest, head).await,
        None => Err(RegistryError::NotFound(uri.path().to_owned())),
    }
}

async fn not_found(uri: Uri) -> Response {
    RegistryError::NotFound(uri.path().to_owned()).into_response()
}
