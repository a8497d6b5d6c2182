//! Bearer authentication for the read API, and the `/token` endpoint.

use axum::extract::{RawQuery, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;

use crate::api::RegistryState;
use crate::error::{RegistryError, RegistryResult};
use crate::path::Route;
use crate::token::{IssuedToken, Scope, TokenService, PULL};

/// Reject requests without a token granting pull on the addressed repository.
///
/// `/v2/` itself only needs a valid token. Without a token service every
/// request passes.
pub(crate) async fn authorize(
    State(state): State<RegistryState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(tokens) = state.tokens.as_deref() else {
        return next.run(request).await;
    };

    let scope = Route::parse(request.uri().path()).map(|route| Scope::pull(route.name()));
    let access = bearer(&request).and_then(|token| tokens.verify(token));

    let allowed = match (&access, &scope) {
        (Some(access), Some(scope)) => TokenService::allows(access, &scope.name, PULL),
        (Some(_), None) => true,
        (None, _) => false,
    };

    if allowed {
        next.run(request).await
    } else {
        tracing::debug!(scope = ?scope.as_ref().map(ToString::to_string), "unauthorized");
        RegistryError::Unauthorized {
            challenge: tokens.challenge(scope.as_ref()),
            scope,
        }
        .into_response()
    }
}

fn bearer(request: &Request) -> Option<&str> {
    let value = request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
}

/// Issue a token for the `scope` parameters of the query.
///
/// Scopes which do not parse are ignored; a `service` other than this
/// registry is refused.
#[tracing::instrument(skip_all)]
pub(crate) async fn token(
    State(state): State<RegistryState>,
    RawQuery(query): RawQuery,
) -> RegistryResult<Json<IssuedToken>> {
    let tokens = state
        .tokens
        .as_deref()
        .ok_or_else(|| RegistryError::NotFound("/token".into()))?;

    let mut scopes = Vec::new();
    let mut account = String::new();
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        match &*key {
            "service" if value != tokens.service() => {
                return Err(RegistryError::Denied(format!("unknown service {value:?}")));
            }
            "scope" => match value.parse::<Scope>() {
                Ok(scope) => scopes.push(scope),
                Err(error) => tracing::warn!(%error, "ignoring scope"),
            },
            "account" => account = value.into_owned(),
            _ => {}
        }
    }

    Ok(Json(tokens.issue(&account, &scopes, Utc::now())?))
}
