//! Tag listing with `n`/`last` pagination.

use std::collections::BTreeSet;

use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::api::RegistryState;
use crate::error::{RegistryError, RegistryResult};

/// Tag list response
#[derive(Debug, Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    n: Option<usize>,
    last: Option<String>,
}

/// List tags for a repository
#[tracing::instrument(skip(state))]
pub(crate) async fn list(
    state: &RegistryState,
    name: &str,
    query: Option<&str>,
) -> RegistryResult<Response> {
    let version = state.version(name)?;
    let pagination: Pagination = match query {
        Some(query) => serde_urlencoded::from_str(query)
            .map_err(|error| RegistryError::PaginationInvalid(error.to_string()))?,
        None => Pagination::default(),
    };

    let names: BTreeSet<&str> = version
        .content()
        .tags
        .iter()
        .map(|tag| tag.name.as_str())
        .collect();
    let (tags, next) = page(names, &pagination);

    let body = Json(TagList {
        name: name.to_owned(),
        tags: tags.clone(),
    });
    match (next, pagination.n) {
        (true, Some(n)) => {
            let last = tags.last().map(String::as_str).unwrap_or_default();
            let link = format!(
                "</v2/{name}/tags/list?{}>; rel=\"next\"",
                serde_urlencoded::to_string([("n", n.to_string().as_str()), ("last", last)])
                    .unwrap_or_default()
            );
            Ok(([(header::LINK, link)], body).into_response())
        }
        _ => Ok(body.into_response()),
    }
}

/// Sorted names after `last`, at most `n` of them, and whether a next page
/// exists. An empty page has no next page, since it has no `last` to follow.
fn page(names: BTreeSet<&str>, pagination: &Pagination) -> (Vec<String>, bool) {
    let mut remaining = names
        .into_iter()
        .filter(|name| pagination.last.as_deref().is_none_or(|last| *name > last))
        .peekable();

    let limit = pagination.n.unwrap_or(usize::MAX);
    let tags: Vec<String> = remaining.by_ref().take(limit).map(str::to_owned).collect();
    let more = !tags.is_empty() && remaining.peek().is_some();
    (tags, more)
}
