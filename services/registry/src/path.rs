//! Registry API paths.
//!
//! Repository names contain slashes, so `/v2/{name}/...` cannot be matched by
//! the router directly. Paths are split from the right on the endpoint
//! keyword instead.

use crate::error::{RegistryError, RegistryResult};

/// An endpoint under `/v2/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Route<'a> {
    /// `/v2/{name}/tags/list`
    Tags { name: &'a str },

    /// `/v2/{name}/manifests/{reference}`
    Manifest { name: &'a str, reference: &'a str },

    /// `/v2/{name}/blobs/{digest}`
    Blob { name: &'a str, digest: &'a str },
}

impl<'a> Route<'a> {
    /// Parse a request path. `None` for paths outside the read API.
    pub(crate) fn parse(path: &'a str) -> Option<Self> {
        let rest = path.strip_prefix("/v2/")?;

        if let Some(name) = rest.strip_suffix("/tags/list") {
            return Some(Route::Tags { name });
        }
        if let Some((name, reference)) = rest.rsplit_once("/manifests/") {
            return (!reference.is_empty() && !reference.contains('/'))
                .then_some(Route::Manifest { name, reference });
        }
        if let Some((name, digest)) = rest.rsplit_once("/blobs/") {
            return (!digest.is_empty() && !digest.contains('/'))
                .then_some(Route::Blob { name, digest });
        }
        None
    }

    /// The repository name.
    pub(crate) fn name(&self) -> &'a str {
        match self {
            Route::Tags { name } | Route::Manifest { name, .. } | Route::Blob { name, .. } => name,
        }
    }
}

/// Check a repository name: lowercase path components separated by `/`.
pub(crate) fn validate_name(name: &str) -> RegistryResult<()> {
    let component = |part: &str| {
        !part.is_empty()
            && part != "."
            && part != ".."
            && part
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"._-".contains(&b))
    };

    if name.split('/').all(component) {
        Ok(())
    } else {
        Err(RegistryError::NameInvalid(name.to_owned()))
    }
}
