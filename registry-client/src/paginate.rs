//! `Link` header pagination, as used by the tag list endpoint.

use http::{HeaderMap, Uri};
use url::Url;

use crate::error::Error;

/// The target of the first `rel="next"` link, if any.
pub fn next_link(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(http::header::LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|link| {
            let mut parts = link.split(';');
            let target = parts.next()?.trim();
            let target = target.strip_prefix('<')?.strip_suffix('>')?;
            parts
                .any(|param| {
                    let param = param.trim();
                    param == r#"rel="next""# || param == "rel=next"
                })
                .then_some(target)
        })
}

/// Resolve a link target, which may be relative, against the URI of the page
/// which carried it.
pub fn resolve(page: &Uri, link: &str) -> Result<Uri, Error> {
    let base = Url::parse(&page.to_string())?;
    let next = base.join(link)?;
    Ok(next.as_str().parse::<Uri>().map_err(http::Error::from)?)
}
