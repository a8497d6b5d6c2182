use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

use http::header::InvalidHeaderValue;
use http::HeaderValue;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// A password or token.
///
/// The wrapper keeps the value out of `Debug` output and zeroes owned values
/// on drop. Use [Secret::revealed] to get the underlying value.
#[derive(Clone, Deserialize, Serialize)]
#[serde(from = "String")]
pub struct Secret(Cow<'static, str>);

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl Secret {
    /// Expose the underlying value.
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }

    /// A sensitive `Bearer` authorization header carrying this secret.
    pub fn bearer(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut header = HeaderValue::try_from(format!("Bearer {}", self.revealed()))?;
        header.set_sensitive(true);
        Ok(header)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(value.into())
    }
}
