//! Content digests.
//!
//! A digest is `<algorithm>:<lowercase hex>`, e.g.
//! `sha256:a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

/// Hash algorithms a digest may be computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Algorithm {
    /// SHA-256, the registry default.
    #[default]
    Sha256,

    /// SHA-512.
    Sha512,
}

impl Algorithm {
    /// The algorithm prefix used in digest strings.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }

    fn hash(&self, data: &[u8]) -> String {
        match self {
            Algorithm::Sha256 => hex::encode(sha2::Sha256::digest(data)),
            Algorithm::Sha512 => hex::encode(sha2::Sha512::digest(data)),
        }
    }
}

impl FromStr for Algorithm {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            _ => Err(InvalidDigest(format!("unsupported algorithm {s:?}"))),
        }
    }
}

/// The digest string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid digest: {0}")]
pub struct InvalidDigest(String);

/// A content digest, validated on construction.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: Algorithm,
    value: String,
}

impl Digest {
    /// Compute the digest of `data` with the given algorithm.
    pub fn compute(algorithm: Algorithm, data: &[u8]) -> Self {
        let value = format!("{}:{}", algorithm.name(), algorithm.hash(data));
        Digest { algorithm, value }
    }

    /// Parse a digest string, checking the algorithm and hex length.
    pub fn parse(s: &str) -> Result<Self, InvalidDigest> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| InvalidDigest(format!("missing algorithm in {s:?}")))?;
        let algorithm: Algorithm = algorithm.parse()?;

        if hex.len() != algorithm.hex_len()
            || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(InvalidDigest(format!("malformed hex in {s:?}")));
        }

        Ok(Digest {
            algorithm,
            value: s.to_owned(),
        })
    }

    /// The algorithm used for this digest.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The hex-encoded hash, without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.value[self.algorithm.name().len() + 1..]
    }

    /// The full `<algorithm>:<hex>` string.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Check that `data` hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> bool {
        self.algorithm.hash(data) == self.hex()
    }
}

/// Compute the sha256 digest of manifest (or any other) bytes.
pub fn compute_digest(data: &[u8]) -> Digest {
    Digest::compute(Algorithm::Sha256, data)
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Digest").field(&self.value).finish()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl FromStr for Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Digest::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = InvalidDigest;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Digest::parse(&value)
    }
}

impl From<Digest> for String {
    fn from(value: Digest) -> Self {
        value.value
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.value
    }
}
