//! # JOSE for registries
//!
//! ES256 signing as used by Docker registries:
//!
//! - [`KeyPair`] loads P-256 keys and derives libtrust key IDs.
//! - [`KeyPair::to_pkcs8_der`] and [`PublicKey::to_pem`] export keys for
//!   bearer token signing.
//! - [`jws`] produces and checks the "pretty" JWS embedded in schema-1
//!   manifests.

mod error;
pub mod jws;
mod keys;

pub use error::JoseError;
pub use keys::{Jwk, KeyPair, PublicKey, ALGORITHM};
