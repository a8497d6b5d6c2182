//! P-256 key pairs and libtrust-compatible key IDs.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use camino::Utf8Path;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding, SecretDocument};
use p256::{EncodedPoint, FieldBytes, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::error::JoseError;

/// Curve name used in JWKs.
pub const CURVE: &str = "P-256";

/// Key type used in JWKs.
pub const KEY_TYPE: &str = "EC";

/// Signature algorithm name.
pub const ALGORITHM: &str = "ES256";

/// Public key in JWK form.
///
/// Field order matches the serialization used inside schema-1 signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Curve, always `P-256`.
    #[serde(default)]
    pub crv: String,

    /// Key ID.
    #[serde(default)]
    pub kid: String,

    /// Key type, always `EC`.
    pub kty: String,

    /// Base64url X coordinate.
    #[serde(default)]
    pub x: String,

    /// Base64url Y coordinate.
    #[serde(default)]
    pub y: String,
}

/// Derive the libtrust key ID for a public key: SHA-256 of the DER
/// SubjectPublicKeyInfo, truncated to 240 bits, base32 encoded and split into
/// twelve colon-separated groups of four.
fn key_id(key: &VerifyingKey) -> Result<String, JoseError> {
    let der = p256::PublicKey::from(key)
        .to_public_key_der()
        .map_err(|err| JoseError::InvalidKey(err.to_string()))?;

    let hash = sha2::Sha256::digest(der.as_bytes());
    let encoded = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &hash[..30]);

    let groups: Vec<&str> = encoded
        .as_bytes()
        .chunks(4)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect();
    Ok(groups.join(":"))
}

/// A public key able to verify ES256 signatures.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
    key_id: String,
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("kid", &self.key_id)
            .finish()
    }
}

impl PublicKey {
    fn new(key: VerifyingKey) -> Result<Self, JoseError> {
        Ok(PublicKey {
            key_id: key_id(&key)?,
            key,
        })
    }

    /// Rebuild a public key from its JWK form. The key ID is recomputed, not
    /// taken from the JWK.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, JoseError> {
        if jwk.kty != KEY_TYPE || jwk.crv != CURVE {
            return Err(JoseError::UnsupportedAlgorithm(format!(
                "{} {}",
                jwk.kty, jwk.crv
            )));
        }

        let x = URL_SAFE_NO_PAD.decode(&jwk.x)?;
        let y = URL_SAFE_NO_PAD.decode(&jwk.y)?;
        if x.len() != 32 || y.len() != 32 {
            return Err(JoseError::InvalidKey("coordinates must be 32 bytes".into()));
        }

        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&x),
            FieldBytes::from_slice(&y),
            false,
        );
        let key = VerifyingKey::from_encoded_point(&point)
            .map_err(|err| JoseError::InvalidKey(err.to_string()))?;
        PublicKey::new(key)
    }

    /// The libtrust key ID.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The JWK form of this key.
    pub fn jwk(&self) -> Jwk {
        let point = self.key.to_encoded_point(false);
        let encode = |coordinate: Option<&FieldBytes>| {
            coordinate
                .map(|c| URL_SAFE_NO_PAD.encode(c))
                .unwrap_or_default()
        };

        Jwk {
            crv: CURVE.to_owned(),
            kid: self.key_id.clone(),
            kty: KEY_TYPE.to_owned(),
            x: encode(point.x()),
            y: encode(point.y()),
        }
    }

    /// SPKI PEM encoding, for JWT libraries.
    pub fn to_pem(&self) -> Result<String, JoseError> {
        self.key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|err| JoseError::InvalidKey(err.to_string()))
    }

    /// Verify a raw `r || s` ES256 signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), JoseError> {
        let signature = Signature::from_slice(signature).map_err(|_| JoseError::Signature)?;
        self.key
            .verify(message, &signature)
            .map_err(|_| JoseError::Signature)
    }
}

/// A P-256 signing key with its derived key ID.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
    public: PublicKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.public.key_id)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    fn new(signing: SigningKey) -> Result<Self, JoseError> {
        let public = PublicKey::new(*signing.verifying_key())?;
        Ok(KeyPair { signing, public })
    }

    /// Generate a fresh random key.
    pub fn generate() -> Result<Self, JoseError> {
        KeyPair::new(SigningKey::random(&mut rand_core::OsRng))
    }

    /// Parse a PEM private key, either PKCS#8 (`BEGIN PRIVATE KEY`) or SEC1
    /// (`BEGIN EC PRIVATE KEY`).
    pub fn from_pem(pem: &str) -> Result<Self, JoseError> {
        let secret = match SecretKey::from_pkcs8_pem(pem) {
            Ok(secret) => secret,
            Err(pkcs8_error) => match SecretKey::from_sec1_pem(pem) {
                Ok(secret) => secret,
                Err(sec1_error) => {
                    tracing::error!("Error reading as PKCS8: {}", pkcs8_error);
                    tracing::error!("Error reading as SEC1: {}", sec1_error);
                    return Err(JoseError::InvalidKey(pkcs8_error.to_string()));
                }
            },
        };
        KeyPair::new(SigningKey::from(secret))
    }

    /// Read a PEM private key from a file.
    pub fn from_pem_file(path: &Utf8Path) -> Result<Self, JoseError> {
        let pem = std::fs::read_to_string(path).map_err(|source| JoseError::Io {
            path: path.to_owned(),
            source,
        })?;
        KeyPair::from_pem(&pem)
    }

    /// The libtrust key ID of the public half.
    pub fn key_id(&self) -> &str {
        self.public.key_id()
    }

    /// The public half.
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// The JWK form of the public half.
    pub fn jwk(&self) -> Jwk {
        self.public.jwk()
    }

    /// PKCS#8 DER encoding of the private key, including the public point.
    pub fn to_pkcs8_der(&self) -> Result<SecretDocument, JoseError> {
        let secret = SecretKey::from_bytes(&self.signing.to_bytes())
            .map_err(|err| JoseError::InvalidKey(err.to_string()))?;
        secret
            .to_pkcs8_der()
            .map_err(|err| JoseError::InvalidKey(err.to_string()))
    }

    /// Sign `message` with ES256, returning `r || s`.
    ///
    /// Signatures are deterministic (RFC 6979).
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing.sign(message);
        signature.to_bytes().to_vec()
    }
}
