//! Bearer token service.
//!
//! Tokens are ES256 JWTs carrying the registered claims and an `access` list
//! of `{type, name, actions}` grants. Only `pull` is ever granted.

use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use jose::{JoseError, KeyPair};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Actions the token service will grant.
pub const PERMITTED_ACTIONS: &[&str] = &["pull"];

/// The action every read endpoint requires.
pub const PULL: &str = "pull";

const DEFAULT_EXPIRES_IN: u64 = 300;

/// Errors loading keys, or signing tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The signing key could not be loaded or exported.
    #[error("token key: {0}")]
    Key(#[from] JoseError),

    /// The JWT library refused the key or the claims.
    #[error("jwt: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Token service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenConfig {
    /// URL of the token endpoint. Used as the issuer and as the challenge realm.
    pub server: String,

    /// Name of this registry, the token audience.
    pub service: String,

    /// PEM private key used to sign tokens.
    pub private_key: Utf8PathBuf,

    /// Token lifetime in seconds.
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN
}

/// Error parsing a scope string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid scope {0:?}")]
pub struct InvalidScope(String);

/// Requested access, as in `repository:library/busybox:pull,push`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    /// Resource type, usually `repository`.
    pub kind: String,

    /// Resource name.
    pub name: String,

    /// Requested actions.
    pub actions: Vec<String>,
}

impl Scope {
    /// Pull access to repository `name`.
    pub fn pull(name: impl Into<String>) -> Self {
        Scope {
            kind: "repository".into(),
            name: name.into(),
            actions: vec![PULL.into()],
        }
    }
}

impl FromStr for Scope {
    type Err = InvalidScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Names may contain a registry host with a port, so split from both ends.
        let invalid = || InvalidScope(s.to_owned());
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (name, actions) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if kind.is_empty() || name.is_empty() {
            return Err(invalid());
        }

        Ok(Scope {
            kind: kind.to_owned(),
            name: name.to_owned(),
            actions: actions
                .split(',')
                .filter(|action| !action.is_empty())
                .map(str::to_owned)
                .collect(),
        })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.name, self.actions.join(","))
    }
}

/// A grant recorded in a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    /// Resource type.
    #[serde(rename = "type")]
    pub kind: String,

    /// Resource name.
    pub name: String,

    /// Granted actions.
    pub actions: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    sub: String,
    aud: String,
    exp: i64,
    nbf: i64,
    iat: i64,
    jti: String,

    #[serde(default)]
    access: Vec<Access>,
}

/// An issued token, in the shape the token endpoint returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    /// The signed JWT.
    pub token: String,

    /// The same JWT, for OAuth2 clients.
    pub access_token: String,

    /// Lifetime in seconds.
    pub expires_in: u64,

    /// Issue time, RFC 3339.
    pub issued_at: String,
}

/// Issues and checks registry bearer tokens.
pub struct TokenService {
    key: KeyPair,
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    service: String,
    expires_in: u64,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("key", &self.key)
            .field("issuer", &self.issuer)
            .field("service", &self.service)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// A token service signing with `key`.
    pub fn new(
        key: KeyPair,
        issuer: impl Into<String>,
        service: impl Into<String>,
        expires_in: u64,
    ) -> Result<Self, TokenError> {
        let encoding = EncodingKey::from_ec_der(key.to_pkcs8_der()?.as_bytes());
        let decoding = DecodingKey::from_ec_pem(key.public().to_pem()?.as_bytes())?;
        Ok(TokenService {
            key,
            encoding,
            decoding,
            issuer: issuer.into(),
            service: service.into(),
            expires_in,
        })
    }

    /// Load the signing key named by `config`.
    pub fn from_config(config: &TokenConfig) -> Result<Self, TokenError> {
        let key = KeyPair::from_pem_file(&config.private_key)?;
        TokenService::new(key, &config.server, &config.service, config.expires_in)
    }

    /// The audience tokens are issued for.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The signing key.
    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    /// Issue a token for `subject` granting the permitted part of `scopes`.
    #[tracing::instrument(skip(self, scopes), fields(scopes = scopes.len()))]
    pub fn issue(
        &self,
        subject: &str,
        scopes: &[Scope],
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let issued = now.timestamp();
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: subject.to_owned(),
            aud: self.service.clone(),
            exp: issued + self.expires_in as i64,
            nbf: issued,
            iat: issued,
            jti: uuid::Uuid::new_v4().to_string(),
            access: scopes.iter().filter_map(permitted).collect(),
        };

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key.key_id().to_owned());
        let token = jsonwebtoken::encode(&header, &claims, &self.encoding)?;
        tracing::debug!(grants = claims.access.len(), "issued token");
        Ok(IssuedToken {
            access_token: token.clone(),
            token,
            expires_in: self.expires_in,
            issued_at: now.to_rfc3339(),
        })
    }

    /// Check `token` against the current time and return its grants.
    ///
    /// `None` means the token is not valid.
    pub fn verify(&self, token: &str) -> Option<Vec<Access>> {
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.service]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        match jsonwebtoken::decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => Some(data.claims.access),
            Err(error) => {
                tracing::debug!(%error, "token rejected");
                None
            }
        }
    }

    /// Whether `access` grants `action` on repository `name`.
    pub fn allows(access: &[Access], name: &str, action: &str) -> bool {
        access.iter().any(|grant| {
            grant.kind == "repository"
                && grant.name == name
                && grant.actions.iter().any(|granted| granted == action)
        })
    }

    /// `WWW-Authenticate` challenge for a request needing `scope`.
    pub fn challenge(&self, scope: Option<&Scope>) -> String {
        let mut challenge = format!(
            "Bearer realm=\"{}\",service=\"{}\"",
            self.issuer, self.service
        );
        if let Some(scope) = scope {
            challenge.push_str(&format!(",scope=\"{scope}\""));
        }
        challenge
    }
}

/// Intersect a requested scope with the permitted actions.
fn permitted(scope: &Scope) -> Option<Access> {
    let actions: Vec<String> = scope
        .actions
        .iter()
        .filter(|action| PERMITTED_ACTIONS.contains(&action.as_str()))
        .cloned()
        .collect();

    if actions.is_empty() || scope.kind != "repository" {
        return None;
    }
    Some(Access {
        kind: scope.kind.clone(),
        name: scope.name.clone(),
        actions,
    })
}
