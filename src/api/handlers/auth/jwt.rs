//! Access token issuance and validation.
//!
//! Access tokens are stateless HS256 JWTs with a fixed 2-hour expiry. There is
//! no revocation path at this layer; revocation happens against the session
//! that minted the token.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default access token expiry (2 hours)
const ACCESS_TOKEN_TTL_SECONDS: i64 = 2 * 60 * 60;

const DEFAULT_ISSUER: &str = "claviger";

#[derive(Clone, Debug)]
pub struct JwtConfig {
    secret: SecretString,
    issuer: String,
    ttl_seconds: i64,
}

impl JwtConfig {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            issuer: DEFAULT_ISSUER.to_string(),
            ttl_seconds: ACCESS_TOKEN_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: i64) -> Self {
        self.ttl_seconds = seconds;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    Encoding(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    Invalid,
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid,
        }
    }
}

/// Claims carried by an access token.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AccessClaims {
    /// Username
    pub(crate) sub: String,
    /// Unique token id
    pub(crate) jti: String,
    /// User id
    pub(crate) uid: String,
    pub(crate) role: String,
    pub(crate) iss: String,
    pub(crate) iat: i64,
    pub(crate) exp: i64,
}

/// Sign a new access token bound to the user's identity and role.
pub(crate) fn issue(
    config: &JwtConfig,
    user_id: Uuid,
    username: &str,
    role: &str,
) -> Result<String, JwtError> {
    let now = Utc::now();
    let claims = AccessClaims {
        sub: username.to_string(),
        jti: Uuid::new_v4().to_string(),
        uid: user_id.to_string(),
        role: role.to_string(),
        iss: config.issuer.clone(),
        iat: now.timestamp(),
        exp: (now + Duration::seconds(config.ttl_seconds)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret.expose_secret().as_bytes()),
    )
    .map_err(|err| JwtError::Encoding(err.to_string()))
}

/// Validate a presented access token and return its claims.
pub(crate) fn verify(config: &JwtConfig, token: &str) -> Result<AccessClaims, JwtError> {
    let mut validation = Validation::default();
    validation.set_issuer(&[config.issuer.as_str()]);

    let data = decode::<AccessClaims>(
        token,
        &DecodingKey::from_secret(config.secret.expose_secret().as_bytes()),
        &validation,
    )?;

    Ok(data.claims)
}
