//! Auth configuration shared by the handlers.

use super::jwt::JwtConfig;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 14 * 24 * 60 * 60;
const DEFAULT_VERIFY_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_ttl_seconds: i64,
    verify_token_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    min_password_len: usize,
    expose_tokens: bool,
    jwt: JwtConfig,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String, jwt: JwtConfig) -> Self {
        Self {
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            verify_token_ttl_seconds: DEFAULT_VERIFY_TOKEN_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            expose_tokens: false,
            jwt,
        }
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_verify_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verify_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_min_password_len(mut self, len: usize) -> Self {
        self.min_password_len = len;
        self
    }

    /// Return raw one-time tokens in responses instead of delivering them
    /// out of band. Development only.
    #[must_use]
    pub fn with_expose_tokens(mut self, expose: bool) -> Self {
        self.expose_tokens = expose;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(crate) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(crate) fn verify_token_ttl_seconds(&self) -> i64 {
        self.verify_token_ttl_seconds
    }

    pub(crate) fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    pub(crate) fn min_password_len(&self) -> usize {
        self.min_password_len
    }

    pub(crate) fn expose_tokens(&self) -> bool {
        self.expose_tokens
    }

    pub(crate) fn jwt(&self) -> &JwtConfig {
        &self.jwt
    }
}
