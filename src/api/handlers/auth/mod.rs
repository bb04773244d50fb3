//! Auth handlers and supporting modules.
//!
//! This module coordinates password authentication, session rotation, and
//! one-time purpose tokens (email verification, password reset).
//!
//! ## Token lifecycle
//!
//! Login mints an access token (stateless JWT, 2h) and a refresh session
//! (opaque, hashed at rest, 14 days). Every refresh rotates the session:
//! the presented token is revoked and a replacement issued in one
//! transaction, so a stale token can never win twice, even under
//! concurrent requests. Password change/reset and account soft delete
//! revoke all sessions of the user in one bulk conditional update.
//!
//! ## Enumeration resistance
//!
//! Login, logout, request-verify, and forgot-password answer identically
//! whether or not the targeted account exists.

pub(crate) mod jwt;
pub(crate) mod login;
pub(crate) mod password;
pub(crate) mod principal;
pub(crate) mod register;
pub(crate) mod reset;
mod state;
pub(crate) mod storage;
pub(crate) mod types;
mod utils;
pub(crate) mod verification;

pub use jwt::JwtConfig;
pub use principal::{Principal, Role};
pub use state::AuthConfig;
pub(crate) use utils::{normalize_email, valid_email};
