//! # Claviger (Credentials & Session Management)
//!
//! `claviger` issues and manages credentials and sessions for a user base:
//! registration, password login, access/refresh token issuance, refresh
//! rotation, logout revocation, email verification, password reset, and
//! administrator-driven user lifecycle changes with an audit trail.
//!
//! ## Token model
//!
//! - **Access tokens** are short-lived signed JWTs (2 hours). They are never
//!   persisted and cannot be revoked before expiry; revocation happens at the
//!   session layer.
//! - **Session (refresh) tokens** are high-entropy opaque values. The database
//!   stores only a SHA-256 hash; every refresh rotates the session, so a
//!   leaked token is good for at most one use.
//! - **One-time tokens** (email verification, password reset) are single-use:
//!   `used_at`, once set, is permanent.
//!
//! ## Enumeration resistance
//!
//! `login`, `logout`, `request-verify`, and `forgot-password` answer
//! identically whether or not the targeted account exists. Soft-deleted and
//! deactivated users are filtered by one shared predicate on every
//! authentication-path read.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
