//! Password hashing helpers.
//!
//! bcrypt is CPU-expensive by design; hash and verify run on the blocking
//! pool so adaptive hashing never stalls the request-serving loop.

use anyhow::{Context, Result};

/// Cost factor for bcrypt hashing (12 is recommended for production)
const BCRYPT_COST: u32 = 12;

pub(crate) async fn hash_password(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, BCRYPT_COST))
        .await
        .context("password hashing task failed")?
        .context("failed to hash password")
}

/// Constant-time verify against a stored bcrypt hash.
pub(crate) async fn verify_password(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .context("password verify task failed")?
        .context("failed to verify password")
}

/// Minimum length policy shared by register, reset, and change flows.
pub(crate) fn valid_password(password: &str, min_len: usize) -> bool {
    password.chars().count() >= min_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify_round_trip() -> Result<()> {
        let hash = hash_password("secret1".to_string()).await?;
        assert_ne!(hash, "secret1");
        assert!(hash.starts_with("$2"));

        assert!(verify_password("secret1".to_string(), hash.clone()).await?);
        assert!(!verify_password("wrong".to_string(), hash).await?);
        Ok(())
    }

    #[tokio::test]
    async fn hashes_are_salted() -> Result<()> {
        let first = hash_password("secret1".to_string()).await?;
        let second = hash_password("secret1".to_string()).await?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn valid_password_enforces_minimum_length() {
        assert!(valid_password("secret", 6));
        assert!(valid_password("secret1", 6));
        assert!(!valid_password("short", 6));
        assert!(!valid_password("", 6));
    }
}
