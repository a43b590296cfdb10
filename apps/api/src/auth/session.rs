//! Bearer session issuance and lookup.
//!
//! Tokens are 32 random bytes, hex-encoded; the database stores only their
//! SHA-256 digest. A user has at most one live session: issuing a new one
//! deletes every prior session (last login wins).

use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::user::User;

const SESSION_TTL_DAYS: i64 = 30;

pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Issues a fresh session token for `user_id`, revoking all prior sessions
/// in the same transaction.
pub async fn create_session(db: &PgPool, user_id: Uuid) -> Result<String, AppError> {
    let token = generate_token();
    let expires_at = Utc::now() + Duration::days(SESSION_TTL_DAYS);

    let mut tx = db.begin().await?;
    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(token)
}

/// Resolves a presented token to its user, ignoring expired sessions.
pub async fn user_for_token(db: &PgPool, token: &str) -> Result<Option<User>, AppError> {
    let session: Option<crate::models::session::Session> =
        sqlx::query_as("SELECT * FROM sessions WHERE token_hash = $1")
            .bind(hash_token(token))
            .fetch_optional(db)
            .await?;

    let Some(session) = session else {
        return Ok(None);
    };
    if session.is_expired(Utc::now()) {
        return Ok(None);
    }

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(session.user_id)
        .fetch_optional(db)
        .await?;
    Ok(user)
}

pub async fn revoke_session(db: &PgPool, token: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(hash_token(token))
        .execute(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_opaque() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn token_hash_is_deterministic_and_distinct_from_token() {
        let token = generate_token();
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }
}
