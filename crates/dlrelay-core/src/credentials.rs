//! SQLite-backed credential store
//!
//! Passwords are stored as argon2 PHC strings; lookups never write.

use crate::auth::CredentialStore;
use crate::error::DlrelayError;
use argon2::password_hash::{
    rand_core::OsRng, Error as PasswordHashError, PasswordHash, PasswordHasher, PasswordVerifier,
    SaltString,
};
use argon2::Argon2;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use std::path::Path;
use tracing::info;

/// Database connection pool for caller credentials
#[derive(Clone, Debug)]
pub struct SqliteCredentialStore {
    pool: SqlitePool,
}

impl SqliteCredentialStore {
    /// Open (or create) the credential database
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, DlrelayError> {
        let path = db_path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, DlrelayError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Create a user or replace its password
    pub async fn upsert_user(&self, username: &str, password: &str) -> Result<(), DlrelayError> {
        if username.is_empty() || password.is_empty() {
            return Err(DlrelayError::Validation(
                "username and password must not be empty".to_string(),
            ));
        }

        let hash = hash_password(password)?;
        sqlx::query(
            r#"
            INSERT INTO users (username, password_hash, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(username) DO UPDATE SET password_hash = excluded.password_hash
            "#,
        )
        .bind(username)
        .bind(hash)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!("Stored credentials for {}", username);
        Ok(())
    }

    /// Remove a user; returns whether it existed
    pub async fn remove_user(&self, username: &str) -> Result<bool, DlrelayError> {
        let result = sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All known usernames, sorted
    pub async fn list_users(&self) -> Result<Vec<String>, DlrelayError> {
        let rows = sqlx::query("SELECT username FROM users ORDER BY username")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("username")).collect())
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn verify(&self, username: &str, password: &str) -> Result<bool, DlrelayError> {
        let row = sqlx::query("SELECT password_hash FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => verify_password(password, &row.get::<String, _>("password_hash")),
            None => Ok(false),
        }
    }
}

fn hash_password(password: &str) -> Result<String, DlrelayError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DlrelayError::Internal(format!("failed to hash password: {}", e)))
}

fn verify_password(candidate: &str, stored: &str) -> Result<bool, DlrelayError> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| DlrelayError::Internal(format!("invalid stored hash: {}", e)))?;
    match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(PasswordHashError::Password) => Ok(false),
        Err(e) => Err(DlrelayError::Internal(format!("failed to verify password: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_store() -> SqliteCredentialStore {
        // A single connection keeps the in-memory database alive and shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteCredentialStore::from_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_verify_roundtrip() {
        let store = memory_store().await;
        store.upsert_user("bob", "hunter2").await.unwrap();

        assert!(store.verify("bob", "hunter2").await.unwrap());
        assert!(!store.verify("bob", "hunter3").await.unwrap());
        assert!(!store.verify("alice", "hunter2").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_replaces_password() {
        let store = memory_store().await;
        store.upsert_user("bob", "old").await.unwrap();
        store.upsert_user("bob", "new").await.unwrap();

        assert!(!store.verify("bob", "old").await.unwrap());
        assert!(store.verify("bob", "new").await.unwrap());
        assert_eq!(store.list_users().await.unwrap(), vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_user() {
        let store = memory_store().await;
        store.upsert_user("bob", "pw").await.unwrap();

        assert!(store.remove_user("bob").await.unwrap());
        assert!(!store.remove_user("bob").await.unwrap());
        assert!(!store.verify("bob", "pw").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_empty_user() {
        let store = memory_store().await;
        assert!(matches!(
            store.upsert_user("", "pw").await,
            Err(DlrelayError::Validation(_))
        ));
    }
}
