//! SQLite storage
//!
//! Actors are kept as their JSON documents. Access tokens are never stored in
//! clear, only as `sha256:<base64url digest>`.

use std::path::Path;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use super::ActorStore;
use crate::activitypub::{Actor, Iri, Item};
use crate::auth::{AccessGrant, OAuthStorage, UserData};
use crate::error::AuthError;

const ACCESS_TOKEN_HASH_PREFIX: &str = "sha256:";

fn hash_access_token(access_token: &str) -> String {
    let digest = Sha256::digest(access_token.as_bytes());
    format!("{}{}", ACCESS_TOKEN_HASH_PREFIX, URL_SAFE_NO_PAD.encode(digest))
}

#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    client_id: String,
    scope: String,
    created_at: DateTime<Utc>,
    expires_in_secs: Option<i64>,
    user_data_kind: Option<String>,
    user_data: Option<Vec<u8>>,
}

impl GrantRow {
    fn into_grant(self) -> Result<AccessGrant, AuthError> {
        let user_data = match (self.user_data_kind.as_deref(), self.user_data) {
            (Some("text"), Some(bytes)) => Some(UserData::Text(
                String::from_utf8(bytes)
                    .map_err(|e| AuthError::Internal(anyhow::anyhow!("corrupt user data: {}", e)))?,
            )),
            (Some("bytes"), Some(bytes)) => Some(UserData::Bytes(bytes)),
            (Some("json"), Some(bytes)) => Some(UserData::Json(
                serde_json::from_slice(&bytes)
                    .map_err(|e| AuthError::Internal(anyhow::anyhow!("corrupt user data: {}", e)))?,
            )),
            _ => None,
        };

        Ok(AccessGrant {
            client_id: self.client_id,
            scope: self.scope,
            created_at: self.created_at,
            expires_in: self.expires_in_secs.map(Duration::seconds),
            user_data,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    pub async fn connect(path: &Path) -> Result<Self, AuthError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuthError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AuthError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Actors
    // =========================================================================

    /// Insert or replace an actor document
    pub async fn save_actor(&self, actor: &Actor) -> Result<(), AuthError> {
        let document = serde_json::to_string(actor)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("Failed to encode actor: {}", e)))?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO actors (id, document, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at
            "#,
        )
        .bind(actor.id.as_str())
        .bind(&document)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Access grants
    // =========================================================================

    pub async fn save_access(&self, token: &str, grant: &AccessGrant) -> Result<(), AuthError> {
        let (kind, data) = match &grant.user_data {
            Some(UserData::Text(text)) => (Some("text"), Some(text.as_bytes().to_vec())),
            Some(UserData::Bytes(bytes)) => (Some("bytes"), Some(bytes.clone())),
            Some(UserData::Json(value)) => (
                Some("json"),
                Some(serde_json::to_vec(value).map_err(|e| {
                    AuthError::Internal(anyhow::anyhow!("Failed to encode user data: {}", e))
                })?),
            ),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO access_grants (
                token_hash, client_id, scope, created_at, expires_in_secs, user_data_kind, user_data
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(token_hash) DO UPDATE SET
                client_id = excluded.client_id,
                scope = excluded.scope,
                created_at = excluded.created_at,
                expires_in_secs = excluded.expires_in_secs,
                user_data_kind = excluded.user_data_kind,
                user_data = excluded.user_data
            "#,
        )
        .bind(hash_access_token(token))
        .bind(&grant.client_id)
        .bind(&grant.scope)
        .bind(grant.created_at)
        .bind(grant.expires_in.map(|d| d.num_seconds()))
        .bind(kind)
        .bind(data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Revoke a token; returns whether it existed
    pub async fn remove_access(&self, token: &str) -> Result<bool, AuthError> {
        let result = sqlx::query("DELETE FROM access_grants WHERE token_hash = ?")
            .bind(hash_access_token(token))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ActorStore for SqliteStorage {
    async fn load(&self, iri: &Iri) -> Result<Item, AuthError> {
        let document = sqlx::query_scalar::<_, String>("SELECT document FROM actors WHERE id = ?")
            .bind(iri.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("{} is not stored locally", iri)))?;

        Item::from_slice(document.as_bytes())
    }
}

#[async_trait]
impl OAuthStorage for SqliteStorage {
    async fn load_access(&self, token: &str) -> Result<Option<AccessGrant>, AuthError> {
        let row = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT client_id, scope, created_at, expires_in_secs, user_data_kind, user_data
            FROM access_grants
            WHERE token_hash = ?
            "#,
        )
        .bind(hash_access_token(token))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let grant = row.into_grant()?;
        if grant.is_expired_at(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(grant))
    }
}
