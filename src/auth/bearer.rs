//! OAuth2 bearer token verification
//!
//! Tokens are issued elsewhere; this module only redeems them for the actor
//! recorded in the access grant.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use super::RequestHead;
use crate::activitypub::{Actor, Iri};
use crate::error::AuthError;
use crate::storage::ActorStore;

/// Opaque per-grant data written by the token issuer
#[derive(Debug, Clone, PartialEq)]
pub enum UserData {
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl UserData {
    /// The actor IRI this grant was issued to
    pub fn actor_iri(&self) -> Result<Iri, AuthError> {
        let iri = match self {
            UserData::Text(text) => text.clone(),
            UserData::Bytes(bytes) => String::from_utf8(bytes.clone()).map_err(|_| {
                AuthError::unauthorized(AuthError::BadRequest(
                    "user data is not valid UTF-8".to_string(),
                ))
            })?,
            UserData::Json(Value::String(text)) => text.clone(),
            UserData::Json(other) => {
                return Err(AuthError::unauthorized(AuthError::BadRequest(format!(
                    "user data of unexpected shape: {}",
                    other
                ))));
            }
        };

        let iri = iri.trim();
        if iri.is_empty() {
            return Err(AuthError::unauthorized(AuthError::BadRequest(
                "user data holds no actor IRI".to_string(),
            )));
        }
        Ok(Iri::from(iri))
    }
}

impl From<&str> for UserData {
    fn from(value: &str) -> Self {
        UserData::Text(value.to_string())
    }
}

/// What a bearer token was exchanged for
#[derive(Debug, Clone, PartialEq)]
pub struct AccessGrant {
    pub client_id: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    /// `None` never expires
    pub expires_in: Option<Duration>,
    pub user_data: Option<UserData>,
}

impl AccessGrant {
    pub fn new(client_id: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            scope: scope.into(),
            created_at: Utc::now(),
            expires_in: None,
            user_data: None,
        }
    }

    pub fn with_user_data(mut self, user_data: UserData) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn with_expiry(mut self, expires_in: Duration) -> Self {
        self.expires_in = Some(expires_in);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_in
            .is_some_and(|expires_in| self.created_at + expires_in <= now)
    }
}

/// Token lookup capability of an OAuth2 storage backend
///
/// Unknown and expired tokens are both `Ok(None)`.
#[async_trait]
pub trait OAuthStorage: Send + Sync {
    async fn load_access(&self, token: &str) -> Result<Option<AccessGrant>, AuthError>;
}

/// Bearer token from an `Authorization` header value, if the scheme is Bearer
pub fn bearer_token(authorization: &str) -> Option<&str> {
    let (scheme, token) = authorization.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

pub struct BearerVerifier {
    oauth: Arc<dyn OAuthStorage>,
    store: Arc<dyn ActorStore>,
}

impl BearerVerifier {
    pub fn new(oauth: Arc<dyn OAuthStorage>, store: Arc<dyn ActorStore>) -> Self {
        Self { oauth, store }
    }

    /// Resolve the actor a bearer token was issued to
    pub async fn verify(&self, head: &RequestHead<'_>) -> Result<Actor, AuthError> {
        let token = head
            .header(http::header::AUTHORIZATION.as_str())
            .and_then(bearer_token)
            .ok_or_else(|| AuthError::BadRequest("Missing bearer token".to_string()))?;

        let grant = self
            .oauth
            .load_access(token)
            .await?
            .ok_or_else(|| AuthError::NotFound("unknown access token".to_string()))?;

        let iri = grant
            .user_data
            .as_ref()
            .ok_or_else(|| AuthError::NotFound("access grant has no user data".to_string()))?
            .actor_iri()?;

        let item = self
            .store
            .load(&iri)
            .await
            .map_err(AuthError::unauthorized)?;

        item.into_actor().map_err(AuthError::unauthorized)
    }
}
