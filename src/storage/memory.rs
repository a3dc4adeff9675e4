//! In-memory storage, for tests and single-process setups

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::ActorStore;
use crate::activitypub::{Actor, Iri, Item};
use crate::auth::{AccessGrant, OAuthStorage};
use crate::error::AuthError;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<Iri, Item>>,
    grants: RwLock<HashMap<String, AccessGrant>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an actor under its own id
    pub async fn save_actor(&self, actor: Actor) {
        let iri = actor.id.clone();
        self.items.write().await.insert(iri, Item::from(actor));
    }

    pub async fn save_item(&self, iri: impl Into<Iri>, item: Item) {
        self.items.write().await.insert(iri.into(), item);
    }

    pub async fn save_access(&self, token: &str, grant: AccessGrant) {
        self.grants.write().await.insert(token.to_string(), grant);
    }

    pub async fn remove_access(&self, token: &str) -> bool {
        self.grants.write().await.remove(token).is_some()
    }
}

#[async_trait]
impl ActorStore for MemoryStorage {
    async fn load(&self, iri: &Iri) -> Result<Item, AuthError> {
        self.items
            .read()
            .await
            .get(iri)
            .cloned()
            .ok_or_else(|| AuthError::NotFound(format!("{} is not stored locally", iri)))
    }
}

#[async_trait]
impl OAuthStorage for MemoryStorage {
    async fn load_access(&self, token: &str) -> Result<Option<AccessGrant>, AuthError> {
        let grants = self.grants.read().await;
        Ok(grants
            .get(token)
            .filter(|grant| !grant.is_expired_at(Utc::now()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn load_misses_are_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.load(&Iri::from("https://local.example/nobody")).await,
            Err(AuthError::NotFound(_))
        ));

        storage
            .save_actor(Actor::new("https://local.example/jdoe", "Person"))
            .await;
        let item = storage
            .load(&Iri::from("https://local.example/jdoe"))
            .await
            .unwrap();
        assert_eq!(item.id().map(Iri::as_str), Some("https://local.example/jdoe"));
    }

    #[tokio::test]
    async fn expired_and_removed_grants_are_unknown() {
        let storage = MemoryStorage::new();

        let mut stale = AccessGrant::new("app", "read").with_expiry(Duration::seconds(10));
        stale.created_at = Utc::now() - Duration::seconds(11);
        storage.save_access("stale", stale).await;
        storage
            .save_access("fresh", AccessGrant::new("app", "read"))
            .await;

        assert!(storage.load_access("stale").await.unwrap().is_none());
        assert!(storage.load_access("fresh").await.unwrap().is_some());

        assert!(storage.remove_access("fresh").await);
        assert!(storage.load_access("fresh").await.unwrap().is_none());
        assert!(!storage.remove_access("fresh").await);
    }
}
