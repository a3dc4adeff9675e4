//! Storage backends
//!
//! Handles:
//! - Local actor lookup (`ActorStore`)
//! - OAuth2 access grant lookup (`OAuthStorage`)
//!
//! Resolution code depends on the traits only.

mod memory;
mod sqlite;

use async_trait::async_trait;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

use crate::activitypub::{Iri, Item};
use crate::error::AuthError;

/// Read-only lookup of previously known actors
#[async_trait]
pub trait ActorStore: Send + Sync {
    /// Best known representation of `iri`; `NotFound` on miss
    async fn load(&self, iri: &Iri) -> Result<Item, AuthError>;
}
