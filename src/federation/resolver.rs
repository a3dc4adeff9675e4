//! Actor and key resolution
//!
//! Lookup order for a key id:
//! 1. Ignore list (no I/O when it matches)
//! 2. Local store, fragment stripped
//! 3. Remote key or actor document
//! 4. Remote actor at the same IRI
//!
//! Nothing fetched remotely is written back to the store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use super::client::{Client, ResolvedKey, fetch_key_or_actor};
use crate::activitypub::{Actor, IgnoreList, Iri};
use crate::config::AppConfig;
use crate::error::AuthError;
use crate::metrics;
use crate::storage::ActorStore;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Immutable resolver settings and collaborators
#[derive(Clone)]
pub struct ResolverConfig {
    base_url: Option<Url>,
    ignore_list: IgnoreList,
    fetch_timeout: Duration,
    require_key_owner_match: bool,
    span: tracing::Span,
    store: Option<Arc<dyn ActorStore>>,
    client: Option<Arc<dyn Client>>,
}

impl std::fmt::Debug for ResolverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverConfig")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("ignore_list", &self.ignore_list)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("require_key_owner_match", &self.require_key_owner_match)
            .field("store", &self.store.is_some())
            .field("client", &self.client.is_some())
            .finish()
    }
}

impl ResolverConfig {
    pub fn builder() -> ResolverConfigBuilder {
        ResolverConfigBuilder {
            config: ResolverConfig {
                base_url: None,
                ignore_list: IgnoreList::new(),
                fetch_timeout: DEFAULT_FETCH_TIMEOUT,
                require_key_owner_match: false,
                span: tracing::info_span!("actor_resolver"),
                store: None,
                client: None,
            },
        }
    }

    /// Settings from the `server` and `federation` sections
    pub fn from_app_config(
        config: &AppConfig,
        store: Option<Arc<dyn ActorStore>>,
        client: Option<Arc<dyn Client>>,
    ) -> Result<Self, AuthError> {
        let base_url = Url::parse(&config.server.base_url())
            .map_err(|e| AuthError::Config(format!("server.domain: {}", e)))?;

        let mut builder = ResolverConfig::builder()
            .base_url(base_url)
            .ignore_list(config.federation.ignore_list.iter().map(String::as_str).collect())
            .fetch_timeout(config.federation.fetch_timeout())
            .require_key_owner_match(config.federation.require_key_owner_match)
            .span(tracing::info_span!("actor_resolver", instance = %config.server.domain));

        if let Some(store) = store {
            builder = builder.store(store);
        }
        if let Some(client) = client {
            builder = builder.client(client);
        }
        Ok(builder.build())
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

pub struct ResolverConfigBuilder {
    config: ResolverConfig,
}

impl ResolverConfigBuilder {
    /// IRIs under this URL are local and never fetched remotely
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.config.base_url = Some(base_url);
        self
    }

    pub fn ignore_list(mut self, ignore_list: IgnoreList) -> Self {
        self.config.ignore_list = ignore_list;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    pub fn require_key_owner_match(mut self, enabled: bool) -> Self {
        self.config.require_key_owner_match = enabled;
        self
    }

    /// Parent span for every event the resolver emits
    pub fn span(mut self, span: tracing::Span) -> Self {
        self.config.span = span;
        self
    }

    pub fn store(mut self, store: Arc<dyn ActorStore>) -> Self {
        self.config.store = Some(store);
        self
    }

    pub fn client(mut self, client: Arc<dyn Client>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn build(self) -> ResolverConfig {
        self.config
    }
}

/// Finds the actor behind a key id
#[derive(Debug, Clone)]
pub struct ActorResolver {
    config: Arc<ResolverConfig>,
}

impl ActorResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `iri` through every stage until one succeeds
    ///
    /// `ignore` is checked in addition to the configured ignore list.
    pub async fn resolve(&self, iri: &Iri, ignore: &IgnoreList) -> Result<ResolvedKey, AuthError> {
        self.check_ignored(iri, ignore)?;

        let local_err = match self.load_local(iri).await {
            Ok(resolved) => return Ok(resolved),
            Err(e) => e,
        };

        if self.is_local(iri) {
            return Err(local_err);
        }

        tracing::debug!(
            parent: &self.config.span,
            key_id = %iri,
            reason = %local_err,
            "Key not available locally, trying remote"
        );

        let resolved = self.load_remote(iri, ignore).await?;
        self.check_ignored(&resolved.actor.id, ignore)?;
        Ok(resolved)
    }

    /// Fail with `Forbidden` if `iri` is on either ignore list
    pub fn check_ignored(&self, iri: &Iri, ignore: &IgnoreList) -> Result<(), AuthError> {
        if self.config.ignore_list.matches(iri) || ignore.matches(iri) {
            tracing::debug!(parent: &self.config.span, iri = %iri, "Refusing ignored IRI");
            return Err(AuthError::Forbidden(format!("{} is on the ignore list", iri)));
        }
        Ok(())
    }

    /// Whether `iri` is hosted by this server
    pub fn is_local(&self, iri: &Iri) -> bool {
        self.config
            .base_url
            .as_ref()
            .is_some_and(|base| iri.is_contained_by(&Iri::from(base.as_str())))
    }

    /// Look the actor up in the local store
    pub async fn load_local(&self, iri: &Iri) -> Result<ResolvedKey, AuthError> {
        let Some(store) = &self.config.store else {
            return Err(AuthError::NotFound("no local store configured".to_string()));
        };

        let result = async {
            let actor = store.load(&iri.without_fragment()).await?.into_actor()?;
            with_embedded_key(actor)
        }
        .await;

        metrics::observe_key_resolution("local", result.is_ok());
        result
    }

    /// Fetch the key, then the actor, from the remote server
    ///
    /// A key document's owner is checked against both ignore lists before it
    /// is dereferenced.
    pub async fn load_remote(&self, iri: &Iri, ignore: &IgnoreList) -> Result<ResolvedKey, AuthError> {
        let client = self.config.client.as_deref().ok_or(AuthError::NoClient)?;
        let check_owner = |owner: &Iri| self.check_ignored(owner, ignore);

        let result = match self.bounded(iri, fetch_key_or_actor(client, iri, check_owner)).await {
            Ok(resolved) => Ok(resolved),
            Err(e @ AuthError::Forbidden(_)) => Err(e),
            Err(key_err) => {
                tracing::debug!(
                    parent: &self.config.span,
                    key_id = %iri,
                    reason = %key_err,
                    "No key document, loading as actor"
                );
                match self.bounded(iri, client.load_iri(iri)).await {
                    Ok(item) => item.into_actor().and_then(with_embedded_key),
                    Err(e) => Err(e),
                }
            }
        };

        let result = result.and_then(|resolved| self.check_key_owner(resolved));
        metrics::observe_key_resolution("remote", result.is_ok());
        result
    }

    async fn bounded<T>(
        &self,
        iri: &Iri,
        stage: impl Future<Output = Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        match tokio::time::timeout(self.config.fetch_timeout, stage).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::RemoteFetchFailed {
                status: None,
                message: format!(
                    "timed out after {}ms fetching {}",
                    self.config.fetch_timeout.as_millis(),
                    iri
                ),
            }),
        }
    }

    fn check_key_owner(&self, resolved: ResolvedKey) -> Result<ResolvedKey, AuthError> {
        if !self.config.require_key_owner_match {
            return Ok(resolved);
        }

        let advertised = resolved.actor.public_key.as_ref().map(|k| &k.id);
        if advertised != Some(&resolved.key.id) {
            tracing::warn!(
                parent: &self.config.span,
                key_id = %resolved.key.id,
                owner = %resolved.actor.id,
                "Key owner does not reference the key"
            );
            return Err(AuthError::unauthorized(AuthError::BadRequest(format!(
                "{} does not advertise key {}",
                resolved.actor.id, resolved.key.id
            ))));
        }
        Ok(resolved)
    }
}

fn with_embedded_key(actor: Actor) -> Result<ResolvedKey, AuthError> {
    let key = actor
        .public_key
        .clone()
        .ok_or_else(|| AuthError::NotFound(format!("actor {} has no public key", actor.id)))?;
    Ok(ResolvedKey { actor, key })
}
