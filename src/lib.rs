//! fedauth - request authentication for ActivityPub servers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Auth Layer (Axum)                       │
//! │  - Authenticator: Signature first, then Bearer              │
//! │  - Middleware and extractors                                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Federation Layer                         │
//! │  - HTTP Signatures (parse, sign, verify)                    │
//! │  - Actor/key resolution: local store, then remote fetch     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Storage Layer                           │
//! │  - SQLite (sqlx) actors and access grants                   │
//! │  - In-memory store                                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `activitypub`: IRIs, actors and fetched documents
//! - `auth`: Request authentication and Axum integration
//! - `federation`: Signatures, keys and remote resolution
//! - `storage`: Actor and token stores
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod activitypub;
pub mod auth;
pub mod config;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod storage;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::activitypub::Actor;
use crate::auth::{Authenticator, BearerVerifier, CurrentActor, OAuthStorage};
use crate::federation::{ActorResolver, Client, HttpClient, ResolverConfig, SignatureVerifier};
use crate::storage::{ActorStore, SqliteStorage};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Request authenticator
    pub authenticator: Arc<Authenticator>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Connect to SQLite database
    /// 2. Build the federation HTTP client
    /// 3. Wire the resolver and authenticator
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AuthError> {
        tracing::info!("Initializing application state...");

        let storage = Arc::new(SqliteStorage::connect(&config.database.path).await?);
        tracing::info!(path = %config.database.path.display(), "Database connected");

        let client = HttpClient::new(
            &config.federation.user_agent,
            config.federation.fetch_timeout(),
            config.federation.allow_private_hosts,
        )?;

        let state = Self::with_components(config, storage.clone(), storage, Arc::new(client))?;

        tracing::info!("Application state initialized successfully");
        Ok(state)
    }

    /// Build state from explicit collaborators
    pub fn with_components(
        config: config::AppConfig,
        store: Arc<dyn ActorStore>,
        oauth: Arc<dyn OAuthStorage>,
        client: Arc<dyn Client>,
    ) -> Result<Self, error::AuthError> {
        let authenticator = build_authenticator(&config, store, oauth, client)?;
        Ok(Self {
            config: Arc::new(config),
            authenticator: Arc::new(authenticator),
        })
    }
}

/// Wire an `Authenticator` from configuration
pub fn build_authenticator(
    config: &config::AppConfig,
    store: Arc<dyn ActorStore>,
    oauth: Arc<dyn OAuthStorage>,
    client: Arc<dyn Client>,
) -> Result<Authenticator, error::AuthError> {
    let resolver_config = ResolverConfig::from_app_config(config, Some(store.clone()), Some(client))?;
    let signatures = SignatureVerifier::new(
        ActorResolver::new(resolver_config),
        config.federation.signature_policy(),
    );

    let mut authenticator = Authenticator::new(signatures);
    if config.federation.bearer_enabled {
        authenticator = authenticator.with_bearer(BearerVerifier::new(oauth, store));
    }
    Ok(authenticator)
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> Router {
    use tower_http::trace::TraceLayer;

    let authenticated = Router::new()
        .route("/whoami", get(whoami))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate_request,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .route("/metrics", get(metrics_handler))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn whoami(CurrentActor(actor): CurrentActor) -> Json<Actor> {
    Json(actor)
}

/// Prometheus text exposition of `metrics::REGISTRY`
async fn metrics_handler() -> Response {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = metrics::REGISTRY.gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics_text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, encoder.format_type())],
            metrics_text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
