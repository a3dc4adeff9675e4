//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    extract::State,
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use fedauth::activitypub::{Actor, Item};
use fedauth::auth::{Authenticator, RequestHead};
use fedauth::config;
use fedauth::error::AuthError;
use fedauth::federation::{HttpClient, SigningKey, sign_request};
use fedauth::storage::SqliteStorage;
use fedauth::{AppState, build_authenticator};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

pub const LOCAL_DOMAIN: &str = "local.test";

/// Test configuration for an instance at `https://local.test`
pub fn test_config(db_path: PathBuf) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            domain: LOCAL_DOMAIN.to_string(),
            protocol: "https".to_string(),
        },
        database: config::DatabaseConfig { path: db_path },
        federation: config::FederationConfig {
            ignore_list: Vec::new(),
            fetch_timeout_secs: 5,
            max_clock_skew_secs: 300,
            required_headers: vec![
                "(request-target)".to_string(),
                "host".to_string(),
                "date".to_string(),
            ],
            realm: None,
            allow_private_hosts: true,
            require_key_owner_match: false,
            bearer_enabled: true,
            user_agent: "fedauth-test".to_string(),
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// A remote ActivityPub server serving static JSON documents
#[derive(Clone)]
pub struct MockPeer {
    pub base: String,
    documents: Arc<RwLock<HashMap<String, Value>>>,
    hits: Arc<AtomicUsize>,
}

impl MockPeer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = Self {
            base: format!("http://{}", addr),
            documents: Arc::new(RwLock::new(HashMap::new())),
            hits: Arc::new(AtomicUsize::new(0)),
        };

        let app = Router::new().fallback(serve_document).with_state(peer.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        peer
    }

    pub fn iri(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn publish(&self, path: &str, document: Value) {
        self.documents
            .write()
            .await
            .insert(path.to_string(), document);
    }

    /// Number of requests served so far
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Publish `/{name}` as a Person whose key is embedded as `#main`
    pub async fn publish_actor(&self, name: &str, key: &SigningKey) -> Actor {
        let id = self.iri(&format!("/{}", name));
        let document = actor_document(&id, name, &format!("{}#main", id), key);
        self.publish(&format!("/{}", name), document.clone()).await;
        decode_actor(&document)
    }

    /// Publish `/{name}` without a key and `/{name}/key` as its standalone key
    pub async fn publish_actor_with_key_document(&self, name: &str, key: &SigningKey) -> String {
        let id = self.iri(&format!("/{}", name));
        let key_id = format!("{}/key", id);

        self.publish(
            &format!("/{}", name),
            json!({
                "@context": "https://www.w3.org/ns/activitystreams",
                "id": id,
                "type": "Person",
                "preferredUsername": name,
            }),
        )
        .await;
        self.publish(
            &format!("/{}/key", name),
            json!({
                "@context": "https://w3id.org/security/v1",
                "id": key_id,
                "owner": id,
                "publicKeyPem": key.public_key_pem().unwrap(),
            }),
        )
        .await;

        key_id
    }
}

pub fn decode_actor(document: &Value) -> Actor {
    Item::from_value(document).unwrap().into_actor().unwrap()
}

async fn serve_document(State(peer): State<MockPeer>, uri: Uri) -> Response {
    peer.hits.fetch_add(1, Ordering::SeqCst);

    match peer.documents.read().await.get(uri.path()) {
        Some(document) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/activity+json")],
            document.to_string(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn actor_document(id: &str, name: &str, key_id: &str, key: &SigningKey) -> Value {
    json!({
        "@context": [
            "https://www.w3.org/ns/activitystreams",
            "https://w3id.org/security/v1"
        ],
        "id": id,
        "type": "Person",
        "preferredUsername": name,
        "name": name.to_uppercase(),
        "inbox": format!("{}/inbox", id),
        "publicKey": {
            "id": key_id,
            "owner": id,
            "publicKeyPem": key.public_key_pem().unwrap(),
        }
    })
}

pub fn rsa_key() -> SigningKey {
    let mut rng = rand::thread_rng();
    SigningKey::Rsa(rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap())
}

pub fn ecdsa_key() -> SigningKey {
    SigningKey::EcdsaP256(p256::ecdsa::SigningKey::random(&mut rand::thread_rng()))
}

pub fn ed25519_key(seed: u8) -> SigningKey {
    SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[seed; 32]))
}

/// A `POST https://local.test/inbox` signed with `key`
pub fn signed_request(key: &SigningKey, key_id: &str) -> http::Request<()> {
    let url = format!("https://{}/inbox", LOCAL_DOMAIN);
    let headers = sign_request("POST", &url, None, key, key_id).unwrap();

    http::Request::builder()
        .method("POST")
        .uri("/inbox")
        .header("host", headers.host)
        .header("date", headers.date)
        .header("signature", headers.signature)
        .body(())
        .unwrap()
}

/// Authenticator backed by a fresh SQLite database and a real HTTP client
pub struct TestAuth {
    pub authenticator: Authenticator,
    pub storage: Arc<SqliteStorage>,
    pub _temp_dir: TempDir,
}

impl TestAuth {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut config::AppConfig)) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path().join("test.db"));
        adjust(&mut config);

        let storage = Arc::new(SqliteStorage::connect(&config.database.path).await.unwrap());
        let authenticator = build_authenticator(
            &config,
            storage.clone(),
            storage.clone(),
            Arc::new(test_client()),
        )
        .unwrap();

        Self {
            authenticator,
            storage,
            _temp_dir: temp_dir,
        }
    }

    pub async fn authenticate(&self, request: &http::Request<()>) -> Result<Actor, AuthError> {
        self.authenticator
            .authenticate(&RequestHead::from(request))
            .await
    }
}

pub fn test_client() -> HttpClient {
    HttpClient::new("fedauth-test", std::time::Duration::from_secs(5), true).unwrap()
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub storage: Arc<SqliteStorage>,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path().join("test.db"));

        let storage = Arc::new(SqliteStorage::connect(&config.database.path).await.unwrap());
        let state = AppState::with_components(
            config,
            storage.clone(),
            storage.clone(),
            Arc::new(test_client()),
        )
        .unwrap();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = fedauth::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: format!("http://{}", addr),
            state,
            storage,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// A signed GET against this server
    pub fn signed_get(&self, path: &str, key: &SigningKey, key_id: &str) -> reqwest::RequestBuilder {
        let url = self.url(path);
        let headers = sign_request("GET", &url, None, key, key_id).unwrap();

        self.client
            .get(url)
            .header("host", headers.host)
            .header("date", headers.date)
            .header("signature", headers.signature)
    }
}
