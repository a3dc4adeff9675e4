//! Remote dereferencing
//!
//! `Client` is the seam between resolution logic and the network. `HttpClient`
//! is the reqwest implementation used in production.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use http::StatusCode;
use url::Url;

use crate::activitypub::{Actor, Iri, Item, PublicKey};
use crate::error::AuthError;
use crate::metrics;

const ACCEPT: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Largest body accepted from a peer
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Raw result of a GET
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// Remote IRI loader
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Client: Send + Sync {
    /// GET the resource, returning whatever status the peer answered with
    async fn get(&self, iri: &Iri) -> Result<RemoteResponse, AuthError>;

    /// GET and decode the resource; non-success statuses are errors
    async fn load_iri(&self, iri: &Iri) -> Result<Item, AuthError>;
}

/// An actor together with the key that identified it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedKey {
    pub actor: Actor,
    pub key: PublicKey,
}

/// Dereference a key id that may name an actor or a standalone key document
///
/// 200, 304 and 410 are usable answers. A bare key document costs a second
/// request for its owner, which `check_owner` may veto before it is sent.
pub async fn fetch_key_or_actor<F>(
    client: &dyn Client,
    iri: &Iri,
    check_owner: F,
) -> Result<ResolvedKey, AuthError>
where
    F: Fn(&Iri) -> Result<(), AuthError>,
{
    let response = client.get(iri).await?;

    if !matches!(
        response.status,
        StatusCode::OK | StatusCode::NOT_MODIFIED | StatusCode::GONE
    ) {
        return Err(AuthError::RemoteFetchFailed {
            status: Some(response.status.as_u16()),
            message: format!("unexpected response for {}", iri),
        });
    }

    match Item::from_slice(&response.body)? {
        Item::Actor(actor) => {
            let key = actor
                .public_key
                .clone()
                .ok_or_else(|| AuthError::NotFound(format!("actor {} has no public key", actor.id)))?;
            Ok(ResolvedKey { actor: *actor, key })
        }
        Item::PublicKey(key) => {
            check_owner(&key.owner)?;
            let actor = client.load_iri(&key.owner).await?.into_actor()?;
            Ok(ResolvedKey { actor, key })
        }
        Item::Collection(_) | Item::Link(_) => Err(AuthError::RemoteParseFailed(format!(
            "{} is neither an actor nor a public key",
            iri
        ))),
    }
}

/// reqwest backed client
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    allow_private_hosts: bool,
}

impl HttpClient {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        allow_private_hosts: bool,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::from_client(http, allow_private_hosts))
    }

    pub fn from_client(http: reqwest::Client, allow_private_hosts: bool) -> Self {
        Self {
            http,
            allow_private_hosts,
        }
    }

    async fn destination(&self, iri: &Iri) -> Result<Url, AuthError> {
        let mut url = iri.url()?;
        url.set_fragment(None);

        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(AuthError::BadRequest(format!(
                    "Unsupported IRI scheme: {}",
                    scheme
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| AuthError::BadRequest(format!("Missing host in {}", iri)))?;

        if !self.allow_private_hosts {
            if is_disallowed_host(host) {
                return Err(AuthError::Forbidden(format!("{} is not a public host", host)));
            }
            let port = url.port_or_known_default().unwrap_or(443);
            validate_resolved_host_ips(host, port).await?;
        }

        Ok(url)
    }
}

#[async_trait]
impl Client for HttpClient {
    async fn get(&self, iri: &Iri) -> Result<RemoteResponse, AuthError> {
        let url = self.destination(iri).await?;
        let started = Instant::now();

        let result = async {
            let response = self
                .http
                .get(url)
                .header(http::header::ACCEPT, ACCEPT)
                .send()
                .await
                .map_err(|e| fetch_failed(iri, e))?;
            let status = response.status();
            let body = read_capped(response, iri).await?;
            Ok::<_, AuthError>(RemoteResponse { status, body })
        }
        .await;

        metrics::observe_remote_fetch(result.is_ok(), started.elapsed());
        result
    }

    async fn load_iri(&self, iri: &Iri) -> Result<Item, AuthError> {
        let response = self.get(iri).await?;
        if !response.status.is_success() {
            return Err(AuthError::RemoteFetchFailed {
                status: Some(response.status.as_u16()),
                message: format!("Failed to load {}", iri),
            });
        }
        Item::from_slice(&response.body)
    }
}

fn fetch_failed(iri: &Iri, e: reqwest::Error) -> AuthError {
    AuthError::RemoteFetchFailed {
        status: e.status().map(|s| s.as_u16()),
        message: format!("Failed to fetch {}: {}", iri, e),
    }
}

/// Read the body, giving up once it grows past `MAX_BODY_BYTES`
async fn read_capped(mut response: reqwest::Response, iri: &Iri) -> Result<Vec<u8>, AuthError> {
    let status = response.status().as_u16();
    let too_large = || AuthError::RemoteFetchFailed {
        status: Some(status),
        message: format!("{} exceeds {} bytes", iri, MAX_BODY_BYTES),
    };

    if response
        .content_length()
        .is_some_and(|len| len > MAX_BODY_BYTES as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| fetch_failed(iri, e))? {
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<(), AuthError> {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| AuthError::RemoteFetchFailed {
            status: None,
            message: format!("Failed to resolve {}: {}", host, e),
        })?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AuthError::Forbidden(format!("{} resolves to a private address", host)));
        }
    }

    if !resolved_any {
        return Err(AuthError::RemoteFetchFailed {
            status: None,
            message: format!("No DNS records for {}", host),
        });
    }

    Ok(())
}
