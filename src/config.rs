//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf, time::Duration};

use crate::error::AuthError;
use crate::federation::SignaturePolicy;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub federation: FederationConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "social.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://social.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Federation and request authentication settings
#[derive(Debug, Clone, Deserialize)]
pub struct FederationConfig {
    /// Hosts, instances or actors never trusted nor fetched
    #[serde(default)]
    pub ignore_list: Vec<String>,
    /// Bound on each remote fetch stage, in seconds
    pub fetch_timeout_secs: u64,
    /// Allowed difference between `Date` and our clock, in seconds
    pub max_clock_skew_secs: u64,
    /// Headers every signature must cover
    pub required_headers: Vec<String>,
    /// Realm advertised in `WWW-Authenticate` (defaults to the request host)
    pub realm: Option<String>,
    /// Permit fetching keys from loopback and private addresses
    #[serde(default)]
    pub allow_private_hosts: bool,
    /// Require the key owner to advertise the fetched key
    #[serde(default)]
    pub require_key_owner_match: bool,
    /// Accept OAuth2 bearer tokens
    pub bearer_enabled: bool,
    /// User-Agent for outgoing requests
    pub user_agent: String,
}

impl FederationConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn signature_policy(&self) -> SignaturePolicy {
        SignaturePolicy {
            required_headers: self
                .required_headers
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            max_clock_skew: Duration::from_secs(self.max_clock_skew_secs),
            realm: self.realm.clone(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (FEDAUTH__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, AuthError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/fedauth.db")?
            .set_default("federation.ignore_list", Vec::<String>::new())?
            .set_default("federation.fetch_timeout_secs", 2)?
            .set_default("federation.max_clock_skew_secs", 300)?
            .set_default(
                "federation.required_headers",
                vec!["(request-target)", "host", "date"],
            )?
            .set_default("federation.allow_private_hosts", false)?
            .set_default("federation.require_key_owner_match", false)?
            .set_default("federation.bearer_enabled", true)?
            .set_default(
                "federation.user_agent",
                concat!("fedauth/", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (FEDAUTH__*)
            .add_source(
                Environment::with_prefix("FEDAUTH")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("federation.ignore_list")
                    .with_list_parse_key("federation.required_headers")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: Self = config.try_deserialize()?;

        app_config.validate()?;

        Ok(app_config)
    }

    fn validate(&self) -> Result<(), AuthError> {
        if self.federation.fetch_timeout_secs == 0 {
            return Err(AuthError::Config(
                "federation.fetch_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.federation.max_clock_skew_secs == 0 {
            return Err(AuthError::Config(
                "federation.max_clock_skew_secs must be greater than 0".to_string(),
            ));
        }

        if self.federation.required_headers.is_empty() {
            return Err(AuthError::Config(
                "federation.required_headers must not be empty".to_string(),
            ));
        }

        if let Some(entry) = self
            .federation
            .ignore_list
            .iter()
            .find(|entry| entry.trim().is_empty())
        {
            return Err(AuthError::Config(format!(
                "federation.ignore_list contains an empty entry: {:?}",
                entry
            )));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(AuthError::Config(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }

        if is_local_server_domain(&self.server.domain) {
            if self.federation.allow_private_hosts {
                tracing::warn!(
                    host = %normalized_server_host(&self.server.domain),
                    "Fetching keys from private addresses is enabled"
                );
            }
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(AuthError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        url::Url::parse(&self.server.base_url())
            .map_err(|e| AuthError::Config(format!("server.domain: {}", e)))?;

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}
