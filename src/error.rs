//! Error types for fedauth
//!
//! Every stage of the resolution pipeline reports an `AuthError`.
//! Only `Unauthorized` and `Forbidden` ever leave `Authenticator::authenticate`;
//! the other kinds drive fallbacks and end up as the preserved cause.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Authentication and resolution error type
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credential header present but structurally unparsable (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Token, key or actor does not exist locally or remotely (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Target IRI is on the ignore list (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Credential present but verification failed (401)
    ///
    /// `source` keeps the exhausted-all-options cause for logging only.
    #[error("Unauthorized")]
    Unauthorized {
        challenge: Option<String>,
        #[source]
        source: Option<Box<AuthError>>,
    },

    /// Transport error or unexpected status talking to a remote server (502)
    #[error("Remote fetch failed: {message}")]
    RemoteFetchFailed {
        status: Option<u16>,
        message: String,
    },

    /// Remote document is neither an actor nor a public key (502)
    #[error("Unable to parse remote document: {0}")]
    RemoteParseFailed(String),

    /// Key material present but not decodable
    #[error("Malformed public key: {0}")]
    MalformedKey(String),

    /// Key decoded to a type we cannot verify with
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// Every compatible algorithm rejected the signature
    #[error("Unable to verify HTTP signature: {}", .0.join("; "))]
    VerificationFailed(Vec<String>),

    /// No HTTP client configured for remote resolution
    #[error("No HTTP client configured")]
    NoClient,

    /// Database error (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AuthError {
    fn from(err: config::ConfigError) -> Self {
        AuthError::Config(err.to_string())
    }
}

impl AuthError {
    /// Wrap a cause as `Unauthorized`, keeping it for diagnostics
    pub fn unauthorized(cause: AuthError) -> Self {
        AuthError::Unauthorized {
            challenge: None,
            source: Some(Box::new(cause)),
        }
    }

    /// Attach a `WWW-Authenticate` challenge to an `Unauthorized` error
    pub fn with_challenge(self, challenge: impl Into<String>) -> Self {
        match self {
            AuthError::Unauthorized { source, .. } => AuthError::Unauthorized {
                challenge: Some(challenge.into()),
                source,
            },
            other => other,
        }
    }

    /// Challenge text for `WWW-Authenticate`, if any
    pub fn challenge(&self) -> Option<&str> {
        match self {
            AuthError::Unauthorized { challenge, .. } => challenge.as_deref(),
            _ => None,
        }
    }

    /// True when this error, or any error it wraps, is `Forbidden`
    pub fn is_forbidden(&self) -> bool {
        match self {
            AuthError::Forbidden(_) => true,
            AuthError::Unauthorized {
                source: Some(inner),
                ..
            } => inner.is_forbidden(),
            _ => false,
        }
    }

    /// Render the error with its full cause chain, for logs
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            current = cause.source();
        }
        out
    }

    fn kind(&self) -> &'static str {
        match self {
            AuthError::BadRequest(_) => "bad_request",
            AuthError::NotFound(_) => "not_found",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::Unauthorized { .. } => "unauthorized",
            AuthError::RemoteFetchFailed { .. } => "remote_fetch",
            AuthError::RemoteParseFailed(_) => "remote_parse",
            AuthError::MalformedKey(_) => "malformed_key",
            AuthError::UnsupportedKeyType(_) => "unsupported_key",
            AuthError::VerificationFailed(_) => "verification",
            AuthError::NoClient => "no_client",
            AuthError::Database(_) => "database",
            AuthError::Config(_) => "config",
            AuthError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AuthError {
    /// Convert error to HTTP response
    ///
    /// The body never carries the underlying cause.
    fn into_response(self) -> Response {
        use axum::Json;

        let (status, error_message) = match &self {
            AuthError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad request"),
            AuthError::NotFound(_) => (StatusCode::NOT_FOUND, "Resource not found"),
            AuthError::Forbidden(_) => (StatusCode::FORBIDDEN, "Access denied"),
            AuthError::Unauthorized { .. }
            | AuthError::VerificationFailed(_)
            | AuthError::MalformedKey(_)
            | AuthError::UnsupportedKeyType(_) => {
                (StatusCode::UNAUTHORIZED, "Authentication required")
            }
            AuthError::RemoteFetchFailed { .. } | AuthError::RemoteParseFailed(_) => {
                (StatusCode::BAD_GATEWAY, "Federation error")
            }
            AuthError::NoClient
            | AuthError::Database(_)
            | AuthError::Config(_)
            | AuthError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[self.kind()])
            .inc();

        let challenge = self
            .challenge()
            .and_then(|c| HeaderValue::from_str(c).ok());

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        let mut response = (status, body).into_response();
        if let Some(challenge) = challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, challenge);
        }
        response
    }
}

/// Result type alias using AuthError
pub type Result<T> = std::result::Result<T, AuthError>;
