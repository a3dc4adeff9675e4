//! Request authentication
//!
//! Handles:
//! - HTTP Signature and OAuth2 bearer credentials
//! - Axum middleware and extractors

mod authenticator;
mod bearer;
mod middleware;

pub use authenticator::{Authenticator, RequestHead};
pub use bearer::{AccessGrant, BearerVerifier, OAuthStorage, UserData, bearer_token};
pub use middleware::{CurrentActor, MaybeActor, authenticate_request};
