//! Authentication middleware
//!
//! Resolves the calling actor for every request on a route.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, State},
    http::{Request, request::Parts},
    middleware::Next,
    response::Response,
};

use super::RequestHead;
use crate::AppState;
use crate::activitypub::Actor;
use crate::error::AuthError;

async fn authenticate_parts(parts: &Parts, state: &AppState) -> Result<Actor, AuthError> {
    let head = RequestHead::from(parts);
    state.authenticator.authenticate(&head).await
}

/// Middleware that authenticates every request
///
/// Failed credentials are rejected with 401/403 and a `WWW-Authenticate`
/// challenge. Requests without credentials pass through as the anonymous actor.
/// The resolved `Actor` is added to request extensions.
///
/// # Usage
/// ```ignore
/// let routes = Router::new()
///     .route("/inbox", ...)
///     .layer(middleware::from_fn_with_state(state, authenticate_request));
/// ```
pub async fn authenticate_request(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let (parts, body) = request.into_parts();
    let actor = authenticate_parts(&parts, &state).await?;

    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(actor);

    Ok(next.run(request).await)
}

/// Extractor for an authenticated, non-anonymous actor
///
/// # Usage
/// ```ignore
/// async fn handler(CurrentActor(actor): CurrentActor) -> impl IntoResponse {
///     format!("Hello, {}", actor.id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentActor
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let actor = match parts.extensions.get::<Actor>().cloned() {
            Some(actor) => actor,
            None => {
                let actor = authenticate_parts(parts, &state).await?;
                parts.extensions.insert(actor.clone());
                actor
            }
        };

        if actor.is_anonymous() {
            let host = RequestHead::from(&*parts).host().unwrap_or_default().to_string();
            let challenge = state
                .authenticator
                .signatures()
                .policy()
                .challenge(&host);
            return Err(AuthError::Unauthorized {
                challenge: Some(challenge),
                source: None,
            });
        }

        Ok(CurrentActor(actor))
    }
}

/// Optional actor extractor
///
/// `None` for anonymous callers and for failed credentials.
#[derive(Debug, Clone)]
pub struct MaybeActor(pub Option<Actor>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeActor
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let actor = match parts.extensions.get::<Actor>().cloned() {
            Some(actor) => Some(actor),
            None => {
                let state = AppState::from_ref(state);
                let actor = authenticate_parts(parts, &state).await.ok();
                if let Some(actor) = &actor {
                    parts.extensions.insert(actor.clone());
                }
                actor
            }
        };

        Ok(MaybeActor(actor.filter(|a| !a.is_anonymous())))
    }
}
