//! Request authentication entry point
//!
//! Picks the credential scheme present on a request and folds every failure
//! into `Unauthorized` or `Forbidden`.

use http::{HeaderMap, Method, Request, Uri, header, request::Parts};

use super::bearer::BearerVerifier;
use crate::activitypub::{Actor, IgnoreList};
use crate::error::AuthError;
use crate::federation::{SignatureVerifier, mask_credential, parse_signature_header};
use crate::metrics;

/// Borrowed view of the parts of a request that carry credentials
#[derive(Debug, Clone, Copy)]
pub struct RequestHead<'a> {
    pub method: &'a Method,
    pub uri: &'a Uri,
    pub headers: &'a HeaderMap,
}

impl<'a> RequestHead<'a> {
    pub fn new(method: &'a Method, uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
        }
    }

    /// Header value as text; non-ASCII values are treated as absent
    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn path_and_query(&self) -> &'a str {
        self.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    }

    /// `Host` header, falling back to the URI authority
    pub fn host(&self) -> Option<&'a str> {
        self.header(header::HOST.as_str())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
    }
}

impl<'a, B> From<&'a Request<B>> for RequestHead<'a> {
    fn from(request: &'a Request<B>) -> Self {
        Self::new(request.method(), request.uri(), request.headers())
    }
}

impl<'a> From<&'a Parts> for RequestHead<'a> {
    fn from(parts: &'a Parts) -> Self {
        Self::new(&parts.method, &parts.uri, &parts.headers)
    }
}

/// Signature first, then Bearer; anything else is anonymous
pub struct Authenticator {
    signatures: SignatureVerifier,
    bearer: Option<BearerVerifier>,
}

impl Authenticator {
    pub fn new(signatures: SignatureVerifier) -> Self {
        Self {
            signatures,
            bearer: None,
        }
    }

    /// Enable bearer tokens; without this they authenticate as anonymous
    pub fn with_bearer(mut self, bearer: BearerVerifier) -> Self {
        self.bearer = Some(bearer);
        self
    }

    pub fn signatures(&self) -> &SignatureVerifier {
        &self.signatures
    }

    pub fn supports_bearer(&self) -> bool {
        self.bearer.is_some()
    }

    pub async fn authenticate(&self, head: &RequestHead<'_>) -> Result<Actor, AuthError> {
        self.authenticate_with_ignore_list(head, &IgnoreList::new())
            .await
    }

    /// Identify the caller
    ///
    /// Returns the anonymous actor when no usable credential is present.
    /// Errors are always `Unauthorized` (with a challenge) or `Forbidden`.
    pub async fn authenticate_with_ignore_list(
        &self,
        head: &RequestHead<'_>,
        ignore: &IgnoreList,
    ) -> Result<Actor, AuthError> {
        if head.headers.is_empty() {
            return Ok(Actor::anonymous());
        }

        let span = self.signatures.resolver().config().span();

        let (scheme, credential, result) = if let Some(signature) = non_empty(head.header("signature")) {
            (
                "Signature",
                signature,
                self.signatures.verify(head, ignore).await,
            )
        } else if let Some(authorization) = non_empty(head.header(header::AUTHORIZATION.as_str())) {
            let scheme = authorization
                .split_once(' ')
                .map(|(scheme, _)| scheme)
                .unwrap_or(authorization);
            if !scheme.eq_ignore_ascii_case("bearer") {
                return Ok(Actor::anonymous());
            }
            let Some(bearer) = &self.bearer else {
                tracing::debug!(parent: span, "Bearer token presented but token storage is not configured");
                metrics::observe_auth("bearer", "anonymous");
                return Ok(Actor::anonymous());
            };
            ("Bearer", authorization, bearer.verify(head).await)
        } else {
            return Ok(Actor::anonymous());
        };

        match result {
            Ok(actor) => {
                if !actor.is_anonymous() {
                    tracing::debug!(
                        parent: span,
                        auth = scheme,
                        id = %actor.id,
                        r#type = %actor.kind,
                        name = actor.display_name().unwrap_or_default(),
                        instance = %actor.id.host().unwrap_or_default(),
                        "Authenticated request"
                    );
                }
                metrics::observe_auth(&scheme.to_ascii_lowercase(), "success");
                Ok(actor)
            }
            Err(err) => {
                let err = self.outcome(head, scheme, err);
                let key_id = (scheme == "Signature")
                    .then(|| parse_signature_header(credential).ok())
                    .flatten()
                    .map(|params| params.key_id.to_string());

                tracing::warn!(
                    parent: span,
                    auth = scheme,
                    req = %format!("{}:{}", head.method, head.uri),
                    header = %mask_credential(credential),
                    id = key_id.as_deref().unwrap_or_default(),
                    err = %err.report(),
                    challenge = err.challenge().unwrap_or_default(),
                    "Failed to authenticate request"
                );
                let outcome = if err.is_forbidden() { "forbidden" } else { "unauthorized" };
                metrics::observe_auth(&scheme.to_ascii_lowercase(), outcome);
                Err(err)
            }
        }
    }

    fn outcome(&self, head: &RequestHead<'_>, scheme: &str, err: AuthError) -> AuthError {
        let err = unify(err);
        if matches!(err, AuthError::Forbidden(_)) {
            return err;
        }

        let host = head.host().unwrap_or_default();
        let challenge = match scheme {
            "Signature" => self.signatures.policy().challenge(host),
            _ => format!("Bearer realm=\"{}\",error=\"invalid_token\"", host),
        };
        err.with_challenge(challenge)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Collapse any error into `Forbidden` (if that is the root) or `Unauthorized`
fn unify(err: AuthError) -> AuthError {
    match err {
        AuthError::Forbidden(_) => err,
        AuthError::Unauthorized {
            source: Some(inner),
            ..
        } if inner.is_forbidden() => unify(*inner),
        AuthError::Unauthorized { .. } => err,
        other => AuthError::unauthorized(other),
    }
}
