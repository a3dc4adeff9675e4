//! HTTP signature verification
//!
//! The locally stored key is tried first. When it is missing or fails, the key
//! is fetched fresh from its origin once, since remote actors rotate keys.

use super::client::ResolvedKey;
use super::httpsig::{SignaturePolicy, parse_signature_header, signing_string};
use super::key::{compatible_algorithms, decode_public_key};
use super::resolver::ActorResolver;
use crate::activitypub::{Actor, IgnoreList, Iri, PublicKey};
use crate::auth::RequestHead;
use crate::error::AuthError;

pub struct SignatureVerifier {
    resolver: ActorResolver,
    policy: SignaturePolicy,
}

impl SignatureVerifier {
    pub fn new(resolver: ActorResolver, policy: SignaturePolicy) -> Self {
        Self { resolver, policy }
    }

    pub fn resolver(&self) -> &ActorResolver {
        &self.resolver
    }

    pub fn policy(&self) -> &SignaturePolicy {
        &self.policy
    }

    /// Verify the request's Signature header and return the signing actor
    ///
    /// # Errors
    /// - `BadRequest` if the header is absent or unparsable
    /// - `Forbidden` if the key id is ignored
    /// - `Unauthorized` listing every failed attempt otherwise
    pub async fn verify(&self, head: &RequestHead<'_>, ignore: &IgnoreList) -> Result<Actor, AuthError> {
        let header = head
            .header("signature")
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| AuthError::BadRequest("Missing Signature header".to_string()))?;

        let params = parse_signature_header(header)?;
        self.resolver.check_ignored(&params.key_id, ignore)?;
        self.policy.check(head, &params)?;
        let message = signing_string(head, &params)?;

        let mut failures = Vec::new();

        match self.resolver.load_local(&params.key_id).await {
            Ok(resolved) => match verify_with_key(&resolved.key, message.as_bytes(), &params.signature) {
                Ok(()) => return Ok(resolved.actor),
                Err(e) => failures.push(format!("local key {}: {}", resolved.key.id, reason(&e))),
            },
            Err(e) => failures.push(format!("local lookup: {}", reason(&e))),
        }

        if self.resolver.is_local(&params.key_id) {
            return Err(AuthError::unauthorized(AuthError::VerificationFailed(failures)));
        }

        tracing::debug!(
            parent: self.resolver.config().span(),
            key_id = %params.key_id,
            "Retrying signature with a freshly fetched key"
        );

        match self.fresh_remote(&params.key_id, ignore).await {
            Ok(resolved) => match verify_with_key(&resolved.key, message.as_bytes(), &params.signature) {
                Ok(()) => return Ok(resolved.actor),
                Err(e) => failures.push(format!("remote key {}: {}", resolved.key.id, reason(&e))),
            },
            Err(e @ AuthError::Forbidden(_)) => return Err(e),
            Err(e) => failures.push(format!("remote lookup: {}", reason(&e))),
        }

        Err(AuthError::unauthorized(AuthError::VerificationFailed(failures)))
    }

    async fn fresh_remote(
        &self,
        key_id: &Iri,
        ignore: &IgnoreList,
    ) -> Result<ResolvedKey, AuthError> {
        let resolved = self.resolver.load_remote(key_id, ignore).await?;
        self.resolver.check_ignored(&resolved.actor.id, ignore)?;
        Ok(resolved)
    }
}

/// Try every algorithm compatible with the key, stopping at the first success
pub fn verify_with_key(key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<(), AuthError> {
    let decoded = decode_public_key(&key.public_key_pem)?;
    let algorithms = compatible_algorithms(&decoded);
    if algorithms.is_empty() {
        return Err(AuthError::VerificationFailed(vec![
            "no compatible algorithm".to_string(),
        ]));
    }

    let mut errors = Vec::with_capacity(algorithms.len());
    for algorithm in algorithms {
        match decoded.verify(*algorithm, message, signature) {
            Ok(()) => return Ok(()),
            Err(e) => errors.push(format!("{}: {}", algorithm, reason(&e))),
        }
    }
    Err(AuthError::VerificationFailed(errors))
}

fn reason(err: &AuthError) -> String {
    match err {
        AuthError::VerificationFailed(reasons) => reasons.join(", "),
        other => other.report(),
    }
}
