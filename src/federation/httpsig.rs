//! HTTP Signatures header handling
//!
//! Parsing and signing per the draft-cavage convention used across the fediverse:
//! https://docs.joinmastodon.org/spec/security/

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::key::SigningKey;
use crate::activitypub::Iri;
use crate::auth::RequestHead;
use crate::error::AuthError;

/// Replacement for credential material in log output
pub const CREDENTIAL_MASK: &str = "********";

/// Headers a signature must cover unless configured otherwise
pub const DEFAULT_REQUIRED_HEADERS: &[&str] = &["(request-target)", "host", "date"];

/// Parsed Signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    /// IRI of the signing key
    pub key_id: Iri,
    /// Advertised algorithm; a hint only, the key type decides
    pub algorithm: Option<String>,
    /// Signed header names, lowercased, in signing order
    pub headers: Vec<String>,
    /// Decoded signature bytes
    pub signature: Vec<u8>,
    pub created: Option<i64>,
    pub expires: Option<i64>,
}

impl SignatureParams {
    pub fn covers(&self, header: &str) -> bool {
        self.headers.iter().any(|h| h == header)
    }
}

/// Parse a Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<SignatureParams, AuthError> {
    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;
    let mut created = None;
    let mut expires = None;

    for part in split_params(header) {
        let Some((name, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');

        match name.trim() {
            "keyId" => key_id = Some(value.to_string()),
            "algorithm" => algorithm = Some(value.to_string()),
            "headers" => {
                headers = Some(
                    value
                        .split_whitespace()
                        .map(|s| s.to_ascii_lowercase())
                        .collect::<Vec<_>>(),
                )
            }
            "signature" => signature = Some(value.to_string()),
            "created" => created = Some(parse_timestamp("created", value)?),
            "expires" => expires = Some(parse_timestamp("expires", value)?),
            _ => {}
        }
    }

    let key_id = key_id
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AuthError::BadRequest("Missing keyId".to_string()))?;
    let signature = signature
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthError::BadRequest("Missing signature".to_string()))?;
    let signature = BASE64
        .decode(signature.as_bytes())
        .map_err(|e| AuthError::BadRequest(format!("Invalid signature encoding: {}", e)))?;

    Ok(SignatureParams {
        key_id: Iri::from(key_id),
        algorithm,
        headers: headers
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| vec!["date".to_string()]),
        signature,
        created,
        expires,
    })
}

/// Split on commas outside double quotes
fn split_params(header: &str) -> impl Iterator<Item = &str> {
    let mut quoted = false;
    header.split(move |c: char| {
        if c == '"' {
            quoted = !quoted;
        }
        c == ',' && !quoted
    })
}

fn parse_timestamp(name: &str, value: &str) -> Result<i64, AuthError> {
    value
        .parse()
        .map_err(|_| AuthError::BadRequest(format!("Invalid {} parameter: {}", name, value)))
}

/// Rebuild the string the peer signed
pub fn signing_string(head: &RequestHead<'_>, params: &SignatureParams) -> Result<String, AuthError> {
    let mut lines = Vec::with_capacity(params.headers.len());

    for name in &params.headers {
        let value = match name.as_str() {
            "(request-target)" => format!(
                "{} {}",
                head.method.as_str().to_ascii_lowercase(),
                head.path_and_query()
            ),
            "(created)" => params
                .created
                .ok_or_else(|| AuthError::BadRequest("(created) signed but not provided".to_string()))?
                .to_string(),
            "(expires)" => params
                .expires
                .ok_or_else(|| AuthError::BadRequest("(expires) signed but not provided".to_string()))?
                .to_string(),
            "host" => head
                .host()
                .ok_or_else(|| AuthError::BadRequest("Missing host header".to_string()))?
                .to_string(),
            header => {
                let values = head
                    .headers
                    .get_all(header)
                    .iter()
                    .map(|v| v.to_str().map(str::trim))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|_| AuthError::BadRequest(format!("Invalid {} header", header)))?;
                if values.is_empty() {
                    return Err(AuthError::BadRequest(format!(
                        "Missing signed header: {}",
                        header
                    )));
                }
                values.join(", ")
            }
        };
        lines.push(format!("{}: {}", name, value));
    }

    Ok(lines.join("\n"))
}

/// Freshness and coverage rules applied before any key lookup
#[derive(Debug, Clone)]
pub struct SignaturePolicy {
    pub required_headers: Vec<String>,
    pub max_clock_skew: Duration,
    /// Realm advertised in challenges; defaults to the request host
    pub realm: Option<String>,
}

impl Default for SignaturePolicy {
    fn default() -> Self {
        Self {
            required_headers: DEFAULT_REQUIRED_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            max_clock_skew: Duration::from_secs(300),
            realm: None,
        }
    }
}

impl SignaturePolicy {
    pub fn check(&self, head: &RequestHead<'_>, params: &SignatureParams) -> Result<(), AuthError> {
        self.check_at(head, params, Utc::now())
    }

    pub(crate) fn check_at(
        &self,
        head: &RequestHead<'_>,
        params: &SignatureParams,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        for required in &self.required_headers {
            if !params.covers(required) {
                return Err(AuthError::BadRequest(format!(
                    "Signed headers must include: {}",
                    required
                )));
            }
        }

        let skew = self.max_clock_skew.as_secs() as i64;
        let now = now.timestamp();

        if params.covers("date") {
            let date = head
                .header("date")
                .ok_or_else(|| AuthError::BadRequest("Missing Date header".to_string()))?;
            let date = DateTime::parse_from_rfc2822(date)
                .map_err(|_| AuthError::BadRequest("Invalid Date format".to_string()))?;
            if (now - date.timestamp()).abs() > skew {
                return Err(AuthError::VerificationFailed(vec![
                    "Date header too old or in future".to_string(),
                ]));
            }
        }

        if let Some(created) = params.created {
            if created - now > skew {
                return Err(AuthError::VerificationFailed(vec![
                    "signature created in the future".to_string(),
                ]));
            }
        }

        if let Some(expires) = params.expires {
            if expires < now {
                return Err(AuthError::VerificationFailed(vec![
                    "signature expired".to_string(),
                ]));
            }
        }

        Ok(())
    }

    /// Value for the `WWW-Authenticate` response header
    pub fn challenge(&self, host: &str) -> String {
        format!(
            "Signature realm=\"{}\",headers=\"{}\"",
            self.realm.as_deref().unwrap_or(host),
            self.required_headers.join(" ")
        )
    }
}

/// Headers to add for signed request
#[derive(Debug, Clone)]
pub struct SignatureHeaders {
    /// Host header value the signature covers
    pub host: String,
    pub date: String,
    pub digest: Option<String>,
    pub signature: String,
}

/// Sign an outgoing request
///
/// Covers `(request-target) host date`, plus `digest` when a body is given.
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    key: &SigningKey,
    key_id: &str,
) -> Result<SignatureHeaders, AuthError> {
    let parsed_url =
        url::Url::parse(url).map_err(|e| AuthError::BadRequest(format!("Invalid URL: {}", e)))?;

    let host = parsed_url
        .host_str()
        .ok_or_else(|| AuthError::BadRequest("Missing host in URL".to_string()))?;
    let host = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let path_and_query = match parsed_url.query() {
        Some(q) => format!("{}?{}", parsed_url.path(), q),
        None => parsed_url.path().to_string(),
    };

    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    let digest = body.map(generate_digest);

    let mut signing_parts = vec![
        format!("(request-target): {} {}", method.to_ascii_lowercase(), path_and_query),
        format!("host: {}", host),
        format!("date: {}", date),
    ];
    let mut headers_list = vec!["(request-target)", "host", "date"];

    if let Some(ref digest_value) = digest {
        signing_parts.push(format!("digest: {}", digest_value));
        headers_list.push("digest");
    }

    let signature = key.sign(signing_parts.join("\n").as_bytes());

    let signature = format!(
        "keyId=\"{}\",algorithm=\"{}\",headers=\"{}\",signature=\"{}\"",
        key_id,
        key.algorithm(),
        headers_list.join(" "),
        BASE64.encode(signature)
    );

    Ok(SignatureHeaders {
        host,
        date,
        digest,
        signature,
    })
}

/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    format!("SHA-256={}", BASE64.encode(Sha256::digest(body)))
}

/// Hide the secret part of a Signature or Authorization header value
pub fn mask_credential(header: &str) -> String {
    const SIGNATURE_PARAM: &str = "signature=\"";

    if let Some(start) = header.find(SIGNATURE_PARAM) {
        let value_start = start + SIGNATURE_PARAM.len();
        let value_end = header[value_start..]
            .find('"')
            .map(|i| value_start + i)
            .unwrap_or(header.len());
        return format!(
            "{}{}{}",
            &header[..value_start],
            CREDENTIAL_MASK,
            &header[value_end..]
        );
    }

    match header.trim().split_once(' ') {
        Some((scheme, _)) => format!("{} {}", scheme, CREDENTIAL_MASK),
        None => CREDENTIAL_MASK.to_string(),
    }
}
