//! ActivityPub federation module
//!
//! Handles:
//! - Public key decoding and signature algorithms
//! - HTTP Signatures (parsing, freshness, signing)
//! - Remote actor and key fetching
//! - Local-then-remote key resolution
//! - Request signature verification

pub mod client;
pub mod httpsig;
pub mod key;
pub mod resolver;
mod signature;

pub use client::{Client, HttpClient, RemoteResponse, ResolvedKey, fetch_key_or_actor};
pub use httpsig::{
    SignatureHeaders, SignatureParams, SignaturePolicy, generate_digest, mask_credential,
    parse_signature_header, sign_request, signing_string,
};
pub use key::{Algorithm, DecodedKey, SigningKey, compatible_algorithms, decode_public_key};
pub use resolver::{ActorResolver, ResolverConfig, ResolverConfigBuilder};
pub use signature::{SignatureVerifier, verify_with_key};
