//! Public key decoding and signature algorithms
//!
//! Keys arrive as PEM-encoded SubjectPublicKeyInfo (or raw PKCS1 for RSA).
//! Supported: RSA, ECDSA over P-256/P-384/P-521, Ed25519.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha512};
use spki::{ObjectIdentifier, SubjectPublicKeyInfoRef};

use crate::error::AuthError;

const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
const EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");
const SECP521R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.35");
const ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

/// Scalar width of P-521, in bytes
const P521_FIELD_BYTES: usize = 66;

/// SubjectPublicKeyInfo prefix for a raw 32-byte Ed25519 key
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Signature algorithms we can verify with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    RsaSha256,
    RsaSha512,
    EcdsaSha512,
    EcdsaSha256,
    Ed25519,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RsaSha256 => "rsa-sha256",
            Algorithm::RsaSha512 => "rsa-sha512",
            Algorithm::EcdsaSha512 => "ecdsa-sha512",
            Algorithm::EcdsaSha256 => "ecdsa-sha256",
            Algorithm::Ed25519 => "ed25519",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A public key ready for verification
pub enum DecodedKey {
    Rsa(RsaPublicKey),
    EcdsaP256(p256::ecdsa::VerifyingKey),
    EcdsaP384(p384::ecdsa::VerifyingKey),
    EcdsaP521(p521::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl std::fmt::Debug for DecodedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecodedKey({})", self.kind())
    }
}

/// Decode one PEM block into a typed public key
///
/// PKIX (SubjectPublicKeyInfo) is tried first, PKCS1 RSA second.
pub fn decode_public_key(pem: &str) -> Result<DecodedKey, AuthError> {
    let der = pem_to_der(pem)?;

    match SubjectPublicKeyInfoRef::try_from(der.as_slice()) {
        Ok(spki) => from_spki(&spki, &der),
        Err(pkix_err) => RsaPublicKey::from_pkcs1_der(&der)
            .map(DecodedKey::Rsa)
            .map_err(|pkcs1_err| {
                AuthError::MalformedKey(format!(
                    "neither PKIX ({}) nor PKCS1 ({})",
                    pkix_err, pkcs1_err
                ))
            }),
    }
}

/// Strict RFC 7468 first, then any armored base64 body regardless of wrapping
fn pem_to_der(pem: &str) -> Result<Vec<u8>, AuthError> {
    let pem = pem.trim();
    let strict_err = match pem_rfc7468::decode_vec(pem.as_bytes()) {
        Ok((_label, der)) => return Ok(der),
        Err(e) => e,
    };
    let malformed = || AuthError::MalformedKey(format!("unable to decode PEM payload: {}", strict_err));

    if !pem.starts_with("-----BEGIN ") || !pem.contains("-----END ") {
        return Err(malformed());
    }

    let body: String = pem
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("-----"))
        .flat_map(|line| line.chars().filter(|c| !c.is_whitespace()))
        .collect();
    if body.is_empty() {
        return Err(malformed());
    }

    BASE64.decode(body.as_bytes()).map_err(|_| malformed())
}

/// Left-pad a digest narrower than the curve order
///
/// Keeps the same big-endian integer, which is how ECDSA truncates short hashes.
fn widen_prehash(digest: &[u8], width: usize) -> Vec<u8> {
    let mut padded = vec![0u8; width.saturating_sub(digest.len())];
    padded.extend_from_slice(digest);
    padded
}

fn from_spki(spki: &SubjectPublicKeyInfoRef<'_>, der: &[u8]) -> Result<DecodedKey, AuthError> {
    let malformed = |e: &dyn std::fmt::Display| AuthError::MalformedKey(e.to_string());
    let oid = spki.algorithm.oid;

    if oid == RSA_ENCRYPTION {
        return RsaPublicKey::from_public_key_der(der)
            .map(DecodedKey::Rsa)
            .map_err(|e| malformed(&e));
    }

    if oid == ED25519 {
        let bytes: [u8; 32] = spki
            .subject_public_key
            .raw_bytes()
            .try_into()
            .map_err(|_| AuthError::MalformedKey("Ed25519 key must be 32 bytes".to_string()))?;
        return ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map(DecodedKey::Ed25519)
            .map_err(|e| malformed(&e));
    }

    if oid == EC_PUBLIC_KEY {
        let curve = spki
            .algorithm
            .parameters_oid()
            .map_err(|e| AuthError::MalformedKey(format!("missing ECDSA curve: {}", e)))?;
        let point = spki.subject_public_key.raw_bytes();

        if curve == SECP256R1 {
            return p256::ecdsa::VerifyingKey::from_sec1_bytes(point)
                .map(DecodedKey::EcdsaP256)
                .map_err(|e| malformed(&e));
        }
        if curve == SECP384R1 {
            return p384::ecdsa::VerifyingKey::from_sec1_bytes(point)
                .map(DecodedKey::EcdsaP384)
                .map_err(|e| malformed(&e));
        }
        if curve == SECP521R1 {
            return p521::ecdsa::VerifyingKey::from_sec1_bytes(point)
                .map(DecodedKey::EcdsaP521)
                .map_err(|e| malformed(&e));
        }
        return Err(AuthError::UnsupportedKeyType(format!("ECDSA curve {}", curve)));
    }

    Err(AuthError::UnsupportedKeyType(format!("key algorithm {}", oid)))
}

/// Algorithms worth trying for a key, in the order they are attempted
pub fn compatible_algorithms(key: &DecodedKey) -> &'static [Algorithm] {
    match key {
        DecodedKey::Rsa(_) => &[Algorithm::RsaSha256, Algorithm::RsaSha512],
        DecodedKey::EcdsaP256(_) | DecodedKey::EcdsaP384(_) | DecodedKey::EcdsaP521(_) => {
            &[Algorithm::EcdsaSha512, Algorithm::EcdsaSha256]
        }
        DecodedKey::Ed25519(_) => &[Algorithm::Ed25519],
    }
}

// ECDSA signatures show up both DER encoded and as fixed-width r||s.
macro_rules! verify_ecdsa {
    ($curve:ident, $key:expr, $prehash:expr, $signature:expr) => {{
        use $curve::ecdsa::signature::hazmat::PrehashVerifier;
        let signature = $curve::ecdsa::Signature::from_der($signature)
            .or_else(|_| $curve::ecdsa::Signature::from_slice($signature))
            .map_err(|e| AuthError::VerificationFailed(vec![format!("invalid signature: {}", e)]))?;
        $key.verify_prehash($prehash, &signature)
            .map_err(|e| AuthError::VerificationFailed(vec![e.to_string()]))
    }};
}

impl DecodedKey {
    pub fn kind(&self) -> &'static str {
        match self {
            DecodedKey::Rsa(_) => "RSA",
            DecodedKey::EcdsaP256(_) => "ECDSA P-256",
            DecodedKey::EcdsaP384(_) => "ECDSA P-384",
            DecodedKey::EcdsaP521(_) => "ECDSA P-521",
            DecodedKey::Ed25519(_) => "Ed25519",
        }
    }

    /// Verify `signature` over `message` with one specific algorithm
    pub fn verify(
        &self,
        algorithm: Algorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), AuthError> {
        let failed = |e: &dyn std::fmt::Display| AuthError::VerificationFailed(vec![e.to_string()]);

        match (self, algorithm) {
            (DecodedKey::Rsa(key), Algorithm::RsaSha256) => {
                let verifier = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone());
                let signature =
                    rsa::pkcs1v15::Signature::try_from(signature).map_err(|e| failed(&e))?;
                verifier.verify(message, &signature).map_err(|e| failed(&e))
            }
            (DecodedKey::Rsa(key), Algorithm::RsaSha512) => {
                let verifier = rsa::pkcs1v15::VerifyingKey::<Sha512>::new(key.clone());
                let signature =
                    rsa::pkcs1v15::Signature::try_from(signature).map_err(|e| failed(&e))?;
                verifier.verify(message, &signature).map_err(|e| failed(&e))
            }
            (DecodedKey::EcdsaP256(key), Algorithm::EcdsaSha256) => {
                verify_ecdsa!(p256, key, &Sha256::digest(message), signature)
            }
            (DecodedKey::EcdsaP256(key), Algorithm::EcdsaSha512) => {
                verify_ecdsa!(p256, key, &Sha512::digest(message), signature)
            }
            (DecodedKey::EcdsaP384(key), Algorithm::EcdsaSha256) => {
                verify_ecdsa!(p384, key, &Sha256::digest(message), signature)
            }
            (DecodedKey::EcdsaP384(key), Algorithm::EcdsaSha512) => {
                verify_ecdsa!(p384, key, &Sha512::digest(message), signature)
            }
            (DecodedKey::EcdsaP521(key), Algorithm::EcdsaSha256) => {
                let prehash = widen_prehash(&Sha256::digest(message), P521_FIELD_BYTES);
                verify_ecdsa!(p521, key, &prehash, signature)
            }
            (DecodedKey::EcdsaP521(key), Algorithm::EcdsaSha512) => {
                verify_ecdsa!(p521, key, &Sha512::digest(message), signature)
            }
            (DecodedKey::Ed25519(key), Algorithm::Ed25519) => {
                let signature =
                    ed25519_dalek::Signature::from_slice(signature).map_err(|e| failed(&e))?;
                key.verify(message, &signature).map_err(|e| failed(&e))
            }
            (key, algorithm) => Err(AuthError::VerificationFailed(vec![format!(
                "{} is not compatible with {} keys",
                algorithm,
                key.kind()
            )])),
        }
    }
}

/// Private key used to sign outgoing requests
pub enum SigningKey {
    Rsa(RsaPrivateKey),
    EcdsaP256(p256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl SigningKey {
    /// Algorithm name advertised in the Signature header
    pub fn algorithm(&self) -> Algorithm {
        match self {
            SigningKey::Rsa(_) => Algorithm::RsaSha256,
            SigningKey::EcdsaP256(_) => Algorithm::EcdsaSha256,
            SigningKey::Ed25519(_) => Algorithm::Ed25519,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            SigningKey::Rsa(key) => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(key.clone());
                let mut rng = rand::thread_rng();
                signing_key.sign_with_rng(&mut rng, message).to_vec()
            }
            SigningKey::EcdsaP256(key) => {
                let signature: p256::ecdsa::Signature = key.sign(message);
                signature.to_der().as_bytes().to_vec()
            }
            SigningKey::Ed25519(key) => {
                use ed25519_dalek::Signer as _;
                key.sign(message).to_bytes().to_vec()
            }
        }
    }

    /// PEM-encoded SubjectPublicKeyInfo for the matching public key
    pub fn public_key_pem(&self) -> Result<String, AuthError> {
        let internal = |e: &dyn std::fmt::Display| {
            AuthError::Internal(anyhow::anyhow!("unable to encode public key: {}", e))
        };
        match self {
            SigningKey::Rsa(key) => RsaPublicKey::from(key)
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| internal(&e)),
            SigningKey::EcdsaP256(key) => key
                .verifying_key()
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| internal(&e)),
            SigningKey::Ed25519(key) => {
                let mut der = ED25519_SPKI_PREFIX.to_vec();
                der.extend_from_slice(key.verifying_key().as_bytes());
                pem_rfc7468::encode_string("PUBLIC KEY", LineEnding::LF, &der)
                    .map_err(|e| internal(&e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::{EncodeRsaPublicKey, LineEnding as Pkcs1LineEnding};

    fn rsa_key() -> RsaPrivateKey {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, 1024).expect("key generation should work")
    }

    #[test]
    fn decodes_pkix_rsa_key() {
        let signer = SigningKey::Rsa(rsa_key());
        let pem = signer.public_key_pem().unwrap();

        let key = decode_public_key(&pem).expect("PKIX RSA key decodes");
        assert_eq!(key.kind(), "RSA");
        assert_eq!(
            compatible_algorithms(&key),
            &[Algorithm::RsaSha256, Algorithm::RsaSha512]
        );
    }

    #[test]
    fn decodes_pkcs1_rsa_key() {
        let public = RsaPublicKey::from(&rsa_key());
        let pem = public.to_pkcs1_pem(Pkcs1LineEnding::LF).unwrap();

        let key = decode_public_key(&pem).expect("PKCS1 RSA key decodes");
        assert!(matches!(key, DecodedKey::Rsa(ref k) if *k == public));
    }

    #[test]
    fn decodes_ecdsa_and_ed25519_keys() {
        let ecdsa = SigningKey::EcdsaP256(p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng));
        let key = decode_public_key(&ecdsa.public_key_pem().unwrap()).unwrap();
        assert_eq!(key.kind(), "ECDSA P-256");
        assert_eq!(
            compatible_algorithms(&key),
            &[Algorithm::EcdsaSha512, Algorithm::EcdsaSha256]
        );

        let ed = SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[7u8; 32]));
        let key = decode_public_key(&ed.public_key_pem().unwrap()).unwrap();
        assert_eq!(key.kind(), "Ed25519");
        assert_eq!(compatible_algorithms(&key), &[Algorithm::Ed25519]);
    }

    // openssl ecparam -name secp521r1 -genkey; openssl dgst -sha256 -sign
    const P521_PEM: &str = "-----BEGIN PUBLIC KEY-----
MIGbMBAGByqGSM49AgEGBSuBBAAjA4GGAAQB8c5PaSvZlARRsX1N0ZihaM5c+vy9
IqmqFg5WXeBUmTv1oxll/L1CsWbKPoST4tBIl3bETluT+D/lJJB5T8lCT9MBFr0Z
XN8idbu5td2a85jFNbdMSguwUa2yieV6YEzcoubSgBJWvlAnvYio2QSLZA2GwONA
TidVM9aZ5YcqUsV8ixw=
-----END PUBLIC KEY-----
";
    const P521_MESSAGE: &[u8] =
        b"(request-target): post /inbox\nhost: local.example\ndate: Tue, 07 Jun 2022 20:51:35 GMT";
    const P521_SHA256_SIGNATURE: &str = "MIGIAkIAqAh/DaBkGNQ6GKD9nl5FIe+DVfuqc6uJqqmEyMQUKsjv2+l6B9wuvGb7Uti0CNo8ERACc0AnTxPvM/5geKjhyWwCQgCslv6N2tOiGKoa/2726IQ2s1J2Rz8UM21zIfEtNg+i0Dbhyq1lM3SWmLORuO2H9D1IJCbTMv+eLUvCOKjp+ZxLWA==";

    #[test]
    fn p521_verifies_sha256_signature() {
        let key = decode_public_key(P521_PEM).expect("P-521 key decodes");
        assert_eq!(key.kind(), "ECDSA P-521");

        let signature = BASE64.decode(P521_SHA256_SIGNATURE).unwrap();
        assert!(key.verify(Algorithm::EcdsaSha256, P521_MESSAGE, &signature).is_ok());
        assert!(key.verify(Algorithm::EcdsaSha512, P521_MESSAGE, &signature).is_err());
        assert!(key.verify(Algorithm::EcdsaSha256, b"tampered", &signature).is_err());
    }

    #[test]
    fn widen_prehash_keeps_integer_value() {
        let padded = widen_prehash(&[0xab, 0xcd], 4);
        assert_eq!(padded, vec![0, 0, 0xab, 0xcd]);
        assert_eq!(widen_prehash(&[1, 2, 3], 2), vec![1, 2, 3]);
    }

    #[test]
    fn decodes_pem_with_unwrapped_body() {
        let body: String = P521_PEM
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect();
        let single_line = format!("-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n", body);

        let key = decode_public_key(&single_line).expect("single line body decodes");
        assert_eq!(key.kind(), "ECDSA P-521");

        let public = RsaPublicKey::from(&rsa_key());
        let pkcs1 = public.to_pkcs1_pem(Pkcs1LineEnding::LF).unwrap();
        let body: String = pkcs1.lines().filter(|line| !line.starts_with("-----")).collect();
        let single_line = format!(
            "-----BEGIN RSA PUBLIC KEY-----\n{}\n-----END RSA PUBLIC KEY-----",
            body
        );
        let key = decode_public_key(&single_line).expect("single line PKCS1 decodes");
        assert!(matches!(key, DecodedKey::Rsa(ref k) if *k == public));
    }

    #[test]
    fn rejects_garbage_pem() {
        assert!(matches!(
            decode_public_key("not a pem"),
            Err(AuthError::MalformedKey(_))
        ));

        let bogus = pem_rfc7468::encode_string("PUBLIC KEY", LineEnding::LF, b"\x30\x03\x02\x01\x01")
            .unwrap();
        assert!(matches!(
            decode_public_key(&bogus),
            Err(AuthError::MalformedKey(_))
        ));
    }

    #[test]
    fn rejects_unsupported_algorithm() {
        // X25519 SubjectPublicKeyInfo: a valid SPKI we cannot verify with
        let mut der = vec![0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00];
        der.extend_from_slice(&[9u8; 32]);
        let pem = pem_rfc7468::encode_string("PUBLIC KEY", LineEnding::LF, &der).unwrap();

        assert!(matches!(
            decode_public_key(&pem),
            Err(AuthError::UnsupportedKeyType(_))
        ));
    }

    #[test]
    fn signatures_verify_only_with_matching_algorithm() {
        let message = b"(request-target): get /inbox";

        let signer = SigningKey::Rsa(rsa_key());
        let key = decode_public_key(&signer.public_key_pem().unwrap()).unwrap();
        let signature = signer.sign(message);
        assert!(key.verify(Algorithm::RsaSha256, message, &signature).is_ok());
        assert!(key.verify(Algorithm::RsaSha512, message, &signature).is_err());
        assert!(key.verify(Algorithm::Ed25519, message, &signature).is_err());

        let signer = SigningKey::EcdsaP256(p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng));
        let key = decode_public_key(&signer.public_key_pem().unwrap()).unwrap();
        let signature = signer.sign(message);
        assert!(key.verify(Algorithm::EcdsaSha256, message, &signature).is_ok());
        assert!(key.verify(Algorithm::EcdsaSha512, message, &signature).is_err());

        let signer = SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[3u8; 32]));
        let key = decode_public_key(&signer.public_key_pem().unwrap()).unwrap();
        let signature = signer.sign(message);
        assert!(key.verify(Algorithm::Ed25519, message, &signature).is_ok());
        assert!(key.verify(Algorithm::Ed25519, b"tampered", &signature).is_err());
    }
}
