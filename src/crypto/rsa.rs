//! # RSA Session Token Encryption
//!
//! Implements the encryption step of the token-based session flow: the
//! challenge timestamp (epoch milliseconds) and the caller-supplied
//! authorisation token are joined into a single `timestamp|token` string,
//! RSA-encrypted with PKCS#1 v1.5 padding under the public key fetched from
//! KSeF, and base64-encoded for embedding in the session-init XML payload.

use crate::error::{KsefProxyError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use std::sync::atomic::{AtomicU64, Ordering};

/// RSA encryptor for KSeF session token strings
///
/// Stateless apart from an operation counter surfaced on the health endpoint.
/// The public key is supplied per call because KSeF publishes a different key
/// per environment and the proxy fetches it fresh for every token-init.
#[derive(Debug, Default)]
pub struct TokenCipher {
    /// Operation counter
    operation_count: AtomicU64,
}

impl TokenCipher {
    /// Creates a new token cipher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            operation_count: AtomicU64::new(0),
        }
    }

    /// Encrypts the session token string for the given challenge.
    ///
    /// Builds `"{challenge_timestamp_millis}|{auth_token}"`, encrypts it with
    /// PKCS#1 v1.5 padding under `public_key_pem`, and returns the ciphertext
    /// base64-encoded.
    ///
    /// ## Errors
    /// - `KsefProxyError::CryptoError`: if the key fails to parse or the
    ///   plaintext is too long for the key modulus
    pub fn encrypt_session_token(
        &self,
        public_key_pem: &str,
        challenge_timestamp_millis: i64,
        auth_token: &str,
    ) -> Result<String> {
        let public_key = parse_public_key(public_key_pem)?;
        let plaintext = format!("{challenge_timestamp_millis}|{auth_token}");

        let mut rng = OsRng;
        let ciphertext = public_key
            .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext.as_bytes())
            .map_err(|e| {
                KsefProxyError::crypto(
                    format!("RSA encryption of session token failed: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        self.operation_count.fetch_add(1, Ordering::Relaxed);
        Ok(BASE64.encode(ciphertext))
    }

    /// Number of successful encryption operations performed
    pub fn operation_count(&self) -> u64 {
        self.operation_count.load(Ordering::Relaxed)
    }
}

/// Parses a PEM public key in either SPKI (`BEGIN PUBLIC KEY`) or PKCS#1
/// (`BEGIN RSA PUBLIC KEY`) form.
fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| {
            KsefProxyError::crypto(
                format!("Failed to parse KSeF public key: {e}"),
                Some(Box::new(e)),
            )
        })
}
