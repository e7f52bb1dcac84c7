//! Stateless bearer token signing and verification.
//!
//! A token is `b64(identifier) "." b64(issued_at) "." b64(signature)`, all
//! URL-safe base64 without padding. The signature is an HMAC-SHA256 over the
//! first two segments, keyed by a key derived from the principal's current
//! secret. Rotating the secret therefore invalidates every token issued
//! before the rotation.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::digest::Key;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::trace;

use crate::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

const SEPARATOR: char = '.';

/// Why a token could not be taken apart.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token is missing a '.' separator")]
    MissingSeparator,
    #[error("token segment is not valid base64")]
    Base64,
    #[error("token identifier is not valid UTF-8")]
    Utf8,
}

/// Issues and verifies bearer tokens.
#[derive(Clone)]
pub struct TokenCodec {
    salt: String,
    max_age: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(salt: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            salt: salt.into(),
            max_age: None,
            clock,
        }
    }

    /// Reject tokens older than `max_age` in [`TokenCodec::verify`].
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    fn mac(&self, secret: &str) -> HmacSha256 {
        let key = Sha256::new()
            .chain_update(self.salt.as_bytes())
            .chain_update(b"signer")
            .chain_update(secret.as_bytes())
            .finalize();
        // HMAC zero-pads short keys to the block size; doing it here keeps
        // key setup infallible.
        let mut block = Key::<HmacSha256>::default();
        block[..key.len()].copy_from_slice(&key);
        <HmacSha256 as Mac>::new(&block)
    }

    fn sign(&self, secret: &str, payload: &str) -> Vec<u8> {
        let mut mac = self.mac(secret);
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Mint a fresh token for `identifier` signed with `secret`.
    pub fn issue(&self, identifier: &str, secret: &str) -> String {
        let issued_at = self.clock.now_secs();
        let payload = format!(
            "{}{}{}",
            URL_SAFE_NO_PAD.encode(identifier.as_bytes()),
            SEPARATOR,
            URL_SAFE_NO_PAD.encode(issued_at.to_be_bytes()),
        );
        let signature = URL_SAFE_NO_PAD.encode(self.sign(secret, &payload));
        format!("{}{}{}", payload, SEPARATOR, signature)
    }

    /// The identifier embedded in `token`. The signature is not checked.
    pub fn identifier_of(&self, token: &str) -> Result<String, DecodeError> {
        let (encoded, _) = token.split_once(SEPARATOR).ok_or(DecodeError::MissingSeparator)?;
        let raw = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| DecodeError::Base64)?;
        String::from_utf8(raw).map_err(|_| DecodeError::Utf8)
    }

    /// Issue time embedded in `token`, in epoch seconds. The signature is not checked.
    pub fn issued_at(&self, token: &str) -> Result<u64, DecodeError> {
        let (payload, _) = token.rsplit_once(SEPARATOR).ok_or(DecodeError::MissingSeparator)?;
        let (_, timestamp) = payload.split_once(SEPARATOR).ok_or(DecodeError::MissingSeparator)?;
        let raw = URL_SAFE_NO_PAD.decode(timestamp).map_err(|_| DecodeError::Base64)?;
        let bytes: [u8; 8] = raw.try_into().map_err(|_| DecodeError::Base64)?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Whether `token` was signed with `secret` and, if a max age is
    /// configured, is still fresh. Never fails: any defect yields `false`.
    pub fn verify(&self, token: &str, secret: &str) -> bool {
        let Some((payload, signature)) = token.rsplit_once(SEPARATOR) else {
            return false;
        };
        let Ok(provided) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };

        let expected = self.sign(secret, payload);
        if !bool::from(expected.ct_eq(&provided)) {
            trace!("Token signature mismatch");
            return false;
        }

        let Ok(issued_at) = self.issued_at(token) else {
            return false;
        };
        // Issue time only matters under an age policy; without one, peers
        // with slightly different clocks must accept each other's tokens.
        if let Some(max_age) = self.max_age {
            let now = self.clock.now_secs();
            if issued_at > now {
                trace!(issued_at, now, "Token issued in the future");
                return false;
            }
            if now - issued_at > max_age.as_secs() {
                trace!(issued_at, now, "Token expired");
                return false;
            }
        }
        true
    }
}
