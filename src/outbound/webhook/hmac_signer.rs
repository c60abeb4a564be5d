//! HMAC-SHA256 payload signing.
//!
//! Receivers authenticate a webhook by recomputing
//! `hex(HMAC-SHA256(secret, body))` over the exact bytes they received and
//! comparing it, in constant time, with the value of the
//! `X-Webhook-Signature: sha256=<hex>` header. The signature is the only
//! authenticity guarantee a receiver gets.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("Subscription secret is missing")]
    MissingSecret,

    #[error("Invalid signature header format: {0}")]
    InvalidHeader(String),
}

/// HMAC-SHA256 signer bound to one subscription secret
pub struct HmacSigner {
    secret: String,
}

impl HmacSigner {
    /// Refuses blank secrets so an unsigned payload can never go out
    pub fn new(secret: impl Into<String>) -> Result<Self, SignerError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(SignerError::MissingSecret);
        }
        Ok(Self { secret })
    }

    /// Hex-encoded HMAC-SHA256 of `payload`
    pub fn sign(&self, payload: &[u8]) -> String {
        hex::encode(self.mac(payload).finalize().into_bytes())
    }

    /// Check a hex signature against `payload` in constant time
    pub fn verify(&self, payload: &[u8], signature_hex: &str) -> bool {
        let expected = self.sign(payload);
        expected.as_bytes().ct_eq(signature_hex.as_bytes()).into()
    }

    fn mac(&self, payload: &[u8]) -> HmacSha256 {
        let mut mac = match HmacSha256::new_from_slice(self.secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC key can be of any size, as per crate documentation"),
        };
        mac.update(payload);
        mac
    }
}

/// Sign `payload` with `secret`
pub fn sign(payload: &[u8], secret: &str) -> Result<String, SignerError> {
    Ok(HmacSigner::new(secret)?.sign(payload))
}

/// Verify a `sha256=<hex>` header value against `payload`
pub fn verify(payload: &[u8], secret: &str, header: &str) -> Result<bool, SignerError> {
    let signature = parse_signature_header(header)?;
    Ok(HmacSigner::new(secret)?.verify(payload, signature))
}

/// Helper function to format signature for HTTP header
pub fn format_signature_header(signature: &str) -> String {
    format!("sha256={signature}")
}

/// Helper function to parse signature from HTTP header
pub fn parse_signature_header(header: &str) -> Result<&str, SignerError> {
    header
        .strip_prefix("sha256=")
        .ok_or_else(|| SignerError::InvalidHeader(header.to_string()))
}
