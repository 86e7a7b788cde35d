// SPDX-License-Identifier: MIT

//! Webhook signature verification.
//!
//! The provider signs each delivery with HMAC-SHA256 over the exact raw
//! request body. Comparison is constant-time; any decoding problem in the
//! provided signature (bad hex, wrong length) verifies as false rather
//! than erroring.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify an inbound webhook signature against the raw payload bytes.
///
/// `provided` is the hex digest from the signature header, with or without
/// the `sha256=` prefix.
pub fn verify_signature(payload: &[u8], provided: &str, secret: &[u8]) -> bool {
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);

    let provided_bytes = match hex::decode(provided) {
        Ok(b) => b,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);
    let expected = mac.finalize().into_bytes();

    // ct_eq is only constant-time for equal lengths; a length mismatch can
    // bail early because it leaks nothing about the secret digest.
    if provided_bytes.len() != expected.len() {
        return false;
    }

    provided_bytes.ct_eq(&expected).into()
}

/// Subscription handshake check: the challenge may be echoed back only when
/// the mode is "subscribe" and the verify token matches.
pub fn verify_subscription(mode: &str, verify_token: &str, expected_token: &str) -> bool {
    mode == "subscribe" && verify_token.as_bytes().ct_eq(expected_token.as_bytes()).into()
}

/// Compute the hex signature for a payload (used by tests and the
/// subscription setup tooling).
pub fn sign_payload(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
