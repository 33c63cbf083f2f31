//! Canonical JSON signing for proposals.
//!
//! Both processes sign the same canonical form: the proposal JSON with the
//! `signature` field removed, object keys recursively sorted, compact
//! separators, UTF-8. The signature is the lowercase hex HMAC-SHA256 over
//! that string with the shared secret.
//!
//! `serde_json` is built without `preserve_order`, so `Value` objects are
//! backed by a `BTreeMap` and serialize with sorted keys at every level.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("payload must be a JSON object")]
    NotAnObject,
}

/// Canonical payload string for a JSON value: drop any top-level `signature`
/// field and serialize compactly with sorted keys.
///
/// # Errors
/// Returns an error when the value is not a JSON object.
pub fn canonical_payload(value: &serde_json::Value) -> Result<String, SigningError> {
    let mut object = match value {
        serde_json::Value::Object(map) => map.clone(),
        _ => return Err(SigningError::NotAnObject),
    };
    object.remove("signature");
    Ok(serde_json::Value::Object(object).to_string())
}

/// Canonical payload for any serializable message.
///
/// # Errors
/// Returns an error if serialization fails or the message is not an object.
pub fn canonical_payload_of<T: Serialize>(message: &T) -> Result<String, SigningError> {
    let value = serde_json::to_value(message)?;
    canonical_payload(&value)
}

/// Lowercase hex HMAC-SHA256 of `payload` under `secret`.
#[must_use]
pub fn sign(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a lowercase hex signature in constant time.
#[must_use]
pub fn verify(secret: &str, payload: &str, signature_hex: &str) -> bool {
    let expected = sign(secret, payload);
    constant_time_eq(expected.as_bytes(), signature_hex.as_bytes())
}

/// Constant-time byte comparison. Length mismatch short-circuits, which is
/// fine: the signature length is public.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-shared-secret";

    #[test]
    fn canonical_form_sorts_keys_recursively() {
        let value = json!({
            "symbol": "SPY",
            "context": {"vix": 18.0, "flow_state": "risk_on"},
            "id": "p-1",
        });
        let canonical = canonical_payload(&value).unwrap();
        assert_eq!(
            canonical,
            r#"{"context":{"flow_state":"risk_on","vix":18.0},"id":"p-1","symbol":"SPY"}"#
        );
    }

    #[test]
    fn signature_field_is_excluded() {
        let with_sig = json!({"id": "p-1", "signature": "deadbeef"});
        let without = json!({"id": "p-1"});
        assert_eq!(
            canonical_payload(&with_sig).unwrap(),
            canonical_payload(&without).unwrap()
        );
    }

    #[test]
    fn signing_is_stable_under_key_reordering() {
        let a: serde_json::Value =
            serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: serde_json::Value =
            serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        let sig_a = sign(SECRET, &canonical_payload(&a).unwrap());
        let sig_b = sign(SECRET, &canonical_payload(&b).unwrap());
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn sign_produces_lowercase_hex() {
        let sig = sign(SECRET, "payload");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn sign_is_deterministic_and_key_sensitive() {
        assert_eq!(sign(SECRET, "x"), sign(SECRET, "x"));
        assert_ne!(sign(SECRET, "x"), sign("other-secret", "x"));
    }

    #[test]
    fn verify_accepts_matching_signature() {
        let payload = r#"{"id":"p-1"}"#;
        let sig = sign(SECRET, payload);
        assert!(verify(SECRET, payload, &sig));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let sig = sign(SECRET, r#"{"id":"p-1"}"#);
        assert!(!verify(SECRET, r#"{"id":"p-2"}"#, &sig));
    }

    #[test]
    fn verify_rejects_wrong_length() {
        assert!(!verify(SECRET, "payload", "deadbeef"));
    }

    #[test]
    fn canonical_rejects_non_object() {
        assert!(canonical_payload(&json!([1, 2, 3])).is_err());
    }
}
