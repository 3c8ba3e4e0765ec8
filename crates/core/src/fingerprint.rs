//! Request fingerprinting for in-flight deduplication.
//!
//! Two requests share a fingerprint when they target the same endpoint
//! with structurally equal payloads, regardless of object key order.
//! The hash is a plain 32-bit multiplicative rolling hash: collisions
//! are possible and tolerated, since deduplication is an optimization.

use std::fmt;

use serde_json::Value;

/// Multiplier of the rolling hash (`h = h * 31 + byte`).
const HASH_MULTIPLIER: u32 = 31;

/// Alphabet used to encode the hash compactly.
const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque identity of a request, derived from endpoint and payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute the fingerprint of a request.
///
/// The endpoint is kept in clear text as a prefix so that log lines stay
/// readable; the payload contributes only through the hash.
pub fn fingerprint(endpoint: &str, payload: &Value) -> RequestFingerprint {
    let mut input = String::with_capacity(endpoint.len() + 64);
    input.push_str(endpoint);
    input.push(':');
    write_canonical(payload, &mut input);

    let hash = rolling_hash(&input);
    RequestFingerprint(format!("{endpoint}#{}", to_base36(hash)))
}

/// Serialize a JSON value with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // A JSON string value renders with proper escaping.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn rolling_hash(input: &str) -> u32 {
    input.bytes().fold(0u32, |hash, byte| {
        hash.wrapping_mul(HASH_MULTIPLIER)
            .wrapping_add(u32::from(byte))
    })
}

fn to_base36(mut n: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    // Every byte comes from the ASCII alphabet above.
    digits.into_iter().map(char::from).collect()
}
