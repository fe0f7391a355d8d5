//! Request fingerprinting
//!
//! A fingerprint is `sha256(METHOD \n path \n normalized_body)` in hex. JSON
//! bodies are normalized by re-serializing with object keys sorted, so two
//! bodies that differ only in key order or whitespace share a fingerprint.
//! Anything that is not JSON is hashed verbatim.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Methods that carry side effects and therefore get deduplicated
pub const MUTATING_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// Whether requests with this method are fingerprinted
pub fn is_mutating(method: &str) -> bool {
    MUTATING_METHODS
        .iter()
        .any(|m| m.eq_ignore_ascii_case(method))
}

/// Fingerprint a request
pub fn fingerprint(method: &str, path: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    hasher.update(normalize_body(body));
    hex::encode(hasher.finalize())
}

/// Canonical form of a body
pub fn normalize_body(body: &[u8]) -> Vec<u8> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Vec::new();
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            let mut out = String::with_capacity(body.len());
            write_canonical(&value, &mut out);
            out.into_bytes()
        }
        Err(_) => body.to_vec(),
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
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
        // Scalars already have a single JSON spelling
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String((*key).clone()).to_string());
        out.push(':');
        if let Some(value) = map.get(*key) {
            write_canonical(value, out);
        }
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_order_does_not_matter() {
        let a = br#"{"amount":"100.00","to":"acc-2","meta":{"b":1,"a":2}}"#;
        let b = br#"{ "meta": {"a":2, "b":1}, "to": "acc-2", "amount": "100.00" }"#;
        assert_eq!(fingerprint("POST", "/transfers", a), fingerprint("POST", "/transfers", b));
    }

    #[test]
    fn test_path_and_method_are_part_of_fingerprint() {
        let body = br#"{"amount":"1"}"#;
        let base = fingerprint("POST", "/transfers", body);
        assert_ne!(base, fingerprint("POST", "/settlement/execute", body));
        assert_ne!(base, fingerprint("PUT", "/transfers", body));
        assert_eq!(base, fingerprint("post", "/transfers", body));
    }

    #[test]
    fn test_value_change_changes_fingerprint() {
        let a = fingerprint("POST", "/transfers", br#"{"amount":"100"}"#);
        let b = fingerprint("POST", "/transfers", br#"{"amount":"101"}"#);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_non_json_hashed_verbatim() {
        assert_eq!(normalize_body(b"not json"), b"not json".to_vec());
        assert!(normalize_body(b"  \n").is_empty());
    }

    #[test]
    fn test_mutating_methods() {
        assert!(is_mutating("POST"));
        assert!(is_mutating("delete"));
        assert!(!is_mutating("GET"));
        assert!(!is_mutating("HEAD"));
    }
}
