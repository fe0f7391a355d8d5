//! Payload signing
//!
//! `X-Webhook-Signature: t=<unix seconds>,v1=<hex>[,v1=<hex>]`
//!
//! Each `v1` is HMAC-SHA256 over `"{t}.{body}"` with one live secret of the
//! endpoint. During a rotation grace period both the new and the previous
//! secret sign, so receivers still holding the old secret keep verifying.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of generated secrets
pub const SECRET_PREFIX: &str = "whsec_";

/// Signature header name
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Delivery ID header name
pub const ID_HEADER: &str = "X-Webhook-Id";

/// Event type header name
pub const EVENT_HEADER: &str = "X-Webhook-Event";

/// New random signing secret: `whsec_` + 32 random bytes in hex
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", SECRET_PREFIX, hex::encode(bytes))
}

fn keyed(secret: &str, timestamp: i64, body: &[u8]) -> HmacSha256 {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

/// Hex HMAC-SHA256 of `"{timestamp}.{body}"`
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    hex::encode(keyed(secret, timestamp, body).finalize().into_bytes())
}

/// Build the signature header value for every live secret
pub fn signature_header(secrets: &[&str], timestamp: i64, body: &[u8]) -> String {
    let mut header = format!("t={}", timestamp);
    for secret in secrets {
        header.push_str(",v1=");
        header.push_str(&sign(secret, timestamp, body));
    }
    header
}

/// Parsed signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    /// Signing time
    pub timestamp: i64,
    /// Hex signatures
    pub signatures: Vec<String>,
}

/// Parse `t=..,v1=..` (unknown schemes are ignored)
pub fn parse_signature_header(header: &str) -> Option<ParsedSignature> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp?;
    if signatures.is_empty() {
        return None;
    }
    Some(ParsedSignature {
        timestamp,
        signatures,
    })
}

/// Receiver-side check: some `v1` matches `secret` and the timestamp is
/// within `tolerance_secs` of `now`
pub fn verify(header: &str, secret: &str, body: &[u8], now: i64, tolerance_secs: i64) -> bool {
    let Some(parsed) = parse_signature_header(header) else {
        return false;
    };
    if (now - parsed.timestamp).abs() > tolerance_secs {
        return false;
    }

    let mac = keyed(secret, parsed.timestamp, body);
    parsed.signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secret_shape() {
        let secret = generate_secret();
        assert!(secret.starts_with(SECRET_PREFIX));
        assert_eq!(secret.len(), SECRET_PREFIX.len() + 64);
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn test_sign_and_verify() {
        let body = br#"{"id":"evt_1"}"#;
        let header = signature_header(&["whsec_a"], 1_700_000_000, body);

        assert!(verify(&header, "whsec_a", body, 1_700_000_010, 300));
        assert!(!verify(&header, "whsec_b", body, 1_700_000_010, 300));
        assert!(!verify(&header, "whsec_a", b"tampered", 1_700_000_010, 300));
        assert!(!verify(&header, "whsec_a", body, 1_700_001_000, 300));
    }

    #[test]
    fn test_rotation_signs_with_both_secrets() {
        let body = b"{}";
        let header = signature_header(&["whsec_new", "whsec_old"], 1_700_000_000, body);

        let parsed = parse_signature_header(&header).unwrap();
        assert_eq!(parsed.timestamp, 1_700_000_000);
        assert_eq!(parsed.signatures.len(), 2);
        assert!(verify(&header, "whsec_new", body, 1_700_000_000, 300));
        assert!(verify(&header, "whsec_old", body, 1_700_000_000, 300));
    }

    #[test]
    fn test_signed_message_is_timestamp_dot_body() {
        let expected = {
            let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
            mac.update(b"0.The quick brown fox jumps over the lazy dog");
            hex::encode(mac.finalize().into_bytes())
        };
        assert_eq!(sign("key", 0, b"The quick brown fox jumps over the lazy dog"), expected);
    }

    #[test]
    fn test_malformed_headers() {
        assert!(parse_signature_header("").is_none());
        assert!(parse_signature_header("t=abc,v1=00").is_none());
        assert!(parse_signature_header("t=1").is_none());
        assert!(parse_signature_header("garbage").is_none());
    }
}
