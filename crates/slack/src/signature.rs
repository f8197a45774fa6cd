//! Slack request signing (`X-Slack-Signature` / `X-Slack-Request-Timestamp`).

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_VERSION: &str = "v0";
const MAX_CLOCK_SKEW_SECS: i64 = 60 * 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("request timestamp `{0}` is not a unix timestamp")]
    MalformedTimestamp(String),
    #[error("request timestamp is {0}s away from server time")]
    Stale(i64),
    #[error("signature header is malformed")]
    MalformedSignature,
    #[error("signature does not match request body")]
    Mismatch,
}

pub fn verify_request(
    signing_secret: &[u8],
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let sent_at = timestamp
        .trim()
        .parse::<i64>()
        .map_err(|_| SignatureError::MalformedTimestamp(timestamp.to_string()))?;
    let skew = now_unix - sent_at;
    if skew.abs() > MAX_CLOCK_SKEW_SECS {
        return Err(SignatureError::Stale(skew));
    }

    let expected = signature
        .strip_prefix(SIGNATURE_VERSION)
        .and_then(|rest| rest.strip_prefix('='))
        .and_then(decode_hex)
        .ok_or(SignatureError::MalformedSignature)?;

    let mut mac = HmacSha256::new_from_slice(signing_secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(base_string(timestamp, body).as_slice());
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

pub fn sign_request(signing_secret: &[u8], timestamp: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(signing_secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(base_string(timestamp, body).as_slice());
    format!("{SIGNATURE_VERSION}={}", encode_hex(mac.finalize().into_bytes().as_slice()))
}

fn base_string(timestamp: &str, body: &[u8]) -> Vec<u8> {
    let mut base = format!("{SIGNATURE_VERSION}:{}:", timestamp.trim()).into_bytes();
    base.extend_from_slice(body);
    base
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|index| input.get(index..index + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{sign_request, verify_request, SignatureError};

    const SECRET: &[u8] = b"8f742231b10e8888abcd99yyyzzz85a5";
    const BODY: &[u8] = b"token=xyzz0WbapA4vBCDEFasx0q6G&command=%2Fslow-quiz&text=status";

    #[test]
    fn signed_request_verifies() {
        let signature = sign_request(SECRET, "1531420618", BODY);
        assert!(signature.starts_with("v0="));
        assert_eq!(verify_request(SECRET, "1531420618", BODY, &signature, 1531420618 + 30), Ok(()));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let signature = sign_request(SECRET, "1531420618", BODY);
        let result = verify_request(SECRET, "1531420618", b"text=register", &signature, 1531420618);
        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn stale_and_malformed_requests_are_rejected() {
        let signature = sign_request(SECRET, "1531420618", BODY);
        assert_eq!(
            verify_request(SECRET, "1531420618", BODY, &signature, 1531420618 + 301),
            Err(SignatureError::Stale(301))
        );
        assert!(matches!(
            verify_request(SECRET, "yesterday", BODY, &signature, 0),
            Err(SignatureError::MalformedTimestamp(_))
        ));
        assert_eq!(
            verify_request(SECRET, "1531420618", BODY, "v1=abcd", 1531420618),
            Err(SignatureError::MalformedSignature)
        );
    }
}
