use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ValidatorState {
    Success,
    Failure,
}

/// Produces and checks the contents of the handshake exchange
pub trait Validator: Send + Sync {
    /// the body of the handshake block sent to the server
    fn handshake(&self, data: Option<&[u8]>) -> Vec<u8>;

    /// the body of the acknowledgement sent back in response to the server's acknowledgement
    fn acknowledgement(&self, received: &[u8]) -> anyhow::Result<Vec<u8>>;

    fn verify_acknowledgement(&self, received: &[u8]) -> ValidatorState;
}

/// A JSON based handshake: the client sends a random nonce, and the server's acknowledgement is
///  accepted if it carries a nonce of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultValidator;

pub const HANDSHAKE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct HandshakeJson {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    nonce: String,
    #[serde(default)]
    payload: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AcknowledgementJson {
    #[serde(default)]
    received: bool,
    #[serde(default)]
    nonce: String,
}

impl DefaultValidator {
    fn timestamp_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

impl Validator for DefaultValidator {
    fn handshake(&self, data: Option<&[u8]>) -> Vec<u8> {
        let json = HandshakeJson {
            version: HANDSHAKE_VERSION,
            timestamp: Self::timestamp_millis(),
            nonce: Uuid::new_v4().simple().to_string(),
            payload: data.map(|d| String::from_utf8_lossy(d).into_owned()),
        };
        // serializing plain strings and numbers does not fail
        serde_json::to_vec(&json).unwrap_or_default()
    }

    fn acknowledgement(&self, received: &[u8]) -> anyhow::Result<Vec<u8>> {
        let received: HandshakeJson = serde_json::from_slice(received)?;
        let json = AcknowledgementJson {
            received: true,
            nonce: received.nonce,
        };
        Ok(serde_json::to_vec(&json)?)
    }

    fn verify_acknowledgement(&self, received: &[u8]) -> ValidatorState {
        match serde_json::from_slice::<HandshakeJson>(received) {
            Ok(json) if !json.nonce.is_empty() => ValidatorState::Success,
            _ => ValidatorState::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_handshake() {
        let raw = DefaultValidator.handshake(Some(&b"h1"[..]));
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();

        assert_eq!(json["version"], 1);
        assert_eq!(json["payload"], "h1");
        assert!(json["timestamp"].as_u64().unwrap() > 0);

        let nonce = json["nonce"].as_str().unwrap();
        assert_eq!(nonce.len(), 32);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_handshake_nonce_is_random() {
        let a: serde_json::Value = serde_json::from_slice(&DefaultValidator.handshake(None)).unwrap();
        let b: serde_json::Value = serde_json::from_slice(&DefaultValidator.handshake(None)).unwrap();
        assert_ne!(a["nonce"], b["nonce"]);
        assert!(a["payload"].is_null());
    }

    #[test]
    fn test_acknowledgement_echoes_nonce() {
        let raw = DefaultValidator.acknowledgement(br#"{"version":1,"nonce":"abc123"}"#).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json, serde_json::json!({"received": true, "nonce": "abc123"}));
    }

    #[test]
    fn test_acknowledgement_invalid_json() {
        assert!(DefaultValidator.acknowledgement(b"not json").is_err());
    }

    #[rstest]
    #[case::with_nonce(br#"{"nonce":"n1"}"#, ValidatorState::Success)]
    #[case::full(br#"{"version":1,"timestamp":5,"nonce":"n1","payload":"x"}"#, ValidatorState::Success)]
    #[case::empty_nonce(br#"{"nonce":""}"#, ValidatorState::Failure)]
    #[case::no_nonce(br#"{"version":1}"#, ValidatorState::Failure)]
    #[case::invalid(b"{", ValidatorState::Failure)]
    #[case::empty(b"", ValidatorState::Failure)]
    fn test_verify_acknowledgement(#[case] received: &[u8], #[case] expected: ValidatorState) {
        assert_eq!(DefaultValidator.verify_acknowledgement(received), expected);
    }

    #[test]
    fn test_own_handshake_verifies() {
        let handshake = DefaultValidator.handshake(Some(&b"x"[..]));
        assert_eq!(DefaultValidator.verify_acknowledgement(&handshake), ValidatorState::Success);
    }
}
