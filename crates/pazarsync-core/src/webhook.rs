//! Webhook signature verification and envelope parsing.

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("webhook payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("webhook payload has no eventType or type field")]
    MissingEventType,
}

/// Verifies `hex(HMAC-SHA256(payload, secret))` signatures.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl WebhookVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => unreachable!("hmac accepts keys of any length"),
        }
    }

    /// Lowercase hex signature of `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature. Malformed hex never matches.
    pub fn validate(&self, payload: &[u8], signature: &str) -> bool {
        let signature = signature.trim();
        let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"***")
            .finish()
    }
}

/// Marketplace event envelope: `{eventType|type, data|payload}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub data: Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, WebhookError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|error| WebhookError::InvalidJson(error.to_string()))?;
        let event_type = ["eventType", "type"]
            .iter()
            .find_map(|key| {
                value
                    .get(*key)
                    .and_then(Value::as_str)
                    .filter(|kind| !kind.is_empty())
            })
            .ok_or(WebhookError::MissingEventType)?
            .to_owned();
        let data = ["data", "payload"]
            .iter()
            .find_map(|key| value.get(*key).cloned())
            .unwrap_or(Value::Null);
        Ok(Self { event_type, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_of_payload_validates() {
        let verifier = WebhookVerifier::new("secret");
        let signature = verifier.sign(b"order-payload");

        assert_eq!(signature.len(), 64);
        assert!(verifier.validate(b"order-payload", &signature));
        assert!(verifier.validate(b"order-payload", &signature.to_uppercase()));
        assert!(verifier.validate(b"order-payload", &format!("sha256={signature}")));
    }

    #[test]
    fn tampered_or_malformed_signatures_fail() {
        let verifier = WebhookVerifier::new("secret");
        let signature = verifier.sign(b"order-payload");

        assert!(!verifier.validate(b"order-payload", "tampered-signature"));
        assert!(!verifier.validate(b"order-payload-2", &signature));
        assert!(!WebhookVerifier::new("other").validate(b"order-payload", &signature));
        assert!(!verifier.validate(b"order-payload", ""));
    }

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2.
        let verifier = WebhookVerifier::new("Jefe");
        assert_eq!(
            verifier.sign(b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn blank_event_type_falls_back_to_type() {
        let event = WebhookEvent::parse(br#"{"eventType":"","type":"order.shipped","data":{}}"#)
            .expect("valid");
        assert_eq!(event.event_type, "order.shipped");
    }

    #[test]
    fn parses_both_envelope_spellings() {
        let first = WebhookEvent::parse(br#"{"eventType":"order.created","data":{"id":1}}"#)
            .expect("valid");
        let second =
            WebhookEvent::parse(br#"{"type":"stock.updated","payload":[1,2]}"#).expect("valid");

        assert_eq!(first.event_type, "order.created");
        assert_eq!(first.data, json!({"id": 1}));
        assert_eq!(second.event_type, "stock.updated");
        assert_eq!(second.data, json!([1, 2]));
        assert_eq!(
            WebhookEvent::parse(br#"{"data":{}}"#),
            Err(WebhookError::MissingEventType)
        );
        assert!(matches!(
            WebhookEvent::parse(b"not json"),
            Err(WebhookError::InvalidJson(_))
        ));
    }
}
