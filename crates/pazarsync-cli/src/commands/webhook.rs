use pazarsync_core::{SyncConfig, WebhookEvent};
use serde_json::json;

use crate::cli::VerifyWebhookArgs;
use crate::error::CliError;

use super::CommandResult;

pub fn run(config: &SyncConfig, args: &VerifyWebhookArgs) -> Result<CommandResult, CliError> {
    let verifier = config.webhook_verifier()?;
    let payload = std::fs::read(&args.payload_file)?;
    let valid = verifier.validate(&payload, &args.signature);

    let event = if valid {
        WebhookEvent::parse(&payload)
            .ok()
            .map(serde_json::to_value)
            .transpose()?
    } else {
        None
    };
    let result = CommandResult::ok(json!({ "valid": valid, "event": event }));
    if valid {
        Ok(result)
    } else {
        Ok(result.with_failure(CliError::SignatureMismatch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pazarsync_core::WebhookVerifier;
    use std::path::PathBuf;

    fn config_with_secret() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.webhook.secret = Some(String::from("secret"));
        config
    }

    fn payload_file(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("payload.json");
        std::fs::write(&path, body).expect("write payload");
        path
    }

    #[test]
    fn valid_signature_reports_parsed_event() {
        let dir = tempfile::tempdir().expect("temp dir");
        let body = r#"{"eventType":"order.created","data":{"id":7}}"#;
        let args = VerifyWebhookArgs {
            payload_file: payload_file(&dir, body),
            signature: WebhookVerifier::new("secret").sign(body.as_bytes()),
        };

        let result = run(&config_with_secret(), &args).expect("verified");
        assert!(result.failure.is_none());
        assert_eq!(result.data["valid"], json!(true));
        assert_eq!(result.data["event"]["event_type"], json!("order.created"));
    }

    #[test]
    fn tampered_signature_fails_with_data() {
        let dir = tempfile::tempdir().expect("temp dir");
        let args = VerifyWebhookArgs {
            payload_file: payload_file(&dir, "order-payload"),
            signature: String::from("tampered-signature"),
        };

        let result = run(&config_with_secret(), &args).expect("ran");
        assert_eq!(result.data["valid"], json!(false));
        assert!(matches!(result.failure, Some(CliError::SignatureMismatch)));
    }
}
