//! Mapping verifier HTTP responses onto results and errors.
//!
//! Kept free of any transport so the mapping can be exercised directly.

use serde::Deserialize;
use serde_json::Value;

use super::{CreatedWallet, VerificationResult, VerifyError};
use crate::attempt::AttemptMode;
use crate::identity::{LocalKeypair, RecoveryPhrase};

#[derive(Debug, Default, Deserialize)]
struct AttemptBody {
    #[serde(default)]
    verified: Option<bool>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<DetailsBody>,
}

#[derive(Debug, Deserialize)]
struct DetailsBody {
    #[serde(default)]
    content_score: Option<f64>,
    #[serde(default)]
    bio_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WalletBody {
    private_key: String,
    wallet_address: String,
    #[serde(default)]
    mnemonic: String,
}

/// Interpret the response to an enroll or verify request.
///
/// Enroll has no pass/fail outcome: a 2xx is success, and an explicit
/// `verified: false` is reported as a server error carrying the message.
/// Verify requires `verified` and nothing else overrides it.
pub fn interpret_response(
    mode: AttemptMode,
    status: u16,
    body: &str,
) -> Result<VerificationResult, VerifyError> {
    check_status(status, body)?;

    let value = parse_object(body)?;
    let parsed: AttemptBody =
        serde_json::from_value(value).map_err(|e| VerifyError::MalformedResponse(e.to_string()))?;

    let verified = match (mode, parsed.verified) {
        (AttemptMode::Enroll, Some(false)) => {
            return Err(VerifyError::Server {
                status,
                detail: parsed
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Enrollment rejected".to_string()),
            })
        }
        (AttemptMode::Enroll, _) => true,
        (AttemptMode::Verify, Some(verified)) => verified,
        (AttemptMode::Verify, None) => {
            return Err(VerifyError::MalformedResponse(
                "verify response has no `verified` field".to_string(),
            ))
        }
    };

    let (content_score, bio_score) = match parsed.details {
        Some(details) => (
            details
                .content_score
                .map(|score| score.round().clamp(0.0, 100.0) as u32),
            details.bio_score,
        ),
        None => (None, None),
    };

    Ok(VerificationResult {
        mode,
        verified,
        score: parsed.score,
        threshold: parsed.threshold,
        content_score,
        bio_score,
        message: parsed.message.filter(|m| !m.is_empty()),
    })
}

/// Interpret a `/create-wallet` response and rebuild its keypair.
pub fn interpret_wallet(status: u16, body: &str) -> Result<CreatedWallet, VerifyError> {
    check_status(status, body)?;

    let value = parse_object(body)?;
    let parsed: WalletBody =
        serde_json::from_value(value).map_err(|e| VerifyError::MalformedResponse(e.to_string()))?;

    let keypair = LocalKeypair::from_secret_base58(&parsed.private_key)
        .map_err(|e| VerifyError::MalformedResponse(format!("private_key: {}", e)))?;

    if keypair.address() != parsed.wallet_address {
        return Err(VerifyError::MalformedResponse(
            "private_key does not belong to wallet_address".to_string(),
        ));
    }

    Ok(CreatedWallet {
        wallet_address: parsed.wallet_address,
        mnemonic: RecoveryPhrase::new(parsed.mnemonic),
        keypair,
    })
}

fn check_status(status: u16, body: &str) -> Result<(), VerifyError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    Err(VerifyError::Server {
        status,
        detail: error_detail(status, body),
    })
}

/// FastAPI puts the reason in `detail`; fall back to the raw body, then the status text.
fn error_detail(status: u16, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        match map.get("detail") {
            Some(Value::String(detail)) => return detail.clone(),
            Some(other) => return other.to_string(),
            None => {}
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    match reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
    {
        Some(reason) => format!("HTTP {} {}", status, reason),
        None => format!("HTTP {}", status),
    }
}

fn parse_object(body: &str) -> Result<Value, VerifyError> {
    if body.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(VerifyError::MalformedResponse(format!(
            "expected a JSON object, got {}",
            other
        ))),
        Err(e) => Err(VerifyError::MalformedResponse(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enroll_empty_object_succeeds() {
        let result = interpret_response(AttemptMode::Enroll, 200, "{}").unwrap();
        assert!(result.verified);
        assert_eq!(result.score, None);
    }

    #[test]
    fn enroll_empty_body_succeeds() {
        let result = interpret_response(AttemptMode::Enroll, 200, "").unwrap();
        assert!(result.verified);
    }

    #[test]
    fn enroll_keeps_server_message() {
        let body = r#"{"status": "success", "message": "Voice print enrolled successfully"}"#;
        let result = interpret_response(AttemptMode::Enroll, 200, body).unwrap();
        assert!(result.verified);
        assert_eq!(
            result.message.as_deref(),
            Some("Voice print enrolled successfully")
        );
    }

    #[test]
    fn enroll_explicit_false_is_server_error() {
        let err =
            interpret_response(AttemptMode::Enroll, 200, r#"{"verified": false}"#).unwrap_err();
        assert_eq!(
            err,
            VerifyError::Server {
                status: 200,
                detail: "Enrollment rejected".to_string()
            }
        );

        let body = r#"{"verified": false, "message": "Already enrolled"}"#;
        match interpret_response(AttemptMode::Enroll, 200, body).unwrap_err() {
            VerifyError::Server { detail, .. } => assert_eq!(detail, "Already enrolled"),
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[test]
    fn enroll_explicit_true_succeeds() {
        let result =
            interpret_response(AttemptMode::Enroll, 200, r#"{"verified": true}"#).unwrap();
        assert!(result.verified);
    }

    #[test]
    fn verify_true_with_score() {
        let body = r#"{"verified": true, "score": 0.95}"#;
        let result = interpret_response(AttemptMode::Verify, 200, body).unwrap();
        assert!(result.verified);
        assert_eq!(result.score, Some(0.95));
    }

    #[test]
    fn verify_false_with_details() {
        let body = r#"{
            "verified": false,
            "score": 0.40,
            "threshold": 0.9,
            "message": "Voice Mismatch (Score: 0.40)",
            "details": {"content_score": 60, "bio_score": 0.40}
        }"#;
        let result = interpret_response(AttemptMode::Verify, 200, body).unwrap();
        assert!(!result.verified);
        assert_eq!(result.content_score, Some(60));
        assert_eq!(result.bio_score, Some(0.40));
        assert_eq!(result.threshold, Some(0.9));
        assert_eq!(
            result.detail_line().as_deref(),
            Some("Content Score: 60/100, Bio Score: 0.40")
        );
    }

    #[test]
    fn verify_high_score_never_overrides_verified() {
        let body = r#"{"verified": false, "score": 0.99, "details": {"content_score": 100, "bio_score": 0.99}}"#;
        let result = interpret_response(AttemptMode::Verify, 200, body).unwrap();
        assert!(!result.verified);
    }

    #[test]
    fn verify_without_verified_is_malformed() {
        assert!(matches!(
            interpret_response(AttemptMode::Verify, 200, r#"{"score": 0.9}"#),
            Err(VerifyError::MalformedResponse(_))
        ));
        assert!(matches!(
            interpret_response(AttemptMode::Verify, 200, ""),
            Err(VerifyError::MalformedResponse(_))
        ));
    }

    #[test]
    fn non_object_and_garbage_are_malformed() {
        assert!(matches!(
            interpret_response(AttemptMode::Enroll, 200, "[1, 2]"),
            Err(VerifyError::MalformedResponse(_))
        ));
        assert!(matches!(
            interpret_response(AttemptMode::Verify, 200, "<html>"),
            Err(VerifyError::MalformedResponse(_))
        ));
        assert!(matches!(
            interpret_response(AttemptMode::Verify, 200, r#"{"verified": "yes"}"#),
            Err(VerifyError::MalformedResponse(_))
        ));
    }

    #[test]
    fn server_error_uses_fastapi_detail() {
        let err = interpret_response(
            AttemptMode::Verify,
            401,
            r#"{"detail": "Invalid wallet signature"}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            VerifyError::Server {
                status: 401,
                detail: "Invalid wallet signature".to_string()
            }
        );
    }

    #[test]
    fn server_error_falls_back_to_body_then_status() {
        let err = interpret_response(AttemptMode::Enroll, 502, "Bad Gateway from proxy").unwrap_err();
        assert_eq!(
            err,
            VerifyError::Server {
                status: 502,
                detail: "Bad Gateway from proxy".to_string()
            }
        );

        let err = interpret_response(AttemptMode::Enroll, 500, "").unwrap_err();
        assert_eq!(
            err,
            VerifyError::Server {
                status: 500,
                detail: "HTTP 500 Internal Server Error".to_string()
            }
        );
    }

    #[test]
    fn structured_detail_is_stringified() {
        let body = r#"{"detail": [{"loc": ["body", "phrase"], "msg": "field required"}]}"#;
        match interpret_response(AttemptMode::Enroll, 422, body).unwrap_err() {
            VerifyError::Server { status, detail } => {
                assert_eq!(status, 422);
                assert!(detail.contains("field required"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn wallet_response_rebuilds_keypair() {
        let key = LocalKeypair::generate();
        let body = serde_json::json!({
            "private_key": key.to_secret_base58(),
            "wallet_address": key.address(),
            "mnemonic": "alpha beta",
        })
        .to_string();

        let wallet = interpret_wallet(200, &body).unwrap();
        assert_eq!(wallet.wallet_address, key.address());
        assert_eq!(wallet.keypair.address(), key.address());
        assert_eq!(wallet.mnemonic.expose(), "alpha beta");
    }

    #[test]
    fn wallet_response_with_foreign_address_is_malformed() {
        let key = LocalKeypair::generate();
        let body = serde_json::json!({
            "private_key": key.to_secret_base58(),
            "wallet_address": LocalKeypair::generate().address(),
            "mnemonic": "",
        })
        .to_string();

        assert!(matches!(
            interpret_wallet(200, &body),
            Err(VerifyError::MalformedResponse(_))
        ));
    }

    #[test]
    fn wallet_response_missing_key_is_malformed() {
        assert!(matches!(
            interpret_wallet(200, r#"{"wallet_address": "abc"}"#),
            Err(VerifyError::MalformedResponse(_))
        ));
    }

}
