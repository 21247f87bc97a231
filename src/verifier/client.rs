//! HTTP transport for the verifier REST API
//!
//! Sends enroll/verify attempts as multipart forms and `/create-wallet` as an
//! empty POST. The base URL and timeout are injected through `VerifierConfig`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;

use super::response::{interpret_response, interpret_wallet};
use super::{CreatedWallet, VerificationResult, Verifier, VerifyError};
use crate::attempt::AttemptRequest;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// File name the verifier expects on the audio part
const AUDIO_FILE_NAME: &str = "voice.wav";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl VerifierConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }
}

/// `Verifier` backed by reqwest. The client is reused across requests.
#[derive(Debug, Clone)]
pub struct HttpVerifier {
    client: Client,
    config: VerifierConfig,
}

impl HttpVerifier {
    pub fn new(config: VerifierConfig) -> Result<Self, VerifyError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| VerifyError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn transport_error(&self, err: reqwest::Error) -> VerifyError {
        if err.is_timeout() {
            VerifyError::Network(format!(
                "request timed out after {}s",
                self.config.timeout.as_secs()
            ))
        } else {
            VerifyError::Network(err.to_string())
        }
    }

    async fn read(&self, response: reqwest::Response) -> Result<(u16, String), VerifyError> {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok((status, body))
    }
}

#[async_trait]
impl Verifier for HttpVerifier {
    async fn submit(&self, request: AttemptRequest) -> Result<VerificationResult, VerifyError> {
        let url = self.url(request.mode.endpoint());

        log::info!(
            "Submitting {} attempt to {} ({} bytes audio)",
            request.mode,
            url,
            request.audio.len()
        );

        let mime = request.audio.mime_type().to_string();
        let audio_part = Part::bytes(request.audio.into_bytes())
            .file_name(AUDIO_FILE_NAME)
            .mime_str(&mime)
            .map_err(|e| VerifyError::Network(format!("invalid audio MIME type: {}", e)))?;

        let form = Form::new()
            .text("wallet_address", request.identity_address)
            .text("signature", request.signature)
            .text("message", request.intent_message)
            .text("phrase", request.phrase)
            .part("audio", audio_part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let (status, body) = self.read(response).await?;
        log::debug!("Verifier responded {}: {}", status, body);

        let result = interpret_response(request.mode, status, &body);
        match &result {
            Ok(r) => log::info!("{} response: verified={} score={:?}", request.mode, r.verified, r.score),
            Err(e) => log::warn!("{} request failed: {}", request.mode, e),
        }
        result
    }

    async fn create_wallet(&self) -> Result<CreatedWallet, VerifyError> {
        let url = self.url("/create-wallet");
        log::info!("Requesting new wallet from {}", url);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let (status, body) = self.read(response).await?;
        // Body carries the secret key; never log it
        interpret_wallet(status, &body)
    }
}
