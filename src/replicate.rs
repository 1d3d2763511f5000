use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, error, warn};

use crate::config::ReplicateConfig;

#[derive(Debug, Error)]
pub enum ReplicateError {
    #[error("REPLICATE_API_TOKEN is not configured")] MissingToken,
    #[error("HTTP error: {0}")] Http(String),
    #[error("prediction {id} {status}: {message}")] Failed { id: String, status: String, message: String },
    #[error("prediction did not finish within {0:?}")] Timeout(Duration),
    #[error("Other: {0}")] Other(String),
}

/// Anything that can turn a source photo and a style prompt into a result image URI.
#[async_trait]
pub trait HairstyleGenerator: Send + Sync {
    async fn generate(&self, source_image: &str, prompt: &str) -> Result<String, ReplicateError>;
}

pub struct ReplicateClient {
    client: Client,
    api_token: Option<String>,
    base_url: String,
    model_version: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl ReplicateClient {
    pub fn new(config: &ReplicateConfig) -> Self {
        if config.api_token.is_none() {
            warn!("⚠️ REPLICATE_API_TOKEN is not set; hairstyle generation requests will fail until it is configured");
        }
        Self {
            client: Client::new(),
            api_token: config.api_token.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model_version: config.model_version.clone(),
            poll_interval: config.poll_interval,
            timeout: config.timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_token.is_some()
    }

    async fn create_prediction(&self, token: &str, source_image: &str, prompt: &str) -> Result<Prediction, ReplicateError> {
        let url = format!("{}/predictions", self.base_url);
        let request_body = json!({
            "version": self.model_version,
            "input": {
                "image": source_image,
                "prompt": prompt,
            }
        });

        info!("🔗 Creating prediction at {} (prompt: {})", url, preview(prompt, 80));

        let response = self.client
            .post(&url)
            .bearer_auth(token)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ReplicateError::Http(e.to_string()))?;

        Self::parse_prediction(response).await
    }

    async fn fetch_prediction(&self, token: &str, id: &str) -> Result<Prediction, ReplicateError> {
        let url = format!("{}/predictions/{}", self.base_url, id);
        let response = self.client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ReplicateError::Http(e.to_string()))?;

        Self::parse_prediction(response).await
    }

    async fn parse_prediction(response: reqwest::Response) -> Result<Prediction, ReplicateError> {
        let status = response.status();
        let response_text = response.text().await
            .map_err(|e| ReplicateError::Http(e.to_string()))?;

        if !status.is_success() {
            error!("❌ Replicate API error response: {}", preview(&response_text, 500));
            return Err(ReplicateError::Http(format!("status={} body={}", status, response_text)));
        }

        serde_json::from_str(&response_text)
            .map_err(|e| ReplicateError::Other(format!("parse error: {}: {}", e, preview(&response_text, 500))))
    }

    /// Submits the job and polls until the prediction reaches a terminal state.
    /// Each poll is a single request; there is no retry. The caller bounds the
    /// whole run with the configured timeout.
    async fn run_prediction(&self, token: &str, source_image: &str, prompt: &str) -> Result<String, ReplicateError> {
        let mut prediction = self.create_prediction(token, source_image, prompt).await?;
        info!("📥 Prediction {} created with status {}", prediction.id, prediction.status);

        while !prediction.is_terminal() {
            tokio::time::sleep(self.poll_interval).await;
            prediction = self.fetch_prediction(token, &prediction.id).await?;
        }

        match prediction.status.as_str() {
            "succeeded" => prediction
                .result_uri()
                .ok_or_else(|| ReplicateError::Other(format!("prediction {} succeeded without output", prediction.id))),
            _ => Err(ReplicateError::Failed {
                message: prediction.error_message(),
                id: prediction.id,
                status: prediction.status,
            }),
        }
    }
}

#[async_trait]
impl HairstyleGenerator for ReplicateClient {
    async fn generate(&self, source_image: &str, prompt: &str) -> Result<String, ReplicateError> {
        let token = self.api_token.as_deref().ok_or(ReplicateError::MissingToken)?;

        info!("Generating hairstyle with Replicate...");
        // covers stalled connections as well as predictions that never finish
        let result = tokio::time::timeout(self.timeout, self.run_prediction(token, source_image, prompt))
            .await
            .unwrap_or(Err(ReplicateError::Timeout(self.timeout)));
        match &result {
            Ok(uri) => info!("✅ Successfully generated hairstyle: {}", preview(uri, 120)),
            Err(e) => error!("❌ Failed to generate hairstyle: {}", e),
        }
        result
    }
}

fn preview(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...[{} chars total]", &s[..idx], s.len()),
        None => s.to_string(),
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Output>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Output {
    Single(String),
    Many(Vec<String>),
    Other(serde_json::Value),
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }

    // Multi-output models emit intermediate images first; the final one is last.
    fn result_uri(&self) -> Option<String> {
        match self.output.as_ref()? {
            Output::Single(s) if !s.is_empty() => Some(s.clone()),
            Output::Many(list) => list.iter().rev().find(|s| !s.is_empty()).cloned(),
            _ => None,
        }
    }

    fn error_message(&self) -> String {
        match &self.error {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => "no error detail".to_string(),
            Some(other) => other.to_string(),
        }
    }
}
