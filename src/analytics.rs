use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AnalyticsConfig;

pub type Params = Map<String, Value>;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("HTTP error: {0}")] Http(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsEvent {
    pub name: String,
    pub params: Params,
    pub client_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Destination for tracked events.
#[async_trait]
pub trait AnalyticsProvider: Send + Sync {
    async fn send(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError>;
}

/// Fire-and-forget event logger. Cloning shares the same underlying sink.
///
/// Until [`Analytics::initialize`] has run every call is a no-op. Calls never
/// block on delivery and never surface delivery errors to the caller.
#[derive(Clone)]
pub struct Analytics {
    provider: Arc<OnceLock<Arc<dyn AnalyticsProvider>>>,
    client_id: Arc<str>,
}

impl Default for Analytics {
    fn default() -> Self {
        Self::new()
    }
}

impl Analytics {
    pub fn new() -> Self {
        Self {
            provider: Arc::new(OnceLock::new()),
            client_id: Uuid::new_v4().to_string().into(),
        }
    }

    /// Installs the provider. Only the first call wins; returns whether this one did.
    pub fn initialize(&self, provider: Arc<dyn AnalyticsProvider>) -> bool {
        let installed = self.provider.set(provider).is_ok();
        if installed {
            info!("📈 Analytics initialized");
        } else {
            debug!("Analytics already initialized, ignoring");
        }
        installed
    }

    pub fn is_initialized(&self) -> bool {
        self.provider.get().is_some()
    }

    pub fn track_event(&self, name: &str, params: Params) {
        let Some(provider) = self.provider.get().cloned() else {
            debug!(event = name, "analytics not initialized, dropping event");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(event = name, "no async runtime, dropping event");
            return;
        };

        let event = AnalyticsEvent {
            name: sanitize_event_name(name),
            params,
            client_id: self.client_id.to_string(),
            timestamp: Utc::now(),
        };
        runtime.spawn(async move {
            let name = event.name.clone();
            if let Err(e) = provider.send(event).await {
                warn!(event = %name, "analytics delivery failed: {}", e);
            }
        });
    }

    pub fn track_style_viewed(&self, style_id: &str, style_name: &str) {
        self.track_event("style_viewed", params([("style_id", json!(style_id)), ("style_name", json!(style_name))]));
    }

    pub fn track_affiliate_click(&self, product_id: &str, retailer: &str) {
        self.track_event("affiliate_click", params([("product_id", json!(product_id)), ("retailer", json!(retailer))]));
    }

    pub fn track_barber_search(&self, location: &str, results_count: usize) {
        self.track_event("barber_search", params([("location", json!(location)), ("results_count", json!(results_count))]));
    }

    pub fn track_photo_upload(&self, source: &str) {
        self.track_event("photo_upload", params([("source", json!(source))]));
    }

    pub fn track_subscription_event(&self, action: &str, plan: &str) {
        self.track_event("subscription_event", params([("action", json!(action)), ("plan", json!(plan))]));
    }

    pub fn track_review_submitted(&self, barber_id: &str, rating: u8) {
        self.track_event("review_submitted", params([("barber_id", json!(barber_id)), ("rating", json!(rating))]));
    }

    pub fn track_language_change(&self, from: &str, to: &str) {
        self.track_event("language_change", params([("from_language", json!(from)), ("to_language", json!(to))]));
    }
}

pub fn params<const N: usize>(pairs: [(&str, Value); N]) -> Params {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

// GA4 only accepts [A-Za-z0-9_] names of at most 40 characters.
fn sanitize_event_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(40)
        .collect()
}

/// Sends events to the GA4 Measurement Protocol.
pub struct GoogleAnalyticsProvider {
    client: Client,
    endpoint: String,
    measurement_id: String,
    api_secret: String,
}

impl GoogleAnalyticsProvider {
    pub fn new(measurement_id: String, api_secret: String) -> Self {
        Self::with_endpoint("https://www.google-analytics.com/mp/collect".to_string(), measurement_id, api_secret)
    }

    pub fn with_endpoint(endpoint: String, measurement_id: String, api_secret: String) -> Self {
        Self { client: Client::new(), endpoint, measurement_id, api_secret }
    }

    /// `None` when the measurement id or API secret is not configured.
    pub fn from_config(config: &AnalyticsConfig) -> Option<Self> {
        match (&config.measurement_id, &config.api_secret) {
            (Some(id), Some(secret)) => Some(Self::new(id.clone(), secret.clone())),
            _ => None,
        }
    }
}

#[async_trait]
impl AnalyticsProvider for GoogleAnalyticsProvider {
    async fn send(&self, event: AnalyticsEvent) -> Result<(), AnalyticsError> {
        let body = json!({
            "client_id": event.client_id,
            "timestamp_micros": event.timestamp.timestamp_micros(),
            "events": [{ "name": event.name, "params": event.params }],
        });
        let response = self.client
            .post(&self.endpoint)
            .query(&[("measurement_id", self.measurement_id.as_str()), ("api_secret", self.api_secret.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalyticsError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AnalyticsError::Http(format!("status={}", response.status())));
        }
        Ok(())
    }
}
