//! Webhook notification sink.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use modvault_core::{NotificationSink, QueueError, Version};

/// Event name carried by every publish notification.
pub const EVENT_VERSION_PUBLISHED: &str = "version.published";

const USER_AGENT_VALUE: &str = concat!("modvault/", env!("CARGO_PKG_VERSION"));

/// Webhook endpoints and credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoints that receive every event.
    #[serde(default)]
    pub urls: Vec<String>,

    /// Bearer token sent with every request.
    #[serde(default)]
    pub token: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            token: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl WebhookConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `MODVAULT_WEBHOOK_URLS` | Comma-separated endpoint URLs |
    /// | `MODVAULT_WEBHOOK_TOKEN` | Bearer token |
    /// | `MODVAULT_WEBHOOK_TIMEOUT` | Request timeout in seconds |
    pub fn from_env() -> Self {
        Self {
            urls: std::env::var("MODVAULT_WEBHOOK_URLS")
                .map(|v| parse_url_list(&v))
                .unwrap_or_default(),
            token: std::env::var("MODVAULT_WEBHOOK_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            timeout_secs: std::env::var("MODVAULT_WEBHOOK_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Split a comma-separated URL list, dropping blanks.
pub fn parse_url_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// JSON body of a publish notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPublished {
    pub event: String,
    pub mod_id: String,
    pub version_id: String,
    pub version: String,
    pub approved: bool,
    pub key: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl VersionPublished {
    pub fn new(version: &Version) -> Self {
        Self {
            event: EVENT_VERSION_PUBLISHED.to_string(),
            mod_id: version.mod_id.clone(),
            version_id: version.id.clone(),
            version: version.version.clone(),
            approved: version.approved,
            key: version.key.clone(),
            published_at: Utc::now(),
        }
    }
}

/// POSTs publish events to configured webhooks.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(config: WebhookConfig) -> Result<Self, QueueError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| QueueError::Unavailable {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }

    async fn post(&self, url: &str, event: &VersionPublished) -> Result<(), QueueError> {
        let mut request = self.client.post(url).json(event);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| QueueError::Unavailable {
            message: format!("{}: {}", url, e),
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(url, status = status.as_u16(), "webhook delivered");
            return Ok(());
        }

        let message = format!("{} answered {}", url, status);
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(QueueError::Unavailable { message })
        } else {
            Err(QueueError::Rejected { message })
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    /// Every URL is attempted; the first failure is returned.
    async fn notify_new_version(&self, version: &Version) -> Result<(), QueueError> {
        let event = VersionPublished::new(version);
        let mut first_error = None;

        for url in &self.config.urls {
            if let Err(err) = self.post(url, &event).await {
                warn!(url = %url, version_id = %version.id, error = %err, "webhook delivery failed");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
