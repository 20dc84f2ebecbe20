//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validate::ExtractOptions;

/// What happens when a relational write after the version row fails.
///
/// Applies uniformly to dependency rows, target rows and version updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Any failed write aborts the pipeline and compensates.
    #[default]
    Strict,

    /// Failed writes are logged and the pipeline continues.
    BestEffort,
}

impl WritePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "best_effort" | "best-effort" => Some(Self::BestEffort),
            _ => None,
        }
    }
}

/// What happens when a virus scan job cannot be submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanSubmissionPolicy {
    /// Keep the committed version and report the failure in the response.
    #[default]
    Degrade,

    /// Compensate the whole version and fail the request.
    RollBack,
}

impl ScanSubmissionPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "degrade" => Some(Self::Degrade),
            "roll_back" | "rollback" | "roll-back" => Some(Self::RollBack),
            _ => None,
        }
    }
}

/// Retry policy for detached notification delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry, doubled per retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff cap.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Un-jittered backoff before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(20);
        let ms = self.base_delay_ms.saturating_mul(1 << shift);
        Duration::from_millis(ms.min(self.max_delay_ms))
    }
}

/// Finalization configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeConfig {
    #[serde(default)]
    pub write_policy: WritePolicy,

    #[serde(default)]
    pub scan_policy: ScanSubmissionPolicy,

    #[serde(default)]
    pub extract: ExtractOptions,

    /// Overall deadline applied when the caller supplies none.
    #[serde(default)]
    pub stage_timeout_secs: Option<u64>,

    #[serde(default)]
    pub notify: RetryPolicy,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            write_policy: WritePolicy::default(),
            scan_policy: ScanSubmissionPolicy::default(),
            extract: ExtractOptions::default(),
            stage_timeout_secs: None,
            notify: RetryPolicy::default(),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

impl FinalizeConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `MODVAULT_WRITE_POLICY` | `strict` or `best_effort` |
    /// | `MODVAULT_SCAN_POLICY` | `degrade` or `roll_back` |
    /// | `MODVAULT_EXTRACT_METADATA` | Collect package metadata |
    /// | `MODVAULT_STRICT_VALIDATION` | Run strict package checks |
    /// | `MODVAULT_FINALIZE_TIMEOUT` | Deadline in seconds |
    /// | `MODVAULT_NOTIFY_MAX_RETRIES` | Notification retries |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            write_policy: std::env::var("MODVAULT_WRITE_POLICY")
                .ok()
                .and_then(|v| WritePolicy::parse(&v))
                .unwrap_or(defaults.write_policy),
            scan_policy: std::env::var("MODVAULT_SCAN_POLICY")
                .ok()
                .and_then(|v| ScanSubmissionPolicy::parse(&v))
                .unwrap_or(defaults.scan_policy),
            extract: ExtractOptions {
                with_metadata: env_flag("MODVAULT_EXTRACT_METADATA")
                    .unwrap_or(defaults.extract.with_metadata),
                with_validation: env_flag("MODVAULT_STRICT_VALIDATION")
                    .unwrap_or(defaults.extract.with_validation),
            },
            stage_timeout_secs: std::env::var("MODVAULT_FINALIZE_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok()),
            notify: RetryPolicy {
                max_retries: std::env::var("MODVAULT_NOTIFY_MAX_RETRIES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.notify.max_retries),
                ..defaults.notify
            },
        }
    }

    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn with_scan_policy(mut self, policy: ScanSubmissionPolicy) -> Self {
        self.scan_policy = policy;
        self
    }

    pub fn with_extract(mut self, extract: ExtractOptions) -> Self {
        self.extract = extract;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.stage_timeout_secs = Some(secs);
        self
    }

    pub fn with_notify_retry(mut self, notify: RetryPolicy) -> Self {
        self.notify = notify;
        self
    }

    /// Deadline duration, if configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }
}
