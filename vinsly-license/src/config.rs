//! Configuration for the license service client and validation thresholds.

use crate::error::{LicenseError, LicenseResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default license service URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.lemonsqueezy.com";

/// Retry schedule for a single license operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry (ms). Doubles on every retry.
    pub initial_backoff_ms: u64,
    /// Deadline for each individual attempt (ms).
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            attempt_timeout_ms: 15_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before retry number `retry` (1-based): 1s, 2s, 4s, ...
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }

    /// Per-attempt deadline.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

/// Time thresholds the orchestrator applies to failed validations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Connectivity failures this soon after a good validation are silent (seconds).
    pub soft_failure_window_secs: u64,
    /// Up to this age a connectivity failure only produces a notice (seconds).
    pub notice_window_secs: u64,
    /// Length of a newly started or extended grace period (seconds).
    pub grace_period_secs: u64,
    /// Retry schedule for remote calls.
    pub retry: RetryPolicy,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            soft_failure_window_secs: 3 * 60,
            notice_window_secs: 24 * 60 * 60,
            grace_period_secs: 7 * 24 * 60 * 60,
            retry: RetryPolicy::default(),
        }
    }
}

impl ValidationConfig {
    /// Checks that the windows are ordered and the grace period is non-empty.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.soft_failure_window_secs > self.notice_window_secs {
            return Err(LicenseError::Config(
                "soft failure window must not exceed the notice window".to_string(),
            ));
        }
        if self.notice_window_secs > MAX_WINDOW_SECS || self.grace_period_secs > MAX_WINDOW_SECS {
            return Err(LicenseError::Config(
                "windows must not exceed ten years".to_string(),
            ));
        }
        if self.grace_period_secs == 0 {
            return Err(LicenseError::Config(
                "grace period must be positive".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn soft_failure_window(&self) -> chrono::Duration {
        secs(self.soft_failure_window_secs)
    }

    #[must_use]
    pub fn notice_window(&self) -> chrono::Duration {
        secs(self.notice_window_secs)
    }

    #[must_use]
    pub fn grace_period(&self) -> chrono::Duration {
        secs(self.grace_period_secs)
    }
}

/// Upper bound for any configured window (ten years).
const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value.min(MAX_WINDOW_SECS) as i64)
}

/// HTTP settings for [`crate::HttpLicenseApi`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the license service, without a trailing slash.
    pub base_url: String,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            user_agent: concat!("vinsly-license/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}
