//! Remote license service access.
//!
//! [`LicenseApi`] is the seam between the retry logic and the wire. One call
//! is one attempt: no retries, no deadline. [`HttpLicenseApi`] talks to the
//! hosted license service over HTTPS.

use crate::config::ApiConfig;
use crate::error::{LicenseError, LicenseResult};
use crate::record::{LicenseStatus, RedactedKey};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// A named license operation with its parameters.
#[derive(Clone, PartialEq, Eq)]
pub enum Operation {
    Validate {
        license_key: String,
        instance_id: String,
    },
    Activate {
        license_key: String,
        instance_name: String,
    },
    Deactivate {
        license_key: String,
        instance_id: String,
    },
}

impl Operation {
    /// Operation name as used in the service's URL path.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validate { .. } => "validate",
            Self::Activate { .. } => "activate",
            Self::Deactivate { .. } => "deactivate",
        }
    }

    #[must_use]
    pub fn license_key(&self) -> &str {
        match self {
            Self::Validate { license_key, .. }
            | Self::Activate { license_key, .. }
            | Self::Deactivate { license_key, .. } => license_key,
        }
    }

    /// Form fields sent with the request.
    #[must_use]
    pub fn form(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Validate {
                license_key,
                instance_id,
            }
            | Self::Deactivate {
                license_key,
                instance_id,
            } => vec![
                ("license_key", license_key.as_str()),
                ("instance_id", instance_id.as_str()),
            ],
            Self::Activate {
                license_key,
                instance_name,
            } => vec![
                ("license_key", license_key.as_str()),
                ("instance_name", instance_name.as_str()),
            ],
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name())
            .field("license_key", &RedactedKey(self.license_key()))
            .finish()
    }
}

/// License details in a service response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseKeyInfo {
    #[serde(default)]
    pub status: LicenseStatus,
    #[serde(default)]
    pub activation_limit: Option<u32>,
    #[serde(default)]
    pub activation_usage: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<String>,
}

/// Activation slot details in a service response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Response body shared by all three operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseResponse {
    #[serde(default)]
    pub valid: Option<bool>,
    #[serde(default)]
    pub activated: Option<bool>,
    #[serde(default)]
    pub deactivated: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub license_key: Option<LicenseKeyInfo>,
    #[serde(default)]
    pub instance: Option<InstanceInfo>,
}

impl LicenseResponse {
    /// License status reported by the service, `Unknown` when absent.
    #[must_use]
    pub fn status(&self) -> LicenseStatus {
        self.license_key
            .as_ref()
            .map(|k| k.status)
            .unwrap_or_default()
    }

    /// Whether the service confirmed the operation it was asked to perform.
    ///
    /// Validation responses are always accepted here; their verdict is
    /// carried by [`Self::status`].
    #[must_use]
    pub fn confirms(&self, operation: &Operation) -> bool {
        match operation {
            Operation::Validate { .. } => true,
            Operation::Activate { .. } => self.activated == Some(true),
            Operation::Deactivate { .. } => self.deactivated == Some(true),
        }
    }
}

/// One attempt at a license operation.
#[async_trait]
pub trait LicenseApi: Send + Sync {
    /// Performs `operation` once.
    ///
    /// Implementations report transport failures as
    /// [`LicenseError::Network`] or [`LicenseError::Timeout`], non-2xx
    /// responses as [`LicenseError::RequestFailed`] and undecodable bodies
    /// as [`LicenseError::Serialization`].
    async fn call(&self, operation: &Operation) -> LicenseResult<LicenseResponse>;
}

/// HTTP implementation of [`LicenseApi`].
pub struct HttpLicenseApi {
    config: ApiConfig,
    client: Client,
}

impl HttpLicenseApi {
    /// Creates a client for the service at `config.base_url`.
    ///
    /// No overall request timeout is configured here; the retrying client
    /// bounds each attempt.
    pub fn new(config: ApiConfig) -> LicenseResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LicenseError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, operation: &Operation) -> String {
        format!(
            "{}/v1/licenses/{}",
            self.config.base_url.trim_end_matches('/'),
            operation.name()
        )
    }
}

#[async_trait]
impl LicenseApi for HttpLicenseApi {
    async fn call(&self, operation: &Operation) -> LicenseResult<LicenseResponse> {
        debug!(
            operation = operation.name(),
            key = %RedactedKey(operation.license_key()),
            "Sending license request"
        );

        let response = self
            .client
            .post(self.endpoint(operation))
            .header(ACCEPT, "application/json")
            .form(&operation.form())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            let reason = serde_json::from_str::<LicenseResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
            return Err(LicenseError::RequestFailed {
                status: status.as_u16(),
                reason,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

impl std::fmt::Debug for HttpLicenseApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpLicenseApi")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

fn transport_error(e: reqwest::Error) -> LicenseError {
    if e.is_timeout() {
        LicenseError::Timeout
    } else {
        LicenseError::Network(e.to_string())
    }
}
