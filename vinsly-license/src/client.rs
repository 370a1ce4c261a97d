//! Retrying license request client.
//!
//! [`ResilientClient::execute`] turns one [`Operation`] into an [`Outcome`]:
//!
//! 1. Each attempt races a per-attempt deadline and the caller's
//!    cancellation token. Losing either race drops the in-flight request.
//! 2. Transient failures (network, timeout, 5xx, undecodable body) are
//!    retried with exponential backoff (1s, 2s, 4s by default).
//! 3. Any 4xx, or a response that refuses the operation, is returned as
//!    [`Outcome::Rejected`] immediately.
//!
//! Exhausting the retries yields the last transient classification.

use crate::api::{LicenseApi, LicenseResponse, Operation};
use crate::config::RetryPolicy;
use crate::error::LicenseError;
use crate::record::RedactedKey;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Failure classes that are worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientKind {
    /// The request never produced a response.
    Network,
    /// The attempt exceeded its deadline.
    Timeout,
    /// The service answered 5xx.
    Server(u16),
    /// The service answered 2xx with a body that did not decode.
    InvalidResponse,
}

impl TransientKind {
    /// Connectivity-shaped failures say nothing about the license itself.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => f.write_str("network"),
            Self::Timeout => f.write_str("timeout"),
            Self::Server(status) => write!(f, "server error {status}"),
            Self::InvalidResponse => f.write_str("invalid response"),
        }
    }
}

/// Classified result of a license operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The service performed the operation.
    Success(LicenseResponse),
    /// The service refused the request. Never retried.
    Rejected { status: u16, reason: String },
    /// The last attempt failed in a way that looked recoverable.
    Transient(TransientKind),
    /// The caller cancelled before an answer arrived.
    Cancelled,
}

impl Outcome {
    /// Classifies the result of a single attempt.
    #[must_use]
    pub fn classify(
        operation: &Operation,
        result: Result<LicenseResponse, LicenseError>,
    ) -> Self {
        match result {
            Ok(response) if response.confirms(operation) => Self::Success(response),
            Ok(response) => Self::Rejected {
                status: 200,
                reason: response
                    .error
                    .unwrap_or_else(|| format!("{} not confirmed", operation.name())),
            },
            Err(LicenseError::Timeout) => Self::Transient(TransientKind::Timeout),
            Err(LicenseError::Network(_)) => Self::Transient(TransientKind::Network),
            Err(LicenseError::Serialization(_)) => {
                Self::Transient(TransientKind::InvalidResponse)
            }
            Err(LicenseError::RequestFailed { status, .. }) if status >= 500 => {
                Self::Transient(TransientKind::Server(status))
            }
            Err(LicenseError::RequestFailed { status, reason }) => {
                Self::Rejected { status, reason }
            }
            Err(LicenseError::Rejected(reason)) => Self::Rejected { status: 0, reason },
            Err(LicenseError::Cancelled) => Self::Cancelled,
            Err(other) => Self::Rejected {
                status: 0,
                reason: other.to_string(),
            },
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Converts a non-success outcome into the matching error.
    #[must_use]
    pub fn into_result(self) -> Result<LicenseResponse, LicenseError> {
        match self {
            Self::Success(response) => Ok(response),
            Self::Rejected { status: 0, reason } => Err(LicenseError::Rejected(reason)),
            Self::Rejected { status, reason } if status >= 400 => {
                Err(LicenseError::RequestFailed { status, reason })
            }
            Self::Rejected { reason, .. } => Err(LicenseError::Rejected(reason)),
            Self::Transient(TransientKind::Timeout) => Err(LicenseError::Timeout),
            Self::Transient(TransientKind::Server(status)) => Err(LicenseError::RequestFailed {
                status,
                reason: "server error".to_string(),
            }),
            Self::Transient(kind) => Err(LicenseError::Network(kind.to_string())),
            Self::Cancelled => Err(LicenseError::Cancelled),
        }
    }
}

/// Runs license operations with per-attempt deadlines and bounded retries.
pub struct ResilientClient {
    api: Arc<dyn LicenseApi>,
    policy: RetryPolicy,
}

impl ResilientClient {
    pub fn new(api: Arc<dyn LicenseApi>, policy: RetryPolicy) -> Self {
        Self { api, policy }
    }

    /// The retry schedule in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes `operation`, retrying transient failures.
    pub async fn execute(&self, operation: &Operation, cancel: &CancellationToken) -> Outcome {
        let key = RedactedKey(operation.license_key());
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(operation = operation.name(), %key, attempt, "License attempt");

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Outcome::Cancelled,
                result = tokio::time::timeout(
                    self.policy.attempt_timeout(),
                    self.api.call(operation),
                ) => result.unwrap_or(Err(LicenseError::Timeout)),
            };

            let kind = match Outcome::classify(operation, result) {
                Outcome::Transient(kind) => kind,
                outcome => {
                    if let Outcome::Rejected { status, reason } = &outcome {
                        warn!(
                            operation = operation.name(),
                            %key,
                            status,
                            "License request rejected: {reason}"
                        );
                    }
                    return outcome;
                }
            };

            if attempt > self.policy.max_retries {
                warn!(
                    operation = operation.name(),
                    %key,
                    attempts = attempt,
                    "License request failed ({kind}), giving up"
                );
                return Outcome::Transient(kind);
            }

            let delay = self.policy.backoff_for(attempt);
            warn!(
                operation = operation.name(),
                %key,
                attempt,
                "License request failed ({kind}), retrying in {delay:?}"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Outcome::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

impl fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientClient")
            .field("policy", &self.policy)
            .finish()
    }
}
