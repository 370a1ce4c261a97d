//! License lifecycle orchestration.
//!
//! [`LicenseOrchestrator`] owns the answer to "is this installation
//! licensed?". At startup [`LicenseOrchestrator::bootstrap`] hydrates the
//! stored record, re-validates it remotely and applies the threshold rules:
//!
//! | failure | last good validation | result |
//! |---|---|---|
//! | network / timeout | < 3 min ago | `Active`, silent |
//! | network / timeout | < 24 h ago | `Active`, one info notice |
//! | network / timeout | older or never | grace period logic |
//! | anything else | n/a | grace period logic |
//!
//! A grace period that lapses is extended when the triggering failure was a
//! connectivity problem and ends the license otherwise.

use crate::api::{LicenseApi, LicenseResponse, Operation};
use crate::client::{Outcome, ResilientClient, TransientKind};
use crate::clock::{Clock, SystemClock};
use crate::config::ValidationConfig;
use crate::error::{LicenseError, LicenseResult};
use crate::notify::{NotifyLevel, Notifier};
use crate::record::{LicenseRecord, LicenseStatus, RedactedKey};
use crate::store::{KeyValueStore, PersistedState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1_000;

/// Where the installation stands with respect to its license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    /// No usable license is stored. Onboarding has not completed.
    Unknown,
    /// The startup validation is running.
    Bootstrapping,
    /// The license is considered valid.
    Active,
    /// Validation failed; the app keeps running until `expires_at`.
    InGrace { expires_at: DateTime<Utc> },
    /// The license could not be confirmed and the grace period ended.
    Expired,
}

impl ValidationState {
    /// Returns true if the app should run with licensed functionality.
    #[must_use]
    pub fn is_licensed(&self) -> bool {
        matches!(self, Self::Active | Self::InGrace { .. })
    }
}

/// Why a validation did not confirm the license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureCause {
    /// No answer from the service (network, timeout).
    Connectivity(TransientKind),
    /// The service answered, and the answer was not a good license.
    Confirmed,
}

impl FailureCause {
    fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

type ResetHook = Box<dyn Fn() + Send + Sync>;

/// Drives startup validation and the explicit license operations.
pub struct LicenseOrchestrator {
    client: ResilientClient,
    persisted: PersistedState,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: ValidationConfig,
    state: watch::Sender<ValidationState>,
    ready: watch::Sender<bool>,
    started: AtomicBool,
    on_reset: Option<ResetHook>,
}

impl LicenseOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Config`] if `config` is inconsistent.
    pub fn new(
        api: Arc<dyn LicenseApi>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
        config: ValidationConfig,
    ) -> LicenseResult<Self> {
        config.validate()?;

        Ok(Self {
            client: ResilientClient::new(api, config.retry),
            persisted: PersistedState::new(store),
            notifier,
            clock: Arc::new(SystemClock),
            config,
            state: watch::Sender::new(ValidationState::Unknown),
            ready: watch::Sender::new(false),
            started: AtomicBool::new(false),
            on_reset: None,
        })
    }

    /// Replaces the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers a callback run after every [`Self::reset_license`].
    #[must_use]
    pub fn with_reset_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reset = Some(Box::new(hook));
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ValidationState {
        *self.state.borrow()
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ValidationState> {
        self.state.subscribe()
    }

    /// Returns true once bootstrap has finished, whatever its result.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Waits until bootstrap has finished.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Thresholds in use.
    #[must_use]
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Typed view of the persisted license entries.
    #[must_use]
    pub fn persisted(&self) -> &PersistedState {
        &self.persisted
    }

    // ── Bootstrap ────────────────────────────────────────────────

    /// Hydrates the stored license and validates it against the service.
    ///
    /// Runs at most once per orchestrator. Whatever happens, the
    /// orchestrator is marked ready afterwards so callers never block on it.
    /// On error the state published before the call is restored.
    ///
    /// # Errors
    ///
    /// [`LicenseError::AlreadyBootstrapped`] on a second call,
    /// [`LicenseError::Cancelled`] if `cancel` fired, and store errors.
    pub async fn bootstrap(&self, cancel: &CancellationToken) -> LicenseResult<ValidationState> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LicenseError::AlreadyBootstrapped);
        }

        let previous = self.state();
        self.transition(ValidationState::Bootstrapping);
        let result = self.run_bootstrap(cancel).await;

        match &result {
            Ok(state) => debug!("License bootstrap finished in {state:?}"),
            Err(e) => {
                if matches!(e, LicenseError::Cancelled) {
                    debug!("License bootstrap cancelled");
                } else {
                    warn!("License bootstrap failed: {e}");
                }
                // Never publish ready while still Bootstrapping.
                if self.state() == ValidationState::Bootstrapping {
                    self.transition(previous);
                }
            }
        }

        self.ready.send_replace(true);
        result
    }

    /// Starts [`Self::bootstrap`] on the current tokio runtime.
    pub fn spawn_bootstrap(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> JoinHandle<LicenseResult<ValidationState>> {
        tokio::spawn(async move { self.bootstrap(&cancel).await })
    }

    async fn run_bootstrap(&self, cancel: &CancellationToken) -> LicenseResult<ValidationState> {
        let loaded = self.persisted.load_record().await;
        live(cancel)?;

        let record = match loaded {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!("No stored license");
                self.persisted.purge().await?;
                return self.settle(cancel, ValidationState::Unknown);
            }
            Err(LicenseError::MalformedRecord(reason)) => {
                warn!("Discarding stored license: {reason}");
                self.persisted.purge().await?;
                return self.settle(cancel, ValidationState::Unknown);
            }
            Err(e) => return Err(e),
        };

        info!(key = %record.redacted_key(), "Validating stored license");
        let operation = Operation::Validate {
            license_key: record.license_key.clone(),
            instance_id: record.instance_id.clone(),
        };
        let outcome = self.client.execute(&operation, cancel).await;
        live(cancel)?;

        match outcome {
            Outcome::Success(response) if is_good(&response) => {
                self.on_validated(record, &response, cancel).await
            }
            Outcome::Success(response) => {
                let mut record = record;
                record.status = response.status();
                warn!(status = %record.status, "License service reported a non-active license");
                self.enter_grace(record, FailureCause::Confirmed, cancel)
                    .await
            }
            Outcome::Rejected { status, reason } => {
                warn!(status, "License validation rejected: {reason}");
                self.enter_grace(record, FailureCause::Confirmed, cancel)
                    .await
            }
            Outcome::Transient(kind) if kind.is_connectivity() => {
                self.on_connectivity_failure(record, kind, cancel).await
            }
            Outcome::Transient(kind) => {
                warn!("License validation failed: {kind}");
                self.enter_grace(record, FailureCause::Confirmed, cancel)
                    .await
            }
            Outcome::Cancelled => Err(LicenseError::Cancelled),
        }
    }

    async fn on_validated(
        &self,
        mut record: LicenseRecord,
        response: &LicenseResponse,
        cancel: &CancellationToken,
    ) -> LicenseResult<ValidationState> {
        let now = self.clock.now();
        refresh_from_response(&mut record, response);
        record.mark_validated(now);

        self.persisted.clear_grace().await?;
        self.persisted.set_last_validated(record.last_checked).await?;
        self.persisted.save_record(&record).await?;

        info!(key = %record.redacted_key(), "License validated");
        self.settle(cancel, ValidationState::Active)
    }

    async fn on_connectivity_failure(
        &self,
        mut record: LicenseRecord,
        kind: TransientKind,
        cancel: &CancellationToken,
    ) -> LicenseResult<ValidationState> {
        let now = self.clock.now();
        let last_validated = self.persisted.last_validated().await?;
        live(cancel)?;

        if let Some(at) = last_validated {
            let elapsed = now - at;

            if elapsed < self.config.soft_failure_window() {
                debug!("License check failed ({kind}) shortly after a good validation, ignoring");
                record.touch(now);
                self.persisted.save_record(&record).await?;
                return self.settle(cancel, ValidationState::Active);
            }

            if elapsed < self.config.notice_window() {
                info!("License check failed ({kind}), last good validation {elapsed}");
                record.touch(now);
                self.persisted.save_record(&record).await?;
                live(cancel)?;
                self.notifier.notify(
                    NotifyLevel::Info,
                    "Unable to verify your license right now. We'll try again later.",
                );
                return self.settle(cancel, ValidationState::Active);
            }
        }

        self.enter_grace(record, FailureCause::Connectivity(kind), cancel)
            .await
    }

    async fn enter_grace(
        &self,
        mut record: LicenseRecord,
        cause: FailureCause,
        cancel: &CancellationToken,
    ) -> LicenseResult<ValidationState> {
        let now = self.clock.now();
        let current = match self.persisted.grace_expiry().await {
            Ok(current) => current,
            Err(LicenseError::MalformedRecord(reason)) => {
                warn!("Discarding grace period entry: {reason}");
                None
            }
            Err(e) => return Err(e),
        };
        live(cancel)?;

        let grace_days = self.config.grace_period().num_days().max(1);

        match current {
            None => {
                let expires_at = self
                    .persisted
                    .push_grace_expiry(now + self.config.grace_period())
                    .await?;
                record.touch(now);
                self.persisted.save_record(&record).await?;
                live(cancel)?;

                info!(?cause, %expires_at, "License grace period started");
                self.notifier.notify(
                    NotifyLevel::Info,
                    &format!(
                        "We couldn't verify your license. A {grace_days}-day grace period has started."
                    ),
                );
                self.settle(cancel, ValidationState::InGrace { expires_at })
            }
            Some(expires_at) if now < expires_at => {
                record.touch(now);
                self.persisted.save_record(&record).await?;
                live(cancel)?;

                let days = whole_days_until(now, expires_at);
                info!(?cause, %expires_at, "License still in grace period");
                self.notifier.notify(
                    NotifyLevel::Info,
                    &format!(
                        "We couldn't verify your license. {days} day{} left in the grace period.",
                        if days == 1 { "" } else { "s" }
                    ),
                );
                self.settle(cancel, ValidationState::InGrace { expires_at })
            }
            Some(lapsed) if cause.is_connectivity() => {
                let expires_at = self
                    .persisted
                    .push_grace_expiry(now + self.config.grace_period())
                    .await?;
                record.touch(now);
                self.persisted.save_record(&record).await?;
                live(cancel)?;

                warn!(%lapsed, %expires_at, "License service unreachable, extending grace period");
                self.notifier.notify(
                    NotifyLevel::Info,
                    &format!(
                        "We still can't reach the license server. Your grace period was extended by {grace_days} days."
                    ),
                );
                self.settle(cancel, ValidationState::InGrace { expires_at })
            }
            Some(lapsed) => {
                self.persisted.purge().await?;
                live(cancel)?;

                warn!(key = %record.redacted_key(), %lapsed, "License grace period ended, license expired");
                self.notifier.notify(
                    NotifyLevel::Error,
                    "Your license could not be verified and the grace period has ended. Please re-activate Vinsly.",
                );
                self.settle(cancel, ValidationState::Expired)
            }
        }
    }

    // ── Explicit operations ──────────────────────────────────────

    /// Stores a freshly activated license and marks the installation active.
    ///
    /// # Errors
    ///
    /// [`LicenseError::MalformedRecord`] if the record lacks a key or
    /// instance id, and store errors.
    pub async fn set_license(&self, record: LicenseRecord) -> LicenseResult<()> {
        record.validate()?;

        self.persisted.save_record(&record).await?;
        self.persisted.clear_grace().await?;
        match record.last_validated {
            Some(at) => self.persisted.set_last_validated(at).await?,
            None => self.persisted.clear_last_validated().await?,
        }

        info!(key = %record.redacted_key(), "License stored");
        self.transition(ValidationState::Active);
        Ok(())
    }

    /// Forgets the license entirely and runs the reset hook.
    pub async fn reset_license(&self) -> LicenseResult<()> {
        self.persisted.purge().await?;
        info!("License reset");
        self.transition(ValidationState::Unknown);

        if let Some(hook) = &self.on_reset {
            hook();
        }
        Ok(())
    }

    /// Activates `license_key` for this installation and stores the result.
    ///
    /// # Errors
    ///
    /// [`LicenseError::ActivationFailed`] when the service refuses the
    /// activation; transport errors when it could not be reached.
    pub async fn activate(
        &self,
        license_key: &str,
        instance_name: &str,
        cancel: &CancellationToken,
    ) -> LicenseResult<LicenseRecord> {
        let license_key = license_key.trim();
        if license_key.is_empty() {
            return Err(LicenseError::ActivationFailed(
                "license key is empty".to_string(),
            ));
        }

        info!(key = %RedactedKey(license_key), instance_name, "Activating license");
        let operation = Operation::Activate {
            license_key: license_key.to_string(),
            instance_name: instance_name.to_string(),
        };
        let response = self
            .client
            .execute(&operation, cancel)
            .await
            .into_result()
            .map_err(|e| match e {
                LicenseError::Rejected(reason) => LicenseError::ActivationFailed(reason),
                LicenseError::RequestFailed { status, reason } if status < 500 => {
                    LicenseError::ActivationFailed(reason)
                }
                other => other,
            })?;

        let instance = response.instance.clone().ok_or_else(|| {
            LicenseError::ActivationFailed("response did not include an instance".to_string())
        })?;

        let mut record = LicenseRecord::new(license_key, instance.id, self.clock.now());
        record.instance_name = Some(if instance.name.is_empty() {
            instance_name.to_string()
        } else {
            instance.name
        });
        refresh_from_response(&mut record, &response);
        if record.status == LicenseStatus::Unknown {
            record.status = LicenseStatus::Active;
        }

        live(cancel)?;
        self.set_license(record.clone()).await?;
        Ok(record)
    }

    /// Releases this installation's activation slot and resets local state.
    ///
    /// # Errors
    ///
    /// [`LicenseError::NotActivated`] if no license is stored; the service's
    /// error if the deactivation did not go through. Local state is only
    /// cleared after the service confirms.
    pub async fn deactivate(&self, cancel: &CancellationToken) -> LicenseResult<()> {
        let record = self
            .persisted
            .load_record()
            .await?
            .ok_or(LicenseError::NotActivated)?;

        info!(key = %record.redacted_key(), "Deactivating license");
        let operation = Operation::Deactivate {
            license_key: record.license_key.clone(),
            instance_id: record.instance_id.clone(),
        };
        self.client.execute(&operation, cancel).await.into_result()?;

        live(cancel)?;
        self.reset_license().await
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn settle(
        &self,
        cancel: &CancellationToken,
        next: ValidationState,
    ) -> LicenseResult<ValidationState> {
        live(cancel)?;
        self.transition(next);
        Ok(next)
    }

    fn transition(&self, next: ValidationState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("License state {previous:?} -> {next:?}");
        }
    }
}

impl std::fmt::Debug for LicenseOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseOrchestrator")
            .field("state", &self.state())
            .field("ready", &self.is_ready())
            .field("config", &self.config)
            .finish()
    }
}

fn live(cancel: &CancellationToken) -> LicenseResult<()> {
    if cancel.is_cancelled() {
        Err(LicenseError::Cancelled)
    } else {
        Ok(())
    }
}

fn is_good(response: &LicenseResponse) -> bool {
    response.status().is_good() && response.valid != Some(false)
}

fn refresh_from_response(record: &mut LicenseRecord, response: &LicenseResponse) {
    if let Some(info) = &response.license_key {
        record.status = info.status;
        record.activation_limit = info.activation_limit;
        record.activation_usage = info.activation_usage;
        if info.expires_at.is_some() {
            record.expires_at.clone_from(&info.expires_at);
        }
    }
    if let Some(instance) = &response.instance
        && !instance.name.is_empty()
    {
        record.instance_name = Some(instance.name.clone());
    }
}

/// Whole days from `now` until `until`, rounded up.
fn whole_days_until(now: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    let millis = (until - now).num_milliseconds().max(0);
    (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
}
