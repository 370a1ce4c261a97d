//! Shared test helpers for license tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use vinsly_license::{
    InstanceInfo, LicenseApi, LicenseError, LicenseKeyInfo, LicenseOrchestrator, LicenseRecord,
    LicenseResponse, LicenseResult, LicenseStatus, ManualClock, MemoryStore, Notifier,
    NotifyLevel, Operation, PersistedState, RetryPolicy, ValidationConfig,
};

pub const TEST_KEY: &str = "38b1460a-5104-4067-a91d-77b872934d51";
pub const TEST_INSTANCE: &str = "f90ec370-fd83-46a5-8bbd-44a241e78665";

/// Fixed "now" for threshold tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// One scripted reply from the fake license service.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(LicenseResponse),
    Network,
    Timeout,
    Status(u16, &'static str),
    Garbage,
    /// Never answers.
    Hang,
}

impl Reply {
    fn into_result(self) -> LicenseResult<LicenseResponse> {
        match self {
            Self::Ok(response) => Ok(response),
            Self::Network => Err(LicenseError::Network("connection refused".into())),
            Self::Timeout => Err(LicenseError::Timeout),
            Self::Status(status, reason) => Err(LicenseError::RequestFailed {
                status,
                reason: reason.to_string(),
            }),
            Self::Garbage => Err(serde_json::from_str::<LicenseResponse>("<html>")
                .unwrap_err()
                .into()),
            Self::Hang => unreachable!("hang is handled before conversion"),
        }
    }
}

/// Fake [`LicenseApi`] that replays a script and records every call.
///
/// Once the script is exhausted the last reply repeats.
pub struct ScriptedApi {
    script: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Reply>>,
    calls: Mutex<Vec<Operation>>,
}

impl ScriptedApi {
    pub fn sequence(replies: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: Reply) -> Self {
        Self::sequence(vec![reply])
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_reply(&self) -> Reply {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = script.pop_front() {
            *last = Some(reply.clone());
            return reply;
        }
        last.clone().expect("scripted api called with an empty script")
    }
}

#[async_trait]
impl LicenseApi for ScriptedApi {
    async fn call(&self, operation: &Operation) -> LicenseResult<LicenseResponse> {
        self.calls.lock().unwrap().push(operation.clone());
        match self.next_reply() {
            Reply::Hang => std::future::pending().await,
            reply => reply.into_result(),
        }
    }
}

/// Notifier that keeps everything it is told.
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<(NotifyLevel, String)>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<(NotifyLevel, String)> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn levels(&self) -> Vec<NotifyLevel> {
        self.all().into_iter().map(|(level, _)| level).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        self.seen.lock().unwrap().push((level, message.to_string()));
    }
}

// ── Responses ────────────────────────────────────────────────────

pub fn status_response(status: LicenseStatus) -> LicenseResponse {
    LicenseResponse {
        valid: Some(status == LicenseStatus::Active),
        license_key: Some(LicenseKeyInfo {
            status,
            activation_limit: Some(3),
            activation_usage: Some(1),
            expires_at: None,
        }),
        instance: Some(InstanceInfo {
            id: TEST_INSTANCE.to_string(),
            name: "studio-mac".to_string(),
        }),
        ..Default::default()
    }
}

pub fn active_response() -> LicenseResponse {
    status_response(LicenseStatus::Active)
}

pub fn activated_response() -> LicenseResponse {
    LicenseResponse {
        activated: Some(true),
        valid: None,
        ..active_response()
    }
}

pub fn deactivated_response() -> LicenseResponse {
    LicenseResponse {
        deactivated: Some(true),
        ..Default::default()
    }
}

// ── Records ──────────────────────────────────────────────────────

/// A record last checked at `checked` and last validated at `validated`.
pub fn stored_record(checked: DateTime<Utc>, validated: Option<DateTime<Utc>>) -> LicenseRecord {
    LicenseRecord {
        last_validated: validated,
        ..LicenseRecord::new(TEST_KEY, TEST_INSTANCE, checked)
    }
}

pub fn fast_config() -> ValidationConfig {
    ValidationConfig {
        retry: RetryPolicy::no_retries(),
        ..Default::default()
    }
}

// ── Harness ──────────────────────────────────────────────────────

pub struct Harness {
    pub api: Arc<ScriptedApi>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub persisted: PersistedState,
    pub orchestrator: LicenseOrchestrator,
}

impl Harness {
    pub fn new(api: ScriptedApi) -> Self {
        Self::on_store(api, Arc::new(MemoryStore::new()))
    }

    /// Builds a harness over an existing store, e.g. to simulate a restart.
    pub fn on_store(api: ScriptedApi, store: Arc<MemoryStore>) -> Self {
        let api = Arc::new(api);
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let orchestrator = LicenseOrchestrator::new(
            api.clone(),
            store.clone(),
            notifier.clone(),
            fast_config(),
        )
        .unwrap()
        .with_clock(clock.clone());

        Self {
            api,
            persisted: PersistedState::new(store.clone()),
            store,
            notifier,
            clock,
            orchestrator,
        }
    }

    /// Stores a record validated `ago` before [`t0`], with a matching marker.
    pub async fn seed_validated(&self, ago: Duration) {
        let at = t0() - ago;
        self.persisted
            .save_record(&stored_record(at, Some(at)))
            .await
            .unwrap();
        self.persisted.set_last_validated(at).await.unwrap();
    }

    /// Stores a record that was never successfully validated.
    pub async fn seed_unvalidated(&self) {
        self.persisted
            .save_record(&stored_record(t0() - Duration::days(2), None))
            .await
            .unwrap();
    }

    pub async fn seed_grace(&self, expires_at: DateTime<Utc>) {
        self.persisted.push_grace_expiry(expires_at).await.unwrap();
    }
}
