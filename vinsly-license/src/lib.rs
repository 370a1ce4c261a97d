//! License validation for Vinsly.
//!
//! This crate decides whether a Vinsly installation keeps running as
//! licensed. It handles:
//! - Re-validating a stored license against the license service at startup
//! - Retrying slow or failing requests with exponential backoff
//! - Tolerating short outages silently and longer ones with a grace period
//! - Activation and deactivation of an installation's license slot
//!
//! # Design Principles
//!
//! - **Never block the app**: bootstrap always completes, whatever the network does
//! - **Outages are not revocations**: connectivity failures only ever extend a grace period
//! - **Answers are not ignored**: a rejection from the service always surfaces to the user
//! - **Keys stay secret**: license keys are only logged in redacted form
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use vinsly_license::{
//!     ApiConfig, HttpLicenseApi, LicenseOrchestrator, LogNotifier, MemoryStore, ValidationConfig,
//! };
//!
//! # async fn run() -> vinsly_license::LicenseResult<()> {
//! let api = Arc::new(HttpLicenseApi::new(ApiConfig::default())?);
//! let orchestrator = LicenseOrchestrator::new(
//!     api,
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(LogNotifier),
//!     ValidationConfig::default(),
//! )?;
//!
//! let state = orchestrator.bootstrap(&CancellationToken::new()).await?;
//! println!("licensed: {}", state.is_licensed());
//! # Ok(())
//! # }
//! ```

mod api;
mod client;
mod clock;
mod config;
mod error;
mod notify;
mod orchestrator;
mod record;
pub mod store;

pub use api::{HttpLicenseApi, InstanceInfo, LicenseApi, LicenseKeyInfo, LicenseResponse, Operation};
pub use client::{Outcome, ResilientClient, TransientKind};
pub use clock::{Clock, SystemClock};
#[cfg(feature = "test-util")]
pub use clock::ManualClock;
pub use config::{ApiConfig, RetryPolicy, ValidationConfig, DEFAULT_API_BASE_URL};
pub use error::{LicenseError, LicenseResult};
pub use notify::{LogNotifier, Notifier, NotifyLevel};
pub use orchestrator::{LicenseOrchestrator, ValidationState};
pub use record::{LicenseRecord, LicenseStatus, RedactedKey};
pub use store::{FileStore, KeyValueStore, MemoryStore, PersistedState};
