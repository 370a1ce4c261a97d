//! User-facing notifications.
//!
//! The orchestrator decides *whether* the user hears about a validation
//! problem; rendering is left to whoever implements [`Notifier`].

use std::fmt;
use tracing::{error, info};

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyLevel {
    Info,
    Error,
}

impl fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => f.write_str("info"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Fire-and-forget notification sink.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotifyLevel, message: &str);
}

impl<F> Notifier for F
where
    F: Fn(NotifyLevel, &str) + Send + Sync,
{
    fn notify(&self, level: NotifyLevel, message: &str) {
        self(level, message);
    }
}

/// Forwards notifications to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        match level {
            NotifyLevel::Info => info!(target: "vinsly_license::notify", "{message}"),
            NotifyLevel::Error => error!(target: "vinsly_license::notify", "{message}"),
        }
    }
}
