//! The locally persisted belief about entitlement.
//!
//! A [`LicenseRecord`] is written when an activation succeeds and is
//! refreshed by every validation the orchestrator tolerates. It is the only
//! place the license key lives, so its `Debug` output and every log line
//! that mentions it go through [`RedactedKey`].

use crate::error::{LicenseError, LicenseResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// License status as reported by the license service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    /// The license is in good standing.
    Active,
    /// The license term ended.
    Expired,
    /// The vendor revoked the license.
    Revoked,
    /// The license was disabled (refund, chargeback, manual action).
    Disabled,
    /// Any status this client does not recognise.
    #[default]
    #[serde(other)]
    Unknown,
}

impl LicenseStatus {
    /// Returns true for the statuses that keep an installation licensed.
    #[must_use]
    pub fn is_good(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Disabled => "disabled",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Displays a license key with everything but the last four characters masked.
#[derive(Clone, Copy)]
pub struct RedactedKey<'a>(pub &'a str);

impl fmt::Display for RedactedKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 4 {
            return f.write_str("****");
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        write!(f, "****{tail}")
    }
}

impl fmt::Debug for RedactedKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// The persisted license record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRecord {
    /// Opaque license credential.
    #[serde(default)]
    pub license_key: String,
    /// Identifies this installation's activation slot.
    #[serde(default)]
    pub instance_id: String,
    /// Human-readable name the slot was activated under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    /// Last status reported by the service.
    #[serde(default)]
    pub status: LicenseStatus,
    /// Last time any validation attempt updated this record.
    pub last_checked: DateTime<Utc>,
    /// Last time a remote call succeeded with a good status.
    #[serde(default)]
    pub last_validated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub activation_limit: Option<u32>,
    #[serde(default)]
    pub activation_usage: Option<u32>,
    /// License term end as reported by the service, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl LicenseRecord {
    /// Creates a record for a freshly activated instance.
    pub fn new(
        license_key: impl Into<String>,
        instance_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            license_key: license_key.into(),
            instance_id: instance_id.into(),
            instance_name: None,
            status: LicenseStatus::Active,
            last_checked: now,
            last_validated: Some(now),
            activation_limit: None,
            activation_usage: None,
            expires_at: None,
        }
    }

    /// Parses a stored record, rejecting anything that fails shape validation.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::MalformedRecord`] if the JSON does not decode
    /// or a required field is missing.
    pub fn from_json(raw: &str) -> LicenseResult<Self> {
        let record: Self = serde_json::from_str(raw)
            .map_err(|e| LicenseError::MalformedRecord(format!("undecodable record: {e}")))?;
        record.validate()?;
        Ok(record)
    }

    /// Checks the fields every validation call depends on.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.license_key.trim().is_empty() {
            return Err(LicenseError::MalformedRecord(
                "missing license key".to_string(),
            ));
        }
        if self.instance_id.trim().is_empty() {
            return Err(LicenseError::MalformedRecord(
                "missing instance id".to_string(),
            ));
        }
        if let Some(validated) = self.last_validated
            && validated > self.last_checked
        {
            return Err(LicenseError::MalformedRecord(
                "last_validated is later than last_checked".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the key in its log-safe form.
    #[must_use]
    pub fn redacted_key(&self) -> RedactedKey<'_> {
        RedactedKey(&self.license_key)
    }

    /// Records a validation attempt that did not change entitlement.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_checked = self.last_checked.max(now);
    }

    /// Records a successful validation with a good status.
    pub fn mark_validated(&mut self, now: DateTime<Utc>) {
        self.touch(now);
        self.last_validated = Some(self.last_checked);
    }
}

impl fmt::Debug for LicenseRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseRecord")
            .field("license_key", &self.redacted_key())
            .field("instance_id", &self.instance_id)
            .field("instance_name", &self.instance_name)
            .field("status", &self.status)
            .field("last_checked", &self.last_checked)
            .field("last_validated", &self.last_validated)
            .field("activation_limit", &self.activation_limit)
            .field("activation_usage", &self.activation_usage)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
