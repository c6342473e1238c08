//! Cache envelope bounding how long a snapshot may be trusted.

use crate::error::LicenseError;
use crate::snapshot::LicenseSnapshot;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Days a validated snapshot stays usable without reaching the authority.
pub const OFFLINE_VALIDITY_DAYS: i64 = 30;

/// Seconds after a validation during which a new network check is skipped.
pub const CHECK_THROTTLE_SECS: i64 = 2 * 60;

/// Offline validity window.
#[must_use]
pub fn offline_validity() -> Duration {
    Duration::days(OFFLINE_VALIDITY_DAYS)
}

/// Check throttle window.
#[must_use]
pub fn check_throttle() -> Duration {
    Duration::seconds(CHECK_THROTTLE_SECS)
}

/// A snapshot plus the timestamps that bound its trust.
///
/// `expires_at` is always after `last_validated`; envelopes that violate this
/// fail to deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawEnvelope")]
pub struct CacheEnvelope {
    data: LicenseSnapshot,
    last_validated: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    data: LicenseSnapshot,
    last_validated: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<RawEnvelope> for CacheEnvelope {
    type Error = LicenseError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        if raw.expires_at <= raw.last_validated {
            return Err(LicenseError::InconsistentEnvelope {
                last_validated: raw.last_validated.to_rfc3339(),
                expires_at: raw.expires_at.to_rfc3339(),
            });
        }
        Ok(Self {
            data: raw.data,
            last_validated: raw.last_validated,
            expires_at: raw.expires_at,
        })
    }
}

impl CacheEnvelope {
    /// Wraps a snapshot validated at `now`.
    #[must_use]
    pub fn wrap(snapshot: LicenseSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            data: snapshot,
            last_validated: now,
            expires_at: now + offline_validity(),
        }
    }

    /// True while `now` is before the expiry.
    #[must_use]
    pub fn is_usable_offline(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// True if less than the throttle window has elapsed since validation.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.last_validated < check_throttle()
    }

    /// The wrapped snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &LicenseSnapshot {
        &self.data
    }

    /// Consumes the envelope and returns the snapshot.
    #[must_use]
    pub fn into_snapshot(self) -> LicenseSnapshot {
        self.data
    }

    #[must_use]
    pub fn last_validated(&self) -> DateTime<Utc> {
        self.last_validated
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}
