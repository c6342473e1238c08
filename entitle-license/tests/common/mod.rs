//! Shared test helpers for license tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use entitle_license::{FeatureOverride, LicenseSnapshot, PlanType};
use serde_json::json;

/// A fixed point in time so tests do not depend on the clock.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

/// A bare snapshot on the given plan.
pub fn snapshot(plan: PlanType) -> LicenseSnapshot {
    LicenseSnapshot::new("PRO-1", "a@b.com", plan, t0())
}

/// A snapshot with a single boolean custom feature.
pub fn with_custom(plan: PlanType, key: &str, enabled: bool) -> LicenseSnapshot {
    let mut s = snapshot(plan);
    s.custom_features = Some([(key.to_string(), json!(enabled))].into_iter().collect());
    s
}

/// A snapshot with a single user override.
pub fn with_override(plan: PlanType, key: &str, enabled: bool) -> LicenseSnapshot {
    let mut s = snapshot(plan);
    s.user_feature_overrides = Some(vec![FeatureOverride::new(key, enabled)]);
    s
}
