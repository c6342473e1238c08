//! Feature and limit resolution.
//!
//! Precedence, first match wins:
//! 1. a per-user override for the key
//! 2. a boolean company custom feature for the key
//! 3. the static feature table of the snapshot's plan
//!
//! Everything here is pure; no network state is consulted.

use crate::snapshot::LicenseSnapshot;

/// Where a feature decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSource {
    /// Per-user override.
    UserOverride,
    /// Company custom feature.
    CustomFeature,
    /// Plan default table.
    PlanDefault,
}

/// A resolved feature decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureDecision {
    /// Whether the feature is enabled.
    pub enabled: bool,
    /// Which tier decided it.
    pub source: FeatureSource,
}

/// Resolves `feature_key` and reports which tier decided it.
#[must_use]
pub fn resolve_feature(snapshot: &LicenseSnapshot, feature_key: &str) -> FeatureDecision {
    if let Some(enabled) = user_override(snapshot, feature_key) {
        return FeatureDecision {
            enabled,
            source: FeatureSource::UserOverride,
        };
    }

    if let Some(enabled) = custom_feature(snapshot, feature_key) {
        return FeatureDecision {
            enabled,
            source: FeatureSource::CustomFeature,
        };
    }

    FeatureDecision {
        enabled: snapshot.plan_type.includes(feature_key),
        source: FeatureSource::PlanDefault,
    }
}

/// Returns whether `feature_key` is enabled for the snapshot.
#[must_use]
pub fn has_feature(snapshot: &LicenseSnapshot, feature_key: &str) -> bool {
    resolve_feature(snapshot, feature_key).enabled
}

/// Returns the limit override for `limit_name`, if any.
///
/// An integer or `null` in the custom features wins, then the limits map.
/// A `null` limit (unlimited) and an absent one both yield `None`. Plans
/// carry no limit defaults.
#[must_use]
pub fn get_limit_value(snapshot: &LicenseSnapshot, limit_name: &str) -> Option<i64> {
    let custom = snapshot
        .custom_features
        .as_ref()
        .and_then(|features| features.get(limit_name));

    match custom {
        Some(serde_json::Value::Null) => None,
        Some(value) if value.is_i64() => value.as_i64(),
        _ => snapshot.limits.get(limit_name).copied().flatten(),
    }
}

fn user_override(snapshot: &LicenseSnapshot, feature_key: &str) -> Option<bool> {
    snapshot
        .user_feature_overrides
        .as_ref()?
        .iter()
        .find(|o| o.feature_key == feature_key)
        .map(|o| o.enabled)
}

fn custom_feature(snapshot: &LicenseSnapshot, feature_key: &str) -> Option<bool> {
    snapshot
        .custom_features
        .as_ref()?
        .get(feature_key)?
        .as_bool()
}
