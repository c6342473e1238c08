//! The locally held license snapshot and partial updates to it.
//!
//! A snapshot is keyed by its `(code, email)` pair. Both are normalized on
//! construction and on deserialization, so two spellings of the same
//! identity always compare equal.

use crate::error::{LicenseError, LicenseResult};
use crate::plan::PlanType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Company-level overrides. Boolean values toggle features, integer or
/// `null` values override limits.
pub type CustomFeatures = BTreeMap<String, serde_json::Value>;

/// Named limits. `None` means unlimited.
pub type Limits = BTreeMap<String, Option<i64>>;

/// Normalizes a license code: trimmed, uppercase.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Normalizes an email: trimmed, lowercase.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn de_code<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    String::deserialize(d).map(|s| normalize_code(&s))
}

fn de_email<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    String::deserialize(d).map(|s| normalize_email(&s))
}

fn default_true() -> bool {
    true
}

/// A per-user feature override. Takes precedence over everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureOverride {
    /// Feature this override applies to.
    pub feature_key: String,
    /// Whether the feature is enabled for the user.
    pub enabled: bool,
}

impl FeatureOverride {
    /// Creates an override.
    pub fn new(feature_key: impl Into<String>, enabled: bool) -> Self {
        Self {
            feature_key: feature_key.into(),
            enabled,
        }
    }
}

/// The resolved, locally authoritative view of one license and user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseSnapshot {
    /// License code, uppercase.
    #[serde(deserialize_with = "de_code")]
    pub code: String,
    /// User email, lowercase.
    #[serde(deserialize_with = "de_email")]
    pub email: String,
    /// When the license was activated.
    pub activated_at: DateTime<Utc>,
    /// Plan tier.
    #[serde(default)]
    pub plan_type: PlanType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_registration_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Limit values, `None` meaning unlimited.
    #[serde(default)]
    pub limits: Limits,
    /// Company-level custom features set by an administrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_features: Option<CustomFeatures>,
    /// Per-user overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_feature_overrides: Option<Vec<FeatureOverride>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,

    #[serde(default = "default_true")]
    pub show_user_info: bool,
    #[serde(default = "default_true")]
    pub show_company_info: bool,
    #[serde(default = "default_true")]
    pub show_address_info: bool,
    #[serde(default = "default_true")]
    pub show_license_info: bool,
}

impl LicenseSnapshot {
    /// Creates a snapshot with no profile data and no overrides.
    pub fn new(code: &str, email: &str, plan_type: PlanType, activated_at: DateTime<Utc>) -> Self {
        Self {
            code: normalize_code(code),
            email: normalize_email(email),
            activated_at,
            plan_type,
            first_name: None,
            last_name: None,
            company_name: None,
            company_registration_id: None,
            address: None,
            limits: Limits::new(),
            custom_features: None,
            user_feature_overrides: None,
            company_user_id: None,
            user_role: None,
            show_user_info: true,
            show_company_info: true,
            show_address_info: true,
            show_license_info: true,
        }
    }

    /// Builds a snapshot from a full activation payload.
    ///
    /// Fields missing from `patch` fall back to the requested identity, `now`
    /// and the entry plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting code or email is empty.
    pub fn from_activation(
        code: &str,
        email: &str,
        now: DateTime<Utc>,
        patch: LicenseDataPatch,
    ) -> LicenseResult<Self> {
        let code = patch.code.as_deref().map_or_else(|| normalize_code(code), normalize_code);
        let email = patch
            .email
            .as_deref()
            .map_or_else(|| normalize_email(email), normalize_email);
        if code.is_empty() || email.is_empty() {
            return Err(LicenseError::InvalidSnapshot(
                "license code and email are required".to_string(),
            ));
        }

        let mut snapshot = Self::new(
            &code,
            &email,
            patch.plan_type.unwrap_or_default(),
            patch.activated_at.unwrap_or(now),
        );
        snapshot.apply_patch(patch);
        Ok(snapshot)
    }

    /// Merges a partial update into this snapshot.
    ///
    /// Present fields overwrite, absent fields keep their value. The identity
    /// (`code`, `email`) is never changed by a patch.
    pub fn apply_patch(&mut self, patch: LicenseDataPatch) {
        let LicenseDataPatch {
            code: _,
            email: _,
            activated_at,
            plan_type,
            first_name,
            last_name,
            company_name,
            company_registration_id,
            address,
            limits,
            custom_features,
            user_feature_overrides,
            company_user_id,
            user_role,
            show_user_info,
            show_company_info,
            show_address_info,
            show_license_info,
        } = patch;

        if let Some(v) = activated_at {
            self.activated_at = v;
        }
        if let Some(v) = plan_type {
            self.plan_type = v;
        }
        overwrite(&mut self.first_name, first_name);
        overwrite(&mut self.last_name, last_name);
        overwrite(&mut self.company_name, company_name);
        overwrite(&mut self.company_registration_id, company_registration_id);
        overwrite(&mut self.address, address);
        if let Some(v) = limits {
            self.limits = v;
        }
        overwrite(&mut self.custom_features, custom_features);
        overwrite(&mut self.user_feature_overrides, user_feature_overrides);
        overwrite(&mut self.company_user_id, company_user_id);
        overwrite(&mut self.user_role, user_role);
        if let Some(v) = show_user_info {
            self.show_user_info = v;
        }
        if let Some(v) = show_company_info {
            self.show_company_info = v;
        }
        if let Some(v) = show_address_info {
            self.show_address_info = v;
        }
        if let Some(v) = show_license_info {
            self.show_license_info = v;
        }
    }

    /// Returns true if `email` names the same identity as this snapshot.
    #[must_use]
    pub fn is_identity(&self, email: &str) -> bool {
        self.email == normalize_email(email)
    }
}

fn overwrite<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// A partial snapshot as returned by the remote authority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LicenseDataPatch {
    pub code: Option<String>,
    pub email: Option<String>,
    pub activated_at: Option<DateTime<Utc>>,
    pub plan_type: Option<PlanType>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company_name: Option<String>,
    pub company_registration_id: Option<String>,
    pub address: Option<String>,
    pub limits: Option<Limits>,
    pub custom_features: Option<CustomFeatures>,
    pub user_feature_overrides: Option<Vec<FeatureOverride>>,
    pub company_user_id: Option<String>,
    pub user_role: Option<String>,
    pub show_user_info: Option<bool>,
    pub show_company_info: Option<bool>,
    pub show_address_info: Option<bool>,
    pub show_license_info: Option<bool>,
}

impl LicenseDataPatch {
    /// Layers top-level overrides from a response on top of this patch.
    #[must_use]
    pub fn with_overrides(
        mut self,
        custom_features: Option<CustomFeatures>,
        user_feature_overrides: Option<Vec<FeatureOverride>>,
    ) -> Self {
        overwrite(&mut self.custom_features, custom_features);
        overwrite(&mut self.user_feature_overrides, user_feature_overrides);
        self
    }
}
