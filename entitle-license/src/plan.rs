//! Plan tiers and their static feature tables.

use crate::error::LicenseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const START_FEATURES: &[&str] = &["planning", "calendar", "time_tracking", "pdf_export"];

const PRO_FEATURES: &[&str] = &[
    "planning",
    "calendar",
    "time_tracking",
    "pdf_export",
    "forecast",
    "reports",
    "team_management",
    "excel_export",
];

const ENTERPRISE_FEATURES: &[&str] = &[
    "planning",
    "calendar",
    "time_tracking",
    "pdf_export",
    "forecast",
    "reports",
    "team_management",
    "excel_export",
    "api_access",
    "sso",
    "audit_log",
    "custom_branding",
    "priority_support",
];

/// The plan a license is sold under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    /// Entry tier.
    #[default]
    Start,
    /// Professional tier.
    Pro,
    /// Enterprise tier.
    Enterprise,
}

impl PlanType {
    /// All plans, lowest tier first.
    pub const ALL: [PlanType; 3] = [Self::Start, Self::Pro, Self::Enterprise];

    /// Returns the feature keys included in this plan by default.
    #[must_use]
    pub fn features(&self) -> &'static [&'static str] {
        match self {
            Self::Start => START_FEATURES,
            Self::Pro => PRO_FEATURES,
            Self::Enterprise => ENTERPRISE_FEATURES,
        }
    }

    /// Returns true if the plan includes `feature_key` by default.
    #[must_use]
    pub fn includes(&self, feature_key: &str) -> bool {
        self.features().contains(&feature_key)
    }

    /// Lowercase wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(LicenseError::UnknownPlan(other.to_string())),
        }
    }
}
