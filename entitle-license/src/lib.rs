//! License model and entitlement resolution.
//!
//! This crate is free of I/O. It holds:
//! - The license snapshot and the partial updates the authority sends
//! - The three plan tiers and their static feature tables
//! - Feature/limit resolution with user > company > plan precedence
//! - The cache envelope that bounds offline trust
//!
//! # Staleness Rules
//!
//! - **Usable offline**: a snapshot may be served without network for
//!   [`OFFLINE_VALIDITY_DAYS`] after its last validation
//! - **Fresh**: within [`CHECK_THROTTLE_SECS`] of a validation, no new
//!   network check is made

mod envelope;
mod error;
mod features;
mod plan;
mod snapshot;

pub use envelope::{
    check_throttle, offline_validity, CacheEnvelope, CHECK_THROTTLE_SECS, OFFLINE_VALIDITY_DAYS,
};
pub use error::{LicenseError, LicenseResult};
pub use features::{get_limit_value, has_feature, resolve_feature, FeatureDecision, FeatureSource};
pub use plan::PlanType;
pub use snapshot::{
    normalize_code, normalize_email, CustomFeatures, FeatureOverride, LicenseDataPatch,
    LicenseSnapshot, Limits,
};
