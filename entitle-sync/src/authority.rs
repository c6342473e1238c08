//! Client for the remote entitlement authority.
//!
//! The authority is an RPC-style endpoint that takes
//! `{licenseCode, email, action}` and answers with license data, overrides
//! and, on `validate`, an auth session.
//!
//! Transport failures (`SyncError::Network`, `Protocol`, `Timeout`) are kept
//! apart from application answers (`valid=false` / `success=false`), which
//! come back as an `Ok(AuthorityResponse)`.

use crate::auth::AuthSession;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use entitle_license::{CustomFeatures, FeatureOverride, LicenseDataPatch};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Remote actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityAction {
    /// Full activation; returns a complete snapshot and a session.
    Validate,
    /// Lightweight liveness check.
    Check,
}

impl fmt::Display for AuthorityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validate => f.write_str("validate"),
            Self::Check => f.write_str("check"),
        }
    }
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityRequest {
    pub license_code: String,
    pub email: String,
    pub action: AuthorityAction,
}

/// Response body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthorityResponse {
    /// Set by `validate`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Set by `check`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_data: Option<LicenseDataPatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_features: Option<CustomFeatures>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_feature_overrides: Option<Vec<FeatureOverride>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<AuthSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthorityResponse {
    /// A positive answer to `validate`.
    pub fn accepted(license_data: LicenseDataPatch) -> Self {
        Self {
            success: Some(true),
            license_data: Some(license_data),
            ..Self::default()
        }
    }

    /// A positive answer to `check`.
    pub fn valid(license_data: LicenseDataPatch) -> Self {
        Self {
            valid: Some(true),
            license_data: Some(license_data),
            ..Self::default()
        }
    }

    /// A rejection.
    pub fn rejected(error: Option<&str>) -> Self {
        Self {
            success: Some(false),
            valid: Some(false),
            error: error.map(str::to_string),
            ..Self::default()
        }
    }

    /// True if the authority accepted the license. `valid` wins over
    /// `success` when both are present.
    pub fn is_accepted(&self) -> bool {
        self.valid.or(self.success).unwrap_or(false)
    }

    /// License data with the top-level overrides layered on.
    pub fn into_patch(self) -> (LicenseDataPatch, Option<AuthSession>) {
        let patch = self
            .license_data
            .unwrap_or_default()
            .with_overrides(self.custom_features, self.user_feature_overrides);
        (patch, self.session)
    }
}

/// A remote entitlement authority.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Performs `action` for the given license and email.
    async fn call(
        &self,
        action: AuthorityAction,
        code: &str,
        email: &str,
    ) -> SyncResult<AuthorityResponse>;
}

/// HTTP authority configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Full URL of the validation endpoint.
    pub endpoint_url: String,
    /// Optional API key, sent as a bearer token and an `apikey` header.
    pub api_key: Option<String>,
    /// Per-request timeout (ms).
    pub timeout_ms: u64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:54321/functions/v1/validate-license".to_string(),
            api_key: None,
            timeout_ms: 8_000,
        }
    }
}

/// `RemoteAuthority` over HTTPS.
pub struct HttpAuthority {
    config: AuthorityConfig,
    client: Client,
}

impl HttpAuthority {
    /// Creates a client.
    pub fn new(config: AuthorityConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// The configuration in use.
    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteAuthority for HttpAuthority {
    async fn call(
        &self,
        action: AuthorityAction,
        code: &str,
        email: &str,
    ) -> SyncResult<AuthorityResponse> {
        let body = AuthorityRequest {
            license_code: code.to_string(),
            email: email.to_string(),
            action,
        };

        debug!("Calling license authority: action={action}");

        let mut request = self.client.post(&self.config.endpoint_url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key).header("apikey", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::Timeout
            } else {
                SyncError::Network(format!("{action} request failed: {e}"))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SyncError::Network(format!("failed to read {action} response: {e}")))?;

        if status.is_success() {
            return serde_json::from_str(&text)
                .map_err(|e| SyncError::Protocol(format!("invalid {action} response: {e}")));
        }

        // Rejections may come back as a 4xx with a JSON body. 5xx never
        // counts as an answer about the license.
        if status.is_server_error() {
            return Err(SyncError::Network(format!("{action} failed with status {status}")));
        }
        match serde_json::from_str::<AuthorityResponse>(&text) {
            Ok(parsed) if parsed.success.is_some() || parsed.valid.is_some() || parsed.error.is_some() => {
                debug!("Authority answered {status} with an application response");
                Ok(parsed)
            }
            _ => Err(SyncError::Network(format!("{action} failed with status {status}"))),
        }
    }
}
