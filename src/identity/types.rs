//! Types for cross-account identity
//!
//! Role-assumption options, role-chain steps, live assumed-role sessions,
//! role validation reports, and the identity error taxonomy.

use crate::cloud::Credentials;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shortest session STS will issue
pub const MIN_SESSION_SECONDS: u32 = 900;
/// Longest session STS will issue
pub const MAX_SESSION_SECONDS: u32 = 43_200;

/// Options for a single role assumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssumeRoleOptions {
    pub session_name: String,
    pub duration_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_token_code: Option<String>,
    /// Inline session policy (JSON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_arns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub enable_credential_cache: bool,
    pub enable_auto_refresh: bool,
}

impl Default for AssumeRoleOptions {
    fn default() -> Self {
        Self {
            session_name: format!("lornu-session-{}", Utc::now().timestamp()),
            duration_seconds: 3600,
            external_id: None,
            mfa_serial_number: None,
            mfa_token_code: None,
            policy: None,
            policy_arns: Vec::new(),
            region: None,
            enable_credential_cache: true,
            enable_auto_refresh: true,
        }
    }
}

impl AssumeRoleOptions {
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = name.into();
        self
    }

    pub fn duration_seconds(mut self, seconds: u32) -> Self {
        self.duration_seconds = seconds;
        self
    }

    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn mfa(mut self, serial_number: impl Into<String>, token_code: impl Into<String>) -> Self {
        self.mfa_serial_number = Some(serial_number.into());
        self.mfa_token_code = Some(token_code.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn policy_arn(mut self, arn: impl Into<String>) -> Self {
        self.policy_arns.push(arn.into());
        self
    }

    pub fn auto_refresh(mut self, enabled: bool) -> Self {
        self.enable_auto_refresh = enabled;
        self
    }

    pub fn credential_cache(mut self, enabled: bool) -> Self {
        self.enable_credential_cache = enabled;
        self
    }

    pub fn has_mfa(&self) -> bool {
        self.mfa_serial_number.is_some()
    }

    /// Check the options against STS limits
    pub fn validate(&self) -> Result<(), IdentityError> {
        let name = &self.session_name;
        if name.len() < 2 || name.len() > 64 {
            return Err(IdentityError::InvalidOptions(format!(
                "session name must be 2-64 characters, got {}",
                name.len()
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+=,.@_-".contains(c))
        {
            return Err(IdentityError::InvalidOptions(format!(
                "session name contains invalid characters: {}",
                name
            )));
        }
        if !(MIN_SESSION_SECONDS..=MAX_SESSION_SECONDS).contains(&self.duration_seconds) {
            return Err(IdentityError::InvalidOptions(format!(
                "duration must be between {} and {} seconds, got {}",
                MIN_SESSION_SECONDS, MAX_SESSION_SECONDS, self.duration_seconds
            )));
        }
        if let Some(external_id) = &self.external_id {
            if external_id.len() < 2 {
                return Err(IdentityError::InvalidOptions(
                    "external ID must be at least 2 characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// One hop of a role chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleChainStep {
    pub role_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AssumeRoleOptions>,
}

impl RoleChainStep {
    pub fn new(role_arn: impl Into<String>) -> Self {
        Self {
            role_arn: role_arn.into(),
            session_name: None,
            external_id: None,
            options: None,
        }
    }

    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = Some(name.into());
        self
    }

    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn options(mut self, options: AssumeRoleOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Credentials obtained at one step of a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStepCredentials {
    pub step_index: usize,
    pub role_arn: String,
    pub credentials: Credentials,
    pub assumed_at: DateTime<Utc>,
}

/// A live assumed-role session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossAccountSession {
    /// Role ARN for single hops, `{final_role_arn}#chain-{id}` for chains
    pub id: String,
    pub credentials: Credentials,
    pub role_arn: String,
    pub session_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "refresh_threshold_secs", with = "duration_secs")]
    pub refresh_threshold: ChronoDuration,
    pub last_refreshed: Option<DateTime<Utc>>,
    /// Per-step credentials for chained sessions, empty otherwise
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain: Vec<ChainStepCredentials>,
}

impl CrossAccountSession {
    /// Build a session from freshly issued credentials.
    ///
    /// A refresh threshold that is not shorter than the session lifetime is
    /// reduced to half the lifetime.
    pub fn new(
        id: impl Into<String>,
        role_arn: impl Into<String>,
        session_name: impl Into<String>,
        credentials: Credentials,
        fallback_lifetime: ChronoDuration,
        refresh_threshold: ChronoDuration,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = credentials
            .expiry
            .unwrap_or_else(|| created_at + fallback_lifetime);
        let refresh_threshold = clamp_threshold(refresh_threshold, expires_at - created_at);

        Self {
            id: id.into(),
            credentials,
            role_arn: role_arn.into(),
            session_name: session_name.into(),
            created_at,
            expires_at,
            refresh_threshold,
            last_refreshed: None,
            chain: Vec::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Signed time until expiry; negative once expired
    pub fn time_until_expiry(&self) -> ChronoDuration {
        self.expires_at - Utc::now()
    }

    /// Signed time until a refresh is due; negative once overdue
    pub fn time_until_refresh(&self) -> ChronoDuration {
        self.refresh_at() - Utc::now()
    }

    pub fn refresh_at(&self) -> DateTime<Utc> {
        self.expires_at - self.refresh_threshold
    }

    pub fn needs_refresh(&self) -> bool {
        self.time_until_refresh() <= ChronoDuration::zero()
    }

    pub fn is_chain(&self) -> bool {
        !self.chain.is_empty()
    }

    /// Replace credentials and expiry, keeping the session identity.
    ///
    /// `refresh_threshold` is the configured threshold, clamped against the
    /// new lifetime the same way `new` does.
    pub fn update_credentials(
        &mut self,
        credentials: Credentials,
        fallback_lifetime: ChronoDuration,
        refresh_threshold: ChronoDuration,
    ) {
        let now = Utc::now();
        self.expires_at = credentials.expiry.unwrap_or_else(|| now + fallback_lifetime);
        self.refresh_threshold = clamp_threshold(refresh_threshold, self.expires_at - now);
        self.credentials = credentials;
        self.last_refreshed = Some(now);
    }
}

/// A threshold not shorter than the lifetime becomes half the lifetime
fn clamp_threshold(threshold: ChronoDuration, lifetime: ChronoDuration) -> ChronoDuration {
    if threshold >= lifetime {
        lifetime / 2
    } else {
        threshold
    }
}

mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        i64::deserialize(d).map(Duration::seconds)
    }
}

/// Result of a dry-run check that a role can be assumed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleValidation {
    pub role_arn: String,
    pub can_assume: bool,
    pub trust_policy_valid: bool,
    pub external_id_required: bool,
    pub mfa_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_session_duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub validated_at: DateTime<Utc>,
}

impl RoleValidation {
    pub fn assumable(role_arn: impl Into<String>) -> Self {
        Self {
            role_arn: role_arn.into(),
            can_assume: true,
            trust_policy_valid: true,
            external_id_required: false,
            mfa_required: false,
            max_session_duration: None,
            message: None,
            validated_at: Utc::now(),
        }
    }

    pub fn denied(role_arn: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            can_assume: false,
            trust_policy_valid: false,
            message: Some(message.into()),
            ..Self::assumable(role_arn)
        }
    }
}

/// Errors that can occur while assuming roles or managing sessions
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No session with this ID
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The session exists but its credentials have expired
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The chain failed validation before any assumption
    #[error("Role chain step {step} is invalid: {reason}")]
    ChainValidation { step: usize, reason: String },

    /// The chain has more steps than allowed
    #[error("Role chain exceeds maximum steps ({len} > {max})")]
    ChainTooLong { len: usize, max: usize },

    /// A chain step could not be assumed
    #[error("Role chain failed at step {step} ({role_arn}): {source}")]
    ChainStepFailed {
        step: usize,
        role_arn: String,
        #[source]
        source: Box<IdentityError>,
    },

    /// The role's trust policy requires MFA
    #[error("MFA is required to assume {role_arn}")]
    MfaRequired { role_arn: String },

    /// The role's trust policy requires an external ID
    #[error("External ID is required to assume {role_arn}")]
    ExternalIdRequired { role_arn: String },

    /// MFA token format is wrong
    #[error("Invalid MFA token: {0}")]
    InvalidMfaToken(String),

    /// MFA device serial is wrong
    #[error("Invalid MFA device: {0}")]
    InvalidMfaDevice(String),

    /// Role ARN is malformed
    #[error("Invalid role ARN: {0}")]
    InvalidArn(String),

    /// Assume-role options are out of range
    #[error("Invalid assume-role options: {0}")]
    InvalidOptions(String),

    /// The provider rejected or failed the assumption
    #[error("Failed to assume role {role_arn}: {message}")]
    AssumeRoleFailed { role_arn: String, message: String },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The session manager has been closed
    #[error("Session manager is closed")]
    Closed,

    /// Persisting session credentials failed
    #[error("Credential store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// The account or role is not in the registry
    #[error("Account registry error: {0}")]
    Registry(#[from] super::accounts::RegistryError),

    /// Any other provider-side failure
    #[error("Provider error: {0}")]
    Provider(String),
}

impl From<anyhow::Error> for IdentityError {
    fn from(err: anyhow::Error) -> Self {
        IdentityError::Provider(format!("{:#}", err))
    }
}

impl IdentityError {
    /// The innermost error, looking through chain-step wrappers
    pub fn root(&self) -> &IdentityError {
        match self {
            IdentityError::ChainStepFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the caller must supply something (MFA, external ID, a new
    /// login) rather than retry
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self.root(),
            IdentityError::MfaRequired { .. }
                | IdentityError::ExternalIdRequired { .. }
                | IdentityError::InvalidMfaToken(_)
                | IdentityError::SessionExpired(_)
        )
    }

    /// Whether a repeated attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            IdentityError::AssumeRoleFailed { .. } | IdentityError::Provider(_)
        )
    }
}

/// Account ID from an ARN (`arn:aws:iam::123456789012:role/X`)
pub fn account_from_arn(arn: &str) -> Option<&str> {
    arn.split(':').nth(4).filter(|s| !s.is_empty())
}

/// Role name from an ARN, the last path segment
pub fn role_name_from_arn(arn: &str) -> Option<&str> {
    arn.rsplit('/').next().filter(|s| !s.is_empty() && !s.contains(':'))
}

/// Check that `arn` looks like an IAM role ARN
pub fn validate_role_arn(arn: &str) -> Result<(), IdentityError> {
    if arn.is_empty() {
        return Err(IdentityError::InvalidArn("role ARN cannot be empty".to_string()));
    }
    if !arn.starts_with("arn:aws:iam::") {
        return Err(IdentityError::InvalidArn(format!("invalid role ARN format: {}", arn)));
    }
    let account = account_from_arn(arn)
        .ok_or_else(|| IdentityError::InvalidArn(format!("missing account ID: {}", arn)))?;
    if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
        return Err(IdentityError::InvalidArn(format!(
            "account ID must be 12 digits: {}",
            arn
        )));
    }
    if role_name_from_arn(arn).is_none() || !arn.contains(":role/") {
        return Err(IdentityError::InvalidArn(format!("missing role name: {}", arn)));
    }
    Ok(())
}
