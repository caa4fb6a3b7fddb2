//! Shared cloud types
//!
//! Provider identifiers, credentials, and the resource shapes returned by
//! provider integrations (clusters and container registries), plus the
//! structured `CloudError` used for user-facing failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Supported cloud providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
}

impl CloudProvider {
    /// All providers, in a stable order
    pub const ALL: [CloudProvider; 3] = [CloudProvider::Aws, CloudProvider::Azure, CloudProvider::Gcp];

    /// Ordered alternates tried when this provider is degraded.
    ///
    /// The table is cyclic; callers walk a single level of it.
    pub fn fallback_chain(&self) -> &'static [CloudProvider] {
        match self {
            CloudProvider::Aws => &[CloudProvider::Gcp, CloudProvider::Azure],
            CloudProvider::Azure => &[CloudProvider::Aws, CloudProvider::Gcp],
            CloudProvider::Gcp => &[CloudProvider::Azure, CloudProvider::Aws],
        }
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudProvider::Aws => write!(f, "aws"),
            CloudProvider::Azure => write!(f, "azure"),
            CloudProvider::Gcp => write!(f, "gcp"),
        }
    }
}

impl std::str::FromStr for CloudProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aws" => Ok(CloudProvider::Aws),
            "azure" => Ok(CloudProvider::Azure),
            "gcp" => Ok(CloudProvider::Gcp),
            other => anyhow::bail!("Unknown cloud provider: {}", other),
        }
    }
}

/// How a set of credentials was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    #[default]
    Cli,
    Sdk,
    IamRole,
    AccessKey,
    ServiceKey,
    Browser,
    DeviceCode,
    ManagedIdentity,
    ServicePrincipal,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthMethod::Cli => "cli",
            AuthMethod::Sdk => "sdk",
            AuthMethod::IamRole => "iam-role",
            AuthMethod::AccessKey => "access-key",
            AuthMethod::ServiceKey => "service-key",
            AuthMethod::Browser => "browser",
            AuthMethod::DeviceCode => "device-code",
            AuthMethod::ManagedIdentity => "managed-identity",
            AuthMethod::ServicePrincipal => "service-principal",
        };
        write!(f, "{}", s)
    }
}

/// Cloud provider credentials
///
/// Issued credentials are never mutated; a refresh produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub provider: CloudProvider,
    pub auth_method: AuthMethod,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
}

impl Credentials {
    /// Create empty credentials for a provider
    pub fn new(provider: CloudProvider, auth_method: AuthMethod) -> Self {
        Self {
            provider,
            auth_method,
            profile: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            token: String::new(),
            region: String::new(),
            account: String::new(),
            expiry: None,
            properties: HashMap::new(),
        }
    }

    /// Set the access key pair
    pub fn keys(mut self, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.access_key = access_key.into();
        self.secret_key = secret_key.into();
        self
    }

    /// Set the session token
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Set the profile name
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// Set the region
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the expiry
    pub fn expires_at(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Add a free-form property (e.g. the assumed role ARN)
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expiry.map(|e| Utc::now() >= e).unwrap_or(false)
    }
}

/// A container registry (ECR, ACR, GCR)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub provider: CloudProvider,
    pub name: String,
    pub url: String,
    pub region: String,
    #[serde(rename = "type")]
    pub registry_type: String,
}

/// A Kubernetes cluster (EKS, AKS, GKE)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub provider: CloudProvider,
    pub name: String,
    pub region: String,
    #[serde(rename = "type")]
    pub cluster_type: String,
    pub version: String,
    pub endpoint: String,
    pub node_count: u32,
    pub status: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, String>,
}

/// Machine-readable failure codes reported by provider integrations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimited,
    Throttled,
    Timeout,
    NetworkError,
    ServiceUnavailable,
    TemporaryFailure,
    ConnectionError,
    DnsError,
    #[serde(rename = "HTTP_5xx")]
    Http5xx,
    #[serde(rename = "HTTP_429")]
    Http429,
    TokenExpired,
    SessionExpired,
    AuthenticationFailed,
    PermissionDenied,
    NotFound,
    InvalidConfiguration,
    Unknown,
}

impl ErrorCode {
    /// Whether a failure with this code is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimited
                | ErrorCode::Throttled
                | ErrorCode::Timeout
                | ErrorCode::NetworkError
                | ErrorCode::ServiceUnavailable
                | ErrorCode::TemporaryFailure
                | ErrorCode::ConnectionError
                | ErrorCode::DnsError
                | ErrorCode::Http5xx
                | ErrorCode::Http429
                | ErrorCode::TokenExpired
                | ErrorCode::SessionExpired
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Throttled => "THROTTLED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::TemporaryFailure => "TEMPORARY_FAILURE",
            ErrorCode::ConnectionError => "CONNECTION_ERROR",
            ErrorCode::DnsError => "DNS_ERROR",
            ErrorCode::Http5xx => "HTTP_5xx",
            ErrorCode::Http429 => "HTTP_429",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InvalidConfiguration => "INVALID_CONFIGURATION",
            ErrorCode::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Structured, user-facing cloud failure
///
/// Provider integrations may return this inside an `anyhow::Error`; the
/// retry executor inspects `retryable` to decide whether another attempt is
/// worthwhile.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("[{provider}] {operation} failed ({code}): {message}")]
pub struct CloudError {
    pub provider: CloudProvider,
    pub operation: String,
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, String>,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_message: String,
    pub timestamp: DateTime<Utc>,
}

impl CloudError {
    /// Create a new error; retryability follows the code
    pub fn new(
        provider: CloudProvider,
        operation: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            operation: operation.into(),
            code,
            message: message.into(),
            details: HashMap::new(),
            retryable: code.is_retryable(),
            user_message: String::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a human explanation
    pub fn user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = message.into();
        self
    }

    /// Attach a detail entry
    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Override the retryable flag
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Find a `CloudError` anywhere in an `anyhow` chain
    pub fn find(err: &anyhow::Error) -> Option<&CloudError> {
        err.chain().find_map(|e| e.downcast_ref::<CloudError>())
    }
}
