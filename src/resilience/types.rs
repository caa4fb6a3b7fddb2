//! Types for the resilience layer
//!
//! Composite service keys, degradation levels and thresholds, per-key
//! health records, typed operation results, and the error taxonomy
//! surfaced by the executor and the degradation coordinator.

use crate::cloud::{CloudError, CloudProvider, Cluster, Credentials, Registry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A cloud operation subject to degradation handling
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Authenticate,
    ListClusters,
    ListRegistries,
    GetCluster,
    GetRegistry,
    AuthenticateRegistry,
    /// Any operation without built-in defaults
    Custom(String),
}

impl Operation {
    /// Every named operation
    pub const KNOWN: [Operation; 6] = [
        Operation::Authenticate,
        Operation::ListClusters,
        Operation::ListRegistries,
        Operation::GetCluster,
        Operation::GetRegistry,
        Operation::AuthenticateRegistry,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Operation::Authenticate => "authenticate",
            Operation::ListClusters => "list_clusters",
            Operation::ListRegistries => "list_registries",
            Operation::GetCluster => "get_cluster",
            Operation::GetRegistry => "get_registry",
            Operation::AuthenticateRegistry => "authenticate_registry",
            Operation::Custom(name) => name,
        }
    }

    /// Whether the operation returns a collection
    pub fn is_listing(&self) -> bool {
        matches!(self, Operation::ListClusters | Operation::ListRegistries)
    }

    /// The empty result served in place of an error under severe degradation
    pub fn empty_result(&self) -> OperationResult {
        match self {
            Operation::ListClusters => OperationResult::ClusterList(Vec::new()),
            Operation::ListRegistries => OperationResult::RegistryList(Vec::new()),
            _ => OperationResult::Empty,
        }
    }
}

impl From<&str> for Operation {
    fn from(s: &str) -> Self {
        match s {
            "authenticate" => Operation::Authenticate,
            "list_clusters" => Operation::ListClusters,
            "list_registries" => Operation::ListRegistries,
            "get_cluster" => Operation::GetCluster,
            "get_registry" => Operation::GetRegistry,
            "authenticate_registry" => Operation::AuthenticateRegistry,
            other => Operation::Custom(other.to_string()),
        }
    }
}

impl From<String> for Operation {
    fn from(s: String) -> Self {
        Operation::from(s.as_str())
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.as_str().to_string()
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Composite key for health, cache, and breaker tables
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub provider: CloudProvider,
    pub operation: Operation,
}

impl ServiceKey {
    pub fn new(provider: CloudProvider, operation: impl Into<Operation>) -> Self {
        Self {
            provider,
            operation: operation.into(),
        }
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.provider, self.operation)
    }
}

/// Degradation severity, ordered from healthy to unavailable
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum DegradationLevel {
    #[default]
    None,
    Minor,
    Major,
    Severe,
    Complete,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradationLevel::None => write!(f, "none"),
            DegradationLevel::Minor => write!(f, "minor"),
            DegradationLevel::Major => write!(f, "major"),
            DegradationLevel::Severe => write!(f, "severe"),
            DegradationLevel::Complete => write!(f, "complete"),
        }
    }
}

/// Upper error-count bounds for each degradation level.
///
/// Zero errors is always `None`; anything above `severe_max` is `Complete`.
/// The defaults are observed values, not load-tested ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradationThresholds {
    pub minor_max: u32,
    pub major_max: u32,
    pub severe_max: u32,
}

impl Default for DegradationThresholds {
    fn default() -> Self {
        Self {
            minor_max: 2,
            major_max: 5,
            severe_max: 10,
        }
    }
}

impl DegradationThresholds {
    /// Reject tables that would make the level non-monotonic
    pub fn validate(&self) -> Result<(), String> {
        if self.minor_max == 0 {
            return Err("minor_max must be at least 1".to_string());
        }
        if !(self.minor_max < self.major_max && self.major_max < self.severe_max) {
            return Err(format!(
                "thresholds must be strictly increasing (got {}/{}/{})",
                self.minor_max, self.major_max, self.severe_max
            ));
        }
        Ok(())
    }

    pub fn level_for(&self, error_count: u32) -> DegradationLevel {
        match error_count {
            0 => DegradationLevel::None,
            n if n <= self.minor_max => DegradationLevel::Minor,
            n if n <= self.major_max => DegradationLevel::Major,
            n if n <= self.severe_max => DegradationLevel::Severe,
            _ => DegradationLevel::Complete,
        }
    }
}

/// Rolling health record for one service key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub key: ServiceKey,
    /// Outcome of the most recent observation
    pub healthy: bool,
    pub error_count: u32,
    /// Stepped error rate in 0..=1
    pub error_rate: f64,
    pub avg_response_time: Duration,
    pub degradation_level: DegradationLevel,
    pub last_check: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl ServiceHealth {
    pub fn new(key: ServiceKey) -> Self {
        Self {
            key,
            healthy: true,
            error_count: 0,
            error_rate: 0.0,
            avg_response_time: Duration::ZERO,
            degradation_level: DegradationLevel::None,
            last_check: Utc::now(),
            last_error: None,
        }
    }
}

/// Typed result of a cloud operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum OperationResult {
    ClusterList(Vec<Cluster>),
    RegistryList(Vec<Registry>),
    Cluster(Cluster),
    Registry(Registry),
    Auth(Credentials),
    Empty,
}

impl OperationResult {
    /// Number of items for collection results, `None` otherwise
    pub fn len(&self) -> Option<usize> {
        match self {
            OperationResult::ClusterList(c) => Some(c.len()),
            OperationResult::RegistryList(r) => Some(r.len()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            OperationResult::Empty => true,
            other => other.len() == Some(0),
        }
    }
}

/// Errors surfaced by the resilience layer
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The breaker for this key is open; nothing was attempted
    #[error("Circuit breaker is open for {key}")]
    CircuitOpen { key: ServiceKey },

    /// The caller's context was cancelled or its deadline passed
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation failed and remediation did not produce a result
    #[error(transparent)]
    Operation(anyhow::Error),

    /// All remediation exhausted; carries a user-facing explanation
    #[error(transparent)]
    Unavailable(#[from] CloudError),
}

impl ResilienceError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResilienceError::Cancelled)
    }
}

impl From<anyhow::Error> for ResilienceError {
    fn from(err: anyhow::Error) -> Self {
        ResilienceError::Operation(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_table() {
        let t = DegradationThresholds::default();
        assert_eq!(t.level_for(0), DegradationLevel::None);
        assert_eq!(t.level_for(1), DegradationLevel::Minor);
        assert_eq!(t.level_for(2), DegradationLevel::Minor);
        assert_eq!(t.level_for(3), DegradationLevel::Major);
        assert_eq!(t.level_for(5), DegradationLevel::Major);
        assert_eq!(t.level_for(6), DegradationLevel::Severe);
        assert_eq!(t.level_for(10), DegradationLevel::Severe);
        assert_eq!(t.level_for(11), DegradationLevel::Complete);
    }

    #[test]
    fn test_level_is_monotonic() {
        let t = DegradationThresholds::default();
        let mut prev = DegradationLevel::None;
        for count in 0..50 {
            let level = t.level_for(count);
            assert!(level >= prev, "level dropped at error_count={}", count);
            prev = level;
        }
    }

    #[test]
    fn test_threshold_validation() {
        assert!(DegradationThresholds::default().validate().is_ok());
        let bad = DegradationThresholds {
            minor_max: 4,
            major_max: 4,
            severe_max: 10,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::ListClusters.to_string(), "list_clusters");
        assert_eq!(Operation::from("get_registry"), Operation::GetRegistry);
        assert_eq!(
            Operation::from("rotate_keys"),
            Operation::Custom("rotate_keys".to_string())
        );
    }

    #[test]
    fn test_service_key_display() {
        let key = ServiceKey::new(CloudProvider::Aws, Operation::ListClusters);
        assert_eq!(key.to_string(), "aws_list_clusters");
        assert_ne!(key, ServiceKey::new(CloudProvider::Gcp, Operation::ListClusters));
    }

    #[test]
    fn test_empty_results() {
        assert_eq!(
            Operation::ListClusters.empty_result(),
            OperationResult::ClusterList(vec![])
        );
        assert_eq!(Operation::Authenticate.empty_result(), OperationResult::Empty);
        assert!(Operation::ListRegistries.empty_result().is_empty());
    }
}
