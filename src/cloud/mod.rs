//! Cloud Provider Model
//!
//! Provider identifiers and the values exchanged with provider
//! integrations. The integrations themselves (AWS/Azure/GCP API clients)
//! live outside this crate and plug in through closures and traits.

pub mod types;

pub use types::{AuthMethod, CloudError, CloudProvider, Cluster, Credentials, ErrorCode, Registry};
