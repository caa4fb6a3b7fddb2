//! Lornu Cloud Access
//!
//! A resilient multi-cloud credential and access layer. Operations against
//! pluggable providers run through retries, circuit breakers and a
//! degradation coordinator; temporary credentials come from cross-account
//! role sessions and are cached in an encrypted local store.
//!
//! ## Modules
//!
//! - [`cloud`]: provider identifiers, credentials and provider errors
//! - [`resilience`]: health tracking, retry executor, degradation coordinator
//! - [`identity`]: account registry, role assumption, session manager
//! - [`store`]: encrypted on-disk credential store
//! - [`config`]: serde settings with `LORNU_ACCESS_*` overrides

pub mod cloud;
pub mod config;
pub mod identity;
pub mod resilience;
pub mod store;

pub use cloud::{CloudError, CloudProvider, Credentials};
pub use config::AccessConfig;
pub use identity::{AccountRegistry, CrossAccountSessionManager};
pub use resilience::{DegradationCoordinator, OperationContext};
pub use store::CredentialStore;
