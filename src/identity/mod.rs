//! Cross-Account Identity
//!
//! Temporary credentials for roles in other accounts: single assumptions,
//! MFA-gated assumptions, and linear role chains, kept fresh by a background
//! refresh worker. Accounts and their roles are catalogued in an
//! `AccountRegistry`; the STS boundary is the `RoleAssumer` trait.
//!
//! ## Example Usage
//!
//! ```ignore
//! let assumer = Arc::new(AwsCliAssumer::new());
//! let sessions = CrossAccountSessionManager::new(assumer, SessionSettings::default());
//! let ctx = OperationContext::new();
//!
//! let session = sessions
//!     .assume_role_chain(
//!         &ctx,
//!         vec![
//!             RoleChainStep::new("arn:aws:iam::111111111111:role/Hub"),
//!             RoleChainStep::new("arn:aws:iam::222222222222:role/Deploy").external_id("partner"),
//!         ],
//!         None,
//!     )
//!     .await?;
//! sessions.close().await;
//! ```

pub mod accounts;
pub mod assumer;
pub mod mfa;
pub mod scheduler;
pub mod sessions;
pub mod types;

pub use accounts::{
    AccountConfig, AccountRegistry, AccountValidation, ConfigValidationResult,
    MultiAccountConfig, ObjectStore, RegistryError, RoleConfig, RoleValidationResult,
};
pub use assumer::{AwsCliAssumer, RoleAssumer};
pub use mfa::{MfaDeviceType, TrustRequirements};
pub use sessions::{validate_chain, CrossAccountSessionManager, SessionSettings};
pub use types::{
    AssumeRoleOptions, ChainStepCredentials, CrossAccountSession, IdentityError, RoleChainStep,
    RoleValidation,
};
