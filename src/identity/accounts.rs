//! Multi-account registry
//!
//! Catalog of AWS accounts and the roles assumable in each, validated
//! against the `RoleAssumer` and persisted as JSON either to a local path
//! or through a registered `ObjectStore` (`s3://`, `gs://`, ...).
//!
//! ## Example Usage
//!
//! ```ignore
//! let registry = AccountRegistry::new("lornu");
//! registry.add_account(AccountConfig::new("123456789012", "prod").environment("prod"))?;
//! let role = registry.add_role_to_account("123456789012", RoleConfig::new("Deploy"))?;
//! assert_eq!(role.role_arn, "arn:aws:iam::123456789012:role/Deploy");
//! ```

use super::assumer::RoleAssumer;
use super::types::{MAX_SESSION_SECONDS, MIN_SESSION_SECONDS};
use crate::resilience::OperationContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by the account registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Account already exists: {0}")]
    DuplicateAccount(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Role {role_name} not found in account {account_id}")]
    RoleNotFound {
        account_id: String,
        role_name: String,
    },

    #[error("Invalid account configuration: {0}")]
    Invalid(String),

    #[error("No object store registered for scheme: {0}")]
    UnsupportedScheme(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Object store error: {0}")]
    ObjectStore(String),
}

impl From<anyhow::Error> for RegistryError {
    fn from(err: anyhow::Error) -> Self {
        RegistryError::ObjectStore(format!("{:#}", err))
    }
}

/// Remote blob storage for configuration files, keyed by URI
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, uri: &str) -> anyhow::Result<Vec<u8>>;
    async fn put(&self, uri: &str, data: Vec<u8>) -> anyhow::Result<()>;
}

/// A role that can be assumed in an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleConfig {
    pub role_name: String,
    /// Derived from the owning account on insertion
    #[serde(default)]
    pub role_arn: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_mfa: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

impl RoleConfig {
    pub fn new(role_name: impl Into<String>) -> Self {
        Self {
            role_name: role_name.into(),
            role_arn: String::new(),
            description: String::new(),
            require_mfa: None,
            session_duration: None,
            external_id: None,
            tags: HashMap::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn require_mfa(mut self, required: bool) -> Self {
        self.require_mfa = Some(required);
        self
    }

    pub fn session_duration(mut self, seconds: u32) -> Self {
        self.session_duration = Some(seconds);
        self
    }

    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// IAM role ARN for `role_name` in `account_id`
pub fn role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{}:role/{}", account_id, role_name)
}

/// One account and its assumable roles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    pub account_id: String,
    pub account_name: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub default_region: String,
    #[serde(default)]
    pub require_mfa: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<u32>,
    #[serde(default)]
    pub roles: Vec<RoleConfig>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

impl AccountConfig {
    pub fn new(account_id: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            account_name: account_name.into(),
            environment: String::new(),
            default_region: String::new(),
            require_mfa: false,
            external_id: None,
            session_duration: None,
            roles: Vec::new(),
            tags: HashMap::new(),
        }
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn default_region(mut self, region: impl Into<String>) -> Self {
        self.default_region = region.into();
        self
    }

    pub fn require_mfa(mut self, required: bool) -> Self {
        self.require_mfa = required;
        self
    }

    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn session_duration(mut self, seconds: u32) -> Self {
        self.session_duration = Some(seconds);
        self
    }

    pub fn role(mut self, role: RoleConfig) -> Self {
        self.roles.push(role);
        self
    }

    pub fn find_role(&self, role_name: &str) -> Option<&RoleConfig> {
        self.roles.iter().find(|r| r.role_name == role_name)
    }

    /// Role-level MFA override, falling back to the account setting
    pub fn role_requires_mfa(&self, role: &RoleConfig) -> bool {
        role.require_mfa.unwrap_or(self.require_mfa)
    }

    /// Role-level external ID, falling back to the account's
    pub fn role_external_id<'a>(&'a self, role: &'a RoleConfig) -> Option<&'a str> {
        role.external_id
            .as_deref()
            .or(self.external_id.as_deref())
    }

    /// Fill in derived role ARNs
    fn normalize(&mut self) {
        for role in &mut self.roles {
            role.role_arn = role_arn(&self.account_id, &role.role_name);
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.account_id.trim().is_empty() {
            return Err(RegistryError::Invalid("account ID cannot be empty".to_string()));
        }
        check_duration(&self.account_id, self.session_duration)?;
        for role in &self.roles {
            validate_role(&self.account_id, role)?;
        }
        Ok(())
    }
}

fn validate_role(account_id: &str, role: &RoleConfig) -> Result<(), RegistryError> {
    if role.role_name.trim().is_empty() {
        return Err(RegistryError::Invalid(format!(
            "role name cannot be empty in account {}",
            account_id
        )));
    }
    check_duration(account_id, role.session_duration)
}

fn check_duration(account_id: &str, duration: Option<u32>) -> Result<(), RegistryError> {
    match duration {
        Some(d) if !(MIN_SESSION_SECONDS..=MAX_SESSION_SECONDS).contains(&d) => {
            Err(RegistryError::Invalid(format!(
                "session duration {}s in account {} must be between {} and {} seconds",
                d, account_id, MIN_SESSION_SECONDS, MAX_SESSION_SECONDS
            )))
        }
        _ => Ok(()),
    }
}

/// Persisted form of the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiAccountConfig {
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub master_account: String,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub default_region: String,
    #[serde(default)]
    pub global_tags: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MultiAccountConfig {
    pub fn new(organization: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            organization: organization.into(),
            master_account: String::new(),
            accounts: Vec::new(),
            default_region: String::new(),
            global_tags: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of validating one role
#[derive(Debug, Clone, Serialize)]
pub struct RoleValidationResult {
    pub role_name: String,
    pub role_arn: String,
    pub is_valid: bool,
    pub mfa_required: bool,
    pub external_id_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of validating one account and its roles
#[derive(Debug, Clone, Serialize)]
pub struct AccountValidation {
    pub account_id: String,
    pub account_name: String,
    pub is_valid: bool,
    pub roles: Vec<RoleValidationResult>,
    pub validation_errors: Vec<String>,
}

/// Validation report for the whole registry
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValidationResult {
    pub is_valid: bool,
    pub accounts: Vec<AccountValidation>,
    pub validation_errors: Vec<String>,
    pub validated_at: DateTime<Utc>,
}

/// Thread-safe account catalog
pub struct AccountRegistry {
    config: RwLock<MultiAccountConfig>,
    object_stores: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl AccountRegistry {
    pub fn new(organization: impl Into<String>) -> Self {
        Self::from_config(MultiAccountConfig::new(organization))
    }

    pub fn from_config(mut config: MultiAccountConfig) -> Self {
        for account in &mut config.accounts {
            account.normalize();
        }
        Self {
            config: RwLock::new(config),
            object_stores: RwLock::new(HashMap::new()),
        }
    }

    /// Route URIs with `scheme://` to `store`
    pub fn register_object_store(&self, scheme: impl Into<String>, store: Arc<dyn ObjectStore>) {
        self.object_stores.write().insert(scheme.into(), store);
    }

    /// Copy of the current configuration
    pub fn config(&self) -> MultiAccountConfig {
        self.config.read().clone()
    }

    pub fn add_account(&self, mut account: AccountConfig) -> Result<(), RegistryError> {
        account.validate()?;
        account.normalize();

        let mut config = self.config.write();
        if config
            .accounts
            .iter()
            .any(|a| a.account_id == account.account_id)
        {
            return Err(RegistryError::DuplicateAccount(account.account_id));
        }
        info!(account_id = %account.account_id, roles = account.roles.len(), "Added account");
        config.accounts.push(account);
        config.updated_at = Utc::now();
        Ok(())
    }

    pub fn update_account(
        &self,
        account_id: &str,
        mut account: AccountConfig,
    ) -> Result<(), RegistryError> {
        account.account_id = account_id.to_string();
        account.validate()?;
        account.normalize();

        let mut config = self.config.write();
        let slot = config
            .accounts
            .iter_mut()
            .find(|a| a.account_id == account_id)
            .ok_or_else(|| RegistryError::AccountNotFound(account_id.to_string()))?;
        *slot = account;
        config.updated_at = Utc::now();
        debug!(account_id = %account_id, "Updated account");
        Ok(())
    }

    pub fn remove_account(&self, account_id: &str) -> Result<AccountConfig, RegistryError> {
        let mut config = self.config.write();
        let index = config
            .accounts
            .iter()
            .position(|a| a.account_id == account_id)
            .ok_or_else(|| RegistryError::AccountNotFound(account_id.to_string()))?;
        let removed = config.accounts.remove(index);
        config.updated_at = Utc::now();
        info!(account_id = %account_id, "Removed account");
        Ok(removed)
    }

    pub fn get_account(&self, account_id: &str) -> Result<AccountConfig, RegistryError> {
        self.config
            .read()
            .accounts
            .iter()
            .find(|a| a.account_id == account_id)
            .cloned()
            .ok_or_else(|| RegistryError::AccountNotFound(account_id.to_string()))
    }

    /// Accounts in insertion order
    pub fn list_accounts(&self) -> Vec<AccountConfig> {
        self.config.read().accounts.clone()
    }

    pub fn get_accounts_by_environment(&self, environment: &str) -> Vec<AccountConfig> {
        self.config
            .read()
            .accounts
            .iter()
            .filter(|a| a.environment == environment)
            .cloned()
            .collect()
    }

    /// Add or replace a role, returning it with its derived ARN
    pub fn add_role_to_account(
        &self,
        account_id: &str,
        mut role: RoleConfig,
    ) -> Result<RoleConfig, RegistryError> {
        validate_role(account_id, &role)?;

        let mut config = self.config.write();
        let account = config
            .accounts
            .iter_mut()
            .find(|a| a.account_id == account_id)
            .ok_or_else(|| RegistryError::AccountNotFound(account_id.to_string()))?;

        role.role_arn = role_arn(account_id, &role.role_name);
        match account
            .roles
            .iter_mut()
            .find(|r| r.role_name == role.role_name)
        {
            Some(existing) => *existing = role.clone(),
            None => account.roles.push(role.clone()),
        }
        config.updated_at = Utc::now();
        debug!(account_id = %account_id, role_arn = %role.role_arn, "Added role");
        Ok(role)
    }

    pub fn get_role_from_account(
        &self,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleConfig, RegistryError> {
        let account = self.get_account(account_id)?;
        account
            .find_role(role_name)
            .cloned()
            .ok_or_else(|| RegistryError::RoleNotFound {
                account_id: account_id.to_string(),
                role_name: role_name.to_string(),
            })
    }

    /// Check every role of every account against the provider.
    ///
    /// Each account is valid when its local checks and all of its roles
    /// pass; the overall result is the AND of the accounts. An account with
    /// no roles, or a registry with no accounts, has nothing failing and is
    /// therefore valid.
    pub async fn validate_configuration(
        &self,
        ctx: &OperationContext,
        assumer: &dyn RoleAssumer,
    ) -> ConfigValidationResult {
        let accounts = self.list_accounts();
        let mut report = ConfigValidationResult {
            is_valid: true,
            accounts: Vec::with_capacity(accounts.len()),
            validation_errors: Vec::new(),
            validated_at: Utc::now(),
        };

        for account in &accounts {
            let mut result = AccountValidation {
                account_id: account.account_id.clone(),
                account_name: account.account_name.clone(),
                is_valid: true,
                roles: Vec::with_capacity(account.roles.len()),
                validation_errors: Vec::new(),
            };

            if let Err(e) = account.validate() {
                result.validation_errors.push(e.to_string());
            }

            for role in &account.roles {
                let role_result = validate_one_role(ctx, assumer, account, role).await;
                if !role_result.is_valid {
                    result.validation_errors.push(format!(
                        "role {}: {}",
                        role.role_name,
                        role_result.message.as_deref().unwrap_or("validation failed")
                    ));
                }
                result.roles.push(role_result);
            }

            result.is_valid = result.validation_errors.is_empty();
            if !result.is_valid {
                warn!(
                    account_id = %account.account_id,
                    errors = result.validation_errors.len(),
                    "Account failed validation"
                );
                report.is_valid = false;
            }
            report.accounts.push(result);
        }

        report
    }

    /// Write the configuration as JSON to a local path or object-store URI
    pub async fn save_config(&self, location: &str) -> Result<(), RegistryError> {
        let snapshot = {
            let mut config = self.config.write();
            config.updated_at = Utc::now();
            config.clone()
        };
        let data = serde_json::to_vec_pretty(&snapshot)?;

        match self.store_for(location)? {
            Some(store) => store.put(location, data).await?,
            None => write_local(Path::new(local_path(location)), &data).await?,
        }
        info!(location = %location, accounts = snapshot.accounts.len(), "Saved account configuration");
        Ok(())
    }

    /// Replace the configuration with the one stored at `location`
    pub async fn load_config(&self, location: &str) -> Result<(), RegistryError> {
        let data = match self.store_for(location)? {
            Some(store) => store.get(location).await?,
            None => tokio::fs::read(local_path(location)).await?,
        };
        let mut loaded: MultiAccountConfig = serde_json::from_slice(&data)?;

        let mut seen = std::collections::HashSet::new();
        for account in &mut loaded.accounts {
            account.validate()?;
            if !seen.insert(account.account_id.clone()) {
                return Err(RegistryError::DuplicateAccount(account.account_id.clone()));
            }
            account.normalize();
        }

        info!(location = %location, accounts = loaded.accounts.len(), "Loaded account configuration");
        *self.config.write() = loaded;
        Ok(())
    }

    fn store_for(&self, location: &str) -> Result<Option<Arc<dyn ObjectStore>>, RegistryError> {
        let Some((scheme, _)) = location.split_once("://") else {
            return Ok(None);
        };
        if scheme == "file" {
            return Ok(None);
        }
        self.object_stores
            .read()
            .get(scheme)
            .cloned()
            .map(Some)
            .ok_or_else(|| RegistryError::UnsupportedScheme(scheme.to_string()))
    }
}

async fn validate_one_role(
    ctx: &OperationContext,
    assumer: &dyn RoleAssumer,
    account: &AccountConfig,
    role: &RoleConfig,
) -> RoleValidationResult {
    let mut result = RoleValidationResult {
        role_name: role.role_name.clone(),
        role_arn: role.role_arn.clone(),
        is_valid: false,
        mfa_required: account.role_requires_mfa(role),
        external_id_required: account.role_external_id(role).is_some(),
        message: None,
    };

    match assumer.validate_role(ctx, &role.role_arn, None).await {
        Ok(validation) => {
            result.is_valid = validation.can_assume && validation.trust_policy_valid;
            result.mfa_required |= validation.mfa_required;
            result.external_id_required |= validation.external_id_required;
            result.message = validation.message;

            if validation.external_id_required && account.role_external_id(role).is_none() {
                result.is_valid = false;
                result.message = Some("trust policy requires an external ID".to_string());
            }
            if let (Some(max), Some(wanted)) = (
                validation.max_session_duration,
                role.session_duration.or(account.session_duration),
            ) {
                if wanted > max {
                    result.is_valid = false;
                    result.message = Some(format!(
                        "session duration {}s exceeds role maximum {}s",
                        wanted, max
                    ));
                }
            }
        }
        Err(e) => result.message = Some(e.to_string()),
    }
    result
}

fn local_path(location: &str) -> &str {
    location.strip_prefix("file://").unwrap_or(location)
}

async fn write_local(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, data).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::Credentials;
    use crate::identity::types::{AssumeRoleOptions, IdentityError, RoleValidation};
    use tokio::sync::Mutex;

    struct FakeAssumer {
        denied: Vec<String>,
    }

    #[async_trait]
    impl RoleAssumer for FakeAssumer {
        async fn assume_role(
            &self,
            _ctx: &OperationContext,
            role_arn: &str,
            _options: &AssumeRoleOptions,
            _caller: Option<&Credentials>,
        ) -> Result<Credentials, IdentityError> {
            Err(IdentityError::AssumeRoleFailed {
                role_arn: role_arn.to_string(),
                message: "not used".to_string(),
            })
        }

        async fn validate_role(
            &self,
            _ctx: &OperationContext,
            role_arn: &str,
            _caller: Option<&Credentials>,
        ) -> Result<RoleValidation, IdentityError> {
            if self.denied.iter().any(|d| d == role_arn) {
                Ok(RoleValidation::denied(role_arn, "AccessDenied"))
            } else {
                Ok(RoleValidation::assumable(role_arn))
            }
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn get(&self, uri: &str) -> anyhow::Result<Vec<u8>> {
            self.blobs
                .lock()
                .await
                .get(uri)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such object: {}", uri))
        }

        async fn put(&self, uri: &str, data: Vec<u8>) -> anyhow::Result<()> {
            self.blobs.lock().await.insert(uri.to_string(), data);
            Ok(())
        }
    }

    fn prod() -> AccountConfig {
        AccountConfig::new("123456789012", "production")
            .environment("prod")
            .role(RoleConfig::new("Deploy"))
    }

    #[test]
    fn test_duplicate_account_rejected() {
        let registry = AccountRegistry::new("lornu");
        registry.add_account(prod()).unwrap();
        let err = registry.add_account(prod()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAccount(_)));
        assert_eq!(registry.list_accounts().len(), 1);
    }

    #[test]
    fn test_role_arn_derivation() {
        let registry = AccountRegistry::new("lornu");
        registry
            .add_account(AccountConfig::new("123456789012", "prod"))
            .unwrap();
        let role = registry
            .add_role_to_account("123456789012", RoleConfig::new("X"))
            .unwrap();
        assert_eq!(role.role_arn, "arn:aws:iam::123456789012:role/X");
        assert_eq!(
            registry
                .get_role_from_account("123456789012", "X")
                .unwrap()
                .role_arn,
            "arn:aws:iam::123456789012:role/X"
        );
        assert!(matches!(
            registry.get_role_from_account("123456789012", "Y"),
            Err(RegistryError::RoleNotFound { .. })
        ));
        assert!(matches!(
            registry.add_role_to_account("999999999999", RoleConfig::new("X")),
            Err(RegistryError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_roles_get_arns_on_add() {
        let registry = AccountRegistry::new("lornu");
        registry.add_account(prod()).unwrap();
        let account = registry.get_account("123456789012").unwrap();
        assert_eq!(account.roles[0].role_arn, "arn:aws:iam::123456789012:role/Deploy");
    }

    #[test]
    fn test_local_validation() {
        let registry = AccountRegistry::new("lornu");
        assert!(matches!(
            registry.add_account(AccountConfig::new("", "empty")),
            Err(RegistryError::Invalid(_))
        ));
        assert!(registry
            .add_account(AccountConfig::new("123456789012", "p").session_duration(60))
            .is_err());
        assert!(registry
            .add_account(AccountConfig::new("123456789012", "p").role(RoleConfig::new(" ")))
            .is_err());
        assert!(registry.list_accounts().is_empty());
    }

    #[test]
    fn test_update_remove_and_environment_filter() {
        let registry = AccountRegistry::new("lornu");
        registry.add_account(prod()).unwrap();
        registry
            .add_account(AccountConfig::new("210987654321", "dev").environment("dev"))
            .unwrap();

        assert_eq!(registry.get_accounts_by_environment("prod").len(), 1);
        assert_eq!(registry.get_accounts_by_environment("staging").len(), 0);

        registry
            .update_account("210987654321", AccountConfig::new("ignored", "dev-2").environment("prod"))
            .unwrap();
        let updated = registry.get_account("210987654321").unwrap();
        assert_eq!(updated.account_name, "dev-2");
        assert_eq!(registry.get_accounts_by_environment("prod").len(), 2);

        registry.remove_account("210987654321").unwrap();
        assert!(matches!(
            registry.get_account("210987654321"),
            Err(RegistryError::AccountNotFound(_))
        ));
        assert!(registry.remove_account("210987654321").is_err());
    }

    #[tokio::test]
    async fn test_validate_configuration_aggregates() {
        let registry = AccountRegistry::new("lornu");
        registry
            .add_account(prod().role(RoleConfig::new("Broken")))
            .unwrap();
        registry
            .add_account(
                AccountConfig::new("210987654321", "dev").role(RoleConfig::new("Reader")),
            )
            .unwrap();

        let assumer = FakeAssumer {
            denied: vec![role_arn("123456789012", "Broken")],
        };
        let report = registry
            .validate_configuration(&OperationContext::new(), &assumer)
            .await;

        assert!(!report.is_valid);
        assert_eq!(report.accounts.len(), 2);
        let prod = &report.accounts[0];
        assert!(!prod.is_valid);
        assert!(prod.roles[0].is_valid);
        assert!(!prod.roles[1].is_valid);
        assert!(report.accounts[1].is_valid);
    }

    #[tokio::test]
    async fn test_validate_all_pass() {
        let registry = AccountRegistry::new("lornu");
        registry.add_account(prod()).unwrap();
        let assumer = FakeAssumer { denied: vec![] };
        let report = registry
            .validate_configuration(&OperationContext::new(), &assumer)
            .await;
        assert!(report.is_valid);
    }

    #[tokio::test]
    async fn test_validate_without_roles_or_accounts() {
        let assumer = FakeAssumer { denied: vec![] };
        let ctx = OperationContext::new();

        let empty = AccountRegistry::new("lornu");
        let report = empty.validate_configuration(&ctx, &assumer).await;
        assert!(report.is_valid);
        assert!(report.accounts.is_empty());

        let registry = AccountRegistry::new("lornu");
        registry
            .add_account(AccountConfig::new("123456789012", "bare"))
            .unwrap();
        let report = registry.validate_configuration(&ctx, &assumer).await;
        assert!(report.is_valid);
        assert!(report.accounts[0].is_valid);
        assert!(report.accounts[0].roles.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_local() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/accounts.json");
        let path = path.to_str().unwrap();

        let registry = AccountRegistry::new("lornu");
        registry.add_account(prod()).unwrap();
        registry.save_config(path).await.unwrap();

        let raw = std::fs::read_to_string(path).unwrap();
        assert!(raw.contains("\"masterAccount\""));
        assert!(raw.contains("\"accountId\": \"123456789012\""));

        let restored = AccountRegistry::new("other");
        restored.load_config(path).await.unwrap();
        assert_eq!(restored.config().organization, "lornu");
        assert_eq!(restored.list_accounts(), registry.list_accounts());
    }

    #[tokio::test]
    async fn test_save_and_load_object_store() {
        let store = Arc::new(MemoryStore::default());
        let registry = AccountRegistry::new("lornu");
        registry.register_object_store("s3", store.clone());
        registry.add_account(prod()).unwrap();
        registry
            .save_config("s3://config-bucket/accounts.json")
            .await
            .unwrap();

        let restored = AccountRegistry::new("other");
        restored.register_object_store("s3", store);
        restored
            .load_config("s3://config-bucket/accounts.json")
            .await
            .unwrap();
        assert_eq!(restored.list_accounts().len(), 1);

        assert!(matches!(
            restored.save_config("gs://bucket/x.json").await,
            Err(RegistryError::UnsupportedScheme(_))
        ));
    }
}
