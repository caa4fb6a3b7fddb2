//! Cross-account session manager
//!
//! Issues assumed-role sessions (single hop, MFA, linear chains) and keeps
//! them fresh. One background worker drains a `RefreshScheduler`; each
//! refresh re-assumes with the identity that created the session and swaps
//! the credentials in place.
//!
//! ## Lifecycle
//!
//! ```text
//! assume_* ──► Active ──(refresh_at)──► refresh ──ok──► Active (rescheduled)
//!                │                         └─err──► Active on old creds, retry later
//!                └──(expires_at passes)──► Expired (still queryable)
//! close_session / close ──► removed, in-flight refresh cancelled
//! ```

use super::accounts::{AccountRegistry, RegistryError};
use super::assumer::RoleAssumer;
use super::mfa;
use super::scheduler::{RefreshScheduler, ScheduledRefresh};
use super::types::{
    validate_role_arn, AssumeRoleOptions, ChainStepCredentials, CrossAccountSession,
    IdentityError, RoleChainStep, RoleValidation,
};
use crate::cloud::{CloudProvider, Credentials};
use crate::resilience::{OperationContext, RetryPolicy};
use crate::store::CredentialStore;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Result<T> = std::result::Result<T, IdentityError>;

/// Tunables for the session manager
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// How long before expiry a session is refreshed
    pub refresh_threshold: Duration,
    pub max_chain_steps: usize,
    /// Attempts per chain step
    pub retry_attempts: u32,
    /// Linear backoff unit between chain-step attempts
    pub retry_delay: Duration,
    /// Wait before retrying a failed background refresh
    pub refresh_retry_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::from_secs(5 * 60),
            max_chain_steps: 5,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            refresh_retry_interval: Duration::from_secs(30),
        }
    }
}

impl SessionSettings {
    fn threshold(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.refresh_threshold).unwrap_or_else(|_| ChronoDuration::minutes(5))
    }

    fn step_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.retry_attempts, self.retry_delay)
            .with_max_delay(self.retry_delay.saturating_mul(self.retry_attempts.max(1)))
    }
}

/// How a session was obtained, kept so a refresh can repeat it
#[derive(Clone)]
enum SessionOrigin {
    Single {
        options: AssumeRoleOptions,
        caller: Option<Credentials>,
    },
    Chain {
        steps: Vec<RoleChainStep>,
        caller: Option<Credentials>,
    },
}

impl SessionOrigin {
    fn uses_mfa(&self) -> bool {
        match self {
            SessionOrigin::Single { options, .. } => options.has_mfa(),
            SessionOrigin::Chain { steps, .. } => steps
                .iter()
                .any(|s| s.options.as_ref().is_some_and(|o| o.has_mfa())),
        }
    }

    fn caches_credentials(&self) -> bool {
        match self {
            SessionOrigin::Single { options, .. } => options.enable_credential_cache,
            SessionOrigin::Chain { steps, .. } => steps
                .last()
                .and_then(|s| s.options.as_ref())
                .map_or(true, |o| o.enable_credential_cache),
        }
    }
}

struct SessionEntry {
    session: CrossAccountSession,
    origin: SessionOrigin,
    auto_refresh: bool,
    generation: u64,
    token: CancellationToken,
}

struct Inner {
    assumer: Arc<dyn RoleAssumer>,
    settings: SessionSettings,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    scheduler: RefreshScheduler,
    store: Option<Arc<CredentialStore>>,
    generation: AtomicU64,
    root: CancellationToken,
}

/// Owns live assumed-role sessions and their refresh worker.
///
/// Must be created inside a Tokio runtime. Dropping the manager cancels the
/// worker; `close()` also waits for it to finish.
pub struct CrossAccountSessionManager {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CrossAccountSessionManager {
    pub fn new(assumer: Arc<dyn RoleAssumer>, settings: SessionSettings) -> Self {
        Self::build(assumer, settings, None)
    }

    /// Also persist issued credentials when the options ask for it
    pub fn with_store(
        assumer: Arc<dyn RoleAssumer>,
        settings: SessionSettings,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self::build(assumer, settings, Some(store))
    }

    fn build(
        assumer: Arc<dyn RoleAssumer>,
        settings: SessionSettings,
        store: Option<Arc<CredentialStore>>,
    ) -> Self {
        let inner = Arc::new(Inner {
            assumer,
            settings,
            sessions: RwLock::new(HashMap::new()),
            scheduler: RefreshScheduler::new(),
            store,
            generation: AtomicU64::new(0),
            root: CancellationToken::new(),
        });
        let worker = tokio::spawn(run_refresh_loop(inner.clone()));
        info!(
            max_chain_steps = inner.settings.max_chain_steps,
            refresh_threshold_secs = inner.settings.refresh_threshold.as_secs(),
            "Session manager started"
        );
        Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Assume a role with the ambient identity
    pub async fn assume_role(
        &self,
        ctx: &OperationContext,
        role_arn: &str,
        options: AssumeRoleOptions,
    ) -> Result<CrossAccountSession> {
        self.assume_single(ctx, role_arn, options, None).await
    }

    /// Assume a role authenticated as `caller`
    pub async fn assume_role_with_credentials(
        &self,
        ctx: &OperationContext,
        role_arn: &str,
        options: AssumeRoleOptions,
        caller: Credentials,
    ) -> Result<CrossAccountSession> {
        self.assume_single(ctx, role_arn, options, Some(caller)).await
    }

    /// Assume a role whose trust policy demands MFA.
    ///
    /// Token codes are single-use, so the session is not auto-refreshed.
    pub async fn assume_role_with_mfa(
        &self,
        ctx: &OperationContext,
        role_arn: &str,
        serial_number: &str,
        token_code: &str,
        options: AssumeRoleOptions,
    ) -> Result<CrossAccountSession> {
        mfa::validate_serial(serial_number)?;
        mfa::validate_token(token_code)?;
        let options = options.mfa(serial_number, token_code);
        info!(
            role_arn = %role_arn,
            device = %mfa::device_type(serial_number),
            "Assuming role with MFA"
        );
        self.assume_single(ctx, role_arn, options, None).await
    }

    /// Assume a role configured in the account registry, applying the
    /// account's and role's duration, external ID, and region settings
    pub async fn assume_account_role(
        &self,
        ctx: &OperationContext,
        registry: &AccountRegistry,
        account_id: &str,
        role_name: &str,
        options: AssumeRoleOptions,
    ) -> Result<CrossAccountSession> {
        let account = registry.get_account(account_id)?;
        let role = account
            .find_role(role_name)
            .ok_or_else(|| RegistryError::RoleNotFound {
                account_id: account_id.to_string(),
                role_name: role_name.to_string(),
            })?;

        let mut options = options;
        if let Some(duration) = role.session_duration.or(account.session_duration) {
            options.duration_seconds = duration;
        }
        if options.external_id.is_none() {
            options.external_id = account.role_external_id(role).map(str::to_string);
        }
        if options.region.is_none() && !account.default_region.is_empty() {
            options.region = Some(account.default_region.clone());
        }
        if account.role_requires_mfa(role) && !options.has_mfa() {
            return Err(IdentityError::MfaRequired {
                role_arn: role.role_arn.clone(),
            });
        }
        if let (Some(serial), Some(code)) = (&options.mfa_serial_number, &options.mfa_token_code) {
            mfa::validate_serial(serial)?;
            mfa::validate_token(code)?;
        }

        self.assume_single(ctx, &role.role_arn, options, None).await
    }

    async fn assume_single(
        &self,
        ctx: &OperationContext,
        role_arn: &str,
        options: AssumeRoleOptions,
        caller: Option<Credentials>,
    ) -> Result<CrossAccountSession> {
        self.ensure_open()?;
        validate_role_arn(role_arn)?;
        options.validate()?;

        let credentials = self
            .inner
            .assumer
            .assume_role(ctx, role_arn, &options, caller.as_ref())
            .await?;

        let session = CrossAccountSession::new(
            role_arn,
            role_arn,
            options.session_name.clone(),
            credentials,
            ChronoDuration::seconds(i64::from(options.duration_seconds)),
            self.inner.settings.threshold(),
        );
        let auto_refresh = options.enable_auto_refresh && !options.has_mfa();
        let origin = SessionOrigin::Single { options, caller };
        self.register(session, origin, auto_refresh)
    }

    /// Assume each role in turn, each step authenticated with the previous
    /// step's credentials (the first with `caller`, or the ambient identity)
    pub async fn assume_role_chain(
        &self,
        ctx: &OperationContext,
        steps: Vec<RoleChainStep>,
        caller: Option<Credentials>,
    ) -> Result<CrossAccountSession> {
        self.ensure_open()?;
        validate_chain(&steps, self.inner.settings.max_chain_steps)?;

        let chain_id = short_id();
        let chain = self.inner.run_chain(ctx, &chain_id, &steps, caller.as_ref()).await?;
        let Some(last) = chain.last() else {
            return Err(IdentityError::ChainValidation {
                step: 0,
                reason: "role chain cannot be empty".to_string(),
            });
        };

        let final_step = &steps[steps.len() - 1];
        let final_options = step_options(final_step, &chain_id, steps.len() - 1);
        let mut session = CrossAccountSession::new(
            format!("{}#chain-{}", last.role_arn, chain_id),
            last.role_arn.clone(),
            final_options.session_name.clone(),
            last.credentials.clone(),
            ChronoDuration::seconds(i64::from(final_options.duration_seconds)),
            self.inner.settings.threshold(),
        );
        session.chain = chain;

        let origin = SessionOrigin::Chain { steps, caller };
        let auto_refresh = final_options.enable_auto_refresh && !origin.uses_mfa();
        info!(
            session_id = %session.id,
            steps = session.chain.len(),
            "Role chain assumed"
        );
        self.register(session, origin, auto_refresh)
    }

    /// Check whether `step` could be assumed from `previous` credentials
    /// without creating a session
    pub async fn validate_chain_step(
        &self,
        ctx: &OperationContext,
        step: &RoleChainStep,
        previous: Option<&Credentials>,
    ) -> Result<RoleValidation> {
        validate_role_arn(&step.role_arn)?;
        let mut validation = self
            .inner
            .assumer
            .validate_role(ctx, &step.role_arn, previous)
            .await?;

        let external_id = step
            .external_id
            .as_ref()
            .or_else(|| step.options.as_ref().and_then(|o| o.external_id.as_ref()));
        if validation.external_id_required && external_id.is_none() {
            validation.can_assume = false;
            validation.message = Some("trust policy requires an external ID".to_string());
        }
        let has_mfa = step.options.as_ref().is_some_and(|o| o.has_mfa());
        if validation.mfa_required && !has_mfa {
            validation.can_assume = false;
            validation.message = Some("trust policy requires MFA".to_string());
        }
        Ok(validation)
    }

    pub fn get_session(&self, session_id: &str) -> Result<CrossAccountSession> {
        self.inner
            .sessions
            .read()
            .get(session_id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| IdentityError::SessionNotFound(session_id.to_string()))
    }

    /// Like `get_session`, but expired sessions are an error
    pub fn get_valid_session(&self, session_id: &str) -> Result<CrossAccountSession> {
        let session = self.get_session(session_id)?;
        if session.is_expired() {
            return Err(IdentityError::SessionExpired(session_id.to_string()));
        }
        Ok(session)
    }

    /// All sessions, expired ones included
    pub fn list_sessions(&self) -> Vec<CrossAccountSession> {
        self.inner
            .sessions
            .read()
            .values()
            .map(|entry| entry.session.clone())
            .collect()
    }

    pub fn list_active_sessions(&self) -> Vec<CrossAccountSession> {
        self.inner
            .sessions
            .read()
            .values()
            .filter(|entry| !entry.session.is_expired())
            .map(|entry| entry.session.clone())
            .collect()
    }

    /// Refresh a session now, outside the schedule
    pub async fn refresh_session(
        &self,
        ctx: &OperationContext,
        session_id: &str,
    ) -> Result<CrossAccountSession> {
        self.ensure_open()?;
        self.inner.refresh(ctx, session_id, None).await
    }

    /// Forget a session and cancel any refresh in flight for it
    pub fn close_session(&self, session_id: &str) -> Result<()> {
        let entry = self
            .inner
            .sessions
            .write()
            .remove(session_id)
            .ok_or_else(|| IdentityError::SessionNotFound(session_id.to_string()))?;
        entry.token.cancel();
        info!(session_id = %session_id, "Session closed");
        Ok(())
    }

    /// Stop the refresh worker and drop all sessions. Idempotent.
    pub async fn close(&self) {
        self.inner.root.cancel();
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!(error = %e, "Refresh worker ended abnormally");
            }
            let closed = {
                let mut sessions = self.inner.sessions.write();
                let count = sessions.len();
                sessions.clear();
                count
            };
            info!(sessions = closed, "Session manager closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.root.is_cancelled()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(IdentityError::Closed);
        }
        Ok(())
    }

    fn register(
        &self,
        session: CrossAccountSession,
        origin: SessionOrigin,
        auto_refresh: bool,
    ) -> Result<CrossAccountSession> {
        if origin.caches_credentials() {
            self.inner.persist(&session)?;
        }

        let generation = self.inner.next_generation();
        let entry = SessionEntry {
            session: session.clone(),
            origin,
            auto_refresh,
            generation,
            token: self.inner.root.child_token(),
        };
        let replaced = self
            .inner
            .sessions
            .write()
            .insert(session.id.clone(), entry);
        if let Some(old) = replaced {
            old.token.cancel();
        }

        if auto_refresh {
            self.inner
                .scheduler
                .schedule(session.id.clone(), generation, session.refresh_at());
        }
        info!(
            session_id = %session.id,
            role_arn = %session.role_arn,
            expires_at = %session.expires_at,
            auto_refresh,
            "Session registered"
        );
        Ok(session)
    }
}

impl Drop for CrossAccountSessionManager {
    fn drop(&mut self) {
        self.inner.root.cancel();
    }
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn persist(&self, session: &CrossAccountSession) -> Result<()> {
        if let Some(store) = &self.store {
            store.store(CloudProvider::Aws, &session.session_name, &session.credentials)?;
        }
        Ok(())
    }

    /// Run a chain, retrying each step with linear backoff
    async fn run_chain(
        &self,
        ctx: &OperationContext,
        chain_id: &str,
        steps: &[RoleChainStep],
        caller: Option<&Credentials>,
    ) -> Result<Vec<ChainStepCredentials>> {
        let policy = self.settings.step_retry_policy();
        let mut results: Vec<ChainStepCredentials> = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let options = step_options(step, chain_id, index);
            let previous = results.last().map(|r| &r.credentials).or(caller);

            let mut attempt = 0;
            let credentials = loop {
                attempt += 1;
                if ctx.is_cancelled() {
                    return Err(IdentityError::Cancelled);
                }
                match self
                    .assumer
                    .assume_role(ctx, &step.role_arn, &options, previous)
                    .await
                {
                    Ok(creds) => break creds,
                    Err(e) if e.is_retryable() && attempt < policy.max_attempts() => {
                        let delay = policy.delay_for(attempt);
                        warn!(
                            step = index + 1,
                            role_arn = %step.role_arn,
                            attempt,
                            error = %e,
                            "Chain step failed, retrying"
                        );
                        if !ctx.sleep(delay).await {
                            return Err(IdentityError::Cancelled);
                        }
                    }
                    Err(IdentityError::Cancelled) => return Err(IdentityError::Cancelled),
                    Err(e) => {
                        return Err(IdentityError::ChainStepFailed {
                            step: index + 1,
                            role_arn: step.role_arn.clone(),
                            source: Box::new(e),
                        })
                    }
                }
            };

            debug!(step = index + 1, role_arn = %step.role_arn, "Chain step assumed");
            results.push(ChainStepCredentials {
                step_index: index,
                role_arn: step.role_arn.clone(),
                credentials,
                assumed_at: Utc::now(),
            });
        }
        Ok(results)
    }

    /// Re-assume a session with its original identity and swap credentials.
    ///
    /// With `expected_generation`, a refresh whose entry was superseded in
    /// the meantime is dropped.
    async fn refresh(
        &self,
        ctx: &OperationContext,
        session_id: &str,
        expected_generation: Option<u64>,
    ) -> Result<CrossAccountSession> {
        let (origin, role_arn, token) = {
            let sessions = self.sessions.read();
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| IdentityError::SessionNotFound(session_id.to_string()))?;
            if expected_generation.is_some_and(|g| g != entry.generation) {
                return Ok(entry.session.clone());
            }
            (entry.origin.clone(), entry.session.role_arn.clone(), entry.token.clone())
        };
        if origin.uses_mfa() {
            return Err(IdentityError::MfaRequired { role_arn });
        }

        let scoped = ctx.child();
        let work = async {
            match &origin {
                SessionOrigin::Single { options, caller } => {
                    let creds = self
                        .assumer
                        .assume_role(&scoped, &role_arn, options, caller.as_ref())
                        .await?;
                    let lifetime = ChronoDuration::seconds(i64::from(options.duration_seconds));
                    Ok::<_, IdentityError>((creds, lifetime, Vec::new()))
                }
                SessionOrigin::Chain { steps, caller } => {
                    let chain_id = short_id();
                    let chain = self
                        .run_chain(&scoped, &chain_id, steps, caller.as_ref())
                        .await?;
                    let last = chain.last().map(|c| c.credentials.clone()).ok_or_else(|| {
                        IdentityError::ChainValidation {
                            step: 0,
                            reason: "role chain cannot be empty".to_string(),
                        }
                    })?;
                    let lifetime = steps
                        .last()
                        .and_then(|s| s.options.as_ref())
                        .map_or(3600, |o| o.duration_seconds);
                    Ok::<_, IdentityError>((last, ChronoDuration::seconds(i64::from(lifetime)), chain))
                }
            }
        };

        let (credentials, lifetime, chain) = tokio::select! {
            _ = token.cancelled() => return Err(IdentityError::Cancelled),
            result = work => result?,
        };

        let (updated, generation, auto_refresh) = {
            let mut sessions = self.sessions.write();
            let entry = sessions
                .get_mut(session_id)
                .ok_or_else(|| IdentityError::SessionNotFound(session_id.to_string()))?;
            if token.is_cancelled() {
                return Err(IdentityError::Cancelled);
            }
            entry.session
                .update_credentials(credentials, lifetime, self.settings.threshold());
            if !chain.is_empty() {
                entry.session.chain = chain;
            }
            entry.generation = self.next_generation();
            (entry.session.clone(), entry.generation, entry.auto_refresh)
        };

        if origin.caches_credentials() {
            if let Err(e) = self.persist(&updated) {
                warn!(session_id = %session_id, error = %e, "Failed to persist refreshed credentials");
            }
        }
        if auto_refresh {
            self.scheduler
                .schedule(session_id.to_string(), generation, updated.refresh_at());
        }
        info!(
            session_id = %session_id,
            expires_at = %updated.expires_at,
            "Session refreshed"
        );
        Ok(updated)
    }

    async fn handle_due(&self, due: ScheduledRefresh) {
        let ctx = OperationContext::from_token(self.root.child_token());
        match self.refresh(&ctx, &due.session_id, Some(due.generation)).await {
            Ok(_) => {}
            Err(IdentityError::SessionNotFound(_)) | Err(IdentityError::Cancelled) => {
                debug!(session_id = %due.session_id, "Skipping refresh for closed session");
            }
            Err(e) => {
                let expires_at = self
                    .sessions
                    .read()
                    .get(&due.session_id)
                    .filter(|entry| entry.generation == due.generation)
                    .map(|entry| entry.session.expires_at);
                let Some(expires_at) = expires_at else {
                    return;
                };
                let retry_at = Utc::now()
                    + ChronoDuration::from_std(self.settings.refresh_retry_interval)
                        .unwrap_or_else(|_| ChronoDuration::seconds(30));
                if retry_at < expires_at {
                    warn!(
                        session_id = %due.session_id,
                        error = %e,
                        retry_at = %retry_at,
                        "Session refresh failed, keeping current credentials"
                    );
                    self.scheduler
                        .schedule(due.session_id.clone(), due.generation, retry_at);
                } else {
                    error!(
                        session_id = %due.session_id,
                        error = %e,
                        expires_at = %expires_at,
                        "Session refresh failed, session will expire"
                    );
                }
            }
        }
    }
}

async fn run_refresh_loop(inner: Arc<Inner>) {
    debug!("Refresh worker started");
    loop {
        let wait = inner.scheduler.next_wait();
        let sleep = async {
            match wait {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = inner.root.cancelled() => break,
            _ = inner.scheduler.changed() => continue,
            _ = sleep => {}
        }

        for due in inner.scheduler.pop_due(Utc::now()) {
            if inner.root.is_cancelled() {
                break;
            }
            inner.handle_due(due).await;
        }
    }
    debug!("Refresh worker stopped");
}

/// Reject malformed chains before any role is assumed
pub fn validate_chain(steps: &[RoleChainStep], max_steps: usize) -> Result<()> {
    if steps.is_empty() {
        return Err(IdentityError::ChainValidation {
            step: 0,
            reason: "role chain cannot be empty".to_string(),
        });
    }
    if steps.len() > max_steps {
        return Err(IdentityError::ChainTooLong {
            len: steps.len(),
            max: max_steps,
        });
    }

    let mut seen = HashSet::new();
    for (index, step) in steps.iter().enumerate() {
        let step_no = index + 1;
        if step.role_arn.is_empty() {
            return Err(IdentityError::ChainValidation {
                step: step_no,
                reason: "role ARN cannot be empty".to_string(),
            });
        }
        if !step.role_arn.starts_with("arn:aws:iam::") {
            return Err(IdentityError::ChainValidation {
                step: step_no,
                reason: format!("invalid role ARN format: {}", step.role_arn),
            });
        }
        if !seen.insert(step.role_arn.as_str()) {
            return Err(IdentityError::ChainValidation {
                step: step_no,
                reason: format!("role {} appears more than once", step.role_arn),
            });
        }
        if step.external_id.as_ref().is_some_and(|id| id.len() < 2) {
            return Err(IdentityError::ChainValidation {
                step: step_no,
                reason: "external ID must be at least 2 characters".to_string(),
            });
        }
        if let Some(options) = &step.options {
            options.validate().map_err(|e| IdentityError::ChainValidation {
                step: step_no,
                reason: e.to_string(),
            })?;
        }
    }
    Ok(())
}

/// Effective options for one chain step
fn step_options(step: &RoleChainStep, chain_id: &str, index: usize) -> AssumeRoleOptions {
    let mut options = step.options.clone().unwrap_or_default();
    options.session_name = step
        .session_name
        .clone()
        .unwrap_or_else(|| format!("lornu-chain-{}-step-{}", chain_id, index + 1));
    if step.external_id.is_some() {
        options.external_id = step.external_id.clone();
    }
    options
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
