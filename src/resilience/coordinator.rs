//! Degradation coordinator
//!
//! Runs a provider operation through the retry executor and, when it fails,
//! picks a remediation based on how degraded the (provider, operation) pair
//! has become:
//!
//! | Level        | Remediation                                                   |
//! |--------------|---------------------------------------------------------------|
//! | None / Minor | fresh cache, one more executor pass, custom handler           |
//! | Major        | one hop of provider fallback, fresh cache, custom handler     |
//! | Severe       | cache up to 3x TTL, empty partial result, custom handler      |
//! | Complete     | cache of any age, empty partial result                        |
//!
//! ## Example Usage
//!
//! ```ignore
//! let coordinator = DegradationCoordinator::default();
//! let ctx = OperationContext::new().with_timeout(Duration::from_secs(30));
//!
//! let clusters = coordinator
//!     .execute_with_degradation(&ctx, CloudProvider::Aws, Operation::ListClusters, |ctx, provider| {
//!         let client = client.clone();
//!         async move { client.list_clusters(ctx, provider).await }
//!     })
//!     .await?;
//! ```

use super::cache::{CacheAcceptance, ResultCache};
use super::context::OperationContext;
use super::executor::CircuitBreakerRetryExecutor;
use super::health::HealthTracker;
use super::types::{
    DegradationLevel, Operation, OperationResult, ResilienceError, ServiceHealth, ServiceKey,
};
use crate::cloud::{CloudError, CloudProvider, ErrorCode};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Last-resort callback invoked with the original failure
pub type DegradationHandler = Arc<
    dyn Fn(OperationContext, ResilienceError) -> BoxFuture<'static, Result<OperationResult, ResilienceError>>
        + Send
        + Sync,
>;

/// Wrap an async closure as a `DegradationHandler`
pub fn degradation_handler<F, Fut>(handler: F) -> DegradationHandler
where
    F: Fn(OperationContext, ResilienceError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<OperationResult, ResilienceError>> + Send + 'static,
{
    Arc::new(move |ctx, err| handler(ctx, err).boxed())
}

/// Per-operation remediation policy
#[derive(Clone)]
pub struct DegradationStrategy {
    pub fallback_enabled: bool,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub partial_results_allowed: bool,
    /// Overrides the provider's built-in fallback chain when non-empty
    pub fallback_providers: Vec<CloudProvider>,
    pub disabled_features: HashSet<String>,
    pub custom_handler: Option<DegradationHandler>,
}

impl std::fmt::Debug for DegradationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradationStrategy")
            .field("fallback_enabled", &self.fallback_enabled)
            .field("cache_enabled", &self.cache_enabled)
            .field("cache_ttl", &self.cache_ttl)
            .field("partial_results_allowed", &self.partial_results_allowed)
            .field("fallback_providers", &self.fallback_providers)
            .field("disabled_features", &self.disabled_features)
            .field("custom_handler", &self.custom_handler.is_some())
            .finish()
    }
}

impl Default for DegradationStrategy {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(5 * 60),
            partial_results_allowed: false,
            fallback_providers: Vec::new(),
            disabled_features: HashSet::new(),
            custom_handler: None,
        }
    }
}

impl DegradationStrategy {
    /// Built-in strategy for an operation
    pub fn for_operation(operation: &Operation) -> Self {
        let base = Self::default();
        match operation {
            Operation::Authenticate => base,
            Operation::ListClusters | Operation::ListRegistries => base
                .cache_ttl(Duration::from_secs(10 * 60))
                .partial_results(true),
            Operation::GetCluster | Operation::GetRegistry => {
                base.cache_ttl(Duration::from_secs(15 * 60))
            }
            Operation::AuthenticateRegistry => base.cache_ttl(Duration::from_secs(30 * 60)),
            Operation::Custom(_) => base,
        }
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn partial_results(mut self, allowed: bool) -> Self {
        self.partial_results_allowed = allowed;
        self
    }

    pub fn fallback_providers(mut self, providers: Vec<CloudProvider>) -> Self {
        self.fallback_providers = providers;
        self
    }

    pub fn disable_feature(mut self, feature: impl Into<String>) -> Self {
        self.disabled_features.insert(feature.into());
        self
    }

    pub fn handler(mut self, handler: DegradationHandler) -> Self {
        self.custom_handler = Some(handler);
        self
    }
}

/// Orchestrates cache, retries, provider fallback, and partial results.
///
/// Health is recorded once per `execute_with_degradation` call, so the
/// executor given to `new` should not have health reporting enabled for the
/// same tracker.
pub struct DegradationCoordinator {
    health: Arc<HealthTracker>,
    executor: Arc<CircuitBreakerRetryExecutor>,
    cache: ResultCache,
    strategies: RwLock<HashMap<Operation, DegradationStrategy>>,
}

impl Default for DegradationCoordinator {
    fn default() -> Self {
        Self::new(
            Arc::new(HealthTracker::default()),
            Arc::new(CircuitBreakerRetryExecutor::default()),
        )
    }
}

impl DegradationCoordinator {
    pub fn new(health: Arc<HealthTracker>, executor: Arc<CircuitBreakerRetryExecutor>) -> Self {
        let strategies = Operation::KNOWN
            .into_iter()
            .map(|op| {
                let strategy = DegradationStrategy::for_operation(&op);
                (op, strategy)
            })
            .collect();

        Self {
            health,
            executor,
            cache: ResultCache::new(),
            strategies: RwLock::new(strategies),
        }
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn executor(&self) -> &Arc<CircuitBreakerRetryExecutor> {
        &self.executor
    }

    /// Strategy in effect for an operation
    pub fn strategy(&self, operation: &Operation) -> DegradationStrategy {
        self.strategies
            .read()
            .get(operation)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_strategy(&self, operation: Operation, strategy: DegradationStrategy) {
        self.strategies.write().insert(operation, strategy);
    }

    /// Register a last-resort handler, keeping the rest of the strategy
    pub fn set_custom_handler(&self, operation: Operation, handler: DegradationHandler) {
        self.strategies
            .write()
            .entry(operation)
            .or_default()
            .custom_handler = Some(handler);
    }

    pub fn is_feature_disabled(&self, operation: &Operation, feature: &str) -> bool {
        self.strategies
            .read()
            .get(operation)
            .map(|s| s.disabled_features.contains(feature))
            .unwrap_or(false)
    }

    pub fn get_health_status(&self) -> HashMap<ServiceKey, ServiceHealth> {
        self.health.snapshot()
    }

    pub fn reset_health(&self, key: &ServiceKey) {
        self.health.reset(key);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Run `primary_op` for `provider`, degrading gracefully on failure
    pub async fn execute_with_degradation<F, Fut>(
        &self,
        ctx: &OperationContext,
        provider: CloudProvider,
        operation: impl Into<Operation>,
        primary_op: F,
    ) -> Result<OperationResult, ResilienceError>
    where
        F: Fn(OperationContext, CloudProvider) -> Fut,
        Fut: Future<Output = anyhow::Result<OperationResult>>,
    {
        let operation = operation.into();
        let key = ServiceKey::new(provider, operation.clone());
        let strategy = self.strategy(&operation);

        if ctx.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }

        if strategy.cache_enabled {
            if let Some(cached) = self.cache.get(&key, CacheAcceptance::Fresh) {
                debug!(service = %key, "Serving cached result");
                return Ok(cached);
            }
        }

        let started = Instant::now();
        let outcome = self
            .executor
            .execute(ctx, &key, |attempt_ctx, _attempt| primary_op(attempt_ctx, provider))
            .await;
        let elapsed = started.elapsed();

        let err = match outcome {
            Ok(result) => {
                if strategy.cache_enabled {
                    self.cache.put(key.clone(), result.clone(), strategy.cache_ttl);
                }
                self.health.record_outcome(&key, true, None, elapsed);
                return Ok(result);
            }
            Err(ResilienceError::Cancelled) => return Err(ResilienceError::Cancelled),
            Err(err) => err,
        };

        let message = err.to_string();
        let health = self
            .health
            .record_outcome(&key, false, Some(&message), elapsed);
        let level = health.degradation_level;

        warn!(
            provider = %provider,
            operation = %operation,
            level = %level,
            error_count = health.error_count,
            error = %message,
            "Operation failed, applying degradation strategy"
        );

        match level {
            DegradationLevel::None | DegradationLevel::Minor => {
                self.handle_light(ctx, &key, &strategy, &primary_op, err).await
            }
            DegradationLevel::Major => {
                self.handle_major(ctx, &key, &strategy, &primary_op, err).await
            }
            DegradationLevel::Severe => self.handle_severe(ctx, &key, &strategy, err).await,
            DegradationLevel::Complete => self.handle_complete(&key, &strategy),
        }
    }

    async fn handle_light<F, Fut>(
        &self,
        ctx: &OperationContext,
        key: &ServiceKey,
        strategy: &DegradationStrategy,
        primary_op: &F,
        original: ResilienceError,
    ) -> Result<OperationResult, ResilienceError>
    where
        F: Fn(OperationContext, CloudProvider) -> Fut,
        Fut: Future<Output = anyhow::Result<OperationResult>>,
    {
        if strategy.cache_enabled {
            if let Some(cached) = self.cache.get(key, CacheAcceptance::Fresh) {
                return Ok(cached);
            }
        }

        let provider = key.provider;
        match self
            .executor
            .execute(ctx, key, |attempt_ctx, _attempt| primary_op(attempt_ctx, provider))
            .await
        {
            Ok(result) => {
                if strategy.cache_enabled {
                    self.cache.put(key.clone(), result.clone(), strategy.cache_ttl);
                }
                Ok(result)
            }
            Err(ResilienceError::Cancelled) => Err(ResilienceError::Cancelled),
            Err(_) => self.try_handler(ctx, strategy, original).await,
        }
    }

    async fn handle_major<F, Fut>(
        &self,
        ctx: &OperationContext,
        key: &ServiceKey,
        strategy: &DegradationStrategy,
        primary_op: &F,
        original: ResilienceError,
    ) -> Result<OperationResult, ResilienceError>
    where
        F: Fn(OperationContext, CloudProvider) -> Fut,
        Fut: Future<Output = anyhow::Result<OperationResult>>,
    {
        if strategy.fallback_enabled {
            let chain: &[CloudProvider] = if strategy.fallback_providers.is_empty() {
                key.provider.fallback_chain()
            } else {
                &strategy.fallback_providers
            };

            for &alternate in chain.iter().filter(|p| **p != key.provider) {
                if ctx.is_cancelled() {
                    return Err(ResilienceError::Cancelled);
                }

                let alt_key = ServiceKey::new(alternate, key.operation.clone());
                let usable = self
                    .health
                    .level(&alt_key)
                    .map(|level| level <= DegradationLevel::Minor)
                    .unwrap_or(true);
                if !usable {
                    debug!(service = %alt_key, "Skipping degraded fallback provider");
                    continue;
                }

                let started = Instant::now();
                match primary_op(ctx.child(), alternate).await {
                    Ok(result) => {
                        self.health
                            .record_outcome(&alt_key, true, None, started.elapsed());
                        info!(
                            operation = %key.operation,
                            from = %key.provider,
                            to = %alternate,
                            "Served by fallback provider"
                        );
                        return Ok(result);
                    }
                    Err(e) => {
                        let message = e.to_string();
                        self.health
                            .record_outcome(&alt_key, false, Some(&message), started.elapsed());
                        warn!(service = %alt_key, error = %message, "Fallback provider failed");
                    }
                }
            }
        }

        if strategy.cache_enabled {
            if let Some(cached) = self.cache.get(key, CacheAcceptance::Fresh) {
                return Ok(cached);
            }
        }

        self.try_handler(ctx, strategy, original).await
    }

    async fn handle_severe(
        &self,
        ctx: &OperationContext,
        key: &ServiceKey,
        strategy: &DegradationStrategy,
        original: ResilienceError,
    ) -> Result<OperationResult, ResilienceError> {
        if strategy.cache_enabled {
            if let Some(cached) = self.cache.get(key, CacheAcceptance::Extended(3)) {
                info!(service = %key, "Serving stale cached result under severe degradation");
                return Ok(cached);
            }
        }

        if strategy.partial_results_allowed {
            info!(service = %key, "Serving empty partial result under severe degradation");
            return Ok(key.operation.empty_result());
        }

        if strategy.custom_handler.is_some() {
            return self.try_handler(ctx, strategy, original).await;
        }

        Err(unavailable(
            key,
            DegradationLevel::Severe,
            "Service is severely degraded",
            "The cloud service is experiencing severe issues. Some features may be unavailable.",
        ))
    }

    fn handle_complete(
        &self,
        key: &ServiceKey,
        strategy: &DegradationStrategy,
    ) -> Result<OperationResult, ResilienceError> {
        if strategy.cache_enabled {
            if let Some(cached) = self.cache.get(key, CacheAcceptance::AnyAge) {
                info!(service = %key, "Serving cached result of any age, service unavailable");
                return Ok(cached);
            }
        }

        if strategy.partial_results_allowed {
            return Ok(key.operation.empty_result());
        }

        Err(unavailable(
            key,
            DegradationLevel::Complete,
            "Service is completely unavailable",
            "The cloud service is completely unavailable. Please try again later.",
        ))
    }

    async fn try_handler(
        &self,
        ctx: &OperationContext,
        strategy: &DegradationStrategy,
        original: ResilienceError,
    ) -> Result<OperationResult, ResilienceError> {
        match &strategy.custom_handler {
            Some(handler) => handler(ctx.clone(), original).await,
            None => Err(original),
        }
    }
}

fn unavailable(
    key: &ServiceKey,
    level: DegradationLevel,
    message: &str,
    user_message: &str,
) -> ResilienceError {
    ResilienceError::Unavailable(
        CloudError::new(
            key.provider,
            key.operation.as_str(),
            ErrorCode::ServiceUnavailable,
            message,
        )
        .user_message(user_message)
        .detail("degradation_level", level.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{AuthMethod, Cluster, Credentials};
    use crate::resilience::retry::{RetryPolicies, RetryPolicy};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn coordinator() -> DegradationCoordinator {
        let executor = CircuitBreakerRetryExecutor::new(RetryPolicies::new(RetryPolicy::immediate(1)));
        DegradationCoordinator::new(Arc::new(HealthTracker::default()), Arc::new(executor))
    }

    fn preload_failures(c: &DegradationCoordinator, key: &ServiceKey, n: u32) {
        for _ in 0..n {
            c.health()
                .record_outcome(key, false, Some("earlier failure"), Duration::ZERO);
        }
    }

    fn cluster(provider: CloudProvider) -> Cluster {
        Cluster {
            provider,
            name: "prod".to_string(),
            region: "us-east-1".to_string(),
            cluster_type: "EKS".to_string(),
            version: "1.29".to_string(),
            endpoint: "https://example".to_string(),
            node_count: 3,
            status: "ACTIVE".to_string(),
            labels: HashMap::new(),
            properties: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_success_is_cached() {
        let c = coordinator();
        let calls = AtomicU32::new(0);
        let ctx = OperationContext::new();

        for _ in 0..2 {
            let result = c
                .execute_with_degradation(&ctx, CloudProvider::Aws, Operation::GetCluster, |_ctx, p| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(OperationResult::Cluster(cluster(p))) }
                })
                .await
                .unwrap();
            assert!(matches!(result, OperationResult::Cluster(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let key = ServiceKey::new(CloudProvider::Aws, Operation::GetCluster);
        assert!(c.get_health_status()[&key].healthy);
    }

    #[tokio::test]
    async fn test_severe_list_returns_empty_partial_result() {
        let c = coordinator();
        let key = ServiceKey::new(CloudProvider::Aws, Operation::ListClusters);
        preload_failures(&c, &key, 6);

        let result = c
            .execute_with_degradation(
                &OperationContext::new(),
                CloudProvider::Aws,
                Operation::ListClusters,
                |_ctx, _p| async { anyhow::bail!("eks api unavailable") },
            )
            .await
            .unwrap();

        assert_eq!(result, OperationResult::ClusterList(vec![]));
        assert_eq!(c.health().get(&key).unwrap().error_count, 7);
        assert_eq!(
            c.health().level(&key),
            Some(DegradationLevel::Severe)
        );
    }

    #[tokio::test]
    async fn test_major_falls_back_one_provider() {
        let c = coordinator();
        let key = ServiceKey::new(CloudProvider::Aws, Operation::Authenticate);
        preload_failures(&c, &key, 3);

        let azure_calls = AtomicU32::new(0);
        let result = c
            .execute_with_degradation(
                &OperationContext::new(),
                CloudProvider::Aws,
                Operation::Authenticate,
                |_ctx, p| {
                    if p == CloudProvider::Azure {
                        azure_calls.fetch_add(1, Ordering::SeqCst);
                    }
                    async move {
                        match p {
                            CloudProvider::Aws => anyhow::bail!("sts timeout"),
                            other => Ok(OperationResult::Auth(Credentials::new(
                                other,
                                AuthMethod::Sdk,
                            ))),
                        }
                    }
                },
            )
            .await
            .unwrap();

        match result {
            OperationResult::Auth(creds) => assert_eq!(creds.provider, CloudProvider::Gcp),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(azure_calls.load(Ordering::SeqCst), 0);
        assert_eq!(c.health().level(&key), Some(DegradationLevel::Major));
    }

    #[tokio::test]
    async fn test_major_skips_degraded_fallback() {
        let c = coordinator();
        let key = ServiceKey::new(CloudProvider::Aws, Operation::Authenticate);
        preload_failures(&c, &key, 3);
        preload_failures(
            &c,
            &ServiceKey::new(CloudProvider::Gcp, Operation::Authenticate),
            8,
        );

        let gcp_calls = AtomicU32::new(0);
        let result = c
            .execute_with_degradation(
                &OperationContext::new(),
                CloudProvider::Aws,
                Operation::Authenticate,
                |_ctx, p| {
                    if p == CloudProvider::Gcp {
                        gcp_calls.fetch_add(1, Ordering::SeqCst);
                    }
                    async move {
                        match p {
                            CloudProvider::Aws => anyhow::bail!("sts timeout"),
                            other => Ok(OperationResult::Auth(Credentials::new(
                                other,
                                AuthMethod::Sdk,
                            ))),
                        }
                    }
                },
            )
            .await
            .unwrap();

        match result {
            OperationResult::Auth(creds) => assert_eq!(creds.provider, CloudProvider::Azure),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(gcp_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_major_without_fallback_returns_original_error() {
        let c = coordinator();
        c.set_strategy(
            Operation::Authenticate,
            DegradationStrategy::default().fallback(false),
        );
        let key = ServiceKey::new(CloudProvider::Azure, Operation::Authenticate);
        preload_failures(&c, &key, 3);

        let err = c
            .execute_with_degradation(
                &OperationContext::new(),
                CloudProvider::Azure,
                Operation::Authenticate,
                |_ctx, _p| async { anyhow::bail!("aad token endpoint down") },
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("aad token endpoint down"));
    }

    #[tokio::test]
    async fn test_light_degradation_retries_once_more() {
        let c = coordinator();
        let calls = AtomicU32::new(0);

        let result = c
            .execute_with_degradation(
                &OperationContext::new(),
                CloudProvider::Gcp,
                Operation::GetRegistry,
                |_ctx, _p| {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            anyhow::bail!("transient");
                        }
                        Ok(OperationResult::Empty)
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(result, OperationResult::Empty);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_custom_handler_receives_original_error() {
        let c = coordinator();
        c.set_custom_handler(
            Operation::GetRegistry,
            degradation_handler(|_ctx, err| async move {
                assert!(err.to_string().contains("registry gone"));
                Ok(OperationResult::Empty)
            }),
        );

        let result = c
            .execute_with_degradation(
                &OperationContext::new(),
                CloudProvider::Gcp,
                Operation::GetRegistry,
                |_ctx, _p| async { anyhow::bail!("registry gone") },
            )
            .await
            .unwrap();
        assert_eq!(result, OperationResult::Empty);
    }

    #[tokio::test]
    async fn test_severe_serves_extended_cache() {
        let c = coordinator();
        c.set_strategy(
            Operation::GetCluster,
            DegradationStrategy::default().cache_ttl(Duration::from_millis(40)),
        );
        let ctx = OperationContext::new();
        let key = ServiceKey::new(CloudProvider::Aws, Operation::GetCluster);

        c.execute_with_degradation(&ctx, CloudProvider::Aws, Operation::GetCluster, |_c, p| async move {
            Ok(OperationResult::Cluster(cluster(p)))
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        preload_failures(&c, &key, 6);

        let result = c
            .execute_with_degradation(&ctx, CloudProvider::Aws, Operation::GetCluster, |_c, _p| async {
                anyhow::bail!("describe-cluster failed")
            })
            .await
            .unwrap();
        assert_eq!(result, OperationResult::Cluster(cluster(CloudProvider::Aws)));
    }

    #[tokio::test]
    async fn test_complete_without_partial_results_is_unavailable() {
        let c = coordinator();
        let key = ServiceKey::new(CloudProvider::Azure, Operation::GetCluster);
        preload_failures(&c, &key, 11);

        let err = c
            .execute_with_degradation(
                &OperationContext::new(),
                CloudProvider::Azure,
                Operation::GetCluster,
                |_ctx, _p| async { anyhow::bail!("aks down") },
            )
            .await
            .unwrap_err();

        match err {
            ResilienceError::Unavailable(e) => {
                assert_eq!(e.code, ErrorCode::ServiceUnavailable);
                assert_eq!(e.provider, CloudProvider::Azure);
                assert!(e.user_message.contains("completely unavailable"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_call_does_not_touch_health() {
        let c = coordinator();
        let ctx = OperationContext::new();
        ctx.cancel();

        let err = c
            .execute_with_degradation(&ctx, CloudProvider::Aws, Operation::ListRegistries, |_c, _p| async {
                Ok(OperationResult::RegistryList(vec![]))
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(c.get_health_status().is_empty());
    }

    #[test]
    fn test_default_strategies() {
        let c = coordinator();
        let list = c.strategy(&Operation::ListClusters);
        assert!(list.partial_results_allowed);
        assert_eq!(list.cache_ttl, Duration::from_secs(600));
        assert_eq!(
            c.strategy(&Operation::AuthenticateRegistry).cache_ttl,
            Duration::from_secs(1800)
        );
        let custom = c.strategy(&Operation::Custom("rotate".into()));
        assert!(custom.fallback_enabled && custom.cache_enabled);
        assert!(!custom.partial_results_allowed);
    }

    #[test]
    fn test_disabled_features() {
        let c = coordinator();
        c.set_strategy(
            Operation::ListClusters,
            DegradationStrategy::for_operation(&Operation::ListClusters).disable_feature("node_pools"),
        );
        assert!(c.is_feature_disabled(&Operation::ListClusters, "node_pools"));
        assert!(!c.is_feature_disabled(&Operation::GetCluster, "node_pools"));
    }
}
