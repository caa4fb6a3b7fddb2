//! Circuit Breaker State Machine
//!
//! One breaker per service key, with three states:
//! - Closed: calls flow; consecutive failures inside the window are counted
//! - Open: calls are rejected until the cooldown elapses
//! - Half-Open: exactly one trial call is admitted
//!
//! Admission hands out a `BreakerPermit`. The permit records the outcome of
//! the call; dropping it without an outcome (e.g. the caller was cancelled)
//! releases a half-open trial slot without counting a failure.

use super::types::{Operation, ServiceKey};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold
    pub window: Duration,
    /// Time spent open before a trial is allowed
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(120),
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            ..Default::default()
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Built-in preset, if the operation has one
    pub fn preset(operation: &Operation) -> Option<Self> {
        match operation {
            Operation::Authenticate => Some(Self::new(2, Duration::from_secs(30))),
            Operation::ListClusters | Operation::ListRegistries => {
                Some(Self::new(3, Duration::from_secs(60)))
            }
            _ => None,
        }
    }
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    /// Failures currently counted toward the threshold
    pub failures: u32,
    pub failure_threshold: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub rejected: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub cooldown: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    last_failure: Option<DateTime<Utc>>,
    total_failures: u64,
    total_successes: u64,
    rejected: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
                last_failure: None,
                total_failures: 0,
                total_successes: 0,
                rejected: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, applying the Open -> Half-Open transition if due
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        inner.state
    }

    fn advance(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            let due = inner
                .opened_at
                .map(|at| at.elapsed() >= self.config.cooldown)
                .unwrap_or(true);
            if due {
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = false;
                info!(breaker = %self.name, "Circuit breaker half-open");
            }
        }
    }

    /// Ask to run a call; `None` means the call must not be made
    pub fn try_acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        match inner.state {
            BreakerState::Closed => Some(BreakerPermit::new(self.clone(), false)),
            BreakerState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Some(BreakerPermit::new(self.clone(), true))
            }
            _ => {
                inner.rejected += 1;
                None
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        inner.failures.clear();
        if trial {
            inner.trial_in_flight = false;
        }
        if inner.state != BreakerState::Closed {
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
            info!(breaker = %self.name, "Circuit breaker closed");
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.total_failures += 1;
        inner.last_failure = Some(Utc::now());
        if trial {
            inner.trial_in_flight = false;
        }

        match inner.state {
            BreakerState::Closed => {
                inner.failures.push_back(now);
                while let Some(first) = inner.failures.front() {
                    if now.duration_since(*first) > self.config.window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    warn!(
                        breaker = %self.name,
                        failures = inner.failures.len(),
                        cooldown_ms = self.config.cooldown.as_millis() as u64,
                        "Circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                warn!(breaker = %self.name, "Trial call failed, circuit breaker re-opened");
            }
            BreakerState::Open => {}
        }
    }

    fn release_trial(&self) {
        self.inner.lock().trial_in_flight = false;
    }

    /// Force the breaker closed and forget counted failures
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failures.clear();
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.inner.lock();
        self.advance(&mut inner);
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failures: inner.failures.len() as u32,
            failure_threshold: self.config.failure_threshold,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            rejected: inner.rejected,
            last_failure: inner.last_failure,
            cooldown: self.config.cooldown,
        }
    }
}

/// Admission to make one call through a breaker
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    fn new(breaker: Arc<CircuitBreaker>, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this is the single half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

/// Breakers keyed by service, created on first use
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    overrides: RwLock<HashMap<Operation, BreakerConfig>>,
    fallback: RwLock<BreakerConfig>,
    breakers: RwLock<HashMap<ServiceKey, Arc<CircuitBreaker>>>,
}

impl CircuitBreakers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` for breakers created for `operation` from now on
    pub fn set_config(&self, operation: Operation, config: BreakerConfig) {
        self.overrides.write().insert(operation, config);
    }

    /// Use `config` for new breakers whose operation has neither an
    /// override nor a preset
    pub fn set_default_config(&self, config: BreakerConfig) {
        *self.fallback.write() = config;
    }

    /// Config a breaker for `operation` would be created with now
    pub fn config_for(&self, operation: &Operation) -> BreakerConfig {
        self.overrides
            .read()
            .get(operation)
            .copied()
            .or_else(|| BreakerConfig::preset(operation))
            .unwrap_or_else(|| *self.fallback.read())
    }

    pub fn get_or_create(&self, key: &ServiceKey) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(key) {
            return breaker.clone();
        }
        let config = self.config_for(&key.operation);

        self.breakers
            .write()
            .entry(key.clone())
            .or_insert_with(|| CircuitBreaker::new(key.to_string(), config))
            .clone()
    }

    pub fn get(&self, key: &ServiceKey) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(key).cloned()
    }

    pub fn stats(&self) -> HashMap<ServiceKey, BreakerStats> {
        self.breakers
            .read()
            .iter()
            .map(|(k, b)| (k.clone(), b.stats()))
            .collect()
    }

    /// Reset one breaker; false if none exists for the key
    pub fn reset(&self, key: &ServiceKey) -> bool {
        match self.breakers.read().get(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::CloudProvider;

    fn breaker(threshold: u32, cooldown_ms: u64) -> Arc<CircuitBreaker> {
        CircuitBreaker::new(
            "test",
            BreakerConfig::new(threshold, Duration::from_millis(cooldown_ms)),
        )
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(3, 10_000);
        for _ in 0..2 {
            cb.try_acquire().unwrap().failure();
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.try_acquire().is_none());
        assert_eq!(cb.stats().rejected, 1);
    }

    #[test]
    fn test_success_clears_consecutive_failures() {
        let cb = breaker(2, 10_000);
        cb.try_acquire().unwrap().failure();
        cb.try_acquire().unwrap().success();
        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_failures_outside_window_do_not_count() {
        let cb = CircuitBreaker::new(
            "windowed",
            BreakerConfig::new(2, Duration::from_secs(10)).with_window(Duration::from_millis(20)),
        );
        cb.try_acquire().unwrap().failure();
        std::thread::sleep(Duration::from_millis(40));
        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_single_trial_after_cooldown() {
        let cb = breaker(1, 20);
        cb.try_acquire().unwrap().failure();
        assert!(cb.try_acquire().is_none());

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        let trial = cb.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert!(cb.try_acquire().is_none());

        trial.success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.try_acquire().is_some());
    }

    #[test]
    fn test_failed_trial_reopens() {
        let cb = breaker(1, 20);
        cb.try_acquire().unwrap().failure();
        std::thread::sleep(Duration::from_millis(40));

        cb.try_acquire().unwrap().failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.try_acquire().is_none());
    }

    #[test]
    fn test_dropped_trial_releases_slot() {
        let cb = breaker(1, 20);
        cb.try_acquire().unwrap().failure();
        std::thread::sleep(Duration::from_millis(40));

        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(cb.try_acquire().is_some());
    }

    #[test]
    fn test_table_presets_and_reset() {
        let table = CircuitBreakers::new();
        let auth = ServiceKey::new(CloudProvider::Aws, Operation::Authenticate);
        let list = ServiceKey::new(CloudProvider::Aws, Operation::ListClusters);
        let other = ServiceKey::new(CloudProvider::Aws, Operation::GetCluster);

        assert_eq!(table.get_or_create(&auth).config().failure_threshold, 2);
        assert_eq!(table.get_or_create(&list).config().failure_threshold, 3);
        assert_eq!(table.get_or_create(&other).config().failure_threshold, 5);

        let cb = table.get_or_create(&auth);
        cb.try_acquire().unwrap().failure();
        cb.try_acquire().unwrap().failure();
        assert_eq!(table.stats()[&auth].state, BreakerState::Open);

        assert!(table.reset(&auth));
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(!table.reset(&ServiceKey::new(CloudProvider::Gcp, "missing")));
    }

    #[test]
    fn test_default_config_covers_operations_without_preset() {
        let table = CircuitBreakers::new();
        table.set_default_config(BreakerConfig::new(9, Duration::from_secs(10)));

        let custom = ServiceKey::new(CloudProvider::Azure, "rotate_keys");
        let get = ServiceKey::new(CloudProvider::Azure, Operation::GetRegistry);
        let auth = ServiceKey::new(CloudProvider::Azure, Operation::Authenticate);
        assert_eq!(table.get_or_create(&custom).config().failure_threshold, 9);
        assert_eq!(table.get_or_create(&get).config().failure_threshold, 9);
        assert_eq!(table.get_or_create(&auth).config().failure_threshold, 2);

        table.set_config(Operation::Authenticate, BreakerConfig::new(4, Duration::from_secs(5)));
        assert_eq!(table.config_for(&Operation::Authenticate).failure_threshold, 4);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BreakerState::HalfOpen.to_string(), "half-open");
    }
}
