use hive_core::{HiveError, HiveResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker tuning shared by every service.
#[derive(Debug, Clone, Copy)]
pub struct BreakerPolicy {
    /// Consecutive failures that trip the breaker open.
    pub threshold: u32,
    /// How long an open breaker waits before allowing a trial call.
    pub reset_timeout: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Breaker state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow through normally.
    Closed,
    /// Calls fail fast; the guarded operation is not attempted.
    Open,
    /// One trial call is allowed through.
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// A per-service failure-isolating state machine.
///
/// `CLOSED → OPEN` after `threshold` consecutive failures; `OPEN → HALF_OPEN`
/// once `reset_timeout` has elapsed since the last failure; the single
/// half-open trial either closes the breaker (success) or re-opens it and
/// resets the timeout clock (failure). Timing uses a monotonic clock.
pub struct CircuitBreaker {
    service: String,
    policy: BreakerPolicy,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for the named service.
    pub fn new(service: impl Into<String>, policy: BreakerPolicy) -> Self {
        Self {
            service: service.into(),
            policy,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// The guarded service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current state, with the open→half-open timeout applied.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            let elapsed_enough = inner
                .last_failure
                .map_or(true, |at| at.elapsed() >= self.policy.reset_timeout);
            if elapsed_enough {
                info!(service = %self.service, "Circuit breaker half-open");
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = false;
            }
        }
    }

    /// Ask to attempt a call. Fails fast with `CircuitOpen` while open, and
    /// admits only a single concurrent trial while half-open.
    pub fn try_acquire(&self) -> HiveResult<()> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(HiveError::CircuitOpen(self.service.clone())),
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(HiveError::CircuitOpen(self.service.clone()))
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call: reset to closed.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            info!(service = %self.service, "Circuit breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        let tripped = inner.state == BreakerState::HalfOpen
            || inner.failure_count >= self.policy.threshold;
        if tripped && inner.state != BreakerState::Open {
            warn!(
                service = %self.service,
                failures = inner.failure_count,
                "Circuit breaker open"
            );
        }
        if tripped {
            inner.state = BreakerState::Open;
        }
        inner.trial_in_flight = false;
    }

    /// Run `op` under this breaker: fail fast while open, record the
    /// outcome otherwise. `CircuitOpen` errors are produced without invoking
    /// `op` at all.
    pub async fn call<T, F>(&self, op: F) -> HiveResult<T>
    where
        F: Future<Output = HiveResult<T>>,
    {
        self.try_acquire()?;
        match op.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}

/// Creates and holds one breaker per guarded service name.
pub struct BreakerRegistry {
    policy: BreakerPolicy,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create a registry applying `policy` to every service.
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for a service, created closed on first use.
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .lock()
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, self.policy)))
            .clone()
    }

    /// Run `op` under the named service's breaker.
    pub async fn call<T, F>(&self, service: &str, op: F) -> HiveResult<T>
    where
        F: Future<Output = HiveResult<T>>,
    {
        self.breaker(service).call(op).await
    }

    /// Snapshot of every breaker's state, for the health surface.
    pub fn states(&self) -> HashMap<String, BreakerState> {
        self.breakers
            .lock()
            .iter()
            .map(|(name, b)| (name.clone(), b.state()))
            .collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerPolicy::default())
    }
}
