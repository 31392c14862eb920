//! Single circuit state machine

use shared_context::{CircuitInfo, CircuitState};
use shared_error::{AppError, CircuitReason};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// How failures accumulate before the circuit opens
#[derive(Debug, Clone, Copy)]
pub enum BreakerStrategy {
    /// Open after `threshold` failures in a row
    Consecutive { threshold: u32 },
    /// Open when failures / total over the last `size` calls exceeds
    /// `threshold`
    Count { size: u32, threshold: f64 },
    /// Open when failures / total within the rolling `window` exceeds
    /// `threshold`; ratios over fewer than `min_calls` samples are ignored
    Sampling {
        window: Duration,
        threshold: f64,
        min_calls: u32,
    },
}

impl Default for BreakerStrategy {
    fn default() -> Self {
        BreakerStrategy::Consecutive { threshold: 5 }
    }
}

impl BreakerStrategy {
    pub fn count() -> Self {
        BreakerStrategy::Count {
            size: 100,
            threshold: 0.2,
        }
    }
}

#[derive(Debug)]
struct Inner {
    current: CircuitState,
    previous: CircuitState,
    consecutive_failures: u32,
    /// Outcome ring for the Count strategy (true = failure)
    outcomes: VecDeque<bool>,
    /// Timestamped outcomes for the Sampling strategy
    samples: VecDeque<(Instant, bool)>,
    last_failure: Option<Instant>,
    last_used: Instant,
    isolated: bool,
    trial_in_flight: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            current: CircuitState::Closed,
            previous: CircuitState::Closed,
            consecutive_failures: 0,
            outcomes: VecDeque::new(),
            samples: VecDeque::new(),
            last_failure: None,
            last_used: Instant::now(),
            isolated: false,
            trial_in_flight: false,
        }
    }

    fn transition(&mut self, next: CircuitState) {
        self.previous = self.current;
        self.current = next;
    }
}

/// One named circuit; state lives behind a single transactional reference
pub struct CircuitBreaker {
    name: String,
    strategy: BreakerStrategy,
    half_open_after: Duration,
    inner: Arc<RwLock<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, strategy: BreakerStrategy) -> Self {
        Self {
            name: name.to_string(),
            strategy,
            half_open_after: Duration::from_secs(30),
            inner: Arc::new(RwLock::new(Inner::new())),
        }
    }

    pub fn with_half_open_after(mut self, half_open_after: Duration) -> Self {
        self.half_open_after = half_open_after;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.current
    }

    pub async fn last_used(&self) -> Instant {
        self.inner.read().await.last_used
    }

    /// Run an effect through the circuit
    ///
    /// Open circuits reject immediately until `half_open_after` has elapsed
    /// since the last failure, then admit exactly one trial. The request
    /// context observes the circuit's state for the duration of the call.
    pub async fn execute<F, T>(&self, effect: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        let is_trial = self.admit().await?;

        shared_context::update(|ctx| {
            ctx.circuit = Some(CircuitInfo {
                name: self.name.clone(),
                state: if is_trial { CircuitState::HalfOpen } else { CircuitState::Closed },
            });
        });

        let result = effect.await;

        match &result {
            Ok(_) => self.record_success(is_trial).await,
            Err(_) => self.record_failure(is_trial).await,
        }

        let state = self.state().await;
        shared_context::update(|ctx| {
            ctx.circuit = Some(CircuitInfo {
                name: self.name.clone(),
                state,
            });
        });

        result
    }

    /// Gate keeping: returns whether this call is the half-open trial
    async fn admit(&self) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        inner.last_used = Instant::now();

        if inner.isolated {
            return Err(AppError::Circuit {
                circuit: self.name.clone(),
                reason: CircuitReason::Isolated,
            });
        }

        match inner.current {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let since_failure = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.half_open_after);

                if since_failure < self.half_open_after {
                    return Err(AppError::Circuit {
                        circuit: self.name.clone(),
                        reason: CircuitReason::BrokenCircuit,
                    });
                }

                inner.transition(CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                info!(circuit = %self.name, "Circuit half-open, admitting trial call");
                Ok(true)
            },
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    // One trial at a time
                    return Err(AppError::Circuit {
                        circuit: self.name.clone(),
                        reason: CircuitReason::BrokenCircuit,
                    });
                }
                inner.trial_in_flight = true;
                Ok(true)
            },
        }
    }

    async fn record_success(&self, was_trial: bool) {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures = 0;
        self.push_outcome(&mut inner, false);

        if was_trial {
            inner.trial_in_flight = false;
            inner.transition(CircuitState::Closed);
            inner.outcomes.clear();
            inner.samples.clear();
            info!(circuit = %self.name, "Trial succeeded, circuit closed");
        }
    }

    async fn record_failure(&self, was_trial: bool) {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        self.push_outcome(&mut inner, true);

        if was_trial {
            inner.trial_in_flight = false;
            inner.transition(CircuitState::Open);
            warn!(circuit = %self.name, "Trial failed, circuit re-opened");
            return;
        }

        if inner.current == CircuitState::Closed && self.should_open(&inner) {
            inner.transition(CircuitState::Open);
            warn!(circuit = %self.name, "Failure threshold reached, circuit opened");
        }
    }

    fn push_outcome(&self, inner: &mut Inner, failed: bool) {
        match self.strategy {
            BreakerStrategy::Count { size, .. } => {
                inner.outcomes.push_back(failed);
                while inner.outcomes.len() > size as usize {
                    inner.outcomes.pop_front();
                }
            },
            BreakerStrategy::Sampling { window, .. } => {
                let now = Instant::now();
                inner.samples.push_back((now, failed));
                while let Some((at, _)) = inner.samples.front() {
                    if now.duration_since(*at) > window {
                        inner.samples.pop_front();
                    } else {
                        break;
                    }
                }
            },
            BreakerStrategy::Consecutive { .. } => {},
        }
    }

    fn should_open(&self, inner: &Inner) -> bool {
        match self.strategy {
            BreakerStrategy::Consecutive { threshold } => inner.consecutive_failures >= threshold,
            BreakerStrategy::Count { size, threshold } => {
                if inner.outcomes.len() < size as usize {
                    return false;
                }
                let failures = inner.outcomes.iter().filter(|f| **f).count();
                failures as f64 / inner.outcomes.len() as f64 > threshold
            },
            BreakerStrategy::Sampling {
                threshold,
                min_calls,
                ..
            } => {
                if (inner.samples.len() as u32) < min_calls {
                    return false;
                }
                let failures = inner.samples.iter().filter(|(_, f)| *f).count();
                failures as f64 / inner.samples.len() as f64 > threshold
            },
        }
    }

    /// Force the circuit open until the returned guard is dropped
    pub async fn isolate(&self) -> IsolationGuard {
        let mut inner = self.inner.write().await;
        inner.isolated = true;
        inner.transition(CircuitState::Open);
        warn!(circuit = %self.name, "Circuit isolated");

        IsolationGuard {
            inner: Arc::clone(&self.inner),
            name: self.name.clone(),
        }
    }
}

/// Clears the isolation when dropped
pub struct IsolationGuard {
    inner: Arc<RwLock<Inner>>,
    name: String,
}

impl Drop for IsolationGuard {
    fn drop(&mut self) {
        let inner = Arc::clone(&self.inner);
        let name = self.name.clone();
        tokio::spawn(async move {
            let mut inner = inner.write().await;
            inner.isolated = false;
            inner.transition(CircuitState::Closed);
            inner.consecutive_failures = 0;
            info!(circuit = %name, "Circuit isolation lifted");
        });
    }
}
