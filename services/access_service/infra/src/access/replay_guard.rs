//! TOTP replay detection and brute-force lockout
//!
//! Replay detection rides on the cache's atomic `set_nx`: the first
//! presentation of `(user, time_step, code)` claims the key, every later one
//! inside the 150-second validity window observes it. The guard is
//! fail-closed: when the store cannot be reached, a possibly-legitimate code
//! is refused rather than risking acceptance of a replay.
//!
//! Lockout state is per-process by design; a brute force must succeed on a
//! single worker to matter, and expected volume is bounded by user count.

use shared_cache::SharedStore;
use shared_error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Covers the full ±1-window TOTP validity plus clock skew
const REPLAY_TTL: Duration = Duration::from_secs(150);

const LOCKOUT_THRESHOLD: u32 = 5;
const LOCKOUT_BASE: Duration = Duration::from_secs(30);
const LOCKOUT_CAP: Duration = Duration::from_secs(15 * 60);
const GC_INTERVAL: Duration = Duration::from_secs(60);

/// Exponential lockout after the threshold: 30s, 60s, ... capped at 15 min
fn lockout_duration(failures: u32) -> Duration {
    if failures < LOCKOUT_THRESHOLD {
        return Duration::ZERO;
    }
    let exponent = (failures - LOCKOUT_THRESHOLD).min(32);
    let scaled = LOCKOUT_BASE.saturating_mul(2u32.saturating_pow(exponent));
    scaled.min(LOCKOUT_CAP)
}

#[derive(Debug, Clone)]
struct FailureState {
    count: u32,
    locked_until: Option<Instant>,
    last_failure: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    pub already_used: bool,
}

#[derive(Clone)]
pub struct ReplayGuard {
    store: SharedStore,
    lockouts: Arc<RwLock<HashMap<Uuid, FailureState>>>,
}

impl ReplayGuard {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            lockouts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn replay_key(user_id: Uuid, time_step: i64, code: &str) -> String {
        format!("totp:{}:{}:{}", user_id, time_step, code)
    }

    /// Atomically claim `(user, time_step, code)`
    ///
    /// Fail-closed: a store error reports the code as already used.
    pub async fn check_and_mark(&self, user_id: Uuid, time_step: i64, code: &str) -> ReplayOutcome {
        let key = Self::replay_key(user_id, time_step, code);

        match self.store.set_nx(&key, "1", REPLAY_TTL).await {
            Ok(outcome) => ReplayOutcome {
                already_used: outcome.already_exists,
            },
            Err(e) => {
                warn!(user_id = %user_id, "Replay store unavailable, failing closed: {}", e);
                metrics::counter!("mfa_replay_store_failures").increment(1);
                ReplayOutcome { already_used: true }
            },
        }
    }

    /// Reject while a lockout is active
    pub async fn check_lockout(&self, user_id: Uuid) -> Result<(), AppError> {
        let lockouts = self.lockouts.read().await;
        if let Some(state) = lockouts.get(&user_id) {
            if let Some(locked_until) = state.locked_until {
                let now = Instant::now();
                if locked_until > now {
                    let retry_after = locked_until - now;
                    return Err(AppError::RateLimit {
                        retry_after_ms: retry_after.as_millis() as u64,
                        limit: Some(LOCKOUT_THRESHOLD),
                        remaining: Some(0),
                        recovery_action: Some("email-verify".to_string()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Count a failed attempt; at the threshold the lockout doubles per
    /// additional failure up to the cap
    pub async fn record_failure(&self, user_id: Uuid) {
        let mut lockouts = self.lockouts.write().await;
        let now = Instant::now();
        let state = lockouts.entry(user_id).or_insert(FailureState {
            count: 0,
            locked_until: None,
            last_failure: now,
        });

        state.count += 1;
        state.last_failure = now;

        let duration = lockout_duration(state.count);
        if !duration.is_zero() {
            state.locked_until = Some(now + duration);
            warn!(
                user_id = %user_id,
                failures = state.count,
                lockout_seconds = duration.as_secs(),
                "MFA lockout engaged"
            );
        }
    }

    /// A successful verify clears the failure record
    pub async fn record_success(&self, user_id: Uuid) {
        self.lockouts.write().await.remove(&user_id);
    }

    pub async fn failure_count(&self, user_id: Uuid) -> u32 {
        self.lockouts
            .read()
            .await
            .get(&user_id)
            .map(|s| s.count)
            .unwrap_or(0)
    }

    /// Drop entries idle past the lockout cap
    pub async fn gc(&self) -> usize {
        let mut lockouts = self.lockouts.write().await;
        let before = lockouts.len();
        lockouts.retain(|_, state| state.last_failure.elapsed() < LOCKOUT_CAP);
        let removed = before - lockouts.len();
        if removed > 0 {
            debug!(removed, "Replay guard lockout entries garbage-collected");
        }
        removed
    }

    /// Cleanup fiber; aborted on service shutdown
    pub fn spawn_gc(&self) -> JoinHandle<()> {
        let guard = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(GC_INTERVAL);
            loop {
                interval.tick().await;
                guard.gc().await;
            }
        })
    }
}
