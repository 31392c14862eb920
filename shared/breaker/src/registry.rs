//! Named breaker registry with idle GC

use crate::breaker::{BreakerStrategy, CircuitBreaker};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(5 * 60);

/// Process-wide map of circuits keyed by name
#[derive(Clone, Default)]
pub struct BreakerRegistry {
    circuits: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the named circuit, creating it with the default strategy on
    /// first use
    pub async fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with(name, BreakerStrategy::default()).await
    }

    pub async fn get_with(&self, name: &str, strategy: BreakerStrategy) -> Arc<CircuitBreaker> {
        {
            let circuits = self.circuits.read().await;
            if let Some(breaker) = circuits.get(name) {
                return Arc::clone(breaker);
            }
        }

        let mut circuits = self.circuits.write().await;
        Arc::clone(
            circuits
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, strategy))),
        )
    }

    /// Drop circuits idle longer than `max_idle`; returns how many were
    /// removed
    pub async fn gc(&self, max_idle: Duration) -> usize {
        let mut circuits = self.circuits.write().await;
        let mut idle = Vec::new();

        for (name, breaker) in circuits.iter() {
            if breaker.last_used().await.elapsed() > max_idle {
                idle.push(name.clone());
            }
        }

        for name in &idle {
            circuits.remove(name);
            debug!(circuit = %name, "Idle circuit garbage-collected");
        }
        idle.len()
    }

    pub async fn len(&self) -> usize {
        self.circuits.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.circuits.read().await.is_empty()
    }

    /// Periodic GC fiber; aborted on service shutdown
    pub fn spawn_gc(&self) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                registry.gc(DEFAULT_MAX_IDLE).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_error::AppError;

    #[tokio::test]
    async fn test_same_name_same_circuit() {
        let registry = BreakerRegistry::new();

        let a = registry.get("oauth:google").await;
        let _ = a.execute(async { Err::<(), _>(AppError::Internal("x".into())) }).await;

        let b = registry.get("oauth:google").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_gc_drops_idle_circuits() {
        let registry = BreakerRegistry::new();
        registry.get("stale").await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let removed = registry.gc(Duration::from_millis(10)).await;

        assert_eq!(removed, 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_gc_keeps_active_circuits() {
        let registry = BreakerRegistry::new();
        let breaker = registry.get("active").await;

        breaker.execute(async { Ok::<_, AppError>(()) }).await.unwrap();
        let removed = registry.gc(Duration::from_secs(60)).await;

        assert_eq!(removed, 0);
        assert_eq!(registry.len().await, 1);
    }
}
