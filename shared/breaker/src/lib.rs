//! Circuit breakers for outbound dependencies
//!
//! A named registry of breakers guarding effectful calls (OAuth providers,
//! webhooks). Each circuit tracks `Closed | Open | HalfOpen` plus rolling
//! failure counters under one of three strategies:
//!
//! - **Consecutive** (default): open after N failures in a row
//! - **Count**: open when the failure ratio across the last `size` calls
//!   exceeds a threshold
//! - **Sampling**: open when the failure ratio inside a rolling time window
//!   exceeds a threshold
//!
//! While a call executes, the request context's `circuit` field carries
//! `{name, state}` so downstream components can observe breaker posture.

pub mod breaker;
pub mod registry;

pub use breaker::{BreakerStrategy, CircuitBreaker, IsolationGuard};
pub use registry::BreakerRegistry;
pub use shared_context::CircuitState;
