//! Per-skill circuit breakers and the reliable execution wrapper.
//!
//! Every skill id gets its own breaker:
//!
//! ```text
//! closed --(failure_threshold failures)--> open
//! open   --(timeout elapsed)-------------> half_open
//! half_open --(success_threshold successes)--> closed
//! half_open --(any failure)--------------> open
//! ```
//!
//! Primary execution races a timer; a timeout counts as a failure. Whenever the
//! primary fails or is rejected, the configured [`FallbackMethod`] produces a
//! well-formed [`SkillResult`](crate::skill::SkillResult) instead of an error.

mod breaker;
mod executor;

pub use breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitState, FallbackMethod,
};
pub use executor::{context_fingerprint, CircuitBreakers, ReliableExecutor};
