//! Circuit breaker state machine.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::skill::{AuditAction, SkillResult, Verdict};

/// Cached results kept per skill for the `cache` fallback.
const CACHE_CAPACITY: usize = 64;

const REGEX_CONFIDENCE: f64 = 0.5;
const DEFAULT_CONFIDENCE: f64 = 0.3;
const CACHE_CONFIDENCE_FACTOR: f64 = 0.5;

/// What to return when the primary execution is unavailable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMethod {
    /// Degraded pattern-based answer
    Regex,
    /// Last good result for the same context
    Cache,
    /// Generic degraded answer
    #[default]
    Default,
    /// No answer; the result is a failure
    Skip,
}

impl std::str::FromStr for FallbackMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "regex" => Ok(Self::Regex),
            "cache" => Ok(Self::Cache),
            "default" => Ok(Self::Default),
            "skip" => Ok(Self::Skip),
            other => Err(Error::config(format!("unknown fallback method: {}", other))),
        }
    }
}

impl std::fmt::Display for FallbackMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Regex => write!(f, "regex"),
            Self::Cache => write!(f, "cache"),
            Self::Default => write!(f, "default"),
            Self::Skip => write!(f, "skip"),
        }
    }
}

/// Breaker settings for one skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Half-open successes that close it again
    pub success_threshold: u32,
    /// How long the circuit stays open before a probe is allowed
    pub timeout_ms: u64,
    /// Time limit for one primary execution
    pub call_timeout_ms: u64,
    pub fallback_method: FallbackMethod,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            call_timeout_ms: 10_000,
            fallback_method: FallbackMethod::Default,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(Error::config("thresholds must be at least 1"));
        }
        if self.call_timeout_ms == 0 {
            return Err(Error::config("call_timeout_ms must be positive"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected
    Open,
    /// Probing whether the skill recovered
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub skill_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt: Option<DateTime<Utc>>,
}

/// Failure-tracking state machine for one skill.
#[derive(Debug)]
pub struct CircuitBreaker {
    skill_id: String,
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt: Option<Instant>,
    cache: HashMap<String, SkillResult>,
    cache_order: VecDeque<String>,
}

impl CircuitBreaker {
    pub fn new(skill_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            skill_id: skill_id.into(),
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            next_attempt: None,
            cache: HashMap::new(),
            cache_order: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a primary call may proceed now.
    ///
    /// An open circuit whose cool-down has elapsed moves to half-open and
    /// lets the call through as a probe.
    pub fn allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let ready = self
                    .next_attempt
                    .map_or(true, |at| Instant::now() >= at);
                if ready {
                    self.half_open();
                }
                ready
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.close();
                }
            }
            CircuitState::Open => {
                // Calls are rejected while open
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.last_failure_time = Some(Utc::now());
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.open();
                }
            }
            CircuitState::HalfOpen => self.open(),
            CircuitState::Open => {}
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.next_attempt = Some(Instant::now() + self.config.timeout());
        self.success_count = 0;
    }

    fn half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.success_count = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.next_attempt = None;
    }

    /// Forget all failures and cached results.
    pub fn reset(&mut self) {
        self.close();
        self.last_failure_time = None;
        self.cache.clear();
        self.cache_order.clear();
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let next_attempt = self.next_attempt.map(|at| {
            let remaining = at.saturating_duration_since(Instant::now());
            Utc::now()
                + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero())
        });
        CircuitBreakerState {
            skill_id: self.skill_id.clone(),
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_time: self.last_failure_time,
            next_attempt,
        }
    }

    /// Remember a good result for the `cache` fallback.
    pub fn remember(&mut self, fingerprint: String, result: &SkillResult) {
        if !self.cache.contains_key(&fingerprint) {
            self.cache_order.push_back(fingerprint.clone());
            while self.cache_order.len() > CACHE_CAPACITY {
                if let Some(oldest) = self.cache_order.pop_front() {
                    self.cache.remove(&oldest);
                }
            }
        }
        self.cache.insert(fingerprint, result.clone());
    }

    /// Build the configured fallback for a failed or rejected call.
    ///
    /// `cause` tags why the primary did not answer; `error` is carried into
    /// the result's errors.
    pub fn fallback(
        &self,
        cause: AuditAction,
        error: &str,
        fingerprint: Option<&str>,
    ) -> SkillResult {
        let method = self.config.fallback_method;

        let cached = fingerprint
            .filter(|_| method == FallbackMethod::Cache)
            .and_then(|fp| self.cache.get(fp));

        let mut result = match (method, cached) {
            (FallbackMethod::Skip, _) => SkillResult::failure(error),
            (FallbackMethod::Cache, Some(hit)) => {
                let mut replay = hit.clone();
                replay.confidence *= CACHE_CONFIDENCE_FACTOR;
                replay.requires_human_review = true;
                replay.errors.push(error.to_string());
                replay
            }
            (FallbackMethod::Regex, _) => degraded(REGEX_CONFIDENCE, error),
            (FallbackMethod::Cache, None) | (FallbackMethod::Default, _) => {
                degraded(DEFAULT_CONFIDENCE, error)
            }
        };

        let applied = match (method, cached) {
            (FallbackMethod::Cache, None) => "default (cache miss)".to_string(),
            (m, _) => m.to_string(),
        };
        if let serde_json::Value::Object(map) = &mut result.data {
            map.insert("fallback".into(), json!(applied));
        } else if result.data.is_null() {
            result.data = json!({ "fallback": applied, "error": error });
        }

        result.push_audit(cause, format!("{}: {}", self.skill_id, error));
        result.push_audit(
            AuditAction::Fallback,
            format!("{} answered by {} fallback", self.skill_id, applied),
        );
        result
    }
}

fn degraded(confidence: f64, error: &str) -> SkillResult {
    let mut result = SkillResult::verdict(Verdict::Unknown, confidence).with_human_review(true);
    result.errors.push(error.to_string());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failures: u32, successes: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: failures,
            success_threshold: successes,
            timeout_ms: 1_000,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let mut cb = CircuitBreaker::new("s", config(3, 2));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());

        let snap = cb.snapshot();
        assert_eq!(snap.failure_count, 3);
        assert!(snap.next_attempt.is_some());
        assert!(snap.last_failure_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let mut cb = CircuitBreaker::new("s", config(3, 2));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_then_close() {
        let mut cb = CircuitBreaker::new("s", config(1, 2));
        cb.record_failure();
        assert!(!cb.allow_request());

        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(cb.allow_request());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
        assert!(cb.snapshot().next_attempt.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let mut cb = CircuitBreaker::new("s", config(2, 2));
        cb.record_failure();
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert!(cb.allow_request());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request());
    }

    #[test]
    fn test_fallback_shapes() {
        let mut cfg = config(1, 1);
        for (method, success) in [
            (FallbackMethod::Regex, true),
            (FallbackMethod::Default, true),
            (FallbackMethod::Cache, true),
            (FallbackMethod::Skip, false),
        ] {
            cfg.fallback_method = method;
            let cb = CircuitBreaker::new("s", cfg.clone());
            let result = cb.fallback(AuditAction::ExecutionFailed, "db offline", None);
            assert_eq!(result.success, success, "{method}");
            assert!(result.errors.contains(&"db offline".to_string()));
            assert!(result.confidence < 1.0);
            assert_eq!(result.last_audit_action(), Some(AuditAction::Fallback));
        }
    }

    #[test]
    fn test_cache_fallback_replays_with_reduced_confidence() {
        let mut cfg = config(1, 1);
        cfg.fallback_method = FallbackMethod::Cache;
        let mut cb = CircuitBreaker::new("s", cfg);

        let good = SkillResult::compliant(0.8).with_data(json!({ "message": "ok" }));
        cb.remember("fp-1".into(), &good);

        let replay = cb.fallback(AuditAction::Timeout, "timed out", Some("fp-1"));
        assert_eq!(replay.verdict, Verdict::Compliant);
        assert!((replay.confidence - 0.4).abs() < 1e-9);
        assert_eq!(replay.data["fallback"], "cache");
        assert_eq!(replay.data["message"], "ok");

        let miss = cb.fallback(AuditAction::Timeout, "timed out", Some("fp-2"));
        assert_eq!(miss.verdict, Verdict::Unknown);
        assert_eq!(miss.data["fallback"], "default (cache miss)");
    }

    #[test]
    fn test_cache_is_bounded() {
        let mut cb = CircuitBreaker::new("s", config(1, 1));
        for i in 0..(CACHE_CAPACITY + 10) {
            cb.remember(format!("fp-{i}"), &SkillResult::compliant(1.0));
        }
        assert_eq!(cb.cache.len(), CACHE_CAPACITY);
        assert!(!cb.cache.contains_key("fp-0"));
    }

    #[test]
    fn test_fallback_method_parse() {
        assert_eq!("SKIP".parse::<FallbackMethod>().unwrap(), FallbackMethod::Skip);
        assert!("retry".parse::<FallbackMethod>().is_err());
    }
}
