//! Breaker registry and the wrapper that runs skills through it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitState};
use crate::config::EngineConfig;
use crate::error::Error;
use crate::skill::{AuditAction, SkillContext, SkillFailure, SkillRegistry, SkillResult};

/// Stable hash of a context's shipment id and values.
///
/// Learned adjustments are left out so a tuned threshold still hits results
/// cached before the tuning.
pub fn context_fingerprint(context: &SkillContext) -> String {
    let mut hasher = Sha256::new();
    if let Some(id) = &context.shipment_id {
        hasher.update(b"shipment:");
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    // serde_json::Map is ordered by key
    hasher.update(serde_json::Value::Object(context.values.clone()).to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One breaker per skill id, created on first use.
///
/// Each breaker sits behind its own mutex so two skills never contend; the
/// map lock is only held to look a breaker up or insert it.
#[derive(Default)]
pub struct CircuitBreakers {
    default_config: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<Mutex<CircuitBreaker>>>>,
}

impl CircuitBreakers {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            ..Default::default()
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            default_config: config.breaker.clone(),
            overrides: config.breaker_overrides.clone(),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_override(mut self, skill_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(skill_id.into(), config);
        self
    }

    fn config_for(&self, skill_id: &str) -> CircuitBreakerConfig {
        self.overrides
            .get(skill_id)
            .unwrap_or(&self.default_config)
            .clone()
    }

    async fn breaker(&self, skill_id: &str) -> Arc<Mutex<CircuitBreaker>> {
        if let Some(existing) = self.breakers.read().await.get(skill_id) {
            return Arc::clone(existing);
        }
        let mut breakers = self.breakers.write().await;
        Arc::clone(breakers.entry(skill_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(CircuitBreaker::new(
                skill_id,
                self.config_for(skill_id),
            )))
        }))
    }

    /// Run `primary` under the skill's breaker.
    ///
    /// The primary future gets at most the breaker's call timeout, shortened
    /// to `deadline` when one is given. Only execution failures and the
    /// breaker's own call timeout count against the skill; a caller deadline
    /// running out still yields a fallback but leaves the counters alone.
    /// Unknown skills and rejected contexts pass straight through as failed
    /// results.
    pub async fn call<F, Fut>(
        &self,
        skill_id: &str,
        fingerprint: Option<&str>,
        deadline: Option<Instant>,
        primary: F,
    ) -> SkillResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<SkillResult, SkillFailure>>,
    {
        let breaker = self.breaker(skill_id).await;

        let call_timeout = {
            let mut cb = breaker.lock().await;
            if !cb.allow_request() {
                debug!(skill_id, "Circuit open, using fallback");
                return cb.fallback(
                    AuditAction::CircuitOpen,
                    &format!("circuit open for {}", skill_id),
                    fingerprint,
                );
            }
            cb.config().call_timeout()
        };

        let now = Instant::now();
        let (budget, caller_bound) = match deadline {
            Some(d) if d.saturating_duration_since(now) < call_timeout => {
                (d.saturating_duration_since(now), true)
            }
            _ => (call_timeout, false),
        };

        let outcome = tokio::time::timeout(budget, primary()).await;

        let mut cb = breaker.lock().await;
        match outcome {
            Ok(Ok(result)) => {
                let before = cb.state();
                cb.record_success();
                if before != CircuitState::Closed && cb.state() == CircuitState::Closed {
                    info!(skill_id, "Circuit closed");
                }
                if let Some(fp) = fingerprint {
                    cb.remember(fp.to_string(), &result);
                }
                result
            }
            Ok(Err(failure)) if !failure.is_execution_failure() => failure.into_result(),
            Ok(Err(failure)) => {
                warn!(skill_id, error = %failure, "Skill failed under breaker");
                self.trip(&mut cb, skill_id);
                cb.fallback(failure.audit_action(), failure.message(), fingerprint)
            }
            Err(_) => {
                let timeout_ms = budget.as_millis() as u64;
                let message = format!("{}: {}", skill_id, Error::timeout(timeout_ms));
                warn!(skill_id, timeout_ms, "Skill timed out");
                if !caller_bound {
                    self.trip(&mut cb, skill_id);
                }
                cb.fallback(AuditAction::Timeout, &message, fingerprint)
            }
        }
    }

    fn trip(&self, cb: &mut CircuitBreaker, skill_id: &str) {
        let before = cb.state();
        cb.record_failure();
        if before != CircuitState::Open && cb.state() == CircuitState::Open {
            warn!(skill_id, "Circuit opened");
        }
    }

    pub async fn snapshot(&self, skill_id: &str) -> Option<CircuitBreakerState> {
        let breaker = self.breakers.read().await.get(skill_id).cloned()?;
        let snapshot = breaker.lock().await.snapshot();
        Some(snapshot)
    }

    /// Snapshots of every breaker created so far, sorted by skill id.
    pub async fn snapshots(&self) -> Vec<CircuitBreakerState> {
        let breakers: Vec<_> = self.breakers.read().await.values().cloned().collect();
        let mut states = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            states.push(breaker.lock().await.snapshot());
        }
        states.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));
        states
    }

    /// Close a breaker and drop its cached results.
    pub async fn reset(&self, skill_id: &str) -> bool {
        let Some(breaker) = self.breakers.read().await.get(skill_id).cloned() else {
            return false;
        };
        breaker.lock().await.reset();
        info!(skill_id, "Circuit reset");
        true
    }
}

/// Runs registered skills through their circuit breakers.
#[derive(Clone)]
pub struct ReliableExecutor {
    registry: Arc<SkillRegistry>,
    breakers: Arc<CircuitBreakers>,
}

impl ReliableExecutor {
    pub fn new(registry: Arc<SkillRegistry>, breakers: Arc<CircuitBreakers>) -> Self {
        Self { registry, breakers }
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    /// Execute a skill with breaker protection; never fails.
    #[instrument(skip(self, context, deadline), fields(skill_id = %skill_id))]
    pub async fn execute(
        &self,
        skill_id: &str,
        context: &SkillContext,
        deadline: Option<Instant>,
    ) -> SkillResult {
        let fingerprint = context_fingerprint(context);
        self.breakers
            .call(skill_id, Some(&fingerprint), deadline, || {
                self.registry.try_execute(skill_id, context)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::{Error, Result};
    use crate::reliability::FallbackMethod;
    use crate::skill::test_support::{Behavior, ScriptedSkill};
    use crate::skill::{Skill, SkillCategory, SkillMetadata, Verdict};

    /// Fails until `heal_after` calls have been made, counting every call.
    struct FlakySkill {
        metadata: SkillMetadata,
        calls: Arc<AtomicUsize>,
        heal_after: usize,
        delay: Option<Duration>,
    }

    impl FlakySkill {
        fn new(id: &str, heal_after: usize) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let skill = Self {
                metadata: SkillMetadata::new(id, id, SkillCategory::Valuation, "flaky"),
                calls: Arc::clone(&calls),
                heal_after,
                delay: None,
            };
            (skill, calls)
        }
    }

    #[async_trait]
    impl Skill for FlakySkill {
        fn metadata(&self) -> &SkillMetadata {
            &self.metadata
        }

        async fn execute(&self, _context: &SkillContext) -> Result<SkillResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if n < self.heal_after {
                Err(Error::skill_execution(&self.metadata.id, "price index offline"))
            } else {
                Ok(SkillResult::compliant(0.9))
            }
        }
    }

    fn breaker_config(fallback_method: FallbackMethod) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 2,
            timeout_ms: 1_000,
            call_timeout_ms: 200,
            fallback_method,
        }
    }

    fn executor(skill: impl Skill + 'static, method: FallbackMethod) -> ReliableExecutor {
        let mut registry = SkillRegistry::new();
        registry.register(skill).unwrap();
        registry
            .register(ScriptedSkill::new("picky", Behavior::RequireField("price")))
            .unwrap();
        ReliableExecutor::new(
            Arc::new(registry),
            Arc::new(CircuitBreakers::new(breaker_config(method))),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_and_stops_calling_primary() {
        let (skill, calls) = FlakySkill::new("flaky", usize::MAX);
        let exec = executor(skill, FallbackMethod::Default);
        let ctx = SkillContext::new();

        for _ in 0..3 {
            let result = exec.execute("flaky", &ctx, None).await;
            assert!(result.success);
            assert_eq!(result.verdict, Verdict::Unknown);
            assert!(result.errors[0].contains("price index offline"));
        }
        let state = exec.breakers().snapshot("flaky").await.unwrap();
        assert_eq!(state.state, CircuitState::Open);
        assert_eq!(state.failure_count, 3);

        let rejected = exec.execute("flaky", &ctx, None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(rejected
            .audit_log
            .iter()
            .any(|e| e.action == AuditAction::CircuitOpen));
        assert_eq!(rejected.last_audit_action(), Some(AuditAction::Fallback));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_through_half_open() {
        let (skill, calls) = FlakySkill::new("flaky", 3);
        let exec = executor(skill, FallbackMethod::Default);
        let ctx = SkillContext::new();

        for _ in 0..3 {
            exec.execute("flaky", &ctx, None).await;
        }
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let probe = exec.execute("flaky", &ctx, None).await;
        assert_eq!(probe.verdict, Verdict::Compliant);
        assert_eq!(
            exec.breakers().snapshot("flaky").await.unwrap().state,
            CircuitState::HalfOpen
        );

        exec.execute("flaky", &ctx, None).await;
        let state = exec.breakers().snapshot("flaky").await.unwrap();
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let (mut skill, _) = FlakySkill::new("slow", 0);
        skill.delay = Some(Duration::from_secs(5));
        let exec = executor(skill, FallbackMethod::Regex);

        let result = exec.execute("slow", &SkillContext::new(), None).await;
        assert!(result.success);
        assert_eq!(result.data["fallback"], "regex");
        assert_eq!(result.errors, vec!["slow: Operation timed out after 200ms".to_string()]);
        assert!(result.audit_log.iter().any(|e| e.action == AuditAction::Timeout));
        assert_eq!(
            exec.breakers().snapshot("slow").await.unwrap().failure_count,
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_deadline_does_not_count() {
        let (mut skill, _) = FlakySkill::new("slow", 0);
        skill.delay = Some(Duration::from_millis(150));
        let exec = executor(skill, FallbackMethod::Default);

        let deadline = Instant::now() + Duration::from_millis(50);
        let result = exec.execute("slow", &SkillContext::new(), Some(deadline)).await;
        assert!(result.audit_log.iter().any(|e| e.action == AuditAction::Timeout));
        assert_eq!(
            exec.breakers().snapshot("slow").await.unwrap().failure_count,
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_fallback_is_failure() {
        let (skill, _) = FlakySkill::new("flaky", usize::MAX);
        let exec = executor(skill, FallbackMethod::Skip);

        let result = exec.execute("flaky", &SkillContext::new(), None).await;
        assert!(!result.success);
        assert!(result.requires_human_review);
        assert_eq!(result.last_audit_action(), Some(AuditAction::Fallback));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_fallback_replays_last_good_result() {
        let (skill, calls) = FlakySkill::new("flaky", 0);
        let exec = executor(skill, FallbackMethod::Cache);
        let ctx = SkillContext::for_shipment("s-1").with("declared_price", 2000);

        let good = exec.execute("flaky", &ctx, None).await;
        assert_eq!(good.verdict, Verdict::Compliant);

        // Force the breaker open without touching the skill.
        {
            let breaker = exec.breakers().breaker("flaky").await;
            let mut cb = breaker.lock().await;
            for _ in 0..3 {
                cb.record_failure();
            }
        }

        let replay = exec.execute("flaky", &ctx, None).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(replay.verdict, Verdict::Compliant);
        assert!((replay.confidence - 0.45).abs() < 1e-9);
        assert!(replay.requires_human_review);

        let other = exec
            .execute("flaky", &SkillContext::for_shipment("s-2"), None)
            .await;
        assert_eq!(other.verdict, Verdict::Unknown);
    }

    #[tokio::test]
    async fn test_caller_errors_bypass_breaker() {
        let (skill, _) = FlakySkill::new("flaky", 0);
        let exec = executor(skill, FallbackMethod::Default);

        for _ in 0..5 {
            let missing = exec.execute("nope", &SkillContext::new(), None).await;
            assert!(!missing.success);
            assert_eq!(missing.last_audit_action(), Some(AuditAction::SkillNotFound));

            let rejected = exec.execute("picky", &SkillContext::new(), None).await;
            assert_eq!(
                rejected.last_audit_action(),
                Some(AuditAction::ContextValidationFailed)
            );
        }
        assert_eq!(
            exec.breakers().snapshot("picky").await.unwrap().state,
            CircuitState::Closed
        );
        assert_eq!(exec.breakers().snapshot("picky").await.unwrap().failure_count, 0);
    }

    #[tokio::test]
    async fn test_overrides_and_reset() {
        let breakers = CircuitBreakers::new(breaker_config(FallbackMethod::Default)).with_override(
            "fragile",
            CircuitBreakerConfig {
                failure_threshold: 1,
                ..breaker_config(FallbackMethod::Skip)
            },
        );

        let fail = || async { Err(SkillFailure::Execution("boom".into())) };
        let result = breakers.call("fragile", None, None, fail).await;
        assert!(!result.success);
        assert_eq!(
            breakers.snapshot("fragile").await.unwrap().state,
            CircuitState::Open
        );

        assert!(breakers.reset("fragile").await);
        assert!(!breakers.reset("unknown").await);
        let states = breakers.snapshots().await;
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].state, CircuitState::Closed);
    }

    #[test]
    fn test_fingerprint_ignores_adjustments() {
        let mut a = SkillContext::for_shipment("s-1").with("x", 1);
        let b = SkillContext::for_shipment("s-1").with("x", 1);
        a.adjustments.insert("threshold".into(), 0.1);
        assert_eq!(context_fingerprint(&a), context_fingerprint(&b));
        assert_ne!(
            context_fingerprint(&b),
            context_fingerprint(&SkillContext::for_shipment("s-2").with("x", 1))
        );
    }
}
