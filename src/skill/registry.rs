//! Skill lookup and contained execution.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, instrument, warn};

use super::types::{AuditAction, SkillCategory, SkillContext, SkillMetadata, SkillResult};
use super::Skill;
use crate::error::{Error, Result};

/// Why a skill invocation did not produce its own result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillFailure {
    /// No skill registered under the id
    NotFound(String),
    /// `validate_context` rejected the input
    InvalidContext(String),
    /// The skill returned an error
    Execution(String),
    /// The skill panicked
    Panicked(String),
}

impl SkillFailure {
    /// Whether the failure says something about the skill's health.
    ///
    /// Only these drive circuit-breaker state; an unknown id or a bad context
    /// is the caller's problem.
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::Execution(_) | Self::Panicked(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(m) | Self::InvalidContext(m) | Self::Execution(m) | Self::Panicked(m) => m,
        }
    }

    pub fn audit_action(&self) -> AuditAction {
        match self {
            Self::NotFound(_) => AuditAction::SkillNotFound,
            Self::InvalidContext(_) => AuditAction::ContextValidationFailed,
            Self::Execution(_) => AuditAction::ExecutionFailed,
            Self::Panicked(_) => AuditAction::ExecutionPanicked,
        }
    }

    /// Structured failed result carrying one audit entry.
    pub fn into_result(self) -> SkillResult {
        let action = self.audit_action();
        let message = self.message().to_string();
        SkillResult::failure(message.clone()).with_audit(action, message)
    }
}

impl std::fmt::Display for SkillFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Maps skill ids to instances and runs them with error containment.
#[derive(Default)]
pub struct SkillRegistry {
    skills: HashMap<String, Arc<dyn Skill>>,
    order: Vec<String>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a skill under its metadata id.
    pub fn register<S: Skill + 'static>(&mut self, skill: S) -> Result<()> {
        self.register_arc(Arc::new(skill))
    }

    pub fn register_arc(&mut self, skill: Arc<dyn Skill>) -> Result<()> {
        let id = skill.id().to_string();
        if self.skills.contains_key(&id) {
            return Err(Error::DuplicateSkill(id));
        }
        debug!(skill_id = %id, "Registered skill");
        self.order.push(id.clone());
        self.skills.insert(id, skill);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Skill>> {
        self.skills.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.skills.contains_key(id)
    }

    /// Metadata of every skill in registration order.
    pub fn list(&self) -> Vec<&SkillMetadata> {
        self.order
            .iter()
            .filter_map(|id| self.skills.get(id))
            .map(|s| s.metadata())
            .collect()
    }

    pub fn by_category(&self, category: SkillCategory) -> Vec<&SkillMetadata> {
        self.list()
            .into_iter()
            .filter(|m| m.category == category)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Resolve, validate and execute, keeping the failure typed.
    ///
    /// On success the result gets an `execution_completed` audit entry.
    pub async fn try_execute(
        &self,
        id: &str,
        context: &SkillContext,
    ) -> std::result::Result<SkillResult, SkillFailure> {
        let skill = self
            .get(id)
            .ok_or_else(|| SkillFailure::NotFound(format!("Skill not found: {}", id)))?;

        if !skill.validate_context(context) {
            return Err(SkillFailure::InvalidContext(format!(
                "Context rejected by skill {}",
                id
            )));
        }

        match AssertUnwindSafe(skill.execute(context)).catch_unwind().await {
            Ok(Ok(mut result)) => {
                let detail = format!(
                    "{} returned {} (confidence {:.2})",
                    id, result.verdict, result.confidence
                );
                result.push_audit(AuditAction::ExecutionCompleted, detail);
                Ok(result)
            }
            Ok(Err(e)) => Err(SkillFailure::Execution(e.to_string())),
            Err(panic) => Err(SkillFailure::Panicked(format!(
                "Skill {} panicked: {}",
                id,
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Execute a skill; never fails.
    ///
    /// Unknown ids, rejected contexts, errors and panics all come back as
    /// failed, human-review results with an audit entry naming what happened.
    #[instrument(skip(self, context), fields(skill_id = %id))]
    pub async fn execute_skill(&self, id: &str, context: &SkillContext) -> SkillResult {
        match self.try_execute(id, context).await {
            Ok(result) => result,
            Err(failure) => {
                warn!(skill_id = %id, error = %failure, "Skill execution failed");
                failure.into_result()
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{Behavior, ScriptedSkill};
    use super::*;
    use crate::skill::Verdict;

    fn registry() -> SkillRegistry {
        let mut registry = SkillRegistry::new();
        registry
            .register(ScriptedSkill::new("ok", Behavior::Return(Verdict::Compliant)))
            .unwrap();
        registry
            .register(ScriptedSkill::new("broken", Behavior::Fail("index offline")))
            .unwrap();
        registry
            .register(ScriptedSkill::new("panics", Behavior::Panic))
            .unwrap();
        registry
            .register(ScriptedSkill::new("picky", Behavior::RequireField("price")))
            .unwrap();
        registry
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = registry();
        let err = registry
            .register(ScriptedSkill::new("ok", Behavior::Panic))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateSkill(id) if id == "ok"));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_list_keeps_registration_order() {
        let registry = registry();
        let ids: Vec<&str> = registry.list().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["ok", "broken", "panics", "picky"]);
        assert_eq!(registry.by_category(SkillCategory::Documentation).len(), 4);
        assert!(registry.by_category(SkillCategory::Sanctions).is_empty());
    }

    #[tokio::test]
    async fn test_successful_execution_is_audited() {
        let result = registry().execute_skill("ok", &SkillContext::new()).await;
        assert!(result.success);
        assert_eq!(result.verdict, Verdict::Compliant);
        assert_eq!(result.audit_log.len(), 1);
        assert_eq!(result.last_audit_action(), Some(AuditAction::ExecutionCompleted));
    }

    #[tokio::test]
    async fn test_unknown_skill_is_failed_result() {
        let result = registry().execute_skill("nope", &SkillContext::new()).await;
        assert!(!result.success);
        assert!(result.requires_human_review);
        assert_eq!(result.verdict, Verdict::Unknown);
        assert_eq!(result.last_audit_action(), Some(AuditAction::SkillNotFound));
        assert!(result.errors[0].contains("nope"));
    }

    #[tokio::test]
    async fn test_invalid_context_is_failed_result() {
        let registry = registry();
        let result = registry.execute_skill("picky", &SkillContext::new()).await;
        assert!(!result.success);
        assert_eq!(
            result.last_audit_action(),
            Some(AuditAction::ContextValidationFailed)
        );

        let ok = registry
            .execute_skill("picky", &SkillContext::new().with("price", 10))
            .await;
        assert!(ok.success);
    }

    #[tokio::test]
    async fn test_execution_error_is_contained() {
        let result = registry().execute_skill("broken", &SkillContext::new()).await;
        assert!(!result.success);
        assert_eq!(result.last_audit_action(), Some(AuditAction::ExecutionFailed));
        assert!(result.errors[0].contains("index offline"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let registry = registry();
        let failure = registry
            .try_execute("panics", &SkillContext::new())
            .await
            .unwrap_err();
        assert!(failure.is_execution_failure());
        assert!(failure.message().contains("rule table corrupted"));

        let result = registry.execute_skill("panics", &SkillContext::new()).await;
        assert_eq!(result.last_audit_action(), Some(AuditAction::ExecutionPanicked));
    }

    #[test]
    fn test_failure_classification() {
        assert!(!SkillFailure::NotFound("x".into()).is_execution_failure());
        assert!(!SkillFailure::InvalidContext("x".into()).is_execution_failure());
        assert!(SkillFailure::Execution("x".into()).is_execution_failure());
    }
}
