//! Sub-agent orchestration.
//!
//! A sub-agent is a domain specialist (forced labor, sanctions, cold chain,
//! ...) registered with the [`AgentFactory`] as an [`AgentDescriptor`]: a
//! static activation predicate plus a constructor. For each consignment the
//! [`Orchestrator`] decides which agents are active, then drives every event
//! through them:
//!
//! 1. snapshot the fact graph so all agents see the same state
//! 2. run the active agents that handle the event, concurrently, under the
//!    pass deadline
//! 3. merge their facts into the graph and validate the update
//! 4. arbitrate conflicting recommendations
//! 5. return one [`OrchestrationReport`], partial if the deadline hit
//!
//! ## Example
//!
//! ```rust,ignore
//! use consign_core::agent::{AgentEvent, Orchestrator, ShipmentContext};
//! use consign_core::config::EngineConfig;
//! use consign_core::skill::builtin::RuleData;
//!
//! let orchestrator = Orchestrator::with_builtins(EngineConfig::from_env()?, RuleData::default())?;
//! let mut session = orchestrator
//!     .open_session(ShipmentContext::new("shp-42").with_destination("Germany"))
//!     .await;
//!
//! let report = orchestrator.process_event(&mut session, event).await;
//! for alert in &report.alerts {
//!     println!("[{}] {}: {}", alert.severity, alert.agent_id, alert.message);
//! }
//! ```

mod activation;
mod factory;
mod orchestrator;
pub mod specialists;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::learning::LearningEngine;
use crate::reliability::ReliableExecutor;
use crate::skill::{SkillContext, SkillResult};

pub use activation::{
    resolve_activation, ActivationAdvisor, ActivationDecision, ActivationSource, AdvisorVerdict,
    LlmActivationAdvisor,
};
pub use factory::{ActivationPredicate, AgentBuilder, AgentDescriptor, AgentFactory};
pub use orchestrator::{
    AgentFailure, AgentReport, ConsignmentSession, HumanReviewItem, OrchestrationReport,
    Orchestrator, SessionState,
};
pub use types::{AgentAlert, AgentEvent, AgentResponse, ShipmentContext, SkillOutcome};

/// A domain specialist driven by the orchestrator.
#[async_trait]
pub trait SubAgent: Send + Sync {
    fn id(&self) -> &str;

    /// Whether this agent has anything to say about the event.
    fn can_handle(&self, event: &AgentEvent) -> bool;

    /// Process one event against a read-only snapshot.
    ///
    /// Errors are contained by the orchestrator and reported as a failed
    /// agent; they never abort the pass.
    async fn process(&self, event: &AgentEvent, ctx: &AgentContext<'_>) -> Result<AgentResponse>;
}

/// Everything an agent may read during one pass.
pub struct AgentContext<'a> {
    pub shipment: &'a ShipmentContext,
    /// Graph as it was when the pass started
    pub graph: &'a DependencyGraph,
    /// Names of every document uploaded so far, including this event's
    pub documents: &'a [String],
    pub skills: &'a SkillInvoker,
}

impl AgentContext<'_> {
    pub fn has_document(&self, keywords: &[&str]) -> bool {
        self.documents.iter().any(|doc| {
            let doc = doc.to_lowercase();
            keywords.iter().any(|k| doc.contains(k))
        })
    }
}

/// Runs skills for agents: learned adjustments merged in, breaker applied,
/// pass deadline propagated.
#[derive(Clone)]
pub struct SkillInvoker {
    executor: ReliableExecutor,
    learning: Arc<LearningEngine>,
    deadline: Option<Instant>,
}

impl SkillInvoker {
    pub fn new(
        executor: ReliableExecutor,
        learning: Arc<LearningEngine>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            executor,
            learning,
            deadline,
        }
    }

    pub async fn run(&self, skill_id: &str, mut context: SkillContext) -> SkillResult {
        self.learning.apply_adjustments(skill_id, &mut context).await;
        self.executor
            .execute(skill_id, &context, self.deadline)
            .await
    }
}
