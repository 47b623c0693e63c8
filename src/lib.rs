//! # consign-core
//!
//! Multi-agent regulatory-consistency engine for shipment documents.
//!
//! Every consignment carries a fact graph built from its uploaded documents.
//! Domain specialists (forced labor, sanctions, cold chain, fisheries, carbon
//! border, logistics) react to events on the consignment, call compliance
//! skills through per-skill circuit breakers, and add derived facts back into
//! the graph. Each update is checked against the history (one step backward)
//! and against the documents it implies (one step forward).
//!
//! ## Core Components
//!
//! - **Graph**: facts, dependency edges and invalidation cascades
//! - **Consistency**: backward, forward and full-chain validation
//! - **Skills**: stateless evaluators behind a panic-safe registry
//! - **Reliability**: circuit breakers, timeouts and fallbacks per skill
//! - **Learning**: human feedback turned into skill adjustments
//! - **Arbiter**: trade-off resolution between agent recommendations
//! - **Agent**: activation, sessions and the orchestration pass
//!
//! ## Example
//!
//! ```rust,ignore
//! use consign_core::{AgentEvent, EngineConfig, ExtractedDocument, Orchestrator, ShipmentContext};
//! use consign_core::skill::builtin::RuleData;
//!
//! let orchestrator = Orchestrator::with_builtins(EngineConfig::from_env()?, RuleData::default())?;
//! let mut session = orchestrator
//!     .open_session(ShipmentContext::new("shp-42").with_destination("Germany"))
//!     .await;
//!
//! let invoice = ExtractedDocument::new("invoice.pdf")
//!     .with_field("origin_country", "China")
//!     .with_field("product_name", "Solar Panels");
//! let report = orchestrator
//!     .process_event(&mut session, &AgentEvent::DocumentParsed { document: invoice })
//!     .await;
//!
//! if report.has_critical() {
//!     for item in &report.human_review {
//!         println!("[{}] {}: {}", item.severity, item.source, item.reason);
//!     }
//! }
//! ```

pub mod agent;
pub mod arbiter;
pub mod config;
pub mod consistency;
pub mod error;
pub mod extraction;
pub mod graph;
pub mod learning;
pub mod llm;
pub mod reliability;
pub mod skill;

// Re-exports for convenience
pub use agent::{
    AgentAlert, AgentEvent, AgentFactory, AgentResponse, ConsignmentSession,
    OrchestrationReport, Orchestrator, SessionState, ShipmentContext, SubAgent,
};
pub use arbiter::{ArbitrationOutcome, ConflictArbiter, Priority, Recommendation};
pub use config::{ActivationMode, EngineConfig, SkillThresholds};
pub use consistency::{generate_validation_result, Severity, ValidationResult};
pub use error::{Error, Result};
pub use extraction::ExtractedDocument;
pub use graph::{DependencyGraph, Fact, FactId, GraphState, Relationship};
pub use learning::{
    FeedbackOutcome, FeedbackRecord, LearningEngine, LearningSnapshot, SkillPerformance,
};
pub use reliability::{CircuitBreakerConfig, CircuitBreakers, ReliableExecutor};
pub use skill::{Skill, SkillContext, SkillRegistry, SkillResult, Verdict};
