//! Consignment sessions and the per-event orchestration pass.

use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::activation::{
    resolve_activation, ActivationAdvisor, ActivationDecision, LlmActivationAdvisor,
};
use super::factory::AgentFactory;
use super::types::{AgentAlert, AgentEvent, AgentResponse, ShipmentContext};
use super::{AgentContext, SkillInvoker, SubAgent};
use crate::arbiter::{ArbitrationOutcome, ConflictArbiter, Priority, Recommendation};
use crate::config::{ActivationMode, EngineConfig};
use crate::consistency::{generate_validation_result, Severity, ValidationResult};
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, Fact, FactId, GraphState};
use crate::learning::{FeedbackRecord, LearningEngine, SkillPerformance};
use crate::llm::AnthropicClient;
use crate::reliability::{CircuitBreakers, ReliableExecutor};
use crate::skill::builtin::{register_builtin_skills, RuleData};
use crate::skill::{panic_message, SkillRegistry, Verdict};

/// Provenance of facts taken from route updates.
pub const ROUTE_SOURCE: &str = "route-update";

/// Predicates that accumulate values instead of replacing them.
const MULTI_VALUED: &[&str] = &["transit_country"];

/// State of one consignment across events.
///
/// The graph belongs to this session only; callers serialize access per
/// consignment.
pub struct ConsignmentSession {
    pub id: String,
    pub shipment: ShipmentContext,
    pub graph: DependencyGraph,
    /// Uploaded document names, in upload order
    pub documents: Vec<String>,
    /// Latest activation decision for every registered agent
    pub activations: Vec<ActivationDecision>,
    agents: Vec<Arc<dyn SubAgent>>,
    /// Superseded facts and their invalidation closures
    retired: BTreeSet<FactId>,
}

impl ConsignmentSession {
    pub fn active_agents(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.id()).collect()
    }

    /// Persistence shape of the session graph.
    pub fn graph_state(&self) -> GraphState {
        self.graph.to_state()
    }

    /// Whether a later fact replaced this one, directly or through a
    /// dependency.
    pub fn is_retired(&self, id: &FactId) -> bool {
        self.retired.contains(id)
    }

    /// Facts still standing, in insertion order.
    pub fn current_facts(&self) -> impl Iterator<Item = &Fact> {
        self.graph
            .get_all_facts()
            .iter()
            .filter(|f| !self.retired.contains(&f.id))
    }

    /// Everything needed to resume the session later.
    pub fn to_state(&self) -> SessionState {
        SessionState {
            graph: self.graph.to_state(),
            documents: self.documents.clone(),
            retired: self.retired.iter().cloned().collect(),
        }
    }
}

/// Persisted form of a [`ConsignmentSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub graph: GraphState,
    #[serde(default)]
    pub documents: Vec<String>,
    /// Ids of retired facts, sorted
    #[serde(default)]
    pub retired: Vec<FactId>,
}

impl std::fmt::Debug for ConsignmentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsignmentSession")
            .field("id", &self.id)
            .field("shipment_id", &self.shipment.shipment_id)
            .field("facts", &self.graph.len())
            .field("documents", &self.documents)
            .field("active_agents", &self.active_agents())
            .finish()
    }
}

/// One agent's contribution to a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent_id: String,
    pub response: AgentResponse,
}

/// An agent that errored, panicked or missed the deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentFailure {
    pub agent_id: String,
    pub reason: String,
}

/// Something a human has to look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanReviewItem {
    /// `agent`, `agent/skill` or `consistency`
    pub source: String,
    pub reason: String,
    pub severity: Severity,
}

/// Aggregate outcome of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationReport {
    pub session_id: String,
    pub event_kind: String,
    pub activations: Vec<ActivationDecision>,
    pub agent_results: Vec<AgentReport>,
    pub failed_agents: Vec<AgentFailure>,
    pub alerts: Vec<AgentAlert>,
    pub required_documents: Vec<String>,
    /// Facts added to the graph by this event, in insertion order
    pub new_facts: Vec<Fact>,
    /// Superseded facts and everything that depended on them
    pub invalidated_facts: Vec<FactId>,
    pub validation: ValidationResult,
    pub arbitration: ArbitrationOutcome,
    pub human_review: Vec<HumanReviewItem>,
    /// The pass deadline expired before every agent finished
    pub incomplete: bool,
    /// Updated performance, for `human_decision` events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<SkillPerformance>,
    pub graph_version: u64,
}

impl OrchestrationReport {
    pub fn has_critical(&self) -> bool {
        self.human_review
            .iter()
            .any(|item| item.severity == Severity::Critical)
    }

    /// Every agent's findings, one block per agent.
    pub fn summary(&self) -> String {
        self.agent_results
            .iter()
            .filter(|r| !r.response.response.is_empty())
            .map(|r| format!("[{}]\n{}", r.agent_id, r.response.response))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Drives events through the active agents of a consignment.
pub struct Orchestrator {
    factory: AgentFactory,
    executor: ReliableExecutor,
    learning: Arc<LearningEngine>,
    arbiter: ConflictArbiter,
    advisor: Option<Arc<dyn ActivationAdvisor>>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, registry: Arc<SkillRegistry>, factory: AgentFactory) -> Self {
        let breakers = Arc::new(CircuitBreakers::from_config(&config));
        Self {
            factory,
            executor: ReliableExecutor::new(registry, breakers),
            learning: Arc::new(LearningEngine::new(config.feedback_retention)),
            arbiter: ConflictArbiter::new(),
            advisor: None,
            config,
        }
    }

    /// Built-in skills and agents over the given rule data.
    ///
    /// In assisted mode with LLM credentials configured, activation is also
    /// offered to an [`LlmActivationAdvisor`].
    pub fn with_builtins(config: EngineConfig, data: RuleData) -> Result<Self> {
        config.validate()?;
        let mut registry = SkillRegistry::new();
        register_builtin_skills(&mut registry, &config.thresholds, data)?;

        let mut orchestrator =
            Self::new(config, Arc::new(registry), AgentFactory::with_builtin_agents()?);
        if orchestrator.config.activation.mode == ActivationMode::Assisted {
            match orchestrator.config.llm.clone() {
                Some(llm) => {
                    let client = AnthropicClient::new(llm)?;
                    orchestrator.advisor =
                        Some(Arc::new(LlmActivationAdvisor::new(Arc::new(client))));
                }
                None => warn!("Assisted activation configured without LLM credentials"),
            }
        }
        Ok(orchestrator)
    }

    /// Advisor consulted when the activation mode is assisted.
    pub fn with_advisor(mut self, advisor: Arc<dyn ActivationAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Share a learning engine, e.g. one restored from a [`LearningSnapshot`](crate::learning::LearningSnapshot).
    pub fn with_learning(mut self, learning: Arc<LearningEngine>) -> Self {
        self.learning = learning;
        self
    }

    pub fn with_arbiter(mut self, arbiter: ConflictArbiter) -> Self {
        self.arbiter = arbiter;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn factory(&self) -> &AgentFactory {
        &self.factory
    }

    pub fn executor(&self) -> &ReliableExecutor {
        &self.executor
    }

    pub fn learning(&self) -> &Arc<LearningEngine> {
        &self.learning
    }

    async fn activate(
        &self,
        shipment: &ShipmentContext,
    ) -> (Vec<ActivationDecision>, Vec<Arc<dyn SubAgent>>) {
        let advisor = match self.config.activation.mode {
            ActivationMode::Assisted => self.advisor.as_deref(),
            ActivationMode::Deterministic => None,
        };
        let timeout = Duration::from_millis(self.config.activation.advisor_timeout_ms);
        let decisions = resolve_activation(&self.factory, shipment, advisor, timeout).await;
        let agents: Vec<Arc<dyn SubAgent>> = decisions
            .iter()
            .filter(|d| d.active)
            .filter_map(|d| self.factory.build(&d.agent_id))
            .collect();
        debug!(
            shipment_id = %shipment.shipment_id,
            active = agents.len(),
            "Resolved agent activation"
        );
        (decisions, agents)
    }

    /// Start a session with an empty graph.
    pub async fn open_session(&self, shipment: ShipmentContext) -> ConsignmentSession {
        let (activations, agents) = self.activate(&shipment).await;
        let session = ConsignmentSession {
            id: Uuid::new_v4().to_string(),
            shipment,
            graph: DependencyGraph::new(),
            documents: Vec::new(),
            activations,
            agents,
            retired: BTreeSet::new(),
        };
        info!(session_id = %session.id, shipment_id = %session.shipment.shipment_id, "Opened session");
        session
    }

    /// Rebuild a session from persisted state.
    ///
    /// Facts about the shipment that are still standing are folded back into
    /// its context. A corrupt graph, including a retired id the graph does not
    /// hold, is the one hard failure.
    pub async fn resume_session(
        &self,
        mut shipment: ShipmentContext,
        state: SessionState,
    ) -> Result<ConsignmentSession> {
        let graph = DependencyGraph::from_state(state.graph)?;
        let retired: BTreeSet<FactId> = state.retired.into_iter().collect();
        if let Some(unknown) = retired.iter().find(|id| !graph.contains(id)) {
            return Err(Error::CorruptGraph(format!(
                "retired fact {} is not in the graph",
                unknown
            )));
        }

        let subject = shipment.shipment_id.clone();
        for fact in graph
            .facts_for_subject(&subject)
            .filter(|f| !retired.contains(&f.id))
        {
            shipment.apply_fact(fact);
        }

        let (activations, agents) = self.activate(&shipment).await;
        let session = ConsignmentSession {
            id: Uuid::new_v4().to_string(),
            shipment,
            graph,
            documents: state.documents,
            activations,
            agents,
            retired,
        };
        info!(
            session_id = %session.id,
            facts = session.graph.len(),
            version = session.graph.version(),
            "Resumed session"
        );
        Ok(session)
    }

    /// Run one event through the session.
    ///
    /// Never fails: agent errors, panics and deadline misses are reported in
    /// `failed_agents`, and whatever finished is still merged.
    #[instrument(skip_all, fields(session_id = %session.id, event = event.kind()))]
    pub async fn process_event(
        &self,
        session: &mut ConsignmentSession,
        event: &AgentEvent,
    ) -> OrchestrationReport {
        let deadline = self
            .config
            .pass_timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms));

        let feedback = match event {
            AgentEvent::HumanDecision {
                skill_id,
                outcome,
                input,
                output,
                correction,
            } => {
                let mut record = FeedbackRecord::new(skill_id.clone(), *outcome)
                    .with_input(input.clone())
                    .with_output(output.clone());
                if let Some(correction) = correction {
                    record = record.with_correction(correction.clone());
                }
                Some(self.learning.record_feedback(record).await)
            }
            _ => None,
        };

        if let AgentEvent::DocumentParsed { document } = event {
            if !session.documents.contains(&document.document_name) {
                session.documents.push(document.document_name.clone());
            }
        }

        // Facts carried by the event land before the snapshot so agents can
        // reference them.
        let existing: Vec<Fact> = session.current_facts().cloned().collect();
        let mut new_facts: Vec<Fact> = Vec::new();
        let mut superseded: Vec<FactId> = Vec::new();
        let incoming = event_facts(
            &session.graph,
            &session.retired,
            &session.shipment.shipment_id,
            event,
        );
        add_facts(
            &mut session.graph,
            &session.retired,
            "event",
            &incoming,
            &mut new_facts,
            &mut superseded,
        );

        let subject = session.shipment.shipment_id.clone();
        let mut changed = false;
        for fact in new_facts.iter().filter(|f| f.subject == subject) {
            changed |= session.shipment.apply_fact(fact);
        }
        if changed {
            let (activations, agents) = self.activate(&session.shipment).await;
            session.activations = activations;
            session.agents = agents;
        }

        let handlers: Vec<Arc<dyn SubAgent>> = session
            .agents
            .iter()
            .filter(|agent| agent.can_handle(event))
            .cloned()
            .collect();
        let invoker = SkillInvoker::new(self.executor.clone(), Arc::clone(&self.learning), deadline);
        let outcomes = {
            let snapshot = session.graph.clone();
            let ctx = AgentContext {
                shipment: &session.shipment,
                graph: &snapshot,
                documents: &session.documents,
                skills: &invoker,
            };
            let ctx = &ctx;
            let runs = handlers.iter().map(|agent| async move {
                let pass = AssertUnwindSafe(agent.process(event, ctx)).catch_unwind();
                let outcome = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, pass).await.ok(),
                    None => Some(pass.await),
                };
                (agent.id().to_string(), outcome)
            });
            join_all(runs).await
        };

        let mut incomplete = false;
        let mut agent_results: Vec<AgentReport> = Vec::new();
        let mut failed_agents: Vec<AgentFailure> = Vec::new();
        for (agent_id, outcome) in outcomes {
            let reason = match outcome {
                Some(Ok(Ok(mut response))) => {
                    for alert in &mut response.alerts {
                        alert.agent_id = agent_id.clone();
                    }
                    add_facts(
                        &mut session.graph,
                        &session.retired,
                        &agent_id,
                        &response.facts,
                        &mut new_facts,
                        &mut superseded,
                    );
                    for relationship in &response.relationships {
                        if let Err(e) = session.graph.add_relationship(relationship.clone()) {
                            warn!(agent_id = %agent_id, error = %e, "Dropped relationship");
                        }
                    }
                    agent_results.push(AgentReport { agent_id, response });
                    continue;
                }
                Some(Ok(Err(e))) => e.to_string(),
                Some(Err(panic)) => format!("panicked: {}", panic_message(&*panic)),
                None => {
                    incomplete = true;
                    "did not finish before the pass deadline".to_string()
                }
            };
            warn!(agent_id = %agent_id, reason = %reason, "Agent failed");
            failed_agents.push(AgentFailure { agent_id, reason });
        }

        let mut invalidated: HashSet<FactId> = HashSet::new();
        for id in &superseded {
            invalidated.extend(session.graph.invalidate_fact(id));
        }
        let mut invalidated_facts: Vec<FactId> = invalidated.into_iter().collect();
        invalidated_facts.sort();
        session.retired.extend(invalidated_facts.iter().cloned());

        let standing: Vec<Fact> = new_facts
            .iter()
            .filter(|f| !session.retired.contains(&f.id))
            .cloned()
            .collect();
        let validation = generate_validation_result(&standing, &existing, &session.documents);

        let recommendations: Vec<Recommendation> = agent_results
            .iter()
            .flat_map(|r| r.response.recommendations.iter().cloned())
            .collect();
        let priority = match session.shipment.priority.as_deref().map(str::parse::<Priority>) {
            Some(Ok(priority)) => Some(priority),
            Some(Err(e)) => {
                warn!(error = %e, "Ignoring shipment priority");
                None
            }
            None => None,
        };
        let arbitration = self.arbiter.resolve(&recommendations, priority);

        let alerts: Vec<AgentAlert> = agent_results
            .iter()
            .flat_map(|r| r.response.alerts.iter().cloned())
            .collect();
        let mut required_documents: Vec<String> = Vec::new();
        for document in agent_results
            .iter()
            .flat_map(|r| r.response.required_documents.iter())
        {
            if !required_documents.contains(document) {
                required_documents.push(document.clone());
            }
        }
        let human_review = human_review_items(&agent_results, &validation);

        info!(
            agents = agent_results.len(),
            failed = failed_agents.len(),
            new_facts = new_facts.len(),
            invalidated = invalidated_facts.len(),
            flagged = validation.is_flagged(),
            incomplete,
            "Processed event"
        );

        OrchestrationReport {
            session_id: session.id.clone(),
            event_kind: event.kind().to_string(),
            activations: session.activations.clone(),
            agent_results,
            failed_agents,
            alerts,
            required_documents,
            new_facts,
            invalidated_facts,
            validation,
            arbitration,
            human_review,
            incomplete,
            feedback,
            graph_version: session.graph.version(),
        }
    }
}

/// Facts asserted directly by an event.
///
/// A re-uploaded document contributes only the fields whose value changed.
/// Route values that repeat what is already known are dropped.
fn event_facts(
    graph: &DependencyGraph,
    retired: &BTreeSet<FactId>,
    subject: &str,
    event: &AgentEvent,
) -> Vec<Fact> {
    match event {
        AgentEvent::DocumentParsed { document } => document
            .into_facts(subject)
            .into_iter()
            .filter_map(|f| document_revision(graph, retired, f))
            .collect(),
        AgentEvent::RouteUpdated {
            origin_country,
            destination_country,
            transit_countries,
            carrier,
        } => {
            let mut fields: Vec<(&str, &str)> = Vec::new();
            if let Some(origin) = origin_country {
                fields.push(("origin_country", origin.as_str()));
            }
            if let Some(destination) = destination_country {
                fields.push(("destination_country", destination.as_str()));
            }
            for transit in transit_countries {
                fields.push(("transit_country", transit.as_str()));
            }
            if let Some(carrier) = carrier {
                fields.push(("carrier_name", carrier.as_str()));
            }

            fields
                .into_iter()
                .map(|(predicate, value)| (predicate, value.trim()))
                .filter(|(_, value)| !value.is_empty())
                .filter(|(predicate, value)| !already_known(graph, subject, predicate, value))
                .map(|(predicate, value)| Fact::generated(subject, predicate, value, ROUTE_SOURCE))
                .collect()
        }
        AgentEvent::SensorReadings { .. } | AgentEvent::HumanDecision { .. } => Vec::new(),
    }
}

/// Place a document fact after the revisions already stored under its id.
///
/// Revisions are numbered `<id>~2`, `<id>~3`, ... Returns `None` when the
/// latest revision still stands with the same value.
fn document_revision(
    graph: &DependencyGraph,
    retired: &BTreeSet<FactId>,
    mut fact: Fact,
) -> Option<Fact> {
    let base = fact.id.clone();
    let mut id = base.clone();
    let mut latest: Option<&Fact> = None;
    let mut revision = 1;
    while let Some(stored) = graph.get_fact(&id) {
        latest = Some(stored);
        revision += 1;
        id = FactId(format!("{}~{}", base, revision));
    }

    match latest {
        Some(stored) if stored.object == fact.object && !retired.contains(&stored.id) => None,
        Some(_) => {
            fact.id = id;
            Some(fact)
        }
        None => Some(fact),
    }
}

fn already_known(graph: &DependencyGraph, subject: &str, predicate: &str, value: &str) -> bool {
    if predicate == "transit_country" {
        return graph
            .facts_for_subject(subject)
            .any(|f| f.predicate == predicate && f.object.eq_ignore_ascii_case(value));
    }
    graph
        .latest_value(subject, predicate)
        .is_some_and(|current| current.eq_ignore_ascii_case(value))
}

/// Add facts not yet in the graph, noting which standing facts they
/// supersede.
fn add_facts(
    graph: &mut DependencyGraph,
    retired: &BTreeSet<FactId>,
    origin: &str,
    facts: &[Fact],
    added: &mut Vec<Fact>,
    superseded: &mut Vec<FactId>,
) {
    for fact in facts {
        if graph.contains(&fact.id) {
            continue;
        }
        if !MULTI_VALUED.contains(&fact.predicate.as_str()) {
            superseded.extend(
                graph
                    .detect_conflicts(fact)
                    .into_iter()
                    .filter(|f| !retired.contains(&f.id))
                    .map(|f| f.id.clone()),
            );
        }
        match graph.add_fact(fact.clone()) {
            Ok(()) => added.push(fact.clone()),
            Err(e) => warn!(origin, error = %e, "Dropped fact"),
        }
    }
}

fn human_review_items(
    results: &[AgentReport],
    validation: &ValidationResult,
) -> Vec<HumanReviewItem> {
    let mut items = Vec::new();
    for report in results {
        for outcome in &report.response.skill_outcomes {
            let result = &outcome.result;
            if !result.requires_human_review {
                continue;
            }
            let reason = result
                .message()
                .map(str::to_string)
                .or_else(|| result.errors.first().cloned())
                .unwrap_or_else(|| format!("{} returned {}", outcome.skill_id, result.verdict));
            items.push(HumanReviewItem {
                source: format!("{}/{}", report.agent_id, outcome.skill_id),
                reason,
                severity: if result.verdict == Verdict::NonCompliant {
                    Severity::Critical
                } else {
                    Severity::Warning
                },
            });
        }
        for alert in &report.response.alerts {
            if alert.severity == Severity::Critical {
                items.push(HumanReviewItem {
                    source: report.agent_id.clone(),
                    reason: alert.message.clone(),
                    severity: Severity::Critical,
                });
            }
        }
    }
    for conflict in validation.critical_conflicts() {
        items.push(HumanReviewItem {
            source: "consistency".to_string(),
            reason: format!(
                "{} changed from '{}' ({}) to '{}' ({})",
                conflict.field,
                conflict.previous_value,
                conflict.previous_source,
                conflict.current_value,
                conflict.current_source
            ),
            severity: Severity::Critical,
        });
    }
    for gap in validation.critical_gaps() {
        items.push(HumanReviewItem {
            source: "consistency".to_string(),
            reason: format!("Missing {}: {}", gap.expected, gap.reason),
            severity: Severity::Critical,
        });
    }
    items
}
