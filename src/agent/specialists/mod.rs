//! Built-in domain specialists.
//!
//! Each specialist is a unit struct implementing [`SubAgent`](crate::agent::SubAgent) plus a
//! descriptor carrying its static activation predicate. Activation reads only
//! the [`ShipmentContext`](crate::agent::ShipmentContext); everything else happens in `process`.

mod carbon_border;
mod cold_chain;
mod fisheries;
mod forced_labor;
mod logistics;
mod sanctions;

pub use carbon_border::CarbonBorderAgent;
pub use cold_chain::ColdChainAgent;
pub use fisheries::FisheriesAgent;
pub use forced_labor::ForcedLaborAgent;
pub use logistics::LogisticsAgent;
pub use sanctions::SanctionsAgent;

use super::factory::AgentDescriptor;
use super::types::{AgentAlert, AgentResponse};
use super::AgentContext;
use crate::graph::{Fact, Relationship};
use crate::skill::{AuditAction, SkillResult, Verdict};

/// Descriptors for every built-in specialist, in registration order.
pub fn builtin_descriptors() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor {
            id: ForcedLaborAgent::ID,
            name: "Forced Labor",
            description: "Screens origin regions and high-risk sectors for forced-labor exposure \
                          and abnormal under-invoicing",
            should_activate: ForcedLaborAgent::should_activate,
            build: ForcedLaborAgent::build,
        },
        AgentDescriptor {
            id: SanctionsAgent::ID,
            name: "Sanctions",
            description: "Screens parties against denied-party lists and routes against embargoes",
            should_activate: SanctionsAgent::should_activate,
            build: SanctionsAgent::build,
        },
        AgentDescriptor {
            id: ColdChainAgent::ID,
            name: "Cold Chain",
            description: "Monitors temperature-controlled goods for excursions using mean kinetic \
                          temperature",
            should_activate: ColdChainAgent::should_activate,
            build: ColdChainAgent::build,
        },
        AgentDescriptor {
            id: FisheriesAgent::ID,
            name: "Fisheries",
            description: "Checks seafood for catch documentation and illegal-fishing controls",
            should_activate: FisheriesAgent::should_activate,
            build: FisheriesAgent::build,
        },
        AgentDescriptor {
            id: CarbonBorderAgent::ID,
            name: "Carbon Border",
            description: "Assesses carbon border adjustment exposure for carbon-intensive goods \
                          entering the EU",
            should_activate: CarbonBorderAgent::should_activate,
            build: CarbonBorderAgent::build,
        },
        AgentDescriptor {
            id: LogisticsAgent::ID,
            name: "Logistics",
            description: "Tracks routing, transit exposure and transport documents",
            should_activate: LogisticsAgent::should_activate,
            build: LogisticsAgent::build,
        },
    ]
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}

fn source_for(agent_id: &str) -> String {
    format!("agent:{}", agent_id)
}

/// Record a derived fact, linked to the latest facts it was computed from.
fn derive_fact(
    response: &mut AgentResponse,
    ctx: &AgentContext<'_>,
    agent_id: &str,
    predicate: &str,
    object: impl Into<String>,
    inputs: &[&str],
) {
    let subject = ctx.shipment.shipment_id.as_str();
    let fact = Fact::generated(subject, predicate, object, source_for(agent_id));
    for input in inputs {
        if let Some(parent) = ctx.graph.latest_fact(subject, input) {
            response
                .relationships
                .push(Relationship::depends_on(fact.id.clone(), parent.id.clone()));
        }
    }
    response.facts.push(fact);
}

/// Alert for a skill verdict, or `None` when the verdict needs no attention.
///
/// Failed skill calls surface as warnings so a human knows the check did not
/// run. So does a breaker fallback standing in for the skill, unless it
/// replays a verdict that already raises an alert.
fn verdict_alert(label: &str, result: &SkillResult) -> Option<AgentAlert> {
    let detail = result
        .message()
        .map(str::to_string)
        .or_else(|| result.errors.first().cloned())
        .unwrap_or_default();
    if !result.success {
        return Some(AgentAlert::warning(format!("{} check incomplete: {}", label, detail)));
    }
    match result.verdict {
        Verdict::NonCompliant => Some(AgentAlert::critical(format!("{}: {}", label, detail))),
        Verdict::Warning => Some(AgentAlert::warning(format!("{}: {}", label, detail))),
        Verdict::Compliant | Verdict::Unknown if answered_by_fallback(result) => {
            let cause = result.errors.first().cloned().unwrap_or(detail);
            Some(AgentAlert::warning(format!("{} check degraded: {}", label, cause)))
        }
        Verdict::Compliant | Verdict::Unknown => None,
    }
}

fn answered_by_fallback(result: &SkillResult) -> bool {
    result
        .audit_log
        .iter()
        .any(|entry| entry.action == AuditAction::Fallback)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::agent::types::{AgentEvent, AgentResponse, ShipmentContext};
    use crate::agent::{AgentContext, SkillInvoker, SubAgent};
    use crate::config::SkillThresholds;
    use crate::graph::DependencyGraph;
    use crate::learning::LearningEngine;
    use crate::reliability::{CircuitBreakers, ReliableExecutor};
    use crate::skill::builtin::{
        register_builtin_skills, RuleData, StaticPriceIndex, StaticSanctionsList,
    };
    use crate::skill::SkillRegistry;

    pub fn rule_data() -> RuleData {
        RuleData {
            prices: Arc::new(StaticPriceIndex::new().with_price("Solar Panels", 2500.0)),
            sanctions: Arc::new(
                StaticSanctionsList::new()
                    .with_party("Dark Fleet Shipping", "OFAC SDN")
                    .with_embargo("North Korea"),
            ),
        }
    }

    pub fn executor() -> ReliableExecutor {
        let mut registry = SkillRegistry::new();
        register_builtin_skills(&mut registry, &SkillThresholds::default(), rule_data())
            .unwrap();
        ReliableExecutor::new(Arc::new(registry), Arc::new(CircuitBreakers::default()))
    }

    pub fn invoker() -> SkillInvoker {
        SkillInvoker::new(executor(), Arc::new(LearningEngine::default()), None)
    }

    /// Run one agent against a shipment with no prior facts.
    pub async fn run(
        agent: &dyn SubAgent,
        event: &AgentEvent,
        shipment: &ShipmentContext,
        graph: &DependencyGraph,
        documents: &[&str],
    ) -> AgentResponse {
        let documents: Vec<String> = documents.iter().map(|d| d.to_string()).collect();
        let skills = invoker();
        let ctx = AgentContext {
            shipment,
            graph,
            documents: &documents,
            skills: &skills,
        };
        assert!(agent.can_handle(event));
        agent.process(event, &ctx).await.unwrap()
    }
}
