//! Agent activation: static predicates first, an optional advisor second.
//!
//! The predicate answer is always computed. In assisted mode the advisor is
//! asked per agent under a timeout; if it errors, times out or returns
//! something unparseable, the predicate answer stands.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::factory::{AgentDescriptor, AgentFactory};
use super::types::ShipmentContext;
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};

/// Where an activation answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationSource {
    /// Static predicate (deterministic mode)
    Predicate,
    /// Advisor answer (assisted mode)
    Advisor,
    /// Assisted mode, but the advisor failed
    PredicateFallback,
}

/// Whether one agent is active for a shipment, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationDecision {
    pub agent_id: String,
    pub active: bool,
    pub source: ActivationSource,
    pub reason: String,
}

/// An advisor's answer for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorVerdict {
    #[serde(alias = "activate")]
    pub active: bool,
    #[serde(default)]
    pub reason: String,
}

/// Non-deterministic activation source, e.g. an LLM.
#[async_trait]
pub trait ActivationAdvisor: Send + Sync {
    async fn advise(
        &self,
        agent: &AgentDescriptor,
        shipment: &ShipmentContext,
    ) -> Result<AdvisorVerdict>;
}

fn predicate_decision(
    descriptor: &AgentDescriptor,
    shipment: &ShipmentContext,
    source: ActivationSource,
    note: Option<&str>,
) -> ActivationDecision {
    let active = (descriptor.should_activate)(shipment);
    let verdict = if active { "matches" } else { "does not match" };
    let mut reason = format!("Shipment {} {} activation criteria", verdict, descriptor.name);
    if let Some(note) = note {
        reason.push_str(&format!(" (advisor unavailable: {})", note));
    }
    ActivationDecision {
        agent_id: descriptor.id.to_string(),
        active,
        source,
        reason,
    }
}

/// Decide activation for every registered agent, in registration order.
#[instrument(skip_all, fields(shipment_id = %shipment.shipment_id, assisted = advisor.is_some()))]
pub async fn resolve_activation(
    factory: &AgentFactory,
    shipment: &ShipmentContext,
    advisor: Option<&dyn ActivationAdvisor>,
    advisor_timeout: Duration,
) -> Vec<ActivationDecision> {
    let Some(advisor) = advisor else {
        return factory
            .descriptors()
            .iter()
            .map(|d| predicate_decision(d, shipment, ActivationSource::Predicate, None))
            .collect();
    };

    let asks = factory.descriptors().iter().map(|descriptor| async move {
        match tokio::time::timeout(advisor_timeout, advisor.advise(descriptor, shipment)).await {
            Ok(Ok(verdict)) => {
                debug!(agent_id = descriptor.id, active = verdict.active, "Advisor decided");
                ActivationDecision {
                    agent_id: descriptor.id.to_string(),
                    active: verdict.active,
                    source: ActivationSource::Advisor,
                    reason: verdict.reason,
                }
            }
            Ok(Err(e)) => {
                warn!(agent_id = descriptor.id, error = %e, "Advisor failed, using predicate");
                predicate_decision(
                    descriptor,
                    shipment,
                    ActivationSource::PredicateFallback,
                    Some(&e.to_string()),
                )
            }
            Err(_) => {
                warn!(agent_id = descriptor.id, "Advisor timed out, using predicate");
                predicate_decision(
                    descriptor,
                    shipment,
                    ActivationSource::PredicateFallback,
                    Some("timed out"),
                )
            }
        }
    });
    join_all(asks).await
}

const ADVISOR_SYSTEM_PROMPT: &str = "You route international shipments to compliance specialists. \
Given a specialist's description and a shipment, answer whether the specialist should review it. \
Reply with JSON only: {\"activate\": true|false, \"reason\": \"<one sentence>\"}";

/// Asks an LLM whether each agent is relevant.
pub struct LlmActivationAdvisor {
    client: Arc<dyn LLMClient>,
    model: Option<String>,
}

impl LlmActivationAdvisor {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn prompt(agent: &AgentDescriptor, shipment: &ShipmentContext) -> Result<String> {
        let shipment_json = serde_json::to_string_pretty(shipment)?;
        Ok(format!(
            "Specialist: {} ({})\n{}\n\nShipment:\n{}",
            agent.name, agent.id, agent.description, shipment_json
        ))
    }
}

/// Pull the first JSON object out of a model reply.
fn parse_verdict(content: &str) -> Result<AdvisorVerdict> {
    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if e > s => Ok(serde_json::from_str(&content[s..=e])?),
        _ => Err(Error::llm_api(
            "activation-advisor",
            format!("no JSON object in reply: {}", content.trim()),
        )),
    }
}

#[async_trait]
impl ActivationAdvisor for LlmActivationAdvisor {
    async fn advise(
        &self,
        agent: &AgentDescriptor,
        shipment: &ShipmentContext,
    ) -> Result<AdvisorVerdict> {
        let mut request = CompletionRequest::new()
            .with_system(ADVISOR_SYSTEM_PROMPT)
            .with_message(ChatMessage::user(Self::prompt(agent, shipment)?))
            .with_max_tokens(200)
            .with_temperature(0.0);
        if let Some(model) = &self.model {
            request = request.with_model(model.clone());
        }

        let response = self.client.complete(request).await?;
        parse_verdict(&response.content)
    }
}
