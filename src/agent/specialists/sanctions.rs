//! Sanctions specialist.

use std::sync::Arc;

use async_trait::async_trait;

use super::{derive_fact, verdict_alert};
use crate::agent::types::{AgentEvent, AgentResponse, ShipmentContext};
use crate::agent::{AgentContext, SubAgent};
use crate::error::Result;
use crate::skill::builtin::SanctionsScreeningSkill;
use crate::skill::Verdict;

/// Screens parties and route countries whenever either changes.
pub struct SanctionsAgent;

impl SanctionsAgent {
    pub const ID: &'static str = "sanctions";

    /// Any cross-border shipment with a known party or country is screened.
    pub fn should_activate(shipment: &ShipmentContext) -> bool {
        !shipment.parties.is_empty()
            || shipment.origin_country.is_some()
            || shipment.destination_country.is_some()
    }

    pub fn build() -> Arc<dyn SubAgent> {
        Arc::new(Self)
    }
}

#[async_trait]
impl SubAgent for SanctionsAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn can_handle(&self, event: &AgentEvent) -> bool {
        matches!(
            event,
            AgentEvent::DocumentParsed { .. } | AgentEvent::RouteUpdated { .. }
        )
    }

    async fn process(&self, event: &AgentEvent, ctx: &AgentContext<'_>) -> Result<AgentResponse> {
        let mut response = AgentResponse::new();
        let mut input = ctx.shipment.to_skill_context();
        if let AgentEvent::RouteUpdated {
            carrier: Some(carrier),
            ..
        } = event
        {
            input.insert("carrier_name", carrier.clone());
        }

        let result = ctx.skills.run(SanctionsScreeningSkill::ID, input).await;
        response.record_skill(SanctionsScreeningSkill::ID, &result);
        if let Some(message) = result.message() {
            response.note(message);
        }

        if let Some(alert) = verdict_alert("Sanctions screening", &result) {
            let alert = match (result.success, result.verdict) {
                (true, Verdict::NonCompliant) => {
                    alert.with_action("Hold shipment and file a blocking report")
                }
                (true, Verdict::Warning) => {
                    alert.with_action("Confirm party identity against the listed entry")
                }
                _ => alert,
            };
            response.alert(alert);
        }
        if result.success && result.verdict == Verdict::NonCompliant {
            response.recommend(
                Self::ID,
                "Hold shipment pending sanctions compliance clearance",
            );
        }
        if result.success {
            derive_fact(
                &mut response,
                ctx,
                Self::ID,
                "sanctions_screening",
                result.verdict.to_string(),
                &["seller_name", "buyer_name", "destination_country"],
            );
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::run;
    use super::*;
    use crate::consistency::Severity;
    use crate::graph::DependencyGraph;

    #[tokio::test]
    async fn test_listed_carrier_on_route_update() {
        let shipment = ShipmentContext::new("s-1")
            .with_origin("Vietnam")
            .with_destination("Germany");
        let event = AgentEvent::RouteUpdated {
            origin_country: None,
            destination_country: None,
            transit_countries: Vec::new(),
            carrier: Some("Dark Fleet Shipping".into()),
        };

        let response = run(&SanctionsAgent, &event, &shipment, &DependencyGraph::new(), &[]).await;
        assert_eq!(response.alerts.len(), 1);
        assert_eq!(response.alerts[0].severity, Severity::Critical);
        assert!(response.alerts[0]
            .suggested_action
            .as_deref()
            .unwrap()
            .starts_with("Hold shipment"));
        assert_eq!(response.recommendations.len(), 1);
        assert_eq!(response.facts[0].object, Verdict::NonCompliant.to_string());
    }

    #[tokio::test]
    async fn test_clean_shipment_has_no_alerts() {
        let shipment = ShipmentContext::new("s-1")
            .with_party("Globex GmbH")
            .with_destination("Germany");
        let event = AgentEvent::route(None, Some("Germany"), &[]);

        let response = run(&SanctionsAgent, &event, &shipment, &DependencyGraph::new(), &[]).await;
        assert!(response.alerts.is_empty());
        assert!(response.recommendations.is_empty());
        assert_eq!(response.facts.len(), 1);
    }

    #[test]
    fn test_activation() {
        assert!(SanctionsAgent::should_activate(
            &ShipmentContext::new("s").with_party("ACME")
        ));
        assert!(!SanctionsAgent::should_activate(&ShipmentContext::new("s")));
    }
}
