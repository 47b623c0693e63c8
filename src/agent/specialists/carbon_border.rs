//! Carbon border adjustment specialist.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{derive_fact, verdict_alert};
use crate::agent::types::{AgentAlert, AgentEvent, AgentResponse, ShipmentContext};
use crate::agent::{AgentContext, SubAgent};
use crate::error::Result;
use crate::skill::builtin::{cbam_sector, is_eu_destination, CarbonBorderSkill};
use crate::skill::Verdict;

pub struct CarbonBorderAgent;

impl CarbonBorderAgent {
    pub const ID: &'static str = "carbon-border";

    /// Carbon-intensive goods bound for the EU.
    pub fn should_activate(shipment: &ShipmentContext) -> bool {
        let eu_bound = shipment
            .destination_country
            .as_deref()
            .is_some_and(is_eu_destination);
        eu_bound && shipment.hs_code.as_deref().and_then(cbam_sector).is_some()
    }

    pub fn build() -> Arc<dyn SubAgent> {
        Arc::new(Self)
    }
}

#[async_trait]
impl SubAgent for CarbonBorderAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn can_handle(&self, event: &AgentEvent) -> bool {
        matches!(
            event,
            AgentEvent::DocumentParsed { .. } | AgentEvent::RouteUpdated { .. }
        )
    }

    async fn process(&self, _event: &AgentEvent, ctx: &AgentContext<'_>) -> Result<AgentResponse> {
        let mut response = AgentResponse::new();
        let result = ctx
            .skills
            .run(CarbonBorderSkill::ID, ctx.shipment.to_skill_context())
            .await;
        response.record_skill(CarbonBorderSkill::ID, &result);
        if let Some(message) = result.message() {
            response.note(message);
        }

        let in_scope = result
            .data
            .get("in_scope")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if let Some(alert) = verdict_alert("Carbon border", &result) {
            response.alert(if result.success && result.verdict == Verdict::Warning {
                alert.with_action("Request installation-level emissions data from the producer")
            } else {
                alert
            });
        }
        if result.success && result.verdict == Verdict::Warning && in_scope {
            response.require_document("cbam_emissions_declaration");
        }

        if let Some(levy) = result.data.get("estimated_levy_eur").and_then(Value::as_f64) {
            response.alert(AgentAlert::info(format!(
                "Estimated carbon border levy EUR {:.2}",
                levy
            )));
            response.recommend(
                Self::ID,
                "Source from lower-emission producers to reduce carbon emissions and the levy",
            );
            derive_fact(
                &mut response,
                ctx,
                Self::ID,
                "cbam_levy_eur",
                format!("{:.2}", levy),
                &["hs_code", "destination_country", "embedded_emissions_tco2"],
            );
        }
        Ok(response)
    }
}
