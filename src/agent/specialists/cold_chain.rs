//! Cold-chain specialist.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{contains_any, derive_fact, verdict_alert};
use crate::agent::types::{AgentAlert, AgentEvent, AgentResponse, ShipmentContext};
use crate::agent::{AgentContext, SubAgent};
use crate::error::Result;
use crate::skill::builtin::MeanKineticTemperatureSkill;
use crate::skill::Verdict;

const PERISHABLE_KEYWORDS: &[&str] = &[
    "frozen", "chilled", "refrigerated", "fresh", "vaccine", "insulin", "pharmaceutical",
    "shrimp", "fish", "seafood", "meat", "dairy", "cheese",
];

/// Meat, fish, dairy, pharmaceuticals.
const PERISHABLE_CHAPTERS: &[&str] = &["02", "03", "04", "30"];

const FROZEN_LIMIT_CELSIUS: f64 = -18.0;
const CHILLED_LIMIT_CELSIUS: f64 = 8.0;

/// Evaluates temperature logs for perishable goods.
pub struct ColdChainAgent;

impl ColdChainAgent {
    pub const ID: &'static str = "cold-chain";

    pub fn should_activate(shipment: &ShipmentContext) -> bool {
        let flagged = shipment
            .attributes
            .get("temperature_controlled")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let hs = shipment.hs_digits();
        flagged
            || contains_any(&shipment.product_text(), PERISHABLE_KEYWORDS)
            || (hs.len() >= 2 && PERISHABLE_CHAPTERS.contains(&&hs[..2]))
    }

    pub fn build() -> Arc<dyn SubAgent> {
        Arc::new(Self)
    }

    /// Storage limit: event value, then shipment attribute, then product default.
    fn limit(event_limit: Option<f64>, shipment: &ShipmentContext) -> f64 {
        event_limit
            .or_else(|| shipment.attributes.get("max_temperature").and_then(Value::as_f64))
            .unwrap_or_else(|| {
                if shipment.product_text().contains("frozen") {
                    FROZEN_LIMIT_CELSIUS
                } else {
                    CHILLED_LIMIT_CELSIUS
                }
            })
    }

    async fn evaluate_readings(
        &self,
        readings: &[f64],
        max_temperature: Option<f64>,
        ctx: &AgentContext<'_>,
    ) -> AgentResponse {
        let mut response = AgentResponse::new();
        let limit = Self::limit(max_temperature, ctx.shipment);
        let input = ctx
            .shipment
            .to_skill_context()
            .with("temperature_readings", readings.to_vec())
            .with("max_temperature", limit);

        let result = ctx.skills.run(MeanKineticTemperatureSkill::ID, input).await;
        response.record_skill(MeanKineticTemperatureSkill::ID, &result);
        if let Some(message) = result.message() {
            response.note(message);
        }

        let excursion = result.success && result.verdict == Verdict::NonCompliant;
        let drifting = result.success && result.verdict == Verdict::Warning;
        if let Some(alert) = verdict_alert("Temperature excursion", &result) {
            let alert = if excursion {
                alert.with_action("Quarantine the lot and arrange a quality inspection")
            } else if drifting {
                alert.with_action("Review logger data with the carrier")
            } else {
                alert
            };
            response.alert(alert);
        }
        if excursion {
            response.recommend(Self::ID, "Quarantine and inspect the affected lot before release");
        } else if drifting {
            response.recommend(Self::ID, "Expedite delivery to limit further temperature exposure");
        }

        if let Some(mkt) = result.data.get("mkt_celsius").and_then(Value::as_f64) {
            derive_fact(
                &mut response,
                ctx,
                Self::ID,
                "mkt_celsius",
                format!("{:.2}", mkt),
                &["product_name"],
            );
        }
        response
    }
}

#[async_trait]
impl SubAgent for ColdChainAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn can_handle(&self, event: &AgentEvent) -> bool {
        matches!(
            event,
            AgentEvent::SensorReadings { .. } | AgentEvent::DocumentParsed { .. }
        )
    }

    async fn process(&self, event: &AgentEvent, ctx: &AgentContext<'_>) -> Result<AgentResponse> {
        match event {
            AgentEvent::SensorReadings {
                temperatures_celsius,
                max_temperature,
            } => Ok(self
                .evaluate_readings(temperatures_celsius, *max_temperature, ctx)
                .await),
            _ => {
                let mut response = AgentResponse::new();
                if !ctx.has_document(&["temperature", "logger", "reefer"]) {
                    response.require_document("temperature_log");
                    response.alert(
                        AgentAlert::info("No temperature log on file for perishable goods")
                            .with_action("Upload the data logger export at arrival"),
                    );
                }
                Ok(response)
            }
        }
    }
}
