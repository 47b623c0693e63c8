//! Forced-labor specialist.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{contains_any, derive_fact, verdict_alert};
use crate::agent::types::{AgentEvent, AgentResponse, ShipmentContext};
use crate::agent::{AgentContext, SubAgent};
use crate::error::Result;
use crate::skill::builtin::{ForcedLaborRiskSkill, MarketPriceSkill};
use crate::skill::Verdict;

const LINKED_ORIGINS: &[&str] = &["china", "xinjiang", "uyghur"];

const HIGH_RISK_SECTORS: &[&str] = &["cotton", "polysilicon", "solar", "tomato"];

/// Scores forced-labor exposure, and checks the declared price because
/// abnormal under-invoicing often accompanies it.
pub struct ForcedLaborAgent;

impl ForcedLaborAgent {
    pub const ID: &'static str = "forced-labor";

    pub fn should_activate(shipment: &ShipmentContext) -> bool {
        contains_any(&shipment.origin_text(), LINKED_ORIGINS)
            || contains_any(&shipment.product_text(), HIGH_RISK_SECTORS)
    }

    pub fn build() -> Arc<dyn SubAgent> {
        Arc::new(Self)
    }
}

#[async_trait]
impl SubAgent for ForcedLaborAgent {
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
        let base = ctx.shipment.to_skill_context();

        let risk = ctx.skills.run(ForcedLaborRiskSkill::ID, base.clone()).await;
        response.record_skill(ForcedLaborRiskSkill::ID, &risk);
        if let Some(message) = risk.message() {
            response.note(message);
        }
        if let Some(alert) = verdict_alert("Forced labor", &risk) {
            let alert = match (risk.success, risk.verdict) {
                (true, Verdict::NonCompliant) => alert
                    .with_action("Detain pending evidence rebutting the forced-labor presumption"),
                (true, Verdict::Warning) => {
                    alert.with_action("Map the supply chain down to raw-material suppliers")
                }
                _ => alert,
            };
            response.alert(alert);
        }
        if risk.success {
            match risk.verdict {
                Verdict::NonCompliant => {
                    response.require_document("supply_chain_tracing");
                    response.require_document("supplier_affidavit");
                    response.recommend(
                        Self::ID,
                        "Hold shipment until supply-chain traceability rebuts the presumption",
                    );
                }
                Verdict::Warning => response.require_document("supply_chain_tracing"),
                _ => {}
            }
        }
        if let Some(score) = risk.data.get("risk_score").and_then(Value::as_f64) {
            derive_fact(
                &mut response,
                ctx,
                Self::ID,
                "forced_labor_risk",
                format!("{:.2}", score),
                &["origin_country", "origin_region", "product_name"],
            );
        }

        if ctx.shipment.declared_price.is_none() {
            return Ok(response);
        }
        let price = ctx.skills.run(MarketPriceSkill::ID, base).await;
        response.record_skill(MarketPriceSkill::ID, &price);
        if let Some(message) = price.message() {
            response.note(message);
        }
        if let Some(alert) = verdict_alert("Declared price", &price) {
            response.alert(alert.with_action("Request proof of payment and a cost breakdown"));
        }
        if let Some(deviation) = price.data.get("deviation_pct").and_then(Value::as_f64) {
            derive_fact(
                &mut response,
                ctx,
                Self::ID,
                "price_deviation_pct",
                format!("{:.1}", deviation),
                &["price", "product_name"],
            );
        }
        Ok(response)
    }
}
