//! Logistics specialist: routing and transport documents.

use std::sync::Arc;

use async_trait::async_trait;

use super::derive_fact;
use crate::agent::types::{AgentAlert, AgentEvent, AgentResponse, ShipmentContext};
use crate::agent::{AgentContext, SubAgent};
use crate::error::Result;

const TRANSPORT_DOCUMENT_KEYWORDS: &[&str] = &["bill_of_lading", "bill of lading", "bol", "airway", "awb"];

pub struct LogisticsAgent;

impl LogisticsAgent {
    pub const ID: &'static str = "logistics";

    pub fn should_activate(shipment: &ShipmentContext) -> bool {
        shipment.origin_country.is_some() && shipment.destination_country.is_some()
    }

    pub fn build() -> Arc<dyn SubAgent> {
        Arc::new(Self)
    }

    fn route_label(shipment: &ShipmentContext) -> String {
        [shipment.origin_country.as_deref()]
            .into_iter()
            .flatten()
            .chain(shipment.transit_countries.iter().map(String::as_str))
            .chain(shipment.destination_country.as_deref())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

#[async_trait]
impl SubAgent for LogisticsAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn can_handle(&self, event: &AgentEvent) -> bool {
        matches!(
            event,
            AgentEvent::RouteUpdated { .. } | AgentEvent::DocumentParsed { .. }
        )
    }

    async fn process(&self, event: &AgentEvent, ctx: &AgentContext<'_>) -> Result<AgentResponse> {
        let mut response = AgentResponse::new();

        if let AgentEvent::RouteUpdated { carrier, .. } = event {
            let route = Self::route_label(ctx.shipment);
            response.note(format!("Route: {}", route));
            if let Some(carrier) = carrier {
                response.note(format!("Carrier: {}", carrier));
            }
            if !ctx.shipment.transit_countries.is_empty() {
                response.alert(
                    AgentAlert::info(format!(
                        "Transshipment via {}",
                        ctx.shipment.transit_countries.join(", ")
                    ))
                    .with_action("Keep the cargo under a through bill of lading"),
                );
            }
            response.recommend(Self::ID, "Book the lowest cost ocean routing for this lane");
            derive_fact(
                &mut response,
                ctx,
                Self::ID,
                "route",
                route,
                &["origin_country", "destination_country", "transit_country"],
            );
            return Ok(response);
        }

        if !ctx.has_document(TRANSPORT_DOCUMENT_KEYWORDS) {
            response.require_document("bill_of_lading");
            response.note("No transport document on file yet");
        }
        Ok(response)
    }
}
