//! Fisheries specialist: catch documentation and certificate validity.

use std::sync::Arc;

use async_trait::async_trait;

use super::{contains_any, derive_fact, verdict_alert};
use crate::agent::types::{AgentAlert, AgentEvent, AgentResponse, ShipmentContext};
use crate::agent::{AgentContext, SubAgent};
use crate::error::Result;
use crate::skill::builtin::{is_eu_destination, CertificateExpirySkill, HsCodeValidationSkill};

const SEAFOOD_KEYWORDS: &[&str] = &[
    "fish", "shrimp", "prawn", "tuna", "salmon", "seafood", "squid", "octopus", "crab",
    "lobster", "cod", "mackerel",
];

/// Prepared or preserved fish and crustaceans.
const SEAFOOD_HEADINGS: &[&str] = &["1604", "1605"];

pub struct FisheriesAgent;

impl FisheriesAgent {
    pub const ID: &'static str = "fisheries";

    pub fn should_activate(shipment: &ShipmentContext) -> bool {
        let hs = shipment.hs_digits();
        hs.starts_with("03")
            || SEAFOOD_HEADINGS.iter().any(|h| hs.starts_with(h))
            || contains_any(&shipment.product_text(), SEAFOOD_KEYWORDS)
    }

    pub fn build() -> Arc<dyn SubAgent> {
        Arc::new(Self)
    }
}

#[async_trait]
impl SubAgent for FisheriesAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn can_handle(&self, event: &AgentEvent) -> bool {
        matches!(event, AgentEvent::DocumentParsed { .. })
    }

    async fn process(&self, _event: &AgentEvent, ctx: &AgentContext<'_>) -> Result<AgentResponse> {
        let mut response = AgentResponse::new();
        let input = ctx.shipment.to_skill_context();

        if ctx.shipment.hs_code.is_some() {
            let result = ctx.skills.run(HsCodeValidationSkill::ID, input.clone()).await;
            response.record_skill(HsCodeValidationSkill::ID, &result);
            if let Some(alert) = verdict_alert("HS classification", &result) {
                response.alert(alert.with_action("Confirm the tariff classification with the broker"));
            }
        }

        let on_file = ctx.has_document(&["catch"]);
        let eu_bound = ctx
            .shipment
            .destination_country
            .as_deref()
            .is_some_and(is_eu_destination);
        if !on_file {
            if eu_bound {
                response.alert(
                    AgentAlert::critical(
                        "Seafood entering the EU requires a validated catch certificate",
                    )
                    .with_action("Obtain the flag-state validated catch certificate before arrival"),
                );
                response.require_document("catch_certificate");
            } else {
                response.alert(AgentAlert::info(
                    "No catch documentation on file; importers may request it",
                ));
            }
        }
        response.note(format!(
            "Catch certificate {}",
            if on_file { "on file" } else { "missing" }
        ));
        derive_fact(
            &mut response,
            ctx,
            Self::ID,
            "catch_certificate_on_file",
            on_file.to_string(),
            &["hs_code", "destination_country"],
        );

        if input.get("certificates").is_some() {
            let result = ctx.skills.run(CertificateExpirySkill::ID, input).await;
            response.record_skill(CertificateExpirySkill::ID, &result);
            if let Some(message) = result.message() {
                response.note(message);
            }
            if let Some(alert) = verdict_alert("Certificates", &result) {
                response.alert(alert.with_action("Renew the affected certificates before shipment"));
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::super::test_support::run;
    use super::*;
    use crate::consistency::Severity;
    use crate::extraction::ExtractedDocument;
    use crate::graph::DependencyGraph;

    fn event() -> AgentEvent {
        AgentEvent::DocumentParsed {
            document: ExtractedDocument::new("invoice.pdf"),
        }
    }

    fn tuna(destination: &str) -> ShipmentContext {
        ShipmentContext::new("s-1")
            .with_product("Canned tuna")
            .with_hs_code("1604.14")
            .with_destination(destination)
    }

    #[test]
    fn test_activation() {
        assert!(FisheriesAgent::should_activate(&tuna("Spain")));
        assert!(FisheriesAgent::should_activate(
            &ShipmentContext::new("s").with_hs_code("0303.42")
        ));
        assert!(!FisheriesAgent::should_activate(
            &ShipmentContext::new("s").with_product("Solar Panels")
        ));
    }

    #[tokio::test]
    async fn test_eu_import_without_catch_certificate() {
        let response = run(
            &FisheriesAgent,
            &event(),
            &tuna("Spain"),
            &DependencyGraph::new(),
            &["invoice.pdf"],
        )
        .await;

        assert_eq!(response.required_documents, vec!["catch_certificate"]);
        assert_eq!(response.alerts.len(), 1);
        assert_eq!(response.alerts[0].severity, Severity::Critical);
        assert_eq!(response.facts[0].object, "false");
    }

    #[tokio::test]
    async fn test_certificate_on_file_and_expired_health_cert() {
        let shipment = tuna("Canada").with_attribute(
            "certificates",
            json!([{ "name": "health", "expires": "2020-01-01" }]),
        );
        let response = run(
            &FisheriesAgent,
            &event(),
            &shipment,
            &DependencyGraph::new(),
            &["invoice.pdf", "catch_certificate.pdf"],
        )
        .await;

        assert!(response.required_documents.is_empty());
        assert_eq!(response.facts[0].object, "true");
        let ids: Vec<&str> = response
            .skill_outcomes
            .iter()
            .map(|o| o.skill_id.as_str())
            .collect();
        assert_eq!(ids, vec!["hs-code-validation", "certificate-expiry"]);
        assert_eq!(response.alerts.len(), 1);
        assert_eq!(response.alerts[0].severity, Severity::Critical);
    }
}
