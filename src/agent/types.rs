//! Agent-facing data types: shipment context, events, alerts, responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::arbiter::Recommendation;
use crate::consistency::Severity;
use crate::extraction::ExtractedDocument;
use crate::graph::{Fact, Relationship};
use crate::learning::{FeedbackOutcome, HumanCorrection};
use crate::skill::{SkillContext, SkillResult};

/// What is known about a shipment, used for activation and skill inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipmentContext {
    pub shipment_id: String,
    pub origin_country: Option<String>,
    /// Free-text origin detail, e.g. "Xinjiang, China"
    pub origin_region: Option<String>,
    pub destination_country: Option<String>,
    pub product_name: Option<String>,
    pub hs_code: Option<String>,
    pub declared_price: Option<f64>,
    pub parties: Vec<String>,
    pub transit_countries: Vec<String>,
    /// Caller priority for the arbiter (`cost`, `sustainability`, ...)
    pub priority: Option<String>,
    /// Anything else, keyed by field name
    pub attributes: Map<String, Value>,
}

impl ShipmentContext {
    pub fn new(shipment_id: impl Into<String>) -> Self {
        Self {
            shipment_id: shipment_id.into(),
            ..Default::default()
        }
    }

    pub fn with_origin(mut self, origin_country: impl Into<String>) -> Self {
        self.origin_country = Some(origin_country.into());
        self
    }

    pub fn with_origin_region(mut self, region: impl Into<String>) -> Self {
        self.origin_region = Some(region.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination_country = Some(destination.into());
        self
    }

    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product_name = Some(product.into());
        self
    }

    pub fn with_hs_code(mut self, hs_code: impl Into<String>) -> Self {
        self.hs_code = Some(hs_code.into());
        self
    }

    pub fn with_declared_price(mut self, price: f64) -> Self {
        self.declared_price = Some(price);
        self
    }

    pub fn with_party(mut self, party: impl Into<String>) -> Self {
        self.parties.push(party.into());
        self
    }

    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Fold a fact into the context; returns whether anything changed.
    pub fn apply_fact(&mut self, fact: &Fact) -> bool {
        let value = fact.object.trim();
        if value.is_empty() {
            return false;
        }
        fn set(slot: &mut Option<String>, value: &str) -> bool {
            if slot.as_deref() == Some(value) {
                return false;
            }
            *slot = Some(value.to_string());
            true
        }
        fn push(list: &mut Vec<String>, value: &str) -> bool {
            if list.iter().any(|v| v.eq_ignore_ascii_case(value)) {
                return false;
            }
            list.push(value.to_string());
            true
        }

        match fact.predicate.as_str() {
            "origin_country" => set(&mut self.origin_country, value),
            "origin_region" => set(&mut self.origin_region, value),
            "destination_country" => set(&mut self.destination_country, value),
            "product_name" => set(&mut self.product_name, value),
            "hs_code" => set(&mut self.hs_code, value),
            "price" => match value.replace(',', "").parse::<f64>() {
                Ok(p) if self.declared_price != Some(p) => {
                    self.declared_price = Some(p);
                    true
                }
                _ => false,
            },
            "seller_name" | "buyer_name" | "consignee_name" | "carrier_name" => {
                push(&mut self.parties, value)
            }
            "transit_country" => push(&mut self.transit_countries, value),
            other => {
                let new = Value::String(value.to_string());
                if self.attributes.get(other) == Some(&new) {
                    return false;
                }
                self.attributes.insert(other.to_string(), new);
                true
            }
        }
    }

    /// Lowercased origin text (region and country) for keyword checks.
    pub fn origin_text(&self) -> String {
        [self.origin_region.as_deref(), self.origin_country.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    pub fn product_text(&self) -> String {
        self.product_name.as_deref().unwrap_or_default().to_lowercase()
    }

    /// HS code digits only.
    pub fn hs_digits(&self) -> String {
        self.hs_code
            .as_deref()
            .unwrap_or_default()
            .chars()
            .filter(char::is_ascii_digit)
            .collect()
    }

    /// Base skill input carrying everything known about the shipment.
    pub fn to_skill_context(&self) -> SkillContext {
        let mut ctx = SkillContext::for_shipment(self.shipment_id.clone());
        for (key, value) in &self.attributes {
            ctx.insert(key.clone(), value.clone());
        }
        let origin = self.origin_region.as_ref().or(self.origin_country.as_ref());
        let fields = [
            ("origin", origin),
            ("origin_country", self.origin_country.as_ref()),
            ("destination_country", self.destination_country.as_ref()),
            ("product", self.product_name.as_ref()),
            ("hs_code", self.hs_code.as_ref()),
        ];
        for (key, value) in fields {
            if let Some(v) = value {
                ctx.insert(key, v.clone());
            }
        }
        if let Some(price) = self.declared_price {
            ctx.insert("declared_price", price);
        }
        if !self.parties.is_empty() {
            ctx.insert("parties", self.parties.clone());
        }
        if let Some(transit) = self.transit_countries.first() {
            ctx.insert("transit_country", transit.clone());
        }
        ctx
    }
}

/// Inbound event submitted to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The extraction collaborator parsed an uploaded document
    DocumentParsed { document: ExtractedDocument },
    /// Routing changed
    RouteUpdated {
        #[serde(default)]
        origin_country: Option<String>,
        #[serde(default)]
        destination_country: Option<String>,
        #[serde(default)]
        transit_countries: Vec<String>,
        #[serde(default)]
        carrier: Option<String>,
    },
    /// Temperature logger upload
    SensorReadings {
        temperatures_celsius: Vec<f64>,
        #[serde(default)]
        max_temperature: Option<f64>,
    },
    /// A human reviewed a skill result
    HumanDecision {
        skill_id: String,
        outcome: FeedbackOutcome,
        #[serde(default)]
        input: Value,
        #[serde(default)]
        output: Value,
        #[serde(default)]
        correction: Option<HumanCorrection>,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DocumentParsed { .. } => "document_parsed",
            Self::RouteUpdated { .. } => "route_updated",
            Self::SensorReadings { .. } => "sensor_readings",
            Self::HumanDecision { .. } => "human_decision",
        }
    }

    pub fn route(
        origin_country: Option<&str>,
        destination_country: Option<&str>,
        transit_countries: &[&str],
    ) -> Self {
        Self::RouteUpdated {
            origin_country: origin_country.map(str::to_string),
            destination_country: destination_country.map(str::to_string),
            transit_countries: transit_countries.iter().map(|c| c.to_string()).collect(),
            carrier: None,
        }
    }
}

/// A finding surfaced by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAlert {
    /// Set by the orchestrator
    #[serde(default)]
    pub agent_id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl AgentAlert {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            agent_id: String::new(),
            severity,
            message: message.into(),
            suggested_action: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(Severity::Critical, message)
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }
}

/// One skill call made by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillOutcome {
    pub skill_id: String,
    pub result: SkillResult,
}

/// What one agent produced for one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    /// Natural-language findings
    pub response: String,
    pub alerts: Vec<AgentAlert>,
    pub required_documents: Vec<String>,
    /// Facts to merge into the consignment graph
    pub facts: Vec<Fact>,
    /// Edges between new and existing facts
    pub relationships: Vec<Relationship>,
    pub recommendations: Vec<Recommendation>,
    pub skill_outcomes: Vec<SkillOutcome>,
}

impl Default for AgentResponse {
    fn default() -> Self {
        Self {
            success: true,
            response: String::new(),
            alerts: Vec::new(),
            required_documents: Vec::new(),
            facts: Vec::new(),
            relationships: Vec::new(),
            recommendations: Vec::new(),
            skill_outcomes: Vec::new(),
        }
    }
}

impl AgentResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finding line.
    pub fn note(&mut self, line: impl AsRef<str>) {
        if !self.response.is_empty() {
            self.response.push('\n');
        }
        self.response.push_str(line.as_ref());
    }

    pub fn alert(&mut self, alert: AgentAlert) {
        self.alerts.push(alert);
    }

    pub fn require_document(&mut self, document: impl Into<String>) {
        let document = document.into();
        if !self.required_documents.contains(&document) {
            self.required_documents.push(document);
        }
    }

    pub fn recommend(&mut self, source: &str, message: impl Into<String>) {
        self.recommendations.push(Recommendation::new(source, message));
    }

    pub fn record_skill(&mut self, skill_id: &str, result: &SkillResult) {
        self.skill_outcomes.push(SkillOutcome {
            skill_id: skill_id.to_string(),
            result: result.clone(),
        });
    }
}
