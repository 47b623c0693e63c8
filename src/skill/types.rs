//! Skill contract data types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Verdict produced by a skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Compliant,
    NonCompliant,
    Warning,
    Unknown,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compliant => write!(f, "COMPLIANT"),
            Self::NonCompliant => write!(f, "NON_COMPLIANT"),
            Self::Warning => write!(f, "WARNING"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Functional area a skill belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillCategory {
    Valuation,
    Sanctions,
    ColdChain,
    Documentation,
    Classification,
    ForcedLabor,
    Sustainability,
    Logistics,
}

/// Static description of a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub id: String,
    pub name: String,
    pub category: SkillCategory,
    pub description: String,
}

impl SkillMetadata {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: SkillCategory,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category,
            description: description.into(),
        }
    }
}

/// Tag for an audit-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SkillNotFound,
    ContextValidationFailed,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionPanicked,
    CircuitOpen,
    Timeout,
    Fallback,
}

/// One line of a skill result's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(action: AuditAction, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            detail: detail.into(),
        }
    }
}

/// Input handed to a skill.
///
/// The payload is an open JSON object because each skill reads different
/// fields; `adjustments` carries learned parameter tweaks for the skill.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment_id: Option<String>,
    #[serde(default)]
    pub values: Map<String, Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub adjustments: HashMap<String, f64>,
}

impl SkillContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_shipment(shipment_id: impl Into<String>) -> Self {
        Self {
            shipment_id: Some(shipment_id.into()),
            ..Default::default()
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value, ignoring blanks.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Numeric value; numeric strings such as `"2000"` are accepted.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().replace(',', "").parse().ok(),
            _ => None,
        }
    }

    pub fn get_f64_list(&self, key: &str) -> Option<Vec<f64>> {
        let items = self.values.get(key)?.as_array()?;
        items.iter().map(Value::as_f64).collect()
    }

    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        self.values
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn adjustment(&self, parameter: &str) -> Option<f64> {
        self.adjustments.get(parameter).copied()
    }
}

/// Outcome of one skill invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillResult {
    pub success: bool,
    /// Confidence in the verdict (0.0 - 1.0)
    pub confidence: f64,
    pub verdict: Verdict,
    pub requires_human_review: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub audit_log: Vec<AuditEntry>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SkillResult {
    /// Successful evaluation with the given verdict.
    ///
    /// Non-compliant verdicts always ask for a human.
    pub fn verdict(verdict: Verdict, confidence: f64) -> Self {
        Self {
            success: true,
            confidence: confidence.clamp(0.0, 1.0),
            verdict,
            requires_human_review: verdict == Verdict::NonCompliant,
            data: Value::Null,
            audit_log: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn compliant(confidence: f64) -> Self {
        Self::verdict(Verdict::Compliant, confidence)
    }

    pub fn warning(confidence: f64) -> Self {
        Self::verdict(Verdict::Warning, confidence)
    }

    pub fn non_compliant(confidence: f64) -> Self {
        Self::verdict(Verdict::NonCompliant, confidence)
    }

    /// Failed evaluation; always routed to a human.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            confidence: 0.0,
            verdict: Verdict::Unknown,
            requires_human_review: true,
            data: Value::Null,
            audit_log: Vec::new(),
            errors: vec![error.into()],
        }
    }

    /// Required fact data is absent; not an error, just no verdict.
    pub fn missing_data(field: &str) -> Self {
        Self::failure(Error::missing_input(field).to_string())
            .with_data(serde_json::json!({ "missing": field }))
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_human_review(mut self, required: bool) -> Self {
        self.requires_human_review = required;
        self
    }

    pub fn with_audit(mut self, action: AuditAction, detail: impl Into<String>) -> Self {
        self.audit_log.push(AuditEntry::new(action, detail));
        self
    }

    pub fn push_audit(&mut self, action: AuditAction, detail: impl Into<String>) {
        self.audit_log.push(AuditEntry::new(action, detail));
    }

    /// Human-readable summary stored under `data.message`, if any.
    pub fn message(&self) -> Option<&str> {
        self.data.get("message").and_then(Value::as_str)
    }

    pub fn last_audit_action(&self) -> Option<AuditAction> {
        self.audit_log.last().map(|e| e.action)
    }
}
