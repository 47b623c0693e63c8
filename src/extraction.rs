//! Mapping of document-extraction output into facts.
//!
//! The extraction collaborator (LLM-backed, outside this crate) reads raw
//! documents and returns structured shipment fields plus a tamper assessment.
//! The engine only ever sees that output as facts whose source is
//! [`EXTRACTION_SOURCE`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::{Fact, FactId};

/// Source tag carried by every fact derived from document extraction.
pub const EXTRACTION_SOURCE: &str = "document-extraction";

/// Predicate of the fact emitted for a suspicious tamper assessment.
pub const TAMPER_PREDICATE: &str = "tamper_flag";

/// Tamper/security assessment attached to an extracted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TamperAssessment {
    pub suspicious: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Structured output of the extraction collaborator for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// Uploaded file name, e.g. `invoice-0042.pdf`
    pub document_name: String,
    /// Field name -> extracted value (`origin_country`, `hs_code`, ...)
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Extraction confidence reported by the collaborator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tamper_assessment: Option<TamperAssessment>,
}

impl ExtractedDocument {
    pub fn new(document_name: impl Into<String>) -> Self {
        Self {
            document_name: document_name.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_tamper_assessment(mut self, assessment: TamperAssessment) -> Self {
        self.tamper_assessment = Some(assessment);
        self
    }

    /// Convert into facts about `subject`.
    ///
    /// Fact ids are derived from the document name and field so re-submitting
    /// the same extraction produces the same ids. Blank values are skipped.
    pub fn into_facts(&self, subject: &str) -> Vec<Fact> {
        let mut facts: Vec<Fact> = self
            .fields
            .iter()
            .filter(|(_, value)| !value.trim().is_empty())
            .map(|(field, value)| {
                let mut fact = Fact::new(
                    self.fact_id(field),
                    subject,
                    field.as_str(),
                    value.trim(),
                    EXTRACTION_SOURCE,
                );
                if let Some(confidence) = self.confidence {
                    fact = fact.with_confidence(confidence);
                }
                fact
            })
            .collect();

        if let Some(assessment) = self.tamper_assessment.as_ref().filter(|a| a.suspicious) {
            let detail = if assessment.reasons.is_empty() {
                "suspicious".to_string()
            } else {
                assessment.reasons.join("; ")
            };
            facts.push(Fact::new(
                self.fact_id(TAMPER_PREDICATE),
                subject,
                TAMPER_PREDICATE,
                detail,
                EXTRACTION_SOURCE,
            ));
        }

        facts
    }

    fn fact_id(&self, field: &str) -> FactId {
        FactId(format!("{}#{}", self.document_name, field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_facts_maps_fields() {
        let doc = ExtractedDocument::new("invoice.pdf")
            .with_field("origin_country", "Vietnam")
            .with_field("hs_code", " 0306.17 ")
            .with_field("buyer_name", "")
            .with_confidence(0.9);

        let facts = doc.into_facts("shipment-42");
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().all(|f| f.source == EXTRACTION_SOURCE));
        assert!(facts.iter().all(|f| f.confidence == Some(0.9)));

        let hs = facts.iter().find(|f| f.predicate == "hs_code").unwrap();
        assert_eq!(hs.object, "0306.17");
        assert_eq!(hs.id, FactId::from("invoice.pdf#hs_code"));
    }

    #[test]
    fn test_suspicious_document_emits_tamper_fact() {
        let doc = ExtractedDocument::new("bl.pdf").with_tamper_assessment(TamperAssessment {
            suspicious: true,
            reasons: vec!["font mismatch".into(), "edited metadata".into()],
        });

        let facts = doc.into_facts("shipment-42");
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].predicate, TAMPER_PREDICATE);
        assert_eq!(facts[0].object, "font mismatch; edited metadata");
    }

    #[test]
    fn test_clean_assessment_emits_nothing() {
        let doc = ExtractedDocument::new("bl.pdf")
            .with_tamper_assessment(TamperAssessment::default());
        assert!(doc.into_facts("s").is_empty());
    }
}
