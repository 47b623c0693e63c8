//! One-step-forward / one-step-backward consistency validation.
//!
//! Each document upload adds facts to a consignment. Before those facts are
//! accepted the validator looks:
//!
//! - **backward**: do the new facts contradict anything already recorded?
//! - **forward**: given everything now known, which documents should exist
//!   but have not been uploaded?
//! - **full chain**: across the whole history, does any key field carry more
//!   than one value?
//!
//! All checks are field-level heuristics. They never fail: missing data simply
//! yields no conflicts or gaps, and only explicit contradictions are flagged.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::graph::Fact;

/// Predicates compared by the backward check.
pub const TRACKED_FIELDS: &[&str] = &[
    "product_name",
    "hs_code",
    "origin_country",
    "destination_country",
    "seller_name",
    "seller_address",
    "buyer_name",
    "buyer_address",
    "quantity",
    "unit",
    "price",
    "currency",
];

/// Tracked predicates whose contradictions are critical.
pub const CRITICAL_FIELDS: &[&str] = &["hs_code", "origin_country", "destination_country"];

/// Predicates checked for global agreement by the full-chain check.
pub const CHAIN_FIELDS: &[&str] = &[
    "origin_country",
    "destination_country",
    "product_name",
    "seller_name",
];

/// Severity of a detected condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A new fact contradicting an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyConflict {
    pub field: String,
    pub previous_value: String,
    pub current_value: String,
    pub previous_source: String,
    pub current_source: String,
    pub severity: Severity,
}

/// An expected document that has not been uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyGap {
    pub field: String,
    pub expected: String,
    pub reason: String,
    pub severity: Severity,
}

/// A key field carrying several values across the whole fact history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainInconsistency {
    pub field: String,
    /// Distinct values in first-seen order
    pub values: Vec<String>,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackwardValidation {
    pub valid: bool,
    pub conflicts: Vec<ConsistencyConflict>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardValidation {
    /// No critical gaps
    pub valid: bool,
    pub gaps: Vec<ConsistencyGap>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullChainValidation {
    pub valid: bool,
    pub inconsistencies: Vec<ChainInconsistency>,
}

/// Overall outcome of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Valid,
    Flagged,
}

/// Combined result of the three checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub backward_valid: bool,
    pub forward_valid: bool,
    pub conflicts: Vec<ConsistencyConflict>,
    pub gaps: Vec<ConsistencyGap>,
    pub chain_inconsistencies: Vec<ChainInconsistency>,
    /// Tracked fields present in the new facts
    pub checked_fields: Vec<String>,
}

impl ValidationResult {
    pub fn is_flagged(&self) -> bool {
        self.status == ValidationStatus::Flagged
    }

    pub fn critical_conflicts(&self) -> impl Iterator<Item = &ConsistencyConflict> {
        self.conflicts
            .iter()
            .filter(|c| c.severity == Severity::Critical)
    }

    pub fn critical_gaps(&self) -> impl Iterator<Item = &ConsistencyGap> {
        self.gaps.iter().filter(|g| g.severity == Severity::Critical)
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn field_severity(field: &str) -> Severity {
    if CRITICAL_FIELDS.contains(&field) {
        Severity::Critical
    } else {
        Severity::Warning
    }
}

/// Compare new facts against the existing history.
pub fn validate_one_step_backward(new_facts: &[Fact], existing_facts: &[Fact]) -> BackwardValidation {
    let mut conflicts = Vec::new();

    for new_fact in new_facts
        .iter()
        .filter(|f| TRACKED_FIELDS.contains(&f.predicate.as_str()))
    {
        let current = normalize(&new_fact.object);
        for existing in existing_facts.iter().filter(|e| {
            e.id != new_fact.id && e.predicate == new_fact.predicate && normalize(&e.object) != current
        }) {
            conflicts.push(ConsistencyConflict {
                field: new_fact.predicate.clone(),
                previous_value: existing.object.clone(),
                current_value: new_fact.object.clone(),
                previous_source: existing.source.clone(),
                current_source: new_fact.source.clone(),
                severity: field_severity(&new_fact.predicate),
            });
        }
    }

    BackwardValidation {
        valid: conflicts.is_empty(),
        conflicts,
    }
}

/// What the forward rules can see.
struct ForwardInput<'a> {
    documents: Vec<String>,
    facts: &'a [Fact],
}

impl ForwardInput<'_> {
    fn has_document(&self, keywords: &[&str]) -> bool {
        self.documents
            .iter()
            .any(|doc| keywords.iter().any(|k| doc.contains(k)))
    }

    fn has_fact(&self, predicate: &str) -> bool {
        self.facts
            .iter()
            .any(|f| f.predicate == predicate && !f.object.trim().is_empty())
    }

    fn hs_chapter_in(&self, chapters: &[&str]) -> bool {
        self.facts
            .iter()
            .filter(|f| f.predicate == "hs_code")
            .any(|f| {
                let digits: String = f.object.chars().filter(char::is_ascii_digit).collect();
                chapters.iter().any(|c| digits.starts_with(c))
            })
    }
}

const INVOICE: &[&str] = &["invoice"];
const PACKING: &[&str] = &["packing"];
const LADING: &[&str] = &["lading", "bill"];
const ORIGIN_CERT: &[&str] = &["origin", "certificate"];
const HEALTH_CERT: &[&str] = &["certificate", "cert", "health", "catch"];

struct ForwardRule {
    field: &'static str,
    expected: &'static str,
    reason: &'static str,
    severity: Severity,
    applies: fn(&ForwardInput<'_>) -> bool,
}

fn invoice_without_packing_list(input: &ForwardInput<'_>) -> bool {
    input.has_document(INVOICE) && !input.has_document(PACKING)
}

fn invoice_without_bill_of_lading(input: &ForwardInput<'_>) -> bool {
    input.has_document(INVOICE) && !input.has_document(LADING)
}

fn shipping_documents_without_invoice(input: &ForwardInput<'_>) -> bool {
    (input.has_document(PACKING) || input.has_document(LADING)) && !input.has_document(INVOICE)
}

fn origin_without_certificate(input: &ForwardInput<'_>) -> bool {
    input.has_fact("origin_country") && !input.has_document(ORIGIN_CERT)
}

fn seafood_without_certificate(input: &ForwardInput<'_>) -> bool {
    input.hs_chapter_in(&["03"]) && !input.has_document(HEALTH_CERT)
}

fn animal_products_without_certificate(input: &ForwardInput<'_>) -> bool {
    input.hs_chapter_in(&["02", "04"]) && !input.has_document(HEALTH_CERT)
}

const FORWARD_RULES: &[ForwardRule] = &[
    ForwardRule {
        field: "packing_list",
        expected: "Packing list",
        reason: "Commercial invoice uploaded without a packing list",
        severity: Severity::Critical,
        applies: invoice_without_packing_list,
    },
    ForwardRule {
        field: "bill_of_lading",
        expected: "Bill of lading",
        reason: "Commercial invoice uploaded without a transport document",
        severity: Severity::Critical,
        applies: invoice_without_bill_of_lading,
    },
    ForwardRule {
        field: "commercial_invoice",
        expected: "Commercial invoice",
        reason: "Shipping documents uploaded without a commercial invoice",
        severity: Severity::Critical,
        applies: shipping_documents_without_invoice,
    },
    ForwardRule {
        field: "certificate_of_origin",
        expected: "Certificate of origin",
        reason: "Origin declared but no certificate of origin uploaded",
        severity: Severity::Warning,
        applies: origin_without_certificate,
    },
    ForwardRule {
        field: "health_certificate",
        expected: "Health / catch certificate",
        reason: "Seafood (HS chapter 03) requires a health or catch certificate",
        severity: Severity::Critical,
        applies: seafood_without_certificate,
    },
    ForwardRule {
        field: "health_certificate",
        expected: "Veterinary health certificate",
        reason: "Meat or dairy (HS chapters 02/04) requires a veterinary certificate",
        severity: Severity::Critical,
        applies: animal_products_without_certificate,
    },
];

/// Infer missing documents from the current facts and uploaded file names.
///
/// File names are matched by case-insensitive substring against category
/// keywords.
pub fn validate_one_step_forward<S: AsRef<str>>(
    current_facts: &[Fact],
    uploaded_documents: &[S],
) -> ForwardValidation {
    let input = ForwardInput {
        documents: uploaded_documents
            .iter()
            .map(|d| d.as_ref().to_lowercase())
            .collect(),
        facts: current_facts,
    };

    let mut gaps: Vec<ConsistencyGap> = Vec::new();
    for rule in FORWARD_RULES.iter().filter(|r| (r.applies)(&input)) {
        // Two rules may ask for the same document; report it once
        if gaps.iter().any(|g| g.field == rule.field) {
            continue;
        }
        gaps.push(ConsistencyGap {
            field: rule.field.to_string(),
            expected: rule.expected.to_string(),
            reason: rule.reason.to_string(),
            severity: rule.severity,
        });
    }

    ForwardValidation {
        valid: !gaps.iter().any(|g| g.severity == Severity::Critical),
        gaps,
    }
}

/// Check key fields for agreement across every fact ever recorded.
pub fn validate_full_chain(all_facts: &[Fact]) -> FullChainValidation {
    let mut by_field: BTreeMap<&str, (HashSet<String>, Vec<String>)> = BTreeMap::new();

    for fact in all_facts
        .iter()
        .filter(|f| CHAIN_FIELDS.contains(&f.predicate.as_str()))
    {
        let (seen, values) = by_field.entry(fact.predicate.as_str()).or_default();
        if seen.insert(normalize(&fact.object)) {
            values.push(fact.object.trim().to_string());
        }
    }

    let inconsistencies: Vec<ChainInconsistency> = CHAIN_FIELDS
        .iter()
        .filter_map(|field| {
            let (_, values) = by_field.get(field)?;
            (values.len() > 1).then(|| ChainInconsistency {
                field: field.to_string(),
                values: values.clone(),
                severity: field_severity(field),
            })
        })
        .collect();

    FullChainValidation {
        valid: inconsistencies.is_empty(),
        inconsistencies,
    }
}

/// Run all three checks for one update.
///
/// The status is `flagged` when any critical conflict or critical gap exists.
pub fn generate_validation_result<S: AsRef<str>>(
    new_facts: &[Fact],
    existing_facts: &[Fact],
    uploaded_documents: &[S],
) -> ValidationResult {
    let backward = validate_one_step_backward(new_facts, existing_facts);

    let all_facts: Vec<Fact> = existing_facts
        .iter()
        .chain(new_facts.iter())
        .cloned()
        .collect();
    let forward = validate_one_step_forward(&all_facts, uploaded_documents);
    let chain = validate_full_chain(&all_facts);

    let checked_fields: Vec<String> = TRACKED_FIELDS
        .iter()
        .filter(|field| new_facts.iter().any(|f| f.predicate == **field))
        .map(|field| field.to_string())
        .collect();

    let flagged = backward
        .conflicts
        .iter()
        .any(|c| c.severity == Severity::Critical)
        || forward.gaps.iter().any(|g| g.severity == Severity::Critical);

    ValidationResult {
        status: if flagged {
            ValidationStatus::Flagged
        } else {
            ValidationStatus::Valid
        },
        backward_valid: backward.valid,
        forward_valid: forward.valid,
        conflicts: backward.conflicts,
        gaps: forward.gaps,
        chain_inconsistencies: chain.inconsistencies,
        checked_fields,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fact(id: &str, predicate: &str, object: &str, source: &str) -> Fact {
        Fact::new(id, "shipment-42", predicate, object, source)
    }

    const NO_DOCS: &[&str] = &[];

    #[test]
    fn test_backward_origin_conflict_is_critical() {
        let existing = vec![fact("e1", "origin_country", "Vietnam", "invoice")];
        let new = vec![fact("n1", "origin_country", "China", "bill-of-lading")];

        let result = validate_one_step_backward(&new, &existing);
        assert!(!result.valid);
        assert_eq!(
            result.conflicts,
            vec![ConsistencyConflict {
                field: "origin_country".into(),
                previous_value: "Vietnam".into(),
                current_value: "China".into(),
                previous_source: "invoice".into(),
                current_source: "bill-of-lading".into(),
                severity: Severity::Critical,
            }]
        );
    }

    #[test]
    fn test_backward_non_key_field_is_warning() {
        let existing = vec![fact("e1", "quantity", "100", "invoice")];
        let new = vec![fact("n1", "quantity", "120", "packing-list")];

        let result = validate_one_step_backward(&new, &existing);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].severity, Severity::Warning);
    }

    #[test]
    fn test_backward_ignores_case_and_untracked_fields() {
        let existing = vec![
            fact("e1", "seller_name", "ACME Ltd", "invoice"),
            fact("e2", "vessel_name", "Ever Given", "bl"),
        ];
        let new = vec![
            fact("n1", "seller_name", "  acme ltd ", "packing"),
            fact("n2", "vessel_name", "Ever Ace", "bl-2"),
        ];

        assert!(validate_one_step_backward(&new, &existing).valid);
    }

    #[test]
    fn test_backward_empty_history_is_valid() {
        let new = vec![fact("n1", "origin_country", "China", "invoice")];
        assert!(validate_one_step_backward(&new, &[]).valid);
    }

    #[test]
    fn test_forward_invoice_only() {
        let result = validate_one_step_forward(&[], &["invoice.pdf"]);
        assert!(!result.valid);

        let fields: Vec<&str> = result.gaps.iter().map(|g| g.field.as_str()).collect();
        assert_eq!(fields, vec!["packing_list", "bill_of_lading"]);
        assert!(result.gaps.iter().all(|g| g.severity == Severity::Critical));
    }

    #[test]
    fn test_forward_complete_set_is_valid() {
        let docs = ["Invoice_042.PDF", "packing-list.pdf", "Bill_of_Lading.pdf"];
        let result = validate_one_step_forward(&[], &docs);
        assert!(result.valid);
        assert!(result.gaps.is_empty());
    }

    #[test]
    fn test_forward_origin_needs_certificate_warning() {
        let facts = vec![fact("f1", "origin_country", "Vietnam", "invoice")];
        let docs = ["invoice.pdf", "packing.pdf", "bol-lading.pdf"];

        let result = validate_one_step_forward(&facts, &docs);
        assert!(result.valid);
        assert_eq!(result.gaps.len(), 1);
        assert_eq!(result.gaps[0].field, "certificate_of_origin");
        assert_eq!(result.gaps[0].severity, Severity::Warning);

        let with_cert = ["invoice.pdf", "packing.pdf", "bill.pdf", "certificate_of_origin.pdf"];
        assert!(validate_one_step_forward(&facts, &with_cert).gaps.is_empty());
    }

    #[test]
    fn test_forward_seafood_requires_health_certificate() {
        let facts = vec![fact("f1", "hs_code", "0306.17", "invoice")];
        let docs = ["invoice.pdf", "packing.pdf", "bill_of_lading.pdf"];

        let result = validate_one_step_forward(&facts, &docs);
        assert!(!result.valid);
        assert_eq!(result.gaps[0].field, "health_certificate");

        let with_cert = ["invoice.pdf", "packing.pdf", "bill_of_lading.pdf", "catch_cert.pdf"];
        assert!(validate_one_step_forward(&facts, &with_cert).valid);
    }

    #[test]
    fn test_forward_packing_without_invoice() {
        let result = validate_one_step_forward(&[], &["packing_list.xlsx"]);
        let fields: Vec<&str> = result.gaps.iter().map(|g| g.field.as_str()).collect();
        assert_eq!(fields, vec!["commercial_invoice"]);
    }

    #[test]
    fn test_forward_no_data_no_gaps() {
        let result = validate_one_step_forward(&[], NO_DOCS);
        assert!(result.valid);
        assert!(result.gaps.is_empty());
    }

    #[test]
    fn test_full_chain_flags_multiple_values() {
        let facts = vec![
            fact("f1", "origin_country", "Vietnam", "invoice"),
            fact("f2", "origin_country", "vietnam", "packing"),
            fact("f3", "seller_name", "ACME", "invoice"),
            fact("f4", "seller_name", "Acme Trading", "bl"),
            fact("f5", "price", "100", "invoice"),
            fact("f6", "price", "90", "bl"),
        ];

        let result = validate_full_chain(&facts);
        assert!(!result.valid);
        assert_eq!(
            result.inconsistencies,
            vec![ChainInconsistency {
                field: "seller_name".into(),
                values: vec!["ACME".into(), "Acme Trading".into()],
                severity: Severity::Warning,
            }]
        );
    }

    #[test]
    fn test_generate_result_flags_critical_conflict() {
        let existing = vec![fact("e1", "origin_country", "Vietnam", "invoice")];
        let new = vec![
            fact("n1", "origin_country", "China", "bl"),
            fact("n2", "quantity", "10", "bl"),
        ];
        let docs = ["invoice.pdf", "packing.pdf", "bill_of_lading.pdf", "origin_cert.pdf"];

        let result = generate_validation_result(&new, &existing, &docs);
        assert_eq!(result.status, ValidationStatus::Flagged);
        assert!(!result.backward_valid);
        assert!(result.forward_valid);
        assert_eq!(result.checked_fields, vec!["origin_country", "quantity"]);
        assert_eq!(result.chain_inconsistencies.len(), 1);
        assert_eq!(result.critical_conflicts().count(), 1);
    }

    #[test]
    fn test_generate_result_warning_only_is_valid() {
        let existing = vec![fact("e1", "quantity", "100", "invoice")];
        let new = vec![fact("n1", "quantity", "90", "packing")];
        let docs = ["invoice.pdf", "packing.pdf", "bill_of_lading.pdf"];

        let result = generate_validation_result(&new, &existing, &docs);
        assert_eq!(result.status, ValidationStatus::Valid);
        assert!(!result.backward_valid);
        assert_eq!(result.conflicts.len(), 1);
    }
}
