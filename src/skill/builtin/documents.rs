//! Document-level checks: certificate validity and HS code format.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use serde_json::{json, Value};

use super::adjusted;
use crate::config::SkillThresholds;
use crate::error::Result;
use crate::skill::{Skill, SkillCategory, SkillContext, SkillMetadata, SkillResult, Verdict};

/// Certificate expiry check.
///
/// Reads `certificates`, an array of `{ "name", "expires" }` objects with
/// ISO dates, and optionally `reference_date` (defaults to today, UTC).
pub struct CertificateExpirySkill {
    metadata: SkillMetadata,
    thresholds: SkillThresholds,
}

impl CertificateExpirySkill {
    pub const ID: &'static str = "certificate-expiry";

    pub fn new(thresholds: SkillThresholds) -> Self {
        Self {
            metadata: SkillMetadata::new(
                Self::ID,
                "Certificate Expiry",
                SkillCategory::Documentation,
                "Flags certificates that are expired or about to expire",
            ),
            thresholds,
        }
    }
}

#[async_trait]
impl Skill for CertificateExpirySkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.metadata
    }

    async fn execute(&self, context: &SkillContext) -> Result<SkillResult> {
        let certificates = match context.get("certificates").and_then(Value::as_array) {
            Some(c) if !c.is_empty() => c,
            _ => return Ok(SkillResult::missing_data("certificates")),
        };
        let today = context
            .get_str("reference_date")
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .unwrap_or_else(|| Utc::now().date_naive());
        let window = adjusted(self.thresholds.certificate_expiry_warning_days as f64, context);

        let mut verdict = Verdict::Compliant;
        let mut findings = Vec::new();
        for cert in certificates {
            let name = cert.get("name").and_then(Value::as_str).unwrap_or("certificate");
            let expires = cert
                .get("expires")
                .and_then(Value::as_str)
                .and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok());

            let (status, severity) = match expires {
                None => ("unreadable_expiry", Verdict::Warning),
                Some(date) => {
                    let days_left = (date - today).num_days();
                    if days_left < 0 {
                        ("expired", Verdict::NonCompliant)
                    } else if (days_left as f64) <= window {
                        ("expiring_soon", Verdict::Warning)
                    } else {
                        ("valid", Verdict::Compliant)
                    }
                }
            };
            verdict = worse(verdict, severity);
            findings.push(json!({
                "name": name,
                "expires": expires.map(|d| d.to_string()),
                "status": status,
            }));
        }

        let flagged = findings.iter().filter(|f| f["status"] != "valid").count();
        Ok(SkillResult::verdict(verdict, 0.95).with_data(json!({
            "message": format!("{} of {} certificates need attention", flagged, findings.len()),
            "reference_date": today.to_string(),
            "warning_window_days": window,
            "certificates": findings,
        })))
    }
}

fn worse(a: Verdict, b: Verdict) -> Verdict {
    let rank = |v: Verdict| match v {
        Verdict::Compliant => 0,
        Verdict::Unknown => 1,
        Verdict::Warning => 2,
        Verdict::NonCompliant => 3,
    };
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

// Six to ten digits once dots and spaces are removed
static HS_CODE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}(\.?\d{2}){1,3}$|^\d{4}$").expect("invalid regex")
});

/// Normalize an HS code to its digits, or `None` when malformed.
pub(crate) fn parse_hs_code(raw: &str) -> Option<String> {
    let compact: String = raw.trim().chars().filter(|c| !c.is_whitespace()).collect();
    if !HS_CODE_PATTERN.is_match(&compact) {
        return None;
    }
    Some(compact.replace('.', ""))
}

/// HS code format and chapter check.
///
/// Reads `hs_code`. Codes need at least six digits to classify a good; a
/// four-digit heading is accepted with a warning.
pub struct HsCodeValidationSkill {
    metadata: SkillMetadata,
}

impl HsCodeValidationSkill {
    pub const ID: &'static str = "hs-code-validation";

    pub fn new() -> Self {
        Self {
            metadata: SkillMetadata::new(
                Self::ID,
                "HS Code Validation",
                SkillCategory::Classification,
                "Checks that the declared HS code is well-formed and in a valid chapter",
            ),
        }
    }
}

impl Default for HsCodeValidationSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for HsCodeValidationSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.metadata
    }

    async fn execute(&self, context: &SkillContext) -> Result<SkillResult> {
        let Some(raw) = context.get_str("hs_code") else {
            return Ok(SkillResult::missing_data("hs_code"));
        };

        let Some(code) = parse_hs_code(raw) else {
            return Ok(SkillResult::non_compliant(0.95).with_data(json!({
                "message": format!("HS code '{}' is malformed", raw),
                "hs_code": raw,
            })));
        };

        let chapter: u32 = code[..2].parse().unwrap_or(0);
        // Chapter 77 is reserved; 98-99 are national use
        if chapter == 0 || chapter == 77 || chapter > 97 {
            return Ok(SkillResult::non_compliant(0.9).with_data(json!({
                "message": format!("HS chapter {:02} is not a valid harmonized chapter", chapter),
                "hs_code": code,
                "chapter": chapter,
            })));
        }

        let result = if code.len() < 6 {
            SkillResult::warning(0.8)
        } else {
            SkillResult::compliant(0.95)
        };
        Ok(result.with_data(json!({
            "message": format!("HS code {} (chapter {:02})", code, chapter),
            "hs_code": code,
            "chapter": chapter,
            "heading": &code[..4],
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hs_code() {
        assert_eq!(parse_hs_code("8541.40").as_deref(), Some("854140"));
        assert_eq!(parse_hs_code(" 8541.40.20 ").as_deref(), Some("85414020"));
        assert_eq!(parse_hs_code("030617").as_deref(), Some("030617"));
        assert_eq!(parse_hs_code("8541").as_deref(), Some("8541"));
        assert!(parse_hs_code("85A1.40").is_none());
        assert!(parse_hs_code("85414").is_none());
        assert!(parse_hs_code("8541.40.20.10.5").is_none());
    }

    async fn classify(code: &str) -> Verdict {
        let ctx = SkillContext::new().with("hs_code", code);
        HsCodeValidationSkill::new().execute(&ctx).await.unwrap().verdict
    }

    #[tokio::test]
    async fn test_hs_code_verdicts() {
        assert_eq!(classify("8541.40").await, Verdict::Compliant);
        assert_eq!(classify("8541").await, Verdict::Warning);
        assert_eq!(classify("7701.00").await, Verdict::NonCompliant);
        assert_eq!(classify("not a code").await, Verdict::NonCompliant);

        let missing = HsCodeValidationSkill::new()
            .execute(&SkillContext::new())
            .await
            .unwrap();
        assert_eq!(missing.verdict, Verdict::Unknown);
    }

    fn certs(expiry: &str) -> SkillContext {
        SkillContext::new()
            .with("reference_date", "2025-06-01")
            .with(
                "certificates",
                json!([
                    { "name": "phytosanitary", "expires": "2026-01-01" },
                    { "name": "origin", "expires": expiry }
                ]),
            )
    }

    #[tokio::test]
    async fn test_certificate_expiry() {
        let skill = CertificateExpirySkill::new(SkillThresholds::default());

        let ok = skill.execute(&certs("2025-12-31")).await.unwrap();
        assert_eq!(ok.verdict, Verdict::Compliant);

        let soon = skill.execute(&certs("2025-06-20")).await.unwrap();
        assert_eq!(soon.verdict, Verdict::Warning);
        assert_eq!(soon.data["certificates"][1]["status"], "expiring_soon");

        let expired = skill.execute(&certs("2025-05-01")).await.unwrap();
        assert_eq!(expired.verdict, Verdict::NonCompliant);
        assert!(expired.requires_human_review);

        let garbled = skill.execute(&certs("soon")).await.unwrap();
        assert_eq!(garbled.verdict, Verdict::Warning);
    }
}
