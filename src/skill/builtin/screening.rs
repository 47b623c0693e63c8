//! Party and supply-chain screening.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{normalize_name, SanctionsList};
use crate::error::Result;
use crate::skill::{Skill, SkillCategory, SkillContext, SkillMetadata, SkillResult};

/// Party fields screened in addition to the `parties` list.
const PARTY_FIELDS: &[&str] = &["seller_name", "buyer_name", "consignee_name", "carrier_name"];

/// Country fields checked against embargoes.
const COUNTRY_FIELDS: &[&str] = &["origin_country", "destination_country", "transit_country"];

/// Screens shipment parties and countries against a [`SanctionsList`].
pub struct SanctionsScreeningSkill {
    metadata: SkillMetadata,
    list: Arc<dyn SanctionsList>,
}

impl SanctionsScreeningSkill {
    pub const ID: &'static str = "sanctions-screening";

    pub fn new(list: Arc<dyn SanctionsList>) -> Self {
        Self {
            metadata: SkillMetadata::new(
                Self::ID,
                "Sanctions Screening",
                SkillCategory::Sanctions,
                "Screens parties against denied-party lists and countries against embargoes",
            ),
            list,
        }
    }
}

#[async_trait]
impl Skill for SanctionsScreeningSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.metadata
    }

    async fn execute(&self, context: &SkillContext) -> Result<SkillResult> {
        let mut parties = context.get_str_list("parties");
        parties.extend(
            PARTY_FIELDS
                .iter()
                .filter_map(|f| context.get_str(f))
                .map(str::to_string),
        );
        let countries: Vec<&str> = COUNTRY_FIELDS
            .iter()
            .filter_map(|f| context.get_str(f))
            .collect();

        if parties.is_empty() && countries.is_empty() {
            return Ok(SkillResult::missing_data("parties"));
        }

        let hits: Vec<_> = parties.iter().filter_map(|p| self.list.screen(p)).collect();
        let embargoed: Vec<&str> = countries
            .iter()
            .copied()
            .filter(|c| self.list.is_embargoed(c))
            .collect();

        let exact = hits.iter().any(|h| h.score >= 1.0);
        let result = if exact || !embargoed.is_empty() {
            SkillResult::non_compliant(0.95)
        } else if !hits.is_empty() {
            // Partial name matches need a human to disambiguate
            SkillResult::warning(0.7).with_human_review(true)
        } else {
            SkillResult::compliant(0.9)
        };

        Ok(result.with_data(json!({
            "message": format!(
                "Screened {} parties and {} countries: {} list matches, {} embargoed",
                parties.len(), countries.len(), hits.len(), embargoed.len()
            ),
            "matches": hits,
            "embargoed_countries": embargoed,
        })))
    }
}

/// Regions covered by a rebuttable forced-labor presumption.
const PRESUMPTION_REGIONS: &[&str] = &["xinjiang", "uyghur", "xuar"];

/// Sectors with elevated forced-labor exposure for goods of Chinese origin.
const HIGH_RISK_PRODUCTS: &[&str] = &[
    "solar", "polysilicon", "cotton", "tomato", "pvc", "aluminum", "aluminium", "seafood",
];

/// Forced-labor exposure from origin region and product sector.
///
/// Reads `origin` (free text, e.g. "Xinjiang, China") or `origin_country`,
/// plus `product` and optional `supplier_region`. Goods linked to a
/// presumption region are non-compliant until rebutted; high-risk sectors
/// of Chinese origin need supply-chain tracing.
pub struct ForcedLaborRiskSkill {
    metadata: SkillMetadata,
}

impl ForcedLaborRiskSkill {
    pub const ID: &'static str = "forced-labor-risk";

    pub fn new() -> Self {
        Self {
            metadata: SkillMetadata::new(
                Self::ID,
                "Forced Labor Risk",
                SkillCategory::ForcedLabor,
                "Scores forced-labor exposure from origin region and product sector",
            ),
        }
    }
}

impl Default for ForcedLaborRiskSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for ForcedLaborRiskSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.metadata
    }

    async fn execute(&self, context: &SkillContext) -> Result<SkillResult> {
        let origin_text: Vec<String> = ["origin", "origin_country", "supplier_region"]
            .iter()
            .filter_map(|f| context.get_str(f))
            .map(normalize_name)
            .collect();
        if origin_text.is_empty() {
            return Ok(SkillResult::missing_data("origin"));
        }
        let origin = origin_text.join(" ");
        let product = context.get_str("product").map(normalize_name).unwrap_or_default();

        let presumption = PRESUMPTION_REGIONS.iter().any(|r| origin.contains(r));
        let chinese_origin = presumption || origin.split(' ').any(|t| t == "china" || t == "prc");
        let sector = HIGH_RISK_PRODUCTS.iter().find(|p| product.contains(*p)).copied();

        let mut risk_score: f64 = 0.1;
        if chinese_origin && sector.is_some() {
            risk_score = 0.6;
        }
        if presumption {
            risk_score = 0.95;
        }

        let result = if presumption {
            SkillResult::non_compliant(0.9)
        } else if sector.is_some() && chinese_origin {
            SkillResult::warning(0.75)
        } else {
            SkillResult::compliant(0.7)
        };

        let message = if presumption {
            "Origin is in a forced-labor presumption region; entry requires clear and convincing rebuttal evidence".to_string()
        } else if let (Some(sector), true) = (sector, chinese_origin) {
            format!("High-risk sector '{}' of Chinese origin; supply-chain tracing required", sector)
        } else {
            "No elevated forced-labor indicators".to_string()
        };

        Ok(result.with_data(json!({
            "message": message,
            "risk_score": risk_score,
            "presumption_region": presumption,
            "high_risk_sector": sector,
        })))
    }
}
