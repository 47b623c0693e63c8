use async_trait::async_trait;
use serde_json::json;

use super::documents::parse_hs_code;
use super::normalize_name;
use crate::error::Result;
use crate::skill::{Skill, SkillCategory, SkillContext, SkillMetadata, SkillResult};

/// Reference carbon price (EUR per tCO2e) when the context carries none.
const DEFAULT_CARBON_PRICE_EUR: f64 = 80.0;

/// HS prefixes of goods in scope of the EU carbon border mechanism.
const CBAM_PREFIXES: &[(&str, &str)] = &[
    ("72", "iron_and_steel"),
    ("73", "iron_and_steel"),
    ("76", "aluminium"),
    ("2523", "cement"),
    ("2716", "electricity"),
    ("2804", "hydrogen"),
    ("2808", "fertilisers"),
    ("2814", "fertilisers"),
    ("3102", "fertilisers"),
    ("3105", "fertilisers"),
];

const EU_MEMBERS: &[&str] = &[
    "austria", "belgium", "bulgaria", "croatia", "cyprus", "czechia", "czech republic",
    "denmark", "estonia", "finland", "france", "germany", "greece", "hungary", "ireland",
    "italy", "latvia", "lithuania", "luxembourg", "malta", "netherlands", "poland",
    "portugal", "romania", "slovakia", "slovenia", "spain", "sweden", "eu",
    "european union",
];

pub(crate) fn cbam_sector(hs_code: &str) -> Option<&'static str> {
    let code = parse_hs_code(hs_code)?;
    CBAM_PREFIXES
        .iter()
        .find(|(prefix, _)| code.starts_with(prefix))
        .map(|(_, sector)| *sector)
}

pub(crate) fn is_eu_destination(country: &str) -> bool {
    EU_MEMBERS.contains(&normalize_name(country).as_str())
}

/// Carbon border adjustment exposure.
///
/// Reads `hs_code`, `destination_country`, and optionally
/// `embedded_emissions_tco2` and `carbon_price_eur`. In-scope goods without an
/// emissions declaration are a warning; with one, the estimated levy is
/// reported.
pub struct CarbonBorderSkill {
    metadata: SkillMetadata,
}

impl CarbonBorderSkill {
    pub const ID: &'static str = "carbon-border";

    pub fn new() -> Self {
        Self {
            metadata: SkillMetadata::new(
                Self::ID,
                "Carbon Border Adjustment",
                SkillCategory::Sustainability,
                "Estimates carbon border levy exposure for in-scope goods",
            ),
        }
    }
}

impl Default for CarbonBorderSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for CarbonBorderSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.metadata
    }

    async fn execute(&self, context: &SkillContext) -> Result<SkillResult> {
        let Some(hs_code) = context.get_str("hs_code") else {
            return Ok(SkillResult::missing_data("hs_code"));
        };
        let Some(destination) = context.get_str("destination_country") else {
            return Ok(SkillResult::missing_data("destination_country"));
        };

        let sector = cbam_sector(hs_code);
        if sector.is_none() || !is_eu_destination(destination) {
            return Ok(SkillResult::compliant(0.9).with_data(json!({
                "message": "Not in scope of the carbon border adjustment",
                "in_scope": false,
            })));
        }

        let Some(emissions) = context.get_f64("embedded_emissions_tco2") else {
            return Ok(SkillResult::warning(0.8).with_data(json!({
                "message": format!(
                    "{} goods into {} need an embedded-emissions declaration",
                    sector.unwrap_or_default(), destination
                ),
                "in_scope": true,
                "sector": sector,
            })));
        };
        let price = context
            .get_f64("carbon_price_eur")
            .unwrap_or(DEFAULT_CARBON_PRICE_EUR);
        let levy = emissions * price;

        Ok(SkillResult::compliant(0.85).with_data(json!({
            "message": format!(
                "Estimated carbon border levy EUR {:.2} for {:.2} tCO2e of embedded carbon emissions",
                levy, emissions
            ),
            "in_scope": true,
            "sector": sector,
            "embedded_emissions_tco2": emissions,
            "carbon_price_eur": price,
            "estimated_levy_eur": levy,
        })))
    }
}
