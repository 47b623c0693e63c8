//! Built-in domain skills.
//!
//! These are leaves: each reads a few context fields, consults a rule-data
//! collaborator where it needs one, and returns a verdict. The rule data
//! itself (price benchmarks, sanctions lists) sits behind the [`PriceIndex`]
//! and [`SanctionsList`] traits so deployments can plug in real sources.

mod cold_chain;
mod documents;
mod screening;
mod sustainability;
mod valuation;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::SkillRegistry;
use crate::config::SkillThresholds;
use crate::error::Result;

pub use cold_chain::{mean_kinetic_temperature, MeanKineticTemperatureSkill};
pub use documents::{CertificateExpirySkill, HsCodeValidationSkill};
pub use screening::{ForcedLaborRiskSkill, SanctionsScreeningSkill};
pub use sustainability::CarbonBorderSkill;
pub(crate) use sustainability::{cbam_sector, is_eu_destination};
pub use valuation::MarketPriceSkill;

/// Learned adjustment key every built-in skill honours.
///
/// The value is a relative shift: `0.1` makes a skill's thresholds 10% more
/// lenient, `-0.1` 10% stricter.
pub const THRESHOLD_ADJUSTMENT: &str = "threshold";

/// Scale a base threshold by the context's learned adjustment.
pub(crate) fn adjusted(base: f64, context: &super::SkillContext) -> f64 {
    base * (1.0 + context.adjustment(THRESHOLD_ADJUSTMENT).unwrap_or(0.0))
}

/// Lowercase, strip punctuation, collapse whitespace.
pub(crate) fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Benchmark unit prices per product.
pub trait PriceIndex: Send + Sync {
    fn index_price(&self, product: &str) -> Option<f64>;
}

/// In-memory price index keyed by normalized product name.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceIndex {
    prices: HashMap<String, f64>,
}

impl StaticPriceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, product: &str, price: f64) -> Self {
        self.prices.insert(normalize_name(product), price);
        self
    }
}

impl PriceIndex for StaticPriceIndex {
    fn index_price(&self, product: &str) -> Option<f64> {
        self.prices.get(&normalize_name(product)).copied()
    }
}

/// A sanctions list match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanctionsHit {
    pub screened_name: String,
    pub listed_name: String,
    pub program: String,
    /// 1.0 for an exact normalized match, lower for partial matches
    pub score: f64,
}

/// Denied-party and embargo data.
pub trait SanctionsList: Send + Sync {
    fn screen(&self, name: &str) -> Option<SanctionsHit>;

    fn is_embargoed(&self, country: &str) -> bool;
}

/// In-memory sanctions list.
#[derive(Debug, Clone, Default)]
pub struct StaticSanctionsList {
    parties: Vec<(String, String)>,
    embargoed: HashSet<String>,
}

const PARTIAL_MATCH_SCORE: f64 = 0.8;

impl StaticSanctionsList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_party(mut self, name: &str, program: &str) -> Self {
        self.parties.push((normalize_name(name), program.to_string()));
        self
    }

    pub fn with_embargo(mut self, country: &str) -> Self {
        self.embargoed.insert(normalize_name(country));
        self
    }
}

impl SanctionsList for StaticSanctionsList {
    fn screen(&self, name: &str) -> Option<SanctionsHit> {
        let screened = normalize_name(name);
        if screened.is_empty() {
            return None;
        }
        let hit = |listed: &String, program: &String, score| SanctionsHit {
            screened_name: name.to_string(),
            listed_name: listed.clone(),
            program: program.clone(),
            score,
        };

        if let Some((listed, program)) = self.parties.iter().find(|(l, _)| *l == screened) {
            return Some(hit(listed, program, 1.0));
        }
        // All tokens of the listed name appear in the screened name
        self.parties
            .iter()
            .find(|(listed, _)| {
                let tokens: HashSet<&str> = screened.split(' ').collect();
                listed.split(' ').all(|t| tokens.contains(t))
            })
            .map(|(listed, program)| hit(listed, program, PARTIAL_MATCH_SCORE))
    }

    fn is_embargoed(&self, country: &str) -> bool {
        let country = normalize_name(country);
        self.embargoed
            .iter()
            .any(|e| country == *e || country.split(' ').any(|t| t == e))
    }
}

/// Rule-data collaborators handed to the built-in skills.
#[derive(Clone)]
pub struct RuleData {
    pub prices: Arc<dyn PriceIndex>,
    pub sanctions: Arc<dyn SanctionsList>,
}

impl Default for RuleData {
    fn default() -> Self {
        Self {
            prices: Arc::new(StaticPriceIndex::new()),
            sanctions: Arc::new(StaticSanctionsList::new()),
        }
    }
}

/// Register every built-in skill.
pub fn register_builtin_skills(
    registry: &mut SkillRegistry,
    thresholds: &SkillThresholds,
    data: RuleData,
) -> Result<()> {
    registry.register(MarketPriceSkill::new(
        Arc::clone(&data.prices),
        thresholds.clone(),
    ))?;
    registry.register(MeanKineticTemperatureSkill::new(thresholds.clone()))?;
    registry.register(CertificateExpirySkill::new(thresholds.clone()))?;
    registry.register(SanctionsScreeningSkill::new(Arc::clone(&data.sanctions)))?;
    registry.register(HsCodeValidationSkill::new())?;
    registry.register(ForcedLaborRiskSkill::new())?;
    registry.register(CarbonBorderSkill::new())?;
    Ok(())
}
