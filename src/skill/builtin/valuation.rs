use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{adjusted, PriceIndex};
use crate::config::SkillThresholds;
use crate::error::Result;
use crate::skill::{Skill, SkillCategory, SkillContext, SkillMetadata, SkillResult};

/// Compares the declared unit price against a benchmark index.
///
/// Reads `product` and `declared_price`; `index_price` in the context takes
/// precedence over the [`PriceIndex`] lookup. Deviation in either direction
/// beyond the warning threshold is a warning, beyond the critical threshold
/// non-compliant (possible under- or over-invoicing).
pub struct MarketPriceSkill {
    metadata: SkillMetadata,
    prices: Arc<dyn PriceIndex>,
    thresholds: SkillThresholds,
}

impl MarketPriceSkill {
    pub const ID: &'static str = "market-price-parity";

    pub fn new(prices: Arc<dyn PriceIndex>, thresholds: SkillThresholds) -> Self {
        Self {
            metadata: SkillMetadata::new(
                Self::ID,
                "Market Price Parity",
                SkillCategory::Valuation,
                "Flags declared prices that deviate from the market benchmark",
            ),
            prices,
            thresholds,
        }
    }
}

#[async_trait]
impl Skill for MarketPriceSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.metadata
    }

    async fn execute(&self, context: &SkillContext) -> Result<SkillResult> {
        let Some(product) = context.get_str("product") else {
            return Ok(SkillResult::missing_data("product"));
        };
        let Some(declared) = context.get_f64("declared_price") else {
            return Ok(SkillResult::missing_data("declared_price"));
        };

        let (index, index_source) = match context.get_f64("index_price") {
            Some(p) => (p, "context"),
            None => match self.prices.index_price(product) {
                Some(p) => (p, "price_index"),
                None => return Ok(SkillResult::missing_data("index_price")),
            },
        };
        if index <= 0.0 {
            return Ok(SkillResult::missing_data("index_price"));
        }

        let deviation_pct = (declared - index).abs() / index * 100.0;
        let direction = if declared < index { "below" } else { "above" };
        let warning = adjusted(self.thresholds.price_warning_pct, context);
        let critical = adjusted(self.thresholds.price_critical_pct, context);

        let result = if deviation_pct > critical {
            SkillResult::non_compliant(0.9)
        } else if deviation_pct > warning {
            SkillResult::warning(0.85)
        } else {
            SkillResult::compliant(0.9)
        };

        let message = format!(
            "Declared price {:.2} for {} is {:.1}% {} the index price {:.2}",
            declared, product, deviation_pct, direction, index
        );
        Ok(result.with_data(json!({
            "message": message,
            "product": product,
            "declared_price": declared,
            "index_price": index,
            "index_source": index_source,
            "deviation_pct": deviation_pct,
            "warning_threshold_pct": warning,
            "critical_threshold_pct": critical,
        })))
    }
}
