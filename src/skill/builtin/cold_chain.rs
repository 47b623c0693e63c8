use async_trait::async_trait;
use serde_json::json;

use super::adjusted;
use crate::config::SkillThresholds;
use crate::error::Result;
use crate::skill::{Skill, SkillCategory, SkillContext, SkillMetadata, SkillResult};

const KELVIN_OFFSET: f64 = 273.15;

/// Mean Kinetic Temperature of a series of readings, in °C.
///
/// `activation_energy_over_r` is ΔH/R in kelvin. Returns `None` for an empty
/// series.
pub fn mean_kinetic_temperature(
    readings_celsius: &[f64],
    activation_energy_over_r: f64,
) -> Option<f64> {
    if readings_celsius.is_empty() {
        return None;
    }
    let n = readings_celsius.len() as f64;
    let mean_arrhenius = readings_celsius
        .iter()
        .map(|t| (-activation_energy_over_r / (t + KELVIN_OFFSET)).exp())
        .sum::<f64>()
        / n;
    Some(activation_energy_over_r / -mean_arrhenius.ln() - KELVIN_OFFSET)
}

/// Cold-chain check over temperature logger readings.
///
/// Reads `temperature_readings` (°C) and `max_temperature` (label maximum,
/// °C). An MKT above the maximum is a warning; above maximum plus tolerance
/// it is non-compliant.
pub struct MeanKineticTemperatureSkill {
    metadata: SkillMetadata,
    thresholds: SkillThresholds,
}

impl MeanKineticTemperatureSkill {
    pub const ID: &'static str = "mean-kinetic-temperature";

    pub fn new(thresholds: SkillThresholds) -> Self {
        Self {
            metadata: SkillMetadata::new(
                Self::ID,
                "Mean Kinetic Temperature",
                SkillCategory::ColdChain,
                "Evaluates cumulative thermal stress from temperature readings",
            ),
            thresholds,
        }
    }
}

#[async_trait]
impl Skill for MeanKineticTemperatureSkill {
    fn metadata(&self) -> &SkillMetadata {
        &self.metadata
    }

    async fn execute(&self, context: &SkillContext) -> Result<SkillResult> {
        let readings = match context.get_f64_list("temperature_readings") {
            Some(r) if !r.is_empty() => r,
            _ => return Ok(SkillResult::missing_data("temperature_readings")),
        };
        let Some(max) = context.get_f64("max_temperature") else {
            return Ok(SkillResult::missing_data("max_temperature"));
        };
        let Some(mkt) =
            mean_kinetic_temperature(&readings, self.thresholds.mkt_activation_energy_over_r)
        else {
            return Ok(SkillResult::missing_data("temperature_readings"));
        };

        let tolerance = adjusted(self.thresholds.mkt_tolerance_celsius, context);
        let excursions = readings.iter().filter(|t| **t > max).count();
        let peak = readings.iter().copied().fold(f64::MIN, f64::max);

        // Confidence grows with the number of readings
        let confidence = (0.6 + readings.len() as f64 * 0.02).min(0.95);
        let result = if mkt > max + tolerance {
            SkillResult::non_compliant(confidence)
        } else if mkt > max {
            SkillResult::warning(confidence)
        } else {
            SkillResult::compliant(confidence)
        };

        Ok(result.with_data(json!({
            "message": format!(
                "MKT {:.2}°C against a {:.1}°C limit ({} of {} readings above limit)",
                mkt, max, excursions, readings.len()
            ),
            "mkt_celsius": mkt,
            "max_temperature": max,
            "tolerance_celsius": tolerance,
            "peak_celsius": peak,
            "excursions": excursions,
            "readings": readings.len(),
        })))
    }
}
