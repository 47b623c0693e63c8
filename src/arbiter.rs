//! Conflict resolution between agent recommendations.
//!
//! Recommendations are classified into trade-off categories by keyword.
//! Any two recommendations from opposing categories form a conflict, which
//! is resolved by (in order) a caller priority override, the trade-off rule
//! table, and finally a default that favours compliance. Both sides of every
//! conflict are kept in the outcome.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// A recommendation produced by an agent or skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Agent or skill id that produced it
    pub source: String,
    pub message: String,
}

impl Recommendation {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Dimension a recommendation optimizes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeoffCategory {
    Cost,
    Carbon,
    Speed,
    Compliance,
    Quality,
}

impl std::fmt::Display for TradeoffCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cost => write!(f, "cost"),
            Self::Carbon => write!(f, "carbon"),
            Self::Speed => write!(f, "speed"),
            Self::Compliance => write!(f, "compliance"),
            Self::Quality => write!(f, "quality"),
        }
    }
}

/// Kind of trade-off between two opposing categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeoffType {
    LowestCostVsLowestCarbon,
    ComplianceVsSpeed,
    CostVsQuality,
}

impl TradeoffType {
    /// Trade-off between two categories, if they oppose each other.
    pub fn between(a: TradeoffCategory, b: TradeoffCategory) -> Option<Self> {
        use TradeoffCategory::*;
        match (a, b) {
            (Cost, Carbon) | (Carbon, Cost) => Some(Self::LowestCostVsLowestCarbon),
            (Compliance, Speed) | (Speed, Compliance) => Some(Self::ComplianceVsSpeed),
            (Cost, Quality) | (Quality, Cost) => Some(Self::CostVsQuality),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradeoffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LowestCostVsLowestCarbon => write!(f, "lowest_cost_vs_lowest_carbon"),
            Self::ComplianceVsSpeed => write!(f, "compliance_vs_speed"),
            Self::CostVsQuality => write!(f, "cost_vs_quality"),
        }
    }
}

/// Caller-supplied priority that overrides the rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Cost,
    Sustainability,
    Speed,
    Compliance,
    Quality,
}

impl Priority {
    pub fn category(self) -> TradeoffCategory {
        match self {
            Self::Cost => TradeoffCategory::Cost,
            Self::Sustainability => TradeoffCategory::Carbon,
            Self::Speed => TradeoffCategory::Speed,
            Self::Compliance => TradeoffCategory::Compliance,
            Self::Quality => TradeoffCategory::Quality,
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cost" => Ok(Self::Cost),
            "sustainability" | "carbon" => Ok(Self::Sustainability),
            "speed" => Ok(Self::Speed),
            "compliance" => Ok(Self::Compliance),
            "quality" => Ok(Self::Quality),
            other => Err(Error::config(format!("unknown priority: {}", other))),
        }
    }
}

static COST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(lowest[\s-]cost|cheap|\bcosts?\b|savings?|budget|inexpensive|freight rate)")
        .expect("invalid regex")
});

static CARBON_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(carbon|emission|co2|sustainab|low[\s-]emission|climate)")
        .expect("invalid regex")
});

static SPEED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(fastest|faster|expedit|speed|urgent|air freight|transit time|delay)")
        .expect("invalid regex")
});

static COMPLIANCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(complian|regulat|sanction|legal|customs|hold shipment|rebut|traceab)")
        .expect("invalid regex")
});

static QUALITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(quality|inspect|defect|premium|durab|quarantine)").expect("invalid regex")
});

/// Categories a message talks about, in a fixed order.
pub fn classify(message: &str) -> Vec<TradeoffCategory> {
    [
        (TradeoffCategory::Cost, &COST_PATTERN),
        (TradeoffCategory::Carbon, &CARBON_PATTERN),
        (TradeoffCategory::Speed, &SPEED_PATTERN),
        (TradeoffCategory::Compliance, &COMPLIANCE_PATTERN),
        (TradeoffCategory::Quality, &QUALITY_PATTERN),
    ]
    .into_iter()
    .filter(|(_, pattern)| pattern.is_match(message))
    .map(|(category, _)| category)
    .collect()
}

/// Two recommendations pulling in opposite directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterConflict {
    pub tradeoff: TradeoffType,
    pub first: Recommendation,
    pub first_category: TradeoffCategory,
    pub second: Recommendation,
    pub second_category: TradeoffCategory,
}

/// Which step of the resolution order decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRule {
    Override,
    RuleTable,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub tradeoff: TradeoffType,
    pub winning_dimension: TradeoffCategory,
    pub winner: Recommendation,
    /// Kept for audit
    pub loser: Recommendation,
    pub rule: ResolutionRule,
    pub reasoning: String,
}

/// Everything the arbiter saw and decided for one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationOutcome {
    pub recommendations: Vec<Recommendation>,
    pub conflicts: Vec<ArbiterConflict>,
    pub resolutions: Vec<Resolution>,
}

impl ArbitrationOutcome {
    /// The primary decision: the resolution of the first conflict.
    pub fn decision(&self) -> Option<&Resolution> {
        self.resolutions.first()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Rule {
    winner: TradeoffCategory,
    justification: String,
}

/// Detects and resolves recommendation conflicts.
#[derive(Debug, Clone)]
pub struct ConflictArbiter {
    rules: HashMap<TradeoffType, Rule>,
}

impl Default for ConflictArbiter {
    fn default() -> Self {
        Self::empty()
            .with_rule(
                TradeoffType::LowestCostVsLowestCarbon,
                TradeoffCategory::Carbon,
                "Sustainability commitments outweigh marginal cost savings",
            )
            .with_rule(
                TradeoffType::ComplianceVsSpeed,
                TradeoffCategory::Compliance,
                "Regulatory exposure outweighs delivery time",
            )
            .with_rule(
                TradeoffType::CostVsQuality,
                TradeoffCategory::Quality,
                "Quality failures cost more downstream than they save upfront",
            )
    }
}

impl ConflictArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arbiter with no rule table; only overrides and the default apply.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn with_rule(
        mut self,
        tradeoff: TradeoffType,
        winner: TradeoffCategory,
        justification: impl Into<String>,
    ) -> Self {
        self.rules.insert(
            tradeoff,
            Rule {
                winner,
                justification: justification.into(),
            },
        );
        self
    }

    /// Pairwise conflicts, in input order.
    pub fn detect_conflicts(&self, recommendations: &[Recommendation]) -> Vec<ArbiterConflict> {
        let categories: Vec<Vec<TradeoffCategory>> = recommendations
            .iter()
            .map(|r| classify(&r.message))
            .collect();

        let mut conflicts = Vec::new();
        for i in 0..recommendations.len() {
            for j in (i + 1)..recommendations.len() {
                let opposing = categories[i].iter().find_map(|&a| {
                    categories[j]
                        .iter()
                        .find_map(|&b| TradeoffType::between(a, b).map(|t| (t, a, b)))
                });
                if let Some((tradeoff, a, b)) = opposing {
                    conflicts.push(ArbiterConflict {
                        tradeoff,
                        first: recommendations[i].clone(),
                        first_category: a,
                        second: recommendations[j].clone(),
                        second_category: b,
                    });
                }
            }
        }
        conflicts
    }

    fn resolve_conflict(&self, conflict: &ArbiterConflict, priority: Option<Priority>) -> Resolution {
        let sides = [conflict.first_category, conflict.second_category];

        let (winning_dimension, rule, reasoning) = match priority.map(Priority::category) {
            Some(p) if sides.contains(&p) => (
                p,
                ResolutionRule::Override,
                format!("Caller priority '{}' decides {}", p, conflict.tradeoff),
            ),
            _ => match self.rules.get(&conflict.tradeoff) {
                Some(rule) => (rule.winner, ResolutionRule::RuleTable, rule.justification.clone()),
                None if sides.contains(&TradeoffCategory::Compliance) => (
                    TradeoffCategory::Compliance,
                    ResolutionRule::Default,
                    "Compliance takes precedence by default".to_string(),
                ),
                None => (
                    conflict.first_category,
                    ResolutionRule::Default,
                    "No rule applies; keeping the earlier recommendation".to_string(),
                ),
            },
        };

        let (winner, loser) = if winning_dimension == conflict.first_category {
            (conflict.first.clone(), conflict.second.clone())
        } else {
            (conflict.second.clone(), conflict.first.clone())
        };

        Resolution {
            tradeoff: conflict.tradeoff,
            winning_dimension,
            winner,
            loser,
            rule,
            reasoning,
        }
    }

    /// Detect and resolve every conflict in a batch.
    pub fn resolve(
        &self,
        recommendations: &[Recommendation],
        priority: Option<Priority>,
    ) -> ArbitrationOutcome {
        let conflicts = self.detect_conflicts(recommendations);
        let resolutions: Vec<Resolution> = conflicts
            .iter()
            .map(|c| self.resolve_conflict(c, priority))
            .collect();
        if !conflicts.is_empty() {
            debug!(conflicts = conflicts.len(), "Arbitrated recommendation conflicts");
        }
        ArbitrationOutcome {
            recommendations: recommendations.to_vec(),
            conflicts,
            resolutions,
        }
    }
}
