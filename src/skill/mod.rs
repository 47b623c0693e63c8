//! Skill contract and registry.
//!
//! A skill is a stateless evaluator: it reads a [`SkillContext`], consults
//! whatever rule data it needs, and returns a [`SkillResult`] with a
//! [`Verdict`]. Skills may fail internally, but the [`SkillRegistry`] turns
//! every failure (unknown id, invalid context, error, panic) into a failed
//! result, so nothing a skill does can crash the orchestration layer.
//!
//! ## Example
//!
//! ```rust,ignore
//! use consign_core::skill::{SkillContext, SkillRegistry};
//! use consign_core::skill::builtin::MarketPriceSkill;
//!
//! let mut registry = SkillRegistry::new();
//! registry.register(MarketPriceSkill::new(price_index, thresholds))?;
//!
//! let ctx = SkillContext::new()
//!     .with("product", "Solar Panels")
//!     .with("declared_price", 2000);
//! let result = registry.execute_skill("market-price-parity", &ctx).await;
//! println!("{} ({:.0}%)", result.verdict, result.confidence * 100.0);
//! ```

pub mod builtin;
mod registry;
mod types;

use async_trait::async_trait;

use crate::error::Result;

pub(crate) use registry::panic_message;
pub use registry::{SkillFailure, SkillRegistry};
#[cfg(test)]
pub(crate) use registry::test_support;
pub use types::{
    AuditAction, AuditEntry, SkillCategory, SkillContext, SkillMetadata, SkillResult, Verdict,
};

/// A stateless evaluator.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Static id, name, category and description.
    fn metadata(&self) -> &SkillMetadata;

    /// Cheap pre-check of the context. Defaults to accepting everything.
    fn validate_context(&self, _context: &SkillContext) -> bool {
        true
    }

    /// Evaluate the context.
    ///
    /// Missing input data should be reported as
    /// [`SkillResult::missing_data`], not as an error. Errors are reserved
    /// for the skill itself malfunctioning (data source down, bad state).
    async fn execute(&self, context: &SkillContext) -> Result<SkillResult>;

    fn id(&self) -> &str {
        &self.metadata().id
    }
}
