//! Feedback loop from human corrections back into skill inputs.
//!
//! Every reviewed skill execution is recorded as a [`FeedbackRecord`]. Per
//! skill the engine keeps running confusion-matrix counters, recomputed into a
//! [`SkillPerformance`] snapshot on every write, and derives [`Adjustment`]s
//! from human corrections. Adjustments whose confidence clears
//! [`APPLICABLE_CONFIDENCE`] are merged into the skill's next context.
//!
//! The feedback log is capped per skill: past the retention bound the oldest
//! records are dropped. This trades long-term auditability for bounded memory;
//! callers that need the full history should drain it through
//! [`LearningEngine::export_log`] into their persistence layer. Counters are
//! running totals, so pruning never changes the metrics, and a
//! [`LearningSnapshot`] carries them across restarts alongside the log.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument};

use crate::config::DEFAULT_FEEDBACK_RETENTION;
use crate::skill::builtin::THRESHOLD_ADJUSTMENT;
use crate::skill::SkillContext;

/// Adjustments at or below this confidence are not applied.
pub const APPLICABLE_CONFIDENCE: f64 = 0.5;

const MAX_CONFIDENCE: f64 = 0.95;
const BASE_CONFIDENCE: f64 = 0.4;
const CONFIDENCE_STEP: f64 = 0.1;
const THRESHOLD_STEP: f64 = 0.05;
const MAX_THRESHOLD_SHIFT: f64 = 0.5;

/// How a skill's verdict compared to the human's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackOutcome {
    TruePositive,
    FalsePositive,
    TrueNegative,
    FalseNegative,
}

/// A human's correction of a skill result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HumanCorrection {
    /// Explicit value for the adjusted parameter, overriding the derived step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One reviewed skill execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub skill_id: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    pub outcome: FeedbackOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_corrected: Option<HumanCorrection>,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackRecord {
    pub fn new(skill_id: impl Into<String>, outcome: FeedbackOutcome) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            skill_id: skill_id.into(),
            input: Value::Null,
            output: Value::Null,
            outcome,
            human_corrected: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_correction(mut self, correction: HumanCorrection) -> Self {
        self.human_corrected = Some(correction);
        self
    }
}

/// Derived performance of one skill.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillPerformance {
    pub skill_id: String,
    pub total_executions: u64,
    pub true_positives: u64,
    pub false_positives: u64,
    pub true_negatives: u64,
    pub false_negatives: u64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl SkillPerformance {
    fn new(skill_id: &str) -> Self {
        Self {
            skill_id: skill_id.to_string(),
            ..Default::default()
        }
    }

    fn count(&mut self, outcome: FeedbackOutcome) {
        self.total_executions += 1;
        match outcome {
            FeedbackOutcome::TruePositive => self.true_positives += 1,
            FeedbackOutcome::FalsePositive => self.false_positives += 1,
            FeedbackOutcome::TrueNegative => self.true_negatives += 1,
            FeedbackOutcome::FalseNegative => self.false_negatives += 1,
        }
        self.accuracy = ratio(
            self.true_positives + self.true_negatives,
            self.total_executions,
        );
        self.precision = ratio(
            self.true_positives,
            self.true_positives + self.false_positives,
        );
        self.recall = ratio(
            self.true_positives,
            self.true_positives + self.false_negatives,
        );
    }
}

/// A learned parameter tweak for a skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    pub skill_id: String,
    pub parameter: String,
    pub value: f64,
    pub confidence: f64,
    /// Human corrections this adjustment was derived from
    pub corrections: u32,
    pub updated_at: DateTime<Utc>,
}

impl Adjustment {
    pub fn is_applicable(&self) -> bool {
        self.confidence > APPLICABLE_CONFIDENCE
    }
}

/// Engine state in persistence shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningSnapshot {
    /// Running counters per skill, including executions no longer in the log
    pub performance: Vec<SkillPerformance>,
    pub adjustments: Vec<Adjustment>,
    /// Retained records, ordered by timestamp
    pub records: Vec<FeedbackRecord>,
}

#[derive(Debug)]
struct SkillLearning {
    log: VecDeque<FeedbackRecord>,
    performance: SkillPerformance,
    adjustments: HashMap<String, Adjustment>,
}

impl SkillLearning {
    fn new(skill_id: &str) -> Self {
        Self {
            log: VecDeque::new(),
            performance: SkillPerformance::new(skill_id),
            adjustments: HashMap::new(),
        }
    }

    fn apply_correction(&mut self, record: &FeedbackRecord, correction: &HumanCorrection) {
        let adjustment = self
            .adjustments
            .entry(THRESHOLD_ADJUSTMENT.to_string())
            .or_insert_with(|| Adjustment {
                skill_id: record.skill_id.clone(),
                parameter: THRESHOLD_ADJUSTMENT.to_string(),
                value: 0.0,
                confidence: 0.0,
                corrections: 0,
                updated_at: record.timestamp,
            });

        let step = match record.outcome {
            // Flagged something fine: be more lenient
            FeedbackOutcome::FalsePositive => THRESHOLD_STEP,
            // Missed something: be stricter
            FeedbackOutcome::FalseNegative => -THRESHOLD_STEP,
            FeedbackOutcome::TruePositive | FeedbackOutcome::TrueNegative => 0.0,
        };
        let value = correction
            .suggested_value
            .unwrap_or(adjustment.value + step);

        adjustment.value = value.clamp(-MAX_THRESHOLD_SHIFT, MAX_THRESHOLD_SHIFT);
        adjustment.corrections += 1;
        adjustment.confidence =
            (BASE_CONFIDENCE + CONFIDENCE_STEP * adjustment.corrections as f64).min(MAX_CONFIDENCE);
        adjustment.updated_at = record.timestamp;
    }
}

/// Records feedback and serves learned adjustments.
///
/// State is keyed by skill id; each skill's state sits behind its own mutex.
pub struct LearningEngine {
    retention: usize,
    skills: RwLock<HashMap<String, Arc<Mutex<SkillLearning>>>>,
}

impl Default for LearningEngine {
    fn default() -> Self {
        Self::new(DEFAULT_FEEDBACK_RETENTION)
    }
}

impl LearningEngine {
    /// Engine keeping at most `retention` records per skill.
    pub fn new(retention: usize) -> Self {
        Self {
            retention: retention.max(1),
            skills: RwLock::new(HashMap::new()),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    async fn entry(&self, skill_id: &str) -> Arc<Mutex<SkillLearning>> {
        if let Some(existing) = self.skills.read().await.get(skill_id) {
            return Arc::clone(existing);
        }
        let mut skills = self.skills.write().await;
        Arc::clone(
            skills
                .entry(skill_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(SkillLearning::new(skill_id)))),
        )
    }

    async fn existing(&self, skill_id: &str) -> Option<Arc<Mutex<SkillLearning>>> {
        self.skills.read().await.get(skill_id).cloned()
    }

    /// Record one reviewed execution; returns the updated performance.
    #[instrument(skip(self, record), fields(skill_id = %record.skill_id, outcome = ?record.outcome))]
    pub async fn record_feedback(&self, record: FeedbackRecord) -> SkillPerformance {
        let entry = self.entry(&record.skill_id).await;
        let mut state = entry.lock().await;

        state.performance.count(record.outcome);
        if let Some(correction) = record.human_corrected.clone() {
            state.apply_correction(&record, &correction);
            if let Some(adj) = state.adjustments.get(THRESHOLD_ADJUSTMENT) {
                info!(
                    skill_id = %record.skill_id,
                    value = adj.value,
                    confidence = adj.confidence,
                    "Updated threshold adjustment"
                );
            }
        }

        state.log.push_back(record);
        while state.log.len() > self.retention {
            state.log.pop_front();
        }
        debug!(log_len = state.log.len(), "Recorded feedback");
        state.performance.clone()
    }

    pub async fn performance(&self, skill_id: &str) -> Option<SkillPerformance> {
        let entry = self.existing(skill_id).await?;
        let performance = entry.lock().await.performance.clone();
        Some(performance)
    }

    /// All adjustments for a skill, applicable or not.
    pub async fn adjustments(&self, skill_id: &str) -> Vec<Adjustment> {
        let Some(entry) = self.existing(skill_id).await else {
            return Vec::new();
        };
        let state = entry.lock().await;
        let mut adjustments: Vec<Adjustment> = state.adjustments.values().cloned().collect();
        adjustments.sort_by(|a, b| a.parameter.cmp(&b.parameter));
        adjustments
    }

    /// Parameter -> value for adjustments above the confidence floor.
    pub async fn get_applicable_adjustments(&self, skill_id: &str) -> HashMap<String, f64> {
        self.adjustments(skill_id)
            .await
            .into_iter()
            .filter(Adjustment::is_applicable)
            .map(|a| (a.parameter, a.value))
            .collect()
    }

    /// Merge applicable adjustments into a skill context.
    pub async fn apply_adjustments(&self, skill_id: &str, context: &mut SkillContext) {
        context
            .adjustments
            .extend(self.get_applicable_adjustments(skill_id).await);
    }

    /// Retained feedback for one skill, oldest first.
    pub async fn feedback_log(&self, skill_id: &str) -> Vec<FeedbackRecord> {
        match self.existing(skill_id).await {
            Some(entry) => entry.lock().await.log.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Every retained record across skills, ordered by timestamp.
    pub async fn export_log(&self) -> Vec<FeedbackRecord> {
        let entries: Vec<_> = self.skills.read().await.values().cloned().collect();
        let mut records = Vec::new();
        for entry in entries {
            records.extend(entry.lock().await.log.iter().cloned());
        }
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        records
    }

    /// Counters, adjustments and retained records for every skill.
    pub async fn export_snapshot(&self) -> LearningSnapshot {
        let mut entries: Vec<_> = self
            .skills
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut snapshot = LearningSnapshot::default();
        for (_, entry) in entries {
            let state = entry.lock().await;
            snapshot.performance.push(state.performance.clone());
            let mut adjustments: Vec<Adjustment> = state.adjustments.values().cloned().collect();
            adjustments.sort_by(|a, b| a.parameter.cmp(&b.parameter));
            snapshot.adjustments.extend(adjustments);
        }
        snapshot.records = self.export_log().await;
        snapshot
    }

    /// Restore a snapshot taken by [`export_snapshot`](Self::export_snapshot).
    ///
    /// Skills named in `performance` take the stored counters and adjustments
    /// as they are, replacing any state held for them; their records only
    /// refill the log. Records of any other skill are replayed through
    /// [`record_feedback`](Self::record_feedback).
    pub async fn import_snapshot(&self, snapshot: LearningSnapshot) {
        let restored: HashSet<String> = snapshot
            .performance
            .iter()
            .map(|p| p.skill_id.clone())
            .collect();

        for performance in snapshot.performance {
            let entry = self.entry(&performance.skill_id).await;
            let mut state = entry.lock().await;
            state.log.clear();
            state.adjustments.clear();
            state.performance = performance;
        }
        for adjustment in snapshot.adjustments {
            if !restored.contains(&adjustment.skill_id) {
                continue;
            }
            let entry = self.entry(&adjustment.skill_id).await;
            let mut state = entry.lock().await;
            state
                .adjustments
                .insert(adjustment.parameter.clone(), adjustment);
        }

        let count = snapshot.records.len();
        for record in snapshot.records {
            if !restored.contains(&record.skill_id) {
                self.record_feedback(record).await;
                continue;
            }
            let entry = self.entry(&record.skill_id).await;
            let mut state = entry.lock().await;
            state.log.push_back(record);
            while state.log.len() > self.retention {
                state.log.pop_front();
            }
        }
        info!(skills = restored.len(), records = count, "Imported learning snapshot");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn correction() -> HumanCorrection {
        HumanCorrection::default()
    }

    #[tokio::test]
    async fn test_performance_metrics() {
        let engine = LearningEngine::default();
        for outcome in [
            FeedbackOutcome::TruePositive,
            FeedbackOutcome::TruePositive,
            FeedbackOutcome::FalsePositive,
            FeedbackOutcome::TrueNegative,
            FeedbackOutcome::FalseNegative,
        ] {
            engine
                .record_feedback(FeedbackRecord::new("market-price-parity", outcome))
                .await;
        }

        let perf = engine.performance("market-price-parity").await.unwrap();
        assert_eq!(perf.total_executions, 5);
        assert!((perf.accuracy - 0.6).abs() < 1e-9);
        assert!((perf.precision - 2.0 / 3.0).abs() < 1e-9);
        assert!((perf.recall - 2.0 / 3.0).abs() < 1e-9);
        assert!(engine.performance("unknown").await.is_none());
    }

    #[tokio::test]
    async fn test_adjustment_needs_repeated_corrections() {
        let engine = LearningEngine::default();
        let fp = || {
            FeedbackRecord::new("market-price-parity", FeedbackOutcome::FalsePositive)
                .with_correction(correction())
        };

        engine.record_feedback(fp()).await;
        let adjustments = engine.adjustments("market-price-parity").await;
        assert_eq!(adjustments[0].confidence, 0.5);
        assert!(engine
            .get_applicable_adjustments("market-price-parity")
            .await
            .is_empty());

        engine.record_feedback(fp()).await;
        let applicable = engine.get_applicable_adjustments("market-price-parity").await;
        assert!((applicable[THRESHOLD_ADJUSTMENT] - 0.1).abs() < 1e-9);

        let mut ctx = SkillContext::new();
        engine.apply_adjustments("market-price-parity", &mut ctx).await;
        assert!(ctx.adjustment(THRESHOLD_ADJUSTMENT).is_some());
    }

    #[tokio::test]
    async fn test_suggested_value_wins_and_is_clamped() {
        let engine = LearningEngine::default();
        let suggested = HumanCorrection {
            suggested_value: Some(2.0),
            note: Some("index is stale".into()),
        };
        engine
            .record_feedback(
                FeedbackRecord::new("s", FeedbackOutcome::FalseNegative).with_correction(suggested),
            )
            .await;
        assert_eq!(engine.adjustments("s").await[0].value, MAX_THRESHOLD_SHIFT);
    }

    #[tokio::test]
    async fn test_confidence_caps() {
        let engine = LearningEngine::default();
        for _ in 0..20 {
            engine
                .record_feedback(
                    FeedbackRecord::new("s", FeedbackOutcome::FalseNegative)
                        .with_correction(correction()),
                )
                .await;
        }
        let adj = &engine.adjustments("s").await[0];
        assert_eq!(adj.confidence, MAX_CONFIDENCE);
        assert_eq!(adj.value, -MAX_THRESHOLD_SHIFT);
        assert_eq!(adj.corrections, 20);
    }

    #[tokio::test]
    async fn test_log_is_capped_but_counters_are_not() {
        let engine = LearningEngine::new(3);
        for _ in 0..10 {
            engine
                .record_feedback(FeedbackRecord::new("s", FeedbackOutcome::TruePositive))
                .await;
        }
        assert_eq!(engine.feedback_log("s").await.len(), 3);
        assert_eq!(engine.performance("s").await.unwrap().total_executions, 10);
    }

    #[tokio::test]
    async fn test_export_import_roundtrip_rebuilds_adjustments() {
        let engine = LearningEngine::default();
        for skill in ["a", "b"] {
            for _ in 0..2 {
                engine
                    .record_feedback(
                        FeedbackRecord::new(skill, FeedbackOutcome::FalsePositive)
                            .with_correction(correction()),
                    )
                    .await;
            }
        }
        let exported = engine.export_snapshot().await;
        assert_eq!(exported.records.len(), 4);
        assert_eq!(exported.adjustments.len(), 2);

        let json = serde_json::to_string(&exported).unwrap();
        let restored = LearningEngine::default();
        restored
            .import_snapshot(serde_json::from_str(&json).unwrap())
            .await;
        assert_eq!(
            restored.get_applicable_adjustments("b").await,
            engine.get_applicable_adjustments("b").await
        );
        assert_eq!(
            restored.performance("a").await.unwrap().false_positives,
            2
        );
    }

    #[tokio::test]
    async fn test_restore_keeps_counters_past_retention() {
        let engine = LearningEngine::new(3);
        for i in 0..10 {
            let outcome = if i % 2 == 0 {
                FeedbackOutcome::FalsePositive
            } else {
                FeedbackOutcome::TruePositive
            };
            engine
                .record_feedback(FeedbackRecord::new("s", outcome).with_correction(correction()))
                .await;
        }
        let snapshot = engine.export_snapshot().await;
        assert_eq!(snapshot.records.len(), 3);

        let restored = LearningEngine::new(3);
        restored.import_snapshot(snapshot).await;

        let before = engine.performance("s").await.unwrap();
        let after = restored.performance("s").await.unwrap();
        assert_eq!(after.total_executions, 10);
        assert_eq!(after, before);
        assert_eq!(restored.adjustments("s").await, engine.adjustments("s").await);
        assert_eq!(restored.adjustments("s").await[0].corrections, 10);
        assert_eq!(restored.feedback_log("s").await.len(), 3);
    }

    #[tokio::test]
    async fn test_records_without_counters_are_replayed() {
        let snapshot = LearningSnapshot {
            records: vec![
                FeedbackRecord::new("legacy", FeedbackOutcome::TruePositive),
                FeedbackRecord::new("legacy", FeedbackOutcome::FalseNegative),
            ],
            ..Default::default()
        };
        let engine = LearningEngine::default();
        engine.import_snapshot(snapshot).await;

        let performance = engine.performance("legacy").await.unwrap();
        assert_eq!(performance.total_executions, 2);
        assert_eq!(performance.false_negatives, 1);
    }

    proptest! {
        #[test]
        fn prop_metrics_stay_in_unit_range(outcomes in prop::collection::vec(0u8..4, 1..60)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let perf = rt.block_on(async {
                let engine = LearningEngine::new(5);
                let mut last = SkillPerformance::default();
                for o in &outcomes {
                    let outcome = match o {
                        0 => FeedbackOutcome::TruePositive,
                        1 => FeedbackOutcome::FalsePositive,
                        2 => FeedbackOutcome::TrueNegative,
                        _ => FeedbackOutcome::FalseNegative,
                    };
                    last = engine.record_feedback(FeedbackRecord::new("s", outcome)).await;
                }
                last
            });
            prop_assert_eq!(perf.total_executions, outcomes.len() as u64);
            for metric in [perf.accuracy, perf.precision, perf.recall] {
                prop_assert!((0.0..=1.0).contains(&metric));
            }
        }
    }
}
