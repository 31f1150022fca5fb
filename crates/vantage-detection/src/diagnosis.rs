//! Ordered hypothesis testing for risk diagnosis.
//!
//! For each open risk, a fixed, ordered list of hypotheses is evaluated
//! against the entity's auxiliary context. The first hypothesis whose test
//! passes its threshold becomes the primary cause; every tested hypothesis
//! and its evidence is retained for audit.

use serde::{Deserialize, Serialize};
use vantage_core::config::DiagnosisConfig;
use vantage_core::metrics_view::EntityContext;

/// Cause recorded when no hypothesis passes.
pub const CAUSE_UNDETERMINED: &str = "undetermined";

/// One tested hypothesis with its evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisResult {
    /// Hypothesis name (e.g. "ranking regression").
    pub name: String,
    /// Observed evidence value, when the context carried one.
    pub observed: Option<f64>,
    /// Threshold the observation was tested against.
    pub threshold: f64,
    pub passed: bool,
}

/// Result of diagnosing one risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisOutcome {
    /// First hypothesis that passed, or [`CAUSE_UNDETERMINED`].
    pub primary_cause: String,
    pub confidence: f64,
    /// Every tested hypothesis, in evaluation order.
    pub tested: Vec<HypothesisResult>,
}

/// The hypothesis engine. Pure computation over the entity context; the
/// diagnostician agent owns persistence and state transitions.
#[derive(Debug, Clone)]
pub struct DiagnosisEngine {
    config: DiagnosisConfig,
}

impl DiagnosisEngine {
    /// Create an engine with the given thresholds
    pub fn new(config: DiagnosisConfig) -> Self {
        Self { config }
    }

    /// Evaluate the ordered hypothesis list against one entity's context.
    pub fn evaluate(&self, ctx: &EntityContext) -> DiagnosisOutcome {
        let mut tested = Vec::with_capacity(3);

        // 1. ranking regression: position worsened beyond the threshold
        let position = ctx.position_change_wow;
        tested.push(HypothesisResult {
            name: "ranking regression".to_string(),
            observed: position,
            threshold: self.config.position_drop_threshold,
            passed: position.is_some_and(|p| p > self.config.position_drop_threshold),
        });

        // 2. engagement regression: relative CTR drop beyond the threshold
        let ctr = ctx.ctr_change_wow;
        tested.push(HypothesisResult {
            name: "engagement regression".to_string(),
            observed: ctr,
            threshold: -self.config.ctr_drop_threshold,
            passed: ctr.is_some_and(|c| c < -self.config.ctr_drop_threshold),
        });

        // 3. recent content mutation
        let modified = ctx.days_since_modified.map(|d| d as f64);
        tested.push(HypothesisResult {
            name: "recent content mutation".to_string(),
            observed: modified,
            threshold: self.config.content_mutation_days as f64,
            passed: ctx
                .days_since_modified
                .is_some_and(|d| d >= 0 && d <= self.config.content_mutation_days),
        });

        let primary = tested.iter().find(|h| h.passed);
        let (primary_cause, confidence) = match primary {
            Some(hypothesis) => (
                hypothesis.name.clone(),
                self.confidence_for(hypothesis),
            ),
            None => (CAUSE_UNDETERMINED.to_string(), 0.2),
        };

        DiagnosisOutcome {
            primary_cause,
            confidence,
            tested,
        }
    }

    /// Confidence grows with how far the evidence clears its threshold.
    fn confidence_for(&self, hypothesis: &HypothesisResult) -> f64 {
        let Some(observed) = hypothesis.observed else {
            return 0.6;
        };
        let threshold = hypothesis.threshold.abs().max(f64::EPSILON);
        let excess = (observed.abs() - threshold) / threshold;
        (0.6 + 0.3 * excess.clamp(0.0, 1.0)).clamp(0.0, 0.99)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> DiagnosisEngine {
        DiagnosisEngine::new(DiagnosisConfig::default())
    }

    #[test]
    fn ranking_regression_is_first_in_order() {
        // position_change_wow = 12 (> 10 threshold)
        let ctx = EntityContext {
            position_change_wow: Some(12.0),
            ctr_change_wow: Some(-40.0),
            days_since_modified: Some(2),
            ..Default::default()
        };
        let outcome = engine().evaluate(&ctx);
        assert_eq!(outcome.primary_cause, "ranking regression");
        // all three hypotheses were tested and retained
        assert_eq!(outcome.tested.len(), 3);
        assert!(outcome.tested.iter().all(|h| h.passed));
    }

    #[test]
    fn engagement_regression_when_position_holds() {
        let ctx = EntityContext {
            position_change_wow: Some(1.0),
            ctr_change_wow: Some(-45.0),
            days_since_modified: None,
            ..Default::default()
        };
        let outcome = engine().evaluate(&ctx);
        assert_eq!(outcome.primary_cause, "engagement regression");
        assert!(!outcome.tested[0].passed);
        assert!(outcome.tested[1].passed);
    }

    #[test]
    fn content_mutation_as_last_resort() {
        let ctx = EntityContext {
            position_change_wow: Some(0.0),
            ctr_change_wow: Some(-5.0),
            days_since_modified: Some(3),
            ..Default::default()
        };
        let outcome = engine().evaluate(&ctx);
        assert_eq!(outcome.primary_cause, "recent content mutation");
    }

    #[test]
    fn no_passing_hypothesis_is_undetermined() {
        let ctx = EntityContext::default();
        let outcome = engine().evaluate(&ctx);
        assert_eq!(outcome.primary_cause, CAUSE_UNDETERMINED);
        assert_eq!(outcome.confidence, 0.2);
        assert_eq!(outcome.tested.len(), 3);
    }

    #[test]
    fn confidence_scales_with_evidence_strength() {
        let weak = engine().evaluate(&EntityContext {
            position_change_wow: Some(10.5),
            ..Default::default()
        });
        let strong = engine().evaluate(&EntityContext {
            position_change_wow: Some(25.0),
            ..Default::default()
        });
        assert!(strong.confidence > weak.confidence);
    }
}
