use sqlx::PgPool;

use crate::core::config::PipelineSettings;
use crate::db::models::{Evaluation, Script};
use crate::db::types::{ReviewPriority, ReviewReason};
use crate::repositories::reviews::{self, UpsertReviewParams};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TriageThresholds {
    pub(crate) ocr: f64,
    pub(crate) evaluation: f64,
    pub(crate) verification: f64,
    pub(crate) severe_ocr: f64,
}

impl TriageThresholds {
    pub(crate) fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            ocr: settings.ocr_confidence_threshold,
            evaluation: settings.evaluation_confidence_threshold,
            verification: settings.verification_confidence_threshold,
            severe_ocr: settings.severe_ocr_threshold,
        }
    }
}

/// Everything the flagging decision looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct TriageInput {
    pub(crate) ocr_confidence: Option<f64>,
    pub(crate) evaluation_confidence: Option<f64>,
    pub(crate) verification_confidence: Option<f64>,
    pub(crate) total_score: Option<f64>,
    pub(crate) passing_marks: f64,
    pub(crate) processing_error: bool,
}

/// Which thresholds the script fell below. Empty means no review needed.
/// A processing error does not mask the other reasons; everything that
/// matched lands on the same entry.
pub(crate) fn flag_reasons(input: &TriageInput, thresholds: &TriageThresholds) -> Vec<ReviewReason> {
    let mut reasons = Vec::new();
    if input.processing_error {
        reasons.push(ReviewReason::ProcessingError);
    }
    if input.ocr_confidence.is_some_and(|value| value < thresholds.ocr) {
        reasons.push(ReviewReason::LowOcrConfidence);
    }
    if input.evaluation_confidence.is_some_and(|value| value < thresholds.evaluation) {
        reasons.push(ReviewReason::LowEvaluationConfidence);
    }
    if input.verification_confidence.is_some_and(|value| value < thresholds.verification) {
        reasons.push(ReviewReason::LowVerificationConfidence);
    }
    if input.total_score.is_some_and(|score| score < input.passing_marks) {
        reasons.push(ReviewReason::BelowPassingMarks);
    }
    reasons
}

/// High: the pipeline broke, or the text extraction is so poor the scores are
/// untrustworthy. Medium: some confidence fell below threshold. Low: the
/// scores look fine, the student just did not pass.
pub(crate) fn priority_for(
    reasons: &[ReviewReason],
    input: &TriageInput,
    thresholds: &TriageThresholds,
) -> ReviewPriority {
    if reasons.contains(&ReviewReason::ProcessingError)
        || input.ocr_confidence.is_some_and(|value| value < thresholds.severe_ocr)
    {
        return ReviewPriority::High;
    }
    if reasons.iter().any(|reason| {
        matches!(
            reason,
            ReviewReason::LowOcrConfidence
                | ReviewReason::LowEvaluationConfidence
                | ReviewReason::LowVerificationConfidence
        )
    }) {
        return ReviewPriority::Medium;
    }
    ReviewPriority::Low
}

/// Flags scripts for manual review. Re-running triage for a script updates
/// its pending entry in place instead of duplicating it, and the original
/// flagged_at is preserved.
pub(crate) struct TriageEngine {
    db: PgPool,
    thresholds: TriageThresholds,
}

impl TriageEngine {
    pub(crate) fn new(db: PgPool, thresholds: TriageThresholds) -> Self {
        Self { db, thresholds }
    }

    /// Returns the review entry id when the script was flagged.
    pub(crate) async fn triage_script(
        &self,
        script: &Script,
        evaluation: Option<&Evaluation>,
        passing_marks: f64,
    ) -> anyhow::Result<Option<String>> {
        let input = TriageInput {
            ocr_confidence: script.ocr_confidence,
            evaluation_confidence: script.evaluation_confidence,
            verification_confidence: script.verification_confidence,
            total_score: evaluation.map(|evaluation| evaluation.total_score),
            passing_marks,
            processing_error: script.last_error.is_some(),
        };

        let reasons = flag_reasons(&input, &self.thresholds);
        if reasons.is_empty() {
            return Ok(None);
        }

        let priority = priority_for(&reasons, &input, &self.thresholds);
        metrics::counter!("scripts_flagged_total", "priority" => match priority {
            crate::db::types::ReviewPriority::High => "high",
            crate::db::types::ReviewPriority::Medium => "medium",
            crate::db::types::ReviewPriority::Low => "low",
        })
        .increment(1);

        let entry_id = reviews::upsert_pending(
            &self.db,
            &UpsertReviewParams {
                script_id: script.id.clone(),
                evaluation_id: evaluation.map(|evaluation| evaluation.id.clone()),
                reasons,
                priority,
                original_score: evaluation.map(|evaluation| evaluation.total_score).unwrap_or(0.0),
            },
        )
        .await?;

        Ok(Some(entry_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> TriageThresholds {
        TriageThresholds { ocr: 0.6, evaluation: 0.7, verification: 0.8, severe_ocr: 0.4 }
    }

    fn clean_input() -> TriageInput {
        TriageInput {
            ocr_confidence: Some(0.9),
            evaluation_confidence: Some(0.9),
            verification_confidence: Some(0.9),
            total_score: Some(62.0),
            passing_marks: 40.0,
            processing_error: false,
        }
    }

    #[test]
    fn clean_script_is_not_flagged() {
        assert!(flag_reasons(&clean_input(), &thresholds()).is_empty());
    }

    #[test]
    fn ocr_just_below_threshold_yields_single_medium_reason() {
        let input = TriageInput { ocr_confidence: Some(0.55), ..clean_input() };
        let reasons = flag_reasons(&input, &thresholds());
        assert_eq!(reasons, vec![ReviewReason::LowOcrConfidence]);
        assert_eq!(priority_for(&reasons, &input, &thresholds()), ReviewPriority::Medium);
    }

    #[test]
    fn severe_ocr_is_high_priority() {
        let input = TriageInput { ocr_confidence: Some(0.35), ..clean_input() };
        let reasons = flag_reasons(&input, &thresholds());
        assert_eq!(priority_for(&reasons, &input, &thresholds()), ReviewPriority::High);
    }

    #[test]
    fn below_passing_alone_is_low_priority() {
        let input = TriageInput { total_score: Some(35.0), ..clean_input() };
        let reasons = flag_reasons(&input, &thresholds());
        assert_eq!(reasons, vec![ReviewReason::BelowPassingMarks]);
        assert_eq!(priority_for(&reasons, &input, &thresholds()), ReviewPriority::Low);
    }

    #[test]
    fn processing_error_alone_is_high_priority() {
        let input = TriageInput { processing_error: true, ..clean_input() };
        let reasons = flag_reasons(&input, &thresholds());
        assert_eq!(reasons, vec![ReviewReason::ProcessingError]);
        assert_eq!(priority_for(&reasons, &input, &thresholds()), ReviewPriority::High);
    }

    #[test]
    fn error_with_low_ocr_records_both_reasons() {
        // Confidence recorded before a later-stage failure must survive the
        // failure on the review entry.
        let input = TriageInput {
            processing_error: true,
            ocr_confidence: Some(0.5),
            ..clean_input()
        };
        let reasons = flag_reasons(&input, &thresholds());
        assert_eq!(
            reasons,
            vec![ReviewReason::ProcessingError, ReviewReason::LowOcrConfidence]
        );
        assert_eq!(priority_for(&reasons, &input, &thresholds()), ReviewPriority::High);
    }

    #[test]
    fn multiple_reasons_accumulate() {
        let input = TriageInput {
            ocr_confidence: Some(0.5),
            evaluation_confidence: Some(0.6),
            total_score: Some(30.0),
            ..clean_input()
        };
        let reasons = flag_reasons(&input, &thresholds());
        assert_eq!(
            reasons,
            vec![
                ReviewReason::LowOcrConfidence,
                ReviewReason::LowEvaluationConfidence,
                ReviewReason::BelowPassingMarks,
            ]
        );
        assert_eq!(priority_for(&reasons, &input, &thresholds()), ReviewPriority::Medium);
    }

    #[test]
    fn exactly_at_threshold_is_not_flagged() {
        let input = TriageInput { ocr_confidence: Some(0.6), ..clean_input() };
        assert!(flag_reasons(&input, &thresholds()).is_empty());
        let input = TriageInput { total_score: Some(40.0), ..clean_input() };
        assert!(flag_reasons(&input, &thresholds()).is_empty());
    }

    #[test]
    fn missing_confidences_do_not_flag() {
        let input = TriageInput {
            ocr_confidence: None,
            evaluation_confidence: None,
            verification_confidence: None,
            total_score: None,
            passing_marks: 40.0,
            processing_error: false,
        };
        assert!(flag_reasons(&input, &thresholds()).is_empty());
    }
}
