use std::sync::Arc;

use metrics::counter;
use sqlx::PgPool;

use crate::broadcast::message::ScriptProgress;
use crate::broadcast::publisher::ProgressSink;
use crate::core::time::{format_primitive, primitive_now_utc};
use crate::db::models::Script;
use crate::db::types::{ScriptStage, ScriptStatus};
use crate::pipeline::event::ProcessingEvent;
use crate::repositories::scripts;

const MAX_CAS_ATTEMPTS: usize = 3;

/// The fields a transition decision needs; a projection of the script row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TransitionView {
    pub(crate) stage: ScriptStage,
    pub(crate) status: ScriptStatus,
    pub(crate) progress: i32,
    pub(crate) event_ts: i64,
}

impl From<&Script> for TransitionView {
    fn from(script: &Script) -> Self {
        Self {
            stage: script.stage,
            status: script.status,
            progress: script.progress,
            event_ts: script.event_ts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RejectReason {
    /// No script row with the event's id.
    UnknownScript,
    /// Event timestamp is not strictly greater than the stored one.
    Stale,
    /// The script already reached a terminal status.
    Terminal,
    /// The event would move the stage backwards.
    StageRegression,
    /// Lost the conditional-update race too many times.
    Contention,
}

impl RejectReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            RejectReason::UnknownScript => "unknown_script",
            RejectReason::Stale => "stale",
            RejectReason::Terminal => "terminal",
            RejectReason::StageRegression => "stage_regression",
            RejectReason::Contention => "contention",
        }
    }
}

/// What an accepted event writes to the row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlannedUpdate {
    pub(crate) stage: ScriptStage,
    pub(crate) status: ScriptStatus,
    pub(crate) progress: i32,
    pub(crate) stage_description: String,
    pub(crate) estimated_remaining_seconds: Option<f64>,
    pub(crate) event_ts: i64,
    pub(crate) ocr_confidence: Option<f64>,
    pub(crate) evaluation_confidence: Option<f64>,
    pub(crate) verification_confidence: Option<f64>,
    pub(crate) error: Option<String>,
    pub(crate) details_patch: Option<serde_json::Value>,
}

/// Decides whether an event lands and what it writes. Pure: the caller owns
/// reading and writing the row.
pub(crate) fn plan_transition(
    current: &TransitionView,
    event: &ProcessingEvent,
) -> Result<PlannedUpdate, RejectReason> {
    if current.status.is_terminal() {
        return Err(RejectReason::Terminal);
    }
    if event.event_ts <= current.event_ts {
        return Err(RejectReason::Stale);
    }

    let failed = event.status == ScriptStatus::Failed;
    if !failed && event.stage.position() < current.stage.position() {
        return Err(RejectReason::StageRegression);
    }

    // A failure freezes the script where it is.
    let stage = if failed { current.stage } else { event.stage };
    let progress = if failed {
        current.progress
    } else {
        stage.progress().max(current.progress).clamp(0, 100)
    };
    let estimated_remaining_seconds = if failed { None } else { stage.estimated_remaining_seconds() };

    Ok(PlannedUpdate {
        stage,
        status: event.status,
        progress,
        stage_description: stage.description().to_string(),
        estimated_remaining_seconds,
        event_ts: event.event_ts,
        ocr_confidence: event.ocr_confidence,
        evaluation_confidence: event.evaluation_confidence,
        verification_confidence: event.verification_confidence,
        error: event.error.clone(),
        details_patch: (!event.details.is_empty()).then(|| event.details.to_value()),
    })
}

#[derive(Debug, Clone)]
pub(crate) enum ApplyOutcome {
    /// The event landed. `changed` is false when only bookkeeping fields
    /// moved (confidences, details) while stage, status and progress stayed
    /// put, so callers can skip work that keys off the visible state.
    Applied { progress: ScriptProgress, changed: bool },
    Rejected(RejectReason),
}

/// Persists pipeline events against script rows and broadcasts the accepted
/// ones. Writes go through a conditional update on the stored event timestamp,
/// so concurrent writers converge without locks.
pub(crate) struct StageTracker {
    db: PgPool,
    sink: Arc<dyn ProgressSink>,
}

impl StageTracker {
    pub(crate) fn new(db: PgPool, sink: Arc<dyn ProgressSink>) -> Self {
        Self { db, sink }
    }

    pub(crate) async fn apply(
        &self,
        script_id: &str,
        event: &ProcessingEvent,
    ) -> anyhow::Result<ApplyOutcome> {
        for _attempt in 0..MAX_CAS_ATTEMPTS {
            let Some(script) = scripts::find_by_id(&self.db, script_id).await? else {
                counter!("stale_events_dropped_total", "reason" => RejectReason::UnknownScript.as_str())
                    .increment(1);
                return Ok(ApplyOutcome::Rejected(RejectReason::UnknownScript));
            };

            let view = TransitionView::from(&script);
            let planned = match plan_transition(&view, event) {
                Ok(planned) => planned,
                Err(reason) => {
                    counter!("stale_events_dropped_total", "reason" => reason.as_str())
                        .increment(1);
                    return Ok(ApplyOutcome::Rejected(reason));
                }
            };

            let rows = scripts::apply_event(&self.db, script_id, view.event_ts, &planned).await?;
            if rows == 0 {
                // A concurrent writer moved the row; re-read and re-plan.
                continue;
            }

            let changed = planned.stage != view.stage
                || planned.status != view.status
                || planned.progress != view.progress;
            let progress = progress_from_parts(&script, &planned);
            self.sink.script_update(&progress).await;
            return Ok(ApplyOutcome::Applied { progress, changed });
        }

        counter!("stale_events_dropped_total", "reason" => RejectReason::Contention.as_str())
            .increment(1);
        Ok(ApplyOutcome::Rejected(RejectReason::Contention))
    }

}

pub(crate) fn progress_from_script(script: &Script) -> ScriptProgress {
    ScriptProgress {
        script_id: script.id.clone(),
        session_id: script.session_id.clone(),
        stage: script.stage,
        status: script.status,
        progress: script.progress,
        stage_description: script.stage_description.clone(),
        estimated_remaining_seconds: script.estimated_remaining_seconds,
        ocr_confidence: script.ocr_confidence,
        evaluation_confidence: script.evaluation_confidence,
        verification_confidence: script.verification_confidence,
        error: script.last_error.clone(),
        event_ts: script.event_ts,
        timestamp: format_primitive(script.updated_at),
    }
}

fn progress_from_parts(script: &Script, planned: &PlannedUpdate) -> ScriptProgress {
    ScriptProgress {
        script_id: script.id.clone(),
        session_id: script.session_id.clone(),
        stage: planned.stage,
        status: planned.status,
        progress: planned.progress,
        stage_description: planned.stage_description.clone(),
        estimated_remaining_seconds: planned.estimated_remaining_seconds,
        ocr_confidence: planned.ocr_confidence.or(script.ocr_confidence),
        evaluation_confidence: planned.evaluation_confidence.or(script.evaluation_confidence),
        verification_confidence: planned.verification_confidence.or(script.verification_confidence),
        error: planned.error.clone().or_else(|| script.last_error.clone()),
        event_ts: planned.event_ts,
        timestamp: format_primitive(primitive_now_utc()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::event::ProcessingEvent;

    fn view(stage: ScriptStage, status: ScriptStatus, progress: i32, event_ts: i64) -> TransitionView {
        TransitionView { stage, status, progress, event_ts }
    }

    fn event_at(stage: ScriptStage, event_ts: i64) -> ProcessingEvent {
        let mut event = ProcessingEvent::stage_reached(stage);
        event.event_ts = event_ts;
        event
    }

    #[test]
    fn forward_transition_is_accepted() {
        let current = view(ScriptStage::Pending, ScriptStatus::Processing, 0, 10);
        let planned = plan_transition(&current, &event_at(ScriptStage::DatabaseConnected, 11))
            .expect("accepted");
        assert_eq!(planned.stage, ScriptStage::DatabaseConnected);
        assert_eq!(planned.progress, 5);
        assert_eq!(planned.event_ts, 11);
    }

    #[test]
    fn stale_timestamp_is_rejected_even_for_a_later_stage() {
        let current = view(ScriptStage::OcrCompleted, ScriptStatus::Processing, 40, 100);
        let result = plan_transition(&current, &event_at(ScriptStage::EvaluationCompleted, 100));
        assert_eq!(result.unwrap_err(), RejectReason::Stale);
        let result = plan_transition(&current, &event_at(ScriptStage::EvaluationCompleted, 99));
        assert_eq!(result.unwrap_err(), RejectReason::Stale);
    }

    #[test]
    fn stage_regression_is_rejected() {
        let current = view(ScriptStage::EvaluationCompleted, ScriptStatus::Processing, 70, 100);
        let result = plan_transition(&current, &event_at(ScriptStage::ImageValidated, 101));
        assert_eq!(result.unwrap_err(), RejectReason::StageRegression);
    }

    #[test]
    fn same_stage_with_newer_timestamp_is_accepted() {
        let current = view(ScriptStage::OcrCompleted, ScriptStatus::Processing, 40, 100);
        let event = event_at(ScriptStage::OcrCompleted, 101).with_ocr_confidence(0.9);
        let planned = plan_transition(&current, &event).expect("accepted");
        assert_eq!(planned.stage, ScriptStage::OcrCompleted);
        assert_eq!(planned.ocr_confidence, Some(0.9));
    }

    #[test]
    fn terminal_scripts_reject_everything() {
        let completed = view(ScriptStage::Completed, ScriptStatus::Completed, 100, 100);
        let result = plan_transition(&completed, &event_at(ScriptStage::Completed, 200));
        assert_eq!(result.unwrap_err(), RejectReason::Terminal);

        let failed = view(ScriptStage::OcrCompleted, ScriptStatus::Failed, 40, 100);
        let result = plan_transition(&failed, &event_at(ScriptStage::EvaluationCompleted, 200));
        assert_eq!(result.unwrap_err(), RejectReason::Terminal);
    }

    #[test]
    fn failure_keeps_stage_and_progress() {
        let current = view(ScriptStage::ImageValidated, ScriptStatus::Processing, 10, 100);
        let mut event = ProcessingEvent::failed(ScriptStage::ImageValidated, "vision timeout");
        event.event_ts = 101;
        let planned = plan_transition(&current, &event).expect("accepted");
        assert_eq!(planned.stage, ScriptStage::ImageValidated);
        assert_eq!(planned.status, ScriptStatus::Failed);
        assert_eq!(planned.progress, 10);
        assert_eq!(planned.estimated_remaining_seconds, None);
        assert_eq!(planned.error.as_deref(), Some("vision timeout"));
    }

    #[test]
    fn progress_never_decreases() {
        // Row already ahead of what the stage table says, e.g. after manual
        // correction; the event must not move it back.
        let current = view(ScriptStage::OcrCompleted, ScriptStatus::Processing, 80, 100);
        let planned = plan_transition(&current, &event_at(ScriptStage::EvaluationCompleted, 101))
            .expect("accepted");
        assert_eq!(planned.progress, 80);
    }

    #[test]
    fn reject_reasons_map_to_stable_metric_labels() {
        assert_eq!(RejectReason::UnknownScript.as_str(), "unknown_script");
        assert_eq!(RejectReason::Stale.as_str(), "stale");
        assert_eq!(RejectReason::Terminal.as_str(), "terminal");
        assert_eq!(RejectReason::StageRegression.as_str(), "stage_regression");
        assert_eq!(RejectReason::Contention.as_str(), "contention");
    }

    #[test]
    fn duplicate_completion_loses_to_the_first_terminal_write() {
        // Two workers racing the same script after a stale-claim release: the
        // second terminal event must bounce off the first one's row.
        let first = view(ScriptStage::Pending, ScriptStatus::Processing, 0, 0);
        let winner = plan_transition(&first, &event_at(ScriptStage::Completed, 500))
            .expect("accepted");
        let after = view(winner.stage, winner.status, winner.progress, winner.event_ts);
        let loser = plan_transition(&after, &event_at(ScriptStage::Completed, 600));
        assert_eq!(loser.unwrap_err(), RejectReason::Terminal);
    }

    #[test]
    fn out_of_order_delivery_converges_on_final_state() {
        // Apply ts=5 (later stage) first, then the straggler ts=3 is dropped.
        let start = view(ScriptStage::Pending, ScriptStatus::Processing, 0, 0);
        let later = plan_transition(&start, &event_at(ScriptStage::ImageValidated, 5))
            .expect("accepted");

        let after = view(later.stage, later.status, later.progress, later.event_ts);
        let straggler = plan_transition(&after, &event_at(ScriptStage::DatabaseConnected, 3));
        assert_eq!(straggler.unwrap_err(), RejectReason::Stale);
        assert_eq!(after.stage, ScriptStage::ImageValidated);
    }
}
