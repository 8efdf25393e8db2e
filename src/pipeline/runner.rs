use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use metrics::{counter, histogram};
use sqlx::PgPool;
use uuid::Uuid;

use crate::broadcast::message::SessionProgress;
use crate::broadcast::publisher::ProgressSink;
use crate::core::config::PipelineSettings;
use crate::core::time::{format_primitive, primitive_now_utc};
use crate::db::types::ScriptStage;
use crate::pipeline::event::ProcessingEvent;
use crate::pipeline::tracker::{ApplyOutcome, StageTracker};
use crate::pipeline::triage::{TriageEngine, TriageThresholds};
use crate::repositories::{evaluations, schemes, scripts, sessions};
use crate::services::{SemanticScoring, Verification, VisionExtraction};

const TEXT_PREVIEW_CHARS: usize = 200;

/// Runs one script through the whole pipeline: load, validate, extract,
/// score, verify, triage. Every stage boundary goes through the tracker, so
/// observers see the same order the database records.
pub(crate) struct PipelineRunner {
    db: PgPool,
    sink: Arc<dyn ProgressSink>,
    tracker: StageTracker,
    triage: TriageEngine,
    vision: Arc<dyn VisionExtraction>,
    scoring: Arc<dyn SemanticScoring>,
    verification: Arc<dyn Verification>,
}

impl PipelineRunner {
    pub(crate) fn new(
        db: PgPool,
        sink: Arc<dyn ProgressSink>,
        pipeline: &PipelineSettings,
        vision: Arc<dyn VisionExtraction>,
        scoring: Arc<dyn SemanticScoring>,
        verification: Arc<dyn Verification>,
    ) -> Self {
        let tracker = StageTracker::new(db.clone(), sink.clone());
        let triage = TriageEngine::new(db.clone(), TriageThresholds::from_settings(pipeline));
        Self { db, sink, tracker, triage, vision, scoring, verification }
    }

    /// Never returns an error to the caller: a failure is recorded against
    /// the script and the batch moves on.
    pub(crate) async fn process(&self, script_id: &str) {
        let timer = Instant::now();
        match self.run_pipeline(script_id).await {
            Ok(()) => {
                counter!("scripts_processed_total", "outcome" => "completed").increment(1);
            }
            Err(err) => {
                counter!("scripts_processed_total", "outcome" => "failed").increment(1);
                self.record_failure(script_id, &err).await;
            }
        }
        histogram!("script_processing_duration_seconds").record(timer.elapsed().as_secs_f64());
    }

    async fn run_pipeline(&self, script_id: &str) -> anyhow::Result<()> {
        let script = scripts::find_by_id(&self.db, script_id)
            .await?
            .with_context(|| format!("script {script_id} not found"))?;
        if script.status.is_terminal() {
            tracing::debug!(script_id = %script_id, "script already terminal, skipping");
            return Ok(());
        }

        let session = sessions::find_by_id(&self.db, &script.session_id)
            .await?
            .with_context(|| format!("session {} not found", script.session_id))?;
        let scheme = schemes::find_by_id(&self.db, &session.scheme_id)
            .await?
            .with_context(|| format!("marking scheme {} not found", session.scheme_id))?;

        self.tracker
            .apply(script_id, &ProcessingEvent::stage_reached(ScriptStage::DatabaseConnected))
            .await?;

        let image = tokio::fs::read(&script.image_path)
            .await
            .with_context(|| format!("failed to read script image {}", script.image_path))?;
        self.tracker
            .apply(
                script_id,
                &ProcessingEvent::stage_reached(ScriptStage::ImageValidated)
                    .with_detail("image_bytes", serde_json::json!(image.len())),
            )
            .await?;

        let extracted = self.vision.extract_text(&image, &script.file_name).await?;
        self.tracker
            .apply(
                script_id,
                &ProcessingEvent::stage_reached(ScriptStage::OcrCompleted)
                    .with_ocr_confidence(extracted.confidence)
                    .with_detail("text_preview", serde_json::json!(preview(&extracted.text))),
            )
            .await?;

        let scored = self.scoring.score_answers(&extracted.text, &scheme).await?;
        let evaluation_id = evaluations::create(
            &self.db,
            &evaluations::CreateEvaluationParams {
                id: Uuid::new_v4().to_string(),
                script_id: script.id.clone(),
                session_id: script.session_id.clone(),
                total_score: scored.total_score,
                max_score: scored.max_score,
                question_scores: scored.question_scores.clone(),
                now: primitive_now_utc(),
            },
        )
        .await?;
        self.tracker
            .apply(
                script_id,
                &ProcessingEvent::stage_reached(ScriptStage::EvaluationCompleted)
                    .with_evaluation_confidence(scored.confidence)
                    .with_detail("total_score", serde_json::json!(scored.total_score)),
            )
            .await?;

        let outcome = self.verification.verify(&extracted.text, &scored, &scheme).await?;
        evaluations::set_verification(&self.db, &evaluation_id, &outcome).await?;
        self.tracker
            .apply(
                script_id,
                &ProcessingEvent::stage_reached(ScriptStage::VerificationCompleted)
                    .with_verification_confidence(outcome.confidence)
                    .with_detail("verified", serde_json::json!(outcome.verified)),
            )
            .await?;

        // Triage against the row as it now stands, confidences included.
        let refreshed = scripts::find_by_id(&self.db, script_id)
            .await?
            .with_context(|| format!("script {script_id} disappeared mid-pipeline"))?;
        let evaluation = evaluations::find_by_script(&self.db, script_id).await?;
        self.triage
            .triage_script(&refreshed, evaluation.as_ref(), scheme.passing_marks)
            .await?;

        let outcome = self
            .tracker
            .apply(
                script_id,
                &ProcessingEvent::stage_reached(ScriptStage::Completed)
                    .with_detail("final_score", serde_json::json!(scored.total_score)),
            )
            .await?;

        // Two workers can race here after a stale-claim release; only the one
        // whose terminal event landed owns the session counters.
        if matches!(outcome, ApplyOutcome::Applied { .. }) {
            self.bookkeep_session(&script.session_id, false).await;
        }
        Ok(())
    }

    async fn record_failure(&self, script_id: &str, err: &anyhow::Error) {
        tracing::error!(script_id = %script_id, error = %err, "script processing failed");

        let script = match scripts::find_by_id(&self.db, script_id).await {
            Ok(Some(script)) => script,
            Ok(None) => return,
            Err(db_err) => {
                tracing::error!(script_id = %script_id, error = %db_err, "failed to load script for failure record");
                return;
            }
        };
        if script.status.is_terminal() {
            return;
        }

        let event = ProcessingEvent::failed(script.stage, format!("{err:#}"));
        match self.tracker.apply(script_id, &event).await {
            Ok(ApplyOutcome::Applied { .. }) => {}
            Ok(ApplyOutcome::Rejected(reason)) => {
                // Another writer already owns the terminal state; its
                // bookkeeping counts this script, not ours.
                tracing::debug!(script_id = %script_id, reason = reason.as_str(), "failure event rejected");
                return;
            }
            Err(apply_err) => {
                tracing::error!(script_id = %script_id, error = %apply_err, "failed to record failure");
                return;
            }
        }

        if let Ok(Some(failed_script)) = scripts::find_by_id(&self.db, script_id).await {
            if let Err(triage_err) = self.triage.triage_script(&failed_script, None, 0.0).await {
                tracing::error!(script_id = %script_id, error = %triage_err, "failed to triage failed script");
            }
        }

        self.bookkeep_session(&script.session_id, true).await;
    }

    async fn bookkeep_session(&self, session_id: &str, failed: bool) {
        let session = match sessions::record_script_outcome(&self.db, session_id, failed).await {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(err) => {
                tracing::error!(session_id = %session_id, error = %err, "failed to update session counters");
                return;
            }
        };

        let session =
            match sessions::finalize_if_done(&self.db, session_id, primitive_now_utc()).await {
                Ok(Some(finalized)) => finalized,
                Ok(None) => session,
                Err(err) => {
                    tracing::error!(session_id = %session_id, error = %err, "failed to finalize session");
                    session
                }
            };

        self.sink
            .session_update(&SessionProgress {
                session_id: session.id.clone(),
                status: session.status,
                total_scripts: session.total_scripts,
                processed_count: session.processed_count,
                failed_count: session.failed_count,
                timestamp: format_primitive(primitive_now_utc()),
            })
            .await;
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() <= TEXT_PREVIEW_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(TEXT_PREVIEW_CHARS).collect();
    format!("{truncated}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_not_truncated() {
        assert_eq!(preview("Q1: oxidation"), "Q1: oxidation");
    }

    #[test]
    fn long_text_is_cut_at_char_boundary() {
        let long = "ответ ".repeat(100);
        let cut = preview(&long);
        assert!(cut.chars().count() <= TEXT_PREVIEW_CHARS + 1);
        assert!(cut.ends_with('…'));
    }
}
