use axum::extract::{Multipart, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::DispatchMode;
use crate::broadcast::message::ScriptProgress;
use crate::pipeline::dispatch::{parse_student_info, FileOutcome, InlineResult};
use crate::pipeline::runner::PipelineRunner;
use crate::pipeline::tracker::progress_from_script;
use crate::repositories::{evaluations, scripts, sessions};
use crate::schemas::script::{BatchUploadResponse, ScriptResponse};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/batch", post(upload_batch))
        .route("/tasks/:task_id", get(get_by_task))
        .route("/:script_id", get(get_script))
        .route("/:script_id/snapshot", get(get_script_snapshot))
}

struct UploadedFile {
    file_name: String,
    bytes: Vec<u8>,
}

async fn upload_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<BatchUploadResponse>, ApiError> {
    let max_bytes = state.settings().storage().max_upload_size_mb * 1024 * 1024;
    let mut session_id: Option<String> = None;
    let mut files: Vec<Result<UploadedFile, FileOutcome>> = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Invalid multipart data".to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "session_id" {
            let text = field
                .text()
                .await
                .map_err(|_| ApiError::BadRequest("Invalid session_id field".to_string()))?;
            session_id = Some(text);
        } else if name == "files" {
            let file_name = field.file_name().unwrap_or("script.jpg").to_string();
            let mut bytes = Vec::new();
            let mut oversized = false;
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|_| ApiError::BadRequest("Failed to read file".to_string()))?
            {
                if bytes.len() as u64 + chunk.len() as u64 > max_bytes {
                    oversized = true;
                    // Keep draining so the rest of the batch still parses.
                    continue;
                }
                bytes.extend_from_slice(&chunk);
            }

            if oversized {
                files.push(Err(FileOutcome::Rejected {
                    file_name,
                    reason: format!(
                        "file exceeds {}MB limit",
                        state.settings().storage().max_upload_size_mb
                    ),
                }));
            } else {
                files.push(Ok(UploadedFile { file_name, bytes }));
            }
        }
    }

    let session_id =
        session_id.ok_or_else(|| ApiError::BadRequest("session_id is required".to_string()))?;
    if files.is_empty() {
        return Err(ApiError::BadRequest("at least one file is required".to_string()));
    }
    let max_files = state.settings().storage().max_files_per_batch as usize;
    if files.len() > max_files {
        return Err(ApiError::BadRequest(format!(
            "batch exceeds {max_files} files"
        )));
    }

    sessions::find_by_id(state.db(), &session_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load exam session"))?
        .ok_or_else(|| ApiError::NotFound(format!("Exam session {session_id} not found")))?;

    // One decision for the whole batch, recorded on every script.
    let dispatch_mode = DispatchMode::for_batch(
        files.len(),
        state.settings().pipeline().realtime_threshold,
    );

    let mut outcomes = Vec::with_capacity(files.len());
    let mut accepted_ids = Vec::new();
    for file in files {
        match file {
            Ok(upload) => match store_script(&state, &session_id, dispatch_mode, upload).await {
                Ok(outcome) => {
                    if let FileOutcome::Accepted { script_id, .. } = &outcome {
                        accepted_ids.push(script_id.clone());
                    }
                    outcomes.push(outcome);
                }
                Err(outcome) => outcomes.push(outcome),
            },
            Err(outcome) => outcomes.push(outcome),
        }
    }

    if !accepted_ids.is_empty() {
        sessions::add_scripts(state.db(), &session_id, accepted_ids.len() as i32)
            .await
            .map_err(|err| ApiError::internal(err, "Failed to update session totals"))?;
    }

    if dispatch_mode == DispatchMode::Inline {
        let runner = PipelineRunner::new(
            state.db().clone(),
            state.sink().clone(),
            state.settings().pipeline(),
            state.vision().clone(),
            state.scoring().clone(),
            state.verification().clone(),
        );
        // Files are processed one at a time; a failure is recorded against
        // its script and the rest of the batch continues.
        for script_id in &accepted_ids {
            runner.process(script_id).await;
        }
        attach_inline_results(&state, &mut outcomes).await?;
    }

    let accepted = accepted_ids.len();
    Ok(Json(BatchUploadResponse {
        session_id,
        dispatch_mode,
        accepted,
        rejected: outcomes.len() - accepted,
        files: outcomes,
    }))
}

async fn store_script(
    state: &AppState,
    session_id: &str,
    dispatch_mode: DispatchMode,
    upload: UploadedFile,
) -> Result<FileOutcome, FileOutcome> {
    let rejected = |reason: String| FileOutcome::Rejected {
        file_name: upload.file_name.clone(),
        reason,
    };

    let extension = upload
        .file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if !state.settings().storage().allowed_image_extensions.contains(&extension) {
        return Err(rejected(format!("unsupported extension .{extension}")));
    }
    if upload.bytes.is_empty() {
        return Err(rejected("empty file".to_string()));
    }

    let script_id = Uuid::new_v4().to_string();
    let task_id = Uuid::new_v4().to_string();
    let file_hash = hex::encode(Sha256::digest(&upload.bytes));
    let (student_name, student_id) = parse_student_info(&upload.file_name);

    let dir = format!("{}/{}", state.settings().storage().upload_dir, session_id);
    if let Err(err) = tokio::fs::create_dir_all(&dir).await {
        tracing::error!(error = %err, "failed to create upload directory");
        return Err(rejected("storage unavailable".to_string()));
    }
    let image_path = format!("{dir}/{script_id}_{}", sanitized_filename(&upload.file_name));
    if let Err(err) = tokio::fs::write(&image_path, &upload.bytes).await {
        tracing::error!(error = %err, "failed to store upload");
        return Err(rejected("storage unavailable".to_string()));
    }

    let params = scripts::CreateScriptParams {
        id: script_id.clone(),
        session_id: session_id.to_string(),
        student_name,
        student_id,
        file_name: upload.file_name.clone(),
        image_path,
        file_hash: Some(file_hash),
        dispatch_mode,
        task_id: task_id.clone(),
        now: primitive_now_utc(),
    };
    if let Err(err) = scripts::create(state.db(), &params).await {
        tracing::error!(error = %err, "failed to insert script");
        return Err(rejected("failed to register script".to_string()));
    }

    Ok(FileOutcome::Accepted { file_name: upload.file_name, script_id, task_id, result: None })
}

/// Inline batches answer with each file's terminal state; without it the
/// response would be indistinguishable from a queued one.
async fn attach_inline_results(
    state: &AppState,
    outcomes: &mut [FileOutcome],
) -> Result<(), ApiError> {
    for outcome in outcomes.iter_mut() {
        let FileOutcome::Accepted { script_id, result, .. } = outcome else {
            continue;
        };

        let script = scripts::find_by_id(state.db(), script_id)
            .await
            .map_err(|err| ApiError::internal(err, "Failed to load processed script"))?
            .ok_or_else(|| ApiError::Internal("Script vanished after processing".to_string()))?;
        let evaluation = evaluations::find_by_script(state.db(), script_id)
            .await
            .map_err(|err| ApiError::internal(err, "Failed to load evaluation"))?;

        *result = Some(InlineResult {
            status: script.status,
            stage: script.stage,
            progress: script.progress,
            total_score: evaluation.as_ref().map(|evaluation| evaluation.total_score),
            max_score: evaluation.as_ref().map(|evaluation| evaluation.max_score),
            error: script.last_error,
        });
    }
    Ok(())
}

fn sanitized_filename(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

async fn get_script(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
) -> Result<Json<ScriptResponse>, ApiError> {
    let script = scripts::find_by_id(state.db(), &script_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load script"))?
        .ok_or_else(|| ApiError::NotFound(format!("Script {script_id} not found")))?;

    Ok(Json(ScriptResponse::from_model(script)))
}

/// Current state of a script in the same shape the progress channel pushes.
/// Reconnecting observers pull this to cover the window they missed.
async fn get_script_snapshot(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
) -> Result<Json<ScriptProgress>, ApiError> {
    let script = scripts::find_by_id(state.db(), &script_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load script"))?
        .ok_or_else(|| ApiError::NotFound(format!("Script {script_id} not found")))?;

    Ok(Json(progress_from_script(&script)))
}

async fn get_by_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ScriptResponse>, ApiError> {
    let script = scripts::find_by_task_id(state.db(), &task_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load script"))?
        .ok_or_else(|| ApiError::NotFound(format!("Task {task_id} not found")))?;

    Ok(Json(ScriptResponse::from_model(script)))
}

#[cfg(test)]
mod tests {
    use super::sanitized_filename;

    #[test]
    fn sanitized_filename_keeps_safe_chars() {
        assert_eq!(sanitized_filename("John_Doe_123.jpg"), "John_Doe_123.jpg");
        assert_eq!(sanitized_filename("экзамен №1.png"), "_________1.png");
        assert_eq!(sanitized_filename("../../etc/passwd"), ".._.._etc_passwd");
    }
}
