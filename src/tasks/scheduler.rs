use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::pipeline::runner::PipelineRunner;
use crate::repositories::scripts;

const IDLE_POLL_SECONDS: u64 = 1;

pub(crate) async fn run(state: AppState) -> Result<()> {
    let concurrency = state.settings().pipeline().worker_concurrency;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(concurrency + 1);
    for _ in 0..concurrency {
        handles.push(tokio::spawn(pipeline_worker(state.clone(), shutdown_rx.clone())));
    }
    handles.push(tokio::spawn(recover_stale_claims_loop(state.clone(), shutdown_rx.clone())));

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn pipeline_worker(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let runner = PipelineRunner::new(
        state.db().clone(),
        state.sink().clone(),
        state.settings().pipeline(),
        state.vision().clone(),
        state.scoring().clone(),
        state.verification().clone(),
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        match scripts::claim_next_queued(state.db(), primitive_now_utc()).await {
            Ok(Some(script_id)) => {
                runner.process(&script_id).await;
                continue;
            }
            Ok(None) => {}
            Err(err) => tracing::error!(error = %err, "Failed to claim queued script"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(Duration::from_secs(IDLE_POLL_SECONDS)) => {}
        }
    }
}

/// A worker that dies mid-script leaves its claim behind. Claims older than
/// the configured cutoff are released so another worker can pick the script
/// back up; re-running is safe because stage updates carry timestamps and
/// stale ones are rejected.
async fn recover_stale_claims_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let stale_after = Duration::from_secs(state.settings().pipeline().stale_claim_seconds);
    let mut tick = interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                let cutoff = primitive_now_utc()
                    - time::Duration::seconds(stale_after.as_secs() as i64);
                match scripts::recover_stale_claims(state.db(), cutoff).await {
                    Ok(released) if !released.is_empty() => {
                        tracing::warn!(count = released.len(), "released stale script claims");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!(error = %err, "recover_stale_claims failed"),
                }
            }
        }
    }
}
