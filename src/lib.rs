pub(crate) mod api;
pub mod broadcast;
pub(crate) mod core;
pub mod db;
pub(crate) mod pipeline;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

use std::sync::Arc;

use tokio::sync::watch;

use crate::broadcast::hub::ProgressHub;
use crate::broadcast::publisher::{run_redis_bridge, HubSink, ProgressSink, RedisSink};
use crate::core::{config::Settings, redis::RedisHandle, state::AppState, telemetry};
use crate::services::{
    scoring::ScoringClient, verification::VerificationClient, vision::VisionClient,
};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; worker progress will not reach this process");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let hub = ProgressHub::new();
    // Inline pipelines publish straight into the hub; the bridge below pulls
    // in events the worker binary publishes over Redis.
    let sink: Arc<dyn ProgressSink> = Arc::new(HubSink::new(hub.clone()));
    let (bridge_shutdown_tx, bridge_shutdown_rx) = watch::channel(false);
    let bridge = tokio::spawn(run_redis_bridge(
        redis.clone(),
        settings.redis().progress_channel.clone(),
        hub.clone(),
        bridge_shutdown_rx,
    ));

    let vision = Arc::new(VisionClient::from_settings(&settings)?);
    let scoring = Arc::new(ScoringClient::from_settings(&settings)?);
    let verification = Arc::new(VerificationClient::from_settings(&settings)?);

    let state =
        AppState::new(settings, db_pool, redis.clone(), hub, sink, vision, scoring, verification);

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Scriptgrade API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    if bridge_shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to signal progress bridge shutdown");
    }
    if let Err(err) = bridge.await {
        tracing::error!(error = %err, "Progress bridge join failed");
    }

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

pub async fn run_worker() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; progress events will be dropped");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let hub = ProgressHub::new();
    let sink: Arc<dyn ProgressSink> =
        Arc::new(RedisSink::new(redis.clone(), settings.redis().progress_channel.clone()));

    let vision = Arc::new(VisionClient::from_settings(&settings)?);
    let scoring = Arc::new(ScoringClient::from_settings(&settings)?);
    let verification = Arc::new(VerificationClient::from_settings(&settings)?);

    let state =
        AppState::new(settings, db_pool, redis.clone(), hub, sink, vision, scoring, verification);

    tracing::info!(
        environment = %state.settings().runtime().environment.as_str(),
        concurrency = state.settings().pipeline().worker_concurrency,
        "Scriptgrade worker starting"
    );

    let result = tasks::scheduler::run(state).await;

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}
