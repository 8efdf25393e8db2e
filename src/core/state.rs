use std::sync::Arc;

use sqlx::PgPool;

use crate::broadcast::hub::ProgressHub;
use crate::broadcast::publisher::ProgressSink;
use crate::core::{config::Settings, redis::RedisHandle};
use crate::services::{SemanticScoring, Verification, VisionExtraction};

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    hub: ProgressHub,
    sink: Arc<dyn ProgressSink>,
    vision: Arc<dyn VisionExtraction>,
    scoring: Arc<dyn SemanticScoring>,
    verification: Arc<dyn Verification>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        hub: ProgressHub,
        sink: Arc<dyn ProgressSink>,
        vision: Arc<dyn VisionExtraction>,
        scoring: Arc<dyn SemanticScoring>,
        verification: Arc<dyn Verification>,
    ) -> Self {
        Self {
            inner: Arc::new(InnerState {
                settings,
                db,
                redis,
                hub,
                sink,
                vision,
                scoring,
                verification,
            }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn hub(&self) -> &ProgressHub {
        &self.inner.hub
    }

    pub(crate) fn sink(&self) -> &Arc<dyn ProgressSink> {
        &self.inner.sink
    }

    pub(crate) fn vision(&self) -> &Arc<dyn VisionExtraction> {
        &self.inner.vision
    }

    pub(crate) fn scoring(&self) -> &Arc<dyn SemanticScoring> {
        &self.inner.scoring
    }

    pub(crate) fn verification(&self) -> &Arc<dyn Verification> {
        &self.inner.verification
    }
}
