use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use metrics::counter;
use tokio::sync::watch;

use crate::broadcast::hub::ProgressHub;
use crate::broadcast::message::{ScriptProgress, SessionProgress, WsMessage};
use crate::core::redis::RedisHandle;

const BRIDGE_RETRY: Duration = Duration::from_secs(3);

/// Where pipeline progress events go. Delivery is best-effort: a slow or
/// absent observer never blocks or fails script processing.
#[async_trait]
pub(crate) trait ProgressSink: Send + Sync {
    async fn script_update(&self, progress: &ScriptProgress);
    async fn session_update(&self, progress: &SessionProgress);
}

/// Direct in-process delivery. Used by the API binary, where the hub and the
/// pipeline share an address space.
pub(crate) struct HubSink {
    hub: ProgressHub,
}

impl HubSink {
    pub(crate) fn new(hub: ProgressHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl ProgressSink for HubSink {
    async fn script_update(&self, progress: &ScriptProgress) {
        counter!("progress_events_published_total", "kind" => "script").increment(1);
        self.hub.publish_script_update(progress);
    }

    async fn session_update(&self, progress: &SessionProgress) {
        counter!("progress_events_published_total", "kind" => "session").increment(1);
        self.hub.publish_session_update(progress);
    }
}

/// Cross-process delivery. The worker binary publishes updates to a Redis
/// channel; the API binary runs [`run_redis_bridge`] to feed them into its hub.
pub(crate) struct RedisSink {
    redis: RedisHandle,
    channel: String,
}

impl RedisSink {
    pub(crate) fn new(redis: RedisHandle, channel: String) -> Self {
        Self { redis, channel }
    }

    async fn publish(&self, message: &WsMessage) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode progress event");
                return;
            }
        };

        if let Err(err) = self.redis.publish(&self.channel, &payload).await {
            counter!("progress_publish_failures_total").increment(1);
            tracing::warn!(error = %err, channel = %self.channel, "progress publish failed");
        } else {
            counter!("progress_events_published_total", "kind" => "redis").increment(1);
        }
    }
}

#[async_trait]
impl ProgressSink for RedisSink {
    async fn script_update(&self, progress: &ScriptProgress) {
        self.publish(&WsMessage::ScriptUpdate(progress.clone())).await;
    }

    async fn session_update(&self, progress: &SessionProgress) {
        self.publish(&WsMessage::SessionUpdate(progress.clone())).await;
    }
}

/// Subscribes to the progress channel and routes worker-published updates into
/// the local hub. Reconnects on subscription loss until shutdown is signalled.
pub(crate) async fn run_redis_bridge(
    redis: RedisHandle,
    channel: String,
    hub: ProgressHub,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let mut pubsub = match redis.pubsub(&channel).await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                tracing::warn!(error = %err, channel = %channel, "progress bridge connect failed");
                tokio::select! {
                    _ = tokio::time::sleep(BRIDGE_RETRY) => continue,
                    _ = shutdown.changed() => return,
                }
            }
        };

        tracing::info!(channel = %channel, "progress bridge subscribed");
        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                message = stream.next() => {
                    let Some(message) = message else {
                        tracing::warn!(channel = %channel, "progress bridge stream ended");
                        break;
                    };
                    let payload: String = match message.get_payload() {
                        Ok(payload) => payload,
                        Err(err) => {
                            tracing::warn!(error = %err, "progress bridge payload not utf-8");
                            continue;
                        }
                    };
                    dispatch_bridge_payload(&hub, &payload);
                }
                _ = shutdown.changed() => return,
            }
        }
    }
}

fn dispatch_bridge_payload(hub: &ProgressHub, payload: &str) {
    match serde_json::from_str::<WsMessage>(payload) {
        Ok(WsMessage::ScriptUpdate(progress)) => hub.publish_script_update(&progress),
        Ok(WsMessage::SessionUpdate(progress)) => hub.publish_session_update(&progress),
        Ok(_) => {}
        Err(err) => {
            counter!("progress_bridge_decode_failures_total").increment(1);
            tracing::warn!(error = %err, "progress bridge dropped undecodable event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::{ScriptStage, ScriptStatus, SessionStatus};

    fn progress() -> ScriptProgress {
        ScriptProgress {
            script_id: "script-1".to_string(),
            session_id: "session-1".to_string(),
            stage: ScriptStage::Completed,
            status: ScriptStatus::Completed,
            progress: 100,
            stage_description: ScriptStage::Completed.description().to_string(),
            estimated_remaining_seconds: None,
            ocr_confidence: Some(0.95),
            evaluation_confidence: Some(0.9),
            verification_confidence: Some(0.88),
            error: None,
            event_ts: 10,
            timestamp: "2025-01-02T10:20:30Z".to_string(),
        }
    }

    #[tokio::test]
    async fn hub_sink_delivers_to_subscribers() {
        let hub = ProgressHub::new();
        let (conn, mut rx) = hub.register();
        hub.subscribe_script(conn, "script-1");

        let sink = HubSink::new(hub);
        sink.script_update(&progress()).await;

        assert!(matches!(rx.try_recv(), Ok(WsMessage::ScriptUpdate(_))));
    }

    #[tokio::test]
    async fn bridge_payload_routes_script_updates() {
        let hub = ProgressHub::new();
        let (conn, mut rx) = hub.register();
        hub.subscribe_session(conn, "session-1");

        let payload = serde_json::to_string(&WsMessage::ScriptUpdate(progress())).unwrap();
        dispatch_bridge_payload(&hub, &payload);

        assert!(matches!(rx.try_recv(), Ok(WsMessage::ScriptUpdate(_))));
    }

    #[tokio::test]
    async fn bridge_payload_routes_session_updates() {
        let hub = ProgressHub::new();
        let (conn, mut rx) = hub.register();
        hub.subscribe_session(conn, "session-1");

        let update = WsMessage::SessionUpdate(SessionProgress {
            session_id: "session-1".to_string(),
            status: SessionStatus::Completed,
            total_scripts: 2,
            processed_count: 2,
            failed_count: 0,
            timestamp: "2025-01-02T10:20:30Z".to_string(),
        });
        dispatch_bridge_payload(&hub, &serde_json::to_string(&update).unwrap());

        assert!(matches!(rx.try_recv(), Ok(WsMessage::SessionUpdate(_))));
    }

    #[tokio::test]
    async fn bridge_drops_garbage_without_panicking() {
        let hub = ProgressHub::new();
        dispatch_bridge_payload(&hub, "not json");
        dispatch_bridge_payload(&hub, r#"{"type":"unknown_kind"}"#);
    }
}
