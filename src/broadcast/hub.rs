use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::broadcast::message::{ScriptProgress, SessionProgress, WsMessage};

pub(crate) type ConnId = u64;

/// In-process fan-out registry. Observers register a connection, subscribe to
/// script or session ids, and receive updates over an unbounded channel. A
/// script update goes to the union of that script's subscribers and its owning
/// session's subscribers, each connection at most once.
#[derive(Clone, Default)]
pub(crate) struct ProgressHub {
    state: Arc<Mutex<HubState>>,
}

#[derive(Default)]
struct HubState {
    next_id: ConnId,
    connections: HashMap<ConnId, mpsc::UnboundedSender<WsMessage>>,
    script_subs: HashMap<String, HashSet<ConnId>>,
    session_subs: HashMap<String, HashSet<ConnId>>,
    conn_scripts: HashMap<ConnId, HashSet<String>>,
    conn_sessions: HashMap<ConnId, HashSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HubStats {
    pub(crate) connections: usize,
    pub(crate) script_subscriptions: usize,
    pub(crate) session_subscriptions: usize,
}

impl ProgressHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self) -> (ConnId, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        state.next_id += 1;
        let id = state.next_id;
        state.connections.insert(id, tx);
        (id, rx)
    }

    pub(crate) fn unregister(&self, conn_id: ConnId) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        state.remove_connection(conn_id);
    }

    pub(crate) fn subscribe_script(&self, conn_id: ConnId, script_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        if !state.connections.contains_key(&conn_id) {
            return;
        }
        state.script_subs.entry(script_id.to_string()).or_default().insert(conn_id);
        state.conn_scripts.entry(conn_id).or_default().insert(script_id.to_string());
    }

    pub(crate) fn unsubscribe_script(&self, conn_id: ConnId, script_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(subs) = state.script_subs.get_mut(script_id) {
            subs.remove(&conn_id);
            if subs.is_empty() {
                state.script_subs.remove(script_id);
            }
        }
        if let Some(scripts) = state.conn_scripts.get_mut(&conn_id) {
            scripts.remove(script_id);
        }
    }

    pub(crate) fn subscribe_session(&self, conn_id: ConnId, session_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        if !state.connections.contains_key(&conn_id) {
            return;
        }
        state.session_subs.entry(session_id.to_string()).or_default().insert(conn_id);
        state.conn_sessions.entry(conn_id).or_default().insert(session_id.to_string());
    }

    pub(crate) fn unsubscribe_session(&self, conn_id: ConnId, session_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(subs) = state.session_subs.get_mut(session_id) {
            subs.remove(&conn_id);
            if subs.is_empty() {
                state.session_subs.remove(session_id);
            }
        }
        if let Some(sessions) = state.conn_sessions.get_mut(&conn_id) {
            sessions.remove(session_id);
        }
    }

    pub(crate) fn publish_script_update(&self, progress: &ScriptProgress) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

        let mut targets: HashSet<ConnId> = HashSet::new();
        if let Some(subs) = state.script_subs.get(&progress.script_id) {
            targets.extend(subs.iter().copied());
        }
        if let Some(subs) = state.session_subs.get(&progress.session_id) {
            targets.extend(subs.iter().copied());
        }

        let message = WsMessage::ScriptUpdate(progress.clone());
        state.deliver(&targets, &message);
    }

    pub(crate) fn publish_session_update(&self, progress: &SessionProgress) {
        let mut state = self.state.lock().unwrap_or_else(|err| err.into_inner());

        let targets: HashSet<ConnId> = state
            .session_subs
            .get(&progress.session_id)
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default();

        let message = WsMessage::SessionUpdate(progress.clone());
        state.deliver(&targets, &message);
    }

    pub(crate) fn stats(&self) -> HubStats {
        let state = self.state.lock().unwrap_or_else(|err| err.into_inner());
        HubStats {
            connections: state.connections.len(),
            script_subscriptions: state.script_subs.values().map(HashSet::len).sum(),
            session_subscriptions: state.session_subs.values().map(HashSet::len).sum(),
        }
    }
}

impl HubState {
    fn deliver(&mut self, targets: &HashSet<ConnId>, message: &WsMessage) {
        let mut dead: Vec<ConnId> = Vec::new();
        for conn_id in targets {
            match self.connections.get(conn_id) {
                Some(tx) if tx.send(message.clone()).is_ok() => {}
                Some(_) => dead.push(*conn_id),
                None => {}
            }
        }
        for conn_id in dead {
            self.remove_connection(conn_id);
        }
    }

    fn remove_connection(&mut self, conn_id: ConnId) {
        self.connections.remove(&conn_id);
        if let Some(scripts) = self.conn_scripts.remove(&conn_id) {
            for script_id in scripts {
                if let Some(subs) = self.script_subs.get_mut(&script_id) {
                    subs.remove(&conn_id);
                    if subs.is_empty() {
                        self.script_subs.remove(&script_id);
                    }
                }
            }
        }
        if let Some(sessions) = self.conn_sessions.remove(&conn_id) {
            for session_id in sessions {
                if let Some(subs) = self.session_subs.get_mut(&session_id) {
                    subs.remove(&conn_id);
                    if subs.is_empty() {
                        self.session_subs.remove(&session_id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::{ScriptStage, ScriptStatus, SessionStatus};

    fn sample_script_progress(script_id: &str, session_id: &str) -> ScriptProgress {
        ScriptProgress {
            script_id: script_id.to_string(),
            session_id: session_id.to_string(),
            stage: ScriptStage::OcrCompleted,
            status: ScriptStatus::Processing,
            progress: 40,
            stage_description: ScriptStage::OcrCompleted.description().to_string(),
            estimated_remaining_seconds: Some(20.0),
            ocr_confidence: Some(0.9),
            evaluation_confidence: None,
            verification_confidence: None,
            error: None,
            event_ts: 1,
            timestamp: "2025-01-02T10:20:30Z".to_string(),
        }
    }

    #[tokio::test]
    async fn script_update_reaches_script_and_session_subscribers() {
        let hub = ProgressHub::new();
        let (script_conn, mut script_rx) = hub.register();
        let (session_conn, mut session_rx) = hub.register();
        hub.subscribe_script(script_conn, "script-1");
        hub.subscribe_session(session_conn, "session-1");

        hub.publish_script_update(&sample_script_progress("script-1", "session-1"));

        assert!(matches!(script_rx.try_recv(), Ok(WsMessage::ScriptUpdate(_))));
        assert!(matches!(session_rx.try_recv(), Ok(WsMessage::ScriptUpdate(_))));
    }

    #[tokio::test]
    async fn double_subscriber_receives_update_once() {
        let hub = ProgressHub::new();
        let (conn, mut rx) = hub.register();
        hub.subscribe_script(conn, "script-1");
        hub.subscribe_session(conn, "session-1");

        hub.publish_script_update(&sample_script_progress("script-1", "session-1"));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn session_update_skips_script_only_subscribers() {
        let hub = ProgressHub::new();
        let (conn, mut rx) = hub.register();
        hub.subscribe_script(conn, "script-1");

        hub.publish_session_update(&SessionProgress {
            session_id: "session-1".to_string(),
            status: SessionStatus::Processing,
            total_scripts: 3,
            processed_count: 1,
            failed_count: 0,
            timestamp: "2025-01-02T10:20:30Z".to_string(),
        });

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_delivery() {
        let hub = ProgressHub::new();
        let (conn, rx) = hub.register();
        hub.subscribe_script(conn, "script-1");
        drop(rx);

        hub.publish_script_update(&sample_script_progress("script-1", "session-1"));

        let stats = hub.stats();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.script_subscriptions, 0);
    }

    #[tokio::test]
    async fn unregister_clears_subscriptions() {
        let hub = ProgressHub::new();
        let (conn, _rx) = hub.register();
        hub.subscribe_script(conn, "script-1");
        hub.subscribe_session(conn, "session-1");

        hub.unregister(conn);

        let stats = hub.stats();
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.script_subscriptions, 0);
        assert_eq!(stats.session_subscriptions, 0);
    }
}
