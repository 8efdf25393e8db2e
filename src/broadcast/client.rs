use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio::sync::{mpsc, watch};

use crate::broadcast::message::{ClientMessage, ScriptProgress, WsMessage};

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Dials the progress endpoint. Behind a trait so the manager's reconnect and
/// reconciliation behaviour is testable without a live server.
#[async_trait]
pub trait ObserverTransport: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Box<dyn ObserverConnection>>;
}

#[async_trait]
pub trait ObserverConnection: Send {
    async fn send(&mut self, message: &ClientMessage) -> anyhow::Result<()>;
    /// `Ok(None)` means the server closed the connection.
    async fn recv(&mut self) -> anyhow::Result<Option<WsMessage>>;
}

/// Pulls the current state of a script, used to close the gap between a
/// disconnect and the resubscribe that follows it.
#[async_trait]
pub trait SnapshotFetch: Send + Sync {
    async fn script_snapshot(&self, script_id: &str) -> anyhow::Result<Option<ScriptProgress>>;
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    SubscribeScript(String),
    UnsubscribeScript(String),
    SubscribeSession(String),
    UnsubscribeSession(String),
}

/// Client-side connection manager: keeps one live connection to the progress
/// channel, retries on a fixed delay, replays subscriptions after reconnect
/// and reconciles missed script updates through snapshot pulls.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
}

pub struct ConnectionManagerTask {
    transport: Box<dyn ObserverTransport>,
    snapshots: Box<dyn SnapshotFetch>,
    commands: mpsc::UnboundedReceiver<Command>,
    updates: mpsc::UnboundedSender<WsMessage>,
    script_subs: HashSet<String>,
    session_subs: HashSet<String>,
}

impl ConnectionManager {
    pub fn new(
        transport: Box<dyn ObserverTransport>,
        snapshots: Box<dyn SnapshotFetch>,
    ) -> (Self, ConnectionManagerTask, mpsc::UnboundedReceiver<WsMessage>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let manager = Self { commands: command_tx };
        let task = ConnectionManagerTask {
            transport,
            snapshots,
            commands: command_rx,
            updates: update_tx,
            script_subs: HashSet::new(),
            session_subs: HashSet::new(),
        };
        (manager, task, update_rx)
    }

    pub fn subscribe_script(&self, script_id: &str) {
        let _ = self.commands.send(Command::SubscribeScript(script_id.to_string()));
    }

    pub fn unsubscribe_script(&self, script_id: &str) {
        let _ = self.commands.send(Command::UnsubscribeScript(script_id.to_string()));
    }

    pub fn subscribe_session(&self, session_id: &str) {
        let _ = self.commands.send(Command::SubscribeSession(session_id.to_string()));
    }

    pub fn unsubscribe_session(&self, session_id: &str) {
        let _ = self.commands.send(Command::UnsubscribeSession(session_id.to_string()));
    }
}

impl ConnectionManagerTask {
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut first_attempt = true;
        loop {
            if *shutdown.borrow() {
                return;
            }

            let connection = match self.transport.connect().await {
                Ok(connection) => connection,
                Err(err) => {
                    tracing::warn!(error = %err, "progress connection failed");
                    counter!("observer_connect_failures_total").increment(1);
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                        _ = shutdown.changed() => return,
                    }
                }
            };

            if !first_attempt {
                counter!("observer_reconnects_total").increment(1);
            }

            match self.serve_connection(connection, &mut shutdown, first_attempt).await {
                ServeEnd::Shutdown => return,
                ServeEnd::Disconnected => {
                    first_attempt = false;
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        _ = shutdown.changed() => return,
                    }
                }
            }
        }
    }

    async fn serve_connection(
        &mut self,
        mut connection: Box<dyn ObserverConnection>,
        shutdown: &mut watch::Receiver<bool>,
        first_attempt: bool,
    ) -> ServeEnd {
        for script_id in self.script_subs.clone() {
            if connection
                .send(&ClientMessage::SubscribeScript { script_id: script_id.clone() })
                .await
                .is_err()
            {
                return ServeEnd::Disconnected;
            }
        }
        for session_id in self.session_subs.clone() {
            if connection
                .send(&ClientMessage::SubscribeSession { session_id: session_id.clone() })
                .await
                .is_err()
            {
                return ServeEnd::Disconnected;
            }
        }

        // Anything that happened while we were disconnected is gone from the
        // live stream; a snapshot pull per subscribed script closes the gap.
        if !first_attempt {
            for script_id in self.script_subs.clone() {
                match self.snapshots.script_snapshot(&script_id).await {
                    Ok(Some(progress)) => {
                        let _ = self.updates.send(WsMessage::ScriptUpdate(progress));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, script_id = %script_id, "snapshot pull failed");
                    }
                }
            }
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return ServeEnd::Shutdown;
                    };
                    if self.apply_command(&mut connection, command).await.is_err() {
                        return ServeEnd::Disconnected;
                    }
                }
                incoming = connection.recv() => {
                    match incoming {
                        Ok(Some(message)) => {
                            let _ = self.updates.send(message);
                        }
                        Ok(None) | Err(_) => return ServeEnd::Disconnected,
                    }
                }
                _ = shutdown.changed() => return ServeEnd::Shutdown,
            }
        }
    }

    async fn apply_command(
        &mut self,
        connection: &mut Box<dyn ObserverConnection>,
        command: Command,
    ) -> anyhow::Result<()> {
        match command {
            Command::SubscribeScript(script_id) => {
                self.script_subs.insert(script_id.clone());
                connection.send(&ClientMessage::SubscribeScript { script_id }).await
            }
            Command::UnsubscribeScript(script_id) => {
                self.script_subs.remove(&script_id);
                connection.send(&ClientMessage::UnsubscribeScript { script_id }).await
            }
            Command::SubscribeSession(session_id) => {
                self.session_subs.insert(session_id.clone());
                connection.send(&ClientMessage::SubscribeSession { session_id }).await
            }
            Command::UnsubscribeSession(session_id) => {
                self.session_subs.remove(&session_id);
                connection.send(&ClientMessage::UnsubscribeSession { session_id }).await
            }
        }
    }
}

enum ServeEnd {
    Shutdown,
    Disconnected,
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::db::types::{ScriptStage, ScriptStatus};

    struct MockConnection {
        incoming: mpsc::UnboundedReceiver<WsMessage>,
        sent: mpsc::UnboundedSender<ClientMessage>,
    }

    #[async_trait]
    impl ObserverConnection for MockConnection {
        async fn send(&mut self, message: &ClientMessage) -> anyhow::Result<()> {
            self.sent
                .send(message.clone())
                .map_err(|_| anyhow::anyhow!("connection closed"))
        }

        async fn recv(&mut self) -> anyhow::Result<Option<WsMessage>> {
            Ok(self.incoming.recv().await)
        }
    }

    type ConnectResult = anyhow::Result<Box<dyn ObserverConnection>>;

    struct ScriptedTransport {
        connections: Arc<Mutex<VecDeque<ConnectResult>>>,
    }

    #[async_trait]
    impl ObserverTransport for ScriptedTransport {
        async fn connect(&self) -> ConnectResult {
            let next = self.connections.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => {
                    // No more scripted connections: park forever.
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    struct FixedSnapshots {
        progress: Option<ScriptProgress>,
        pulls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SnapshotFetch for FixedSnapshots {
        async fn script_snapshot(&self, script_id: &str) -> anyhow::Result<Option<ScriptProgress>> {
            self.pulls.lock().unwrap().push(script_id.to_string());
            Ok(self.progress.clone())
        }
    }

    fn sample_progress(stage: ScriptStage) -> ScriptProgress {
        ScriptProgress {
            script_id: "script-1".to_string(),
            session_id: "session-1".to_string(),
            stage,
            status: ScriptStatus::Processing,
            progress: stage.progress(),
            stage_description: stage.description().to_string(),
            estimated_remaining_seconds: stage.estimated_remaining_seconds(),
            ocr_confidence: None,
            evaluation_confidence: None,
            verification_confidence: None,
            error: None,
            event_ts: 1,
            timestamp: "2025-01-02T10:20:30Z".to_string(),
        }
    }

    fn mock_connection() -> (
        ConnectResult,
        mpsc::UnboundedSender<WsMessage>,
        mpsc::UnboundedReceiver<ClientMessage>,
    ) {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let connection: Box<dyn ObserverConnection> =
            Box::new(MockConnection { incoming: incoming_rx, sent: sent_tx });
        (Ok(connection), incoming_tx, sent_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_updates_from_live_connection() {
        let (conn, incoming, _sent) = mock_connection();
        let transport = ScriptedTransport {
            connections: Arc::new(Mutex::new(VecDeque::from([conn]))),
        };
        let snapshots = FixedSnapshots { progress: None, pulls: Arc::new(Mutex::new(vec![])) };

        let (manager, task, mut updates) =
            ConnectionManager::new(Box::new(transport), Box::new(snapshots));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(task.run(shutdown_rx));

        manager.subscribe_script("script-1");
        incoming.send(WsMessage::ScriptUpdate(sample_progress(ScriptStage::OcrCompleted))).unwrap();

        let received = updates.recv().await.unwrap();
        assert!(matches!(received, WsMessage::ScriptUpdate(_)));
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_failed_connect_and_resubscribes() {
        let (conn, _incoming, mut sent) = mock_connection();
        let transport = ScriptedTransport {
            connections: Arc::new(Mutex::new(VecDeque::from([
                Err(anyhow::anyhow!("refused")),
                conn,
            ]))),
        };
        let snapshots = FixedSnapshots { progress: None, pulls: Arc::new(Mutex::new(vec![])) };

        let (manager, task, _updates) =
            ConnectionManager::new(Box::new(transport), Box::new(snapshots));
        manager.subscribe_script("script-1");
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(task.run(shutdown_rx));

        // First command lands on the second (successful) connection.
        let first = sent.recv().await.unwrap();
        assert_eq!(first, ClientMessage::SubscribeScript { script_id: "script-1".to_string() });
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replays_subscriptions_and_pulls_snapshot() {
        let (first_conn, first_incoming, _first_sent) = mock_connection();
        let (second_conn, _second_incoming, mut second_sent) = mock_connection();
        let transport = ScriptedTransport {
            connections: Arc::new(Mutex::new(VecDeque::from([first_conn, second_conn]))),
        };
        let pulls = Arc::new(Mutex::new(vec![]));
        let snapshots = FixedSnapshots {
            progress: Some(sample_progress(ScriptStage::EvaluationCompleted)),
            pulls: pulls.clone(),
        };

        let (manager, task, mut updates) =
            ConnectionManager::new(Box::new(transport), Box::new(snapshots));
        manager.subscribe_script("script-1");
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(task.run(shutdown_rx));

        // Server closes the first connection.
        drop(first_incoming);

        // After reconnect the subscription is replayed on the new connection.
        let replayed = second_sent.recv().await.unwrap();
        assert_eq!(replayed, ClientMessage::SubscribeScript { script_id: "script-1".to_string() });

        // And the missed-window snapshot arrives as a synthetic update.
        let update = updates.recv().await.unwrap();
        match update {
            WsMessage::ScriptUpdate(progress) => {
                assert_eq!(progress.stage, ScriptStage::EvaluationCompleted);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(pulls.lock().unwrap().as_slice(), ["script-1"]);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_the_task() {
        let transport = ScriptedTransport {
            connections: Arc::new(Mutex::new(VecDeque::from([Err(anyhow::anyhow!("refused"))]))),
        };
        let snapshots = FixedSnapshots { progress: None, pulls: Arc::new(Mutex::new(vec![])) };

        let (_manager, task, _updates) =
            ConnectionManager::new(Box::new(transport), Box::new(snapshots));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(task.run(shutdown_rx));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
