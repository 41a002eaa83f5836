//! WebSocket connection manager for one execution's progress stream.
//!
//! [`ExecutionMonitor`] owns at most one live socket. `connect` spawns
//! a supervised task that connects, pumps frames through the
//! classifier into the shared [`ExecutionState`], and reconnects with
//! a fixed delay after abnormal closes, up to the configured attempt
//! budget. `disconnect` cancels the task and sends a normal close;
//! both it and `send` are safe to call in any connection state.
//!
//! Liveness is judged solely by close events: the heartbeat is a
//! one-way keepalive and no reply is consumed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream};
use tokio_util::sync::CancellationToken;

use testwatch_core::message::Classified;
use testwatch_core::state::ExecutionState;
use testwatch_core::types::ExecutionId;

use crate::config::ConnectionConfig;
use crate::events::WatchEvent;

/// Broadcast channel capacity for monitor events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Literal keepalive frame sent on each heartbeat tick.
const HEARTBEAT_FRAME: &str = "ping";

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Lifecycle of the managed socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Push-based watcher for one execution.
pub struct ExecutionMonitor {
    config: ConnectionConfig,
    shared: Arc<Shared>,
    active: Mutex<Option<ActiveConnection>>,
}

/// State shared between the monitor handle and its connection task.
struct Shared {
    state: RwLock<ExecutionState>,
    /// Observable log of every classified inbound frame.
    log: RwLock<Vec<Classified>>,
    status: RwLock<ConnectionStatus>,
    connected: AtomicBool,
    events: broadcast::Sender<WatchEvent>,
}

/// Bookkeeping for the currently supervised socket.
struct ActiveConnection {
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
    task: tokio::task::JoinHandle<()>,
}

/// How a WebSocket session ended.
enum SessionEnd {
    /// Normal closure or deliberate shutdown; no reconnect.
    Clean,
    /// Dropped socket, receive error, or abnormal close code.
    Abnormal,
}

impl ExecutionMonitor {
    pub fn new(config: ConnectionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            shared: Arc::new(Shared {
                state: RwLock::new(ExecutionState::default()),
                log: RwLock::new(Vec::new()),
                status: RwLock::new(ConnectionStatus::Disconnected),
                connected: AtomicBool::new(false),
                events,
            }),
            active: Mutex::new(None),
        }
    }

    /// Subscribe to monitor events.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.shared.events.subscribe()
    }

    /// Read-only snapshot of the execution state.
    pub async fn snapshot(&self) -> ExecutionState {
        self.shared.state.read().await.clone()
    }

    /// All classified inbound frames received so far, in arrival order.
    pub async fn messages(&self) -> Vec<Classified> {
        self.shared.log.read().await.clone()
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        *self.shared.status.read().await
    }

    /// Re-arm the execution state to idle. The connection is untouched.
    pub async fn reset(&self) {
        self.shared.state.write().await.reset();
    }

    /// Open the progress stream for one execution.
    ///
    /// Spawns the supervising task; a monitor with a live stream
    /// ignores the call (one socket per monitor), while one whose
    /// previous watch has ended is re-armed.
    pub async fn connect(&self, execution_id: &str) {
        let mut active = self.active.lock().await;
        if let Some(conn) = active.take() {
            // A task that has already returned (attempt budget spent,
            // or the server closed cleanly) leaves a stale slot behind;
            // reap it so a fresh connect re-arms the monitor.
            let ended = conn.task.is_finished()
                || *self.shared.status.read().await == ConnectionStatus::Disconnected;
            if !ended {
                *active = Some(conn);
                tracing::warn!(execution_id, "Monitor already connected; ignoring connect");
                return;
            }
            conn.cancel.cancel();
            let _ = conn.task.await;
        }

        // A new watch starts from a clean state and log.
        *self.shared.state.write().await = ExecutionState::default();
        self.shared.log.write().await.clear();

        let session_id = uuid::Uuid::new_v4();
        tracing::info!(
            execution_id,
            session = %session_id,
            "Starting connection task",
        );

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_connection_loop(
            self.config.clone(),
            execution_id.to_string(),
            Arc::clone(&self.shared),
            outbound_rx,
            cancel.clone(),
        ));

        *active = Some(ActiveConnection {
            cancel,
            outbound: outbound_tx,
            task,
        });
    }

    /// Close the socket with a normal-closure frame and stop the
    /// heartbeat. Idempotent: calling while disconnected is a no-op.
    pub async fn disconnect(&self) {
        let Some(conn) = self.active.lock().await.take() else {
            return;
        };
        conn.cancel.cancel();
        let _ = conn.task.await;
        self.shared.connected.store(false, Ordering::SeqCst);
        *self.shared.status.write().await = ConnectionStatus::Disconnected;
    }

    /// Send a text payload over the socket.
    ///
    /// Never fails: when not connected the payload is dropped with a
    /// logged warning.
    pub async fn send(&self, payload: impl Into<String>) {
        let payload = payload.into();
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(conn) if self.shared.connected.load(Ordering::SeqCst) => {
                if conn.outbound.send(payload).is_err() {
                    tracing::warn!("Connection task gone; dropping outbound payload");
                }
            }
            _ => {
                tracing::warn!("Not connected; dropping outbound payload");
            }
        }
    }
}

/// Supervision loop: connect, pump one session, reconnect after
/// abnormal ends with a fixed delay, give up once the attempt budget
/// is spent.
async fn run_connection_loop(
    config: ConnectionConfig,
    execution_id: ExecutionId,
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let url = config.ws_endpoint(&execution_id);
    let mut attempts = 0u32;

    loop {
        set_status(
            &shared,
            if attempts == 0 {
                ConnectionStatus::Connecting
            } else {
                ConnectionStatus::Reconnecting
            },
        )
        .await;

        let connect_result = tokio::select! {
            _ = cancel.cancelled() => {
                set_status(&shared, ConnectionStatus::Disconnected).await;
                return;
            }
            result = connect_async(&url) => result,
        };

        match connect_result {
            Ok((ws_stream, _response)) => {
                attempts = 0;
                shared.connected.store(true, Ordering::SeqCst);
                set_status(&shared, ConnectionStatus::Connected).await;
                tracing::info!(execution_id, "Connected to execution stream");
                let _ = shared.events.send(WatchEvent::Connected {
                    execution_id: execution_id.clone(),
                });

                let end = run_session(
                    ws_stream,
                    &execution_id,
                    &shared,
                    &mut outbound_rx,
                    &cancel,
                    &config,
                )
                .await;

                shared.connected.store(false, Ordering::SeqCst);

                // Status is updated before the event goes out so that
                // subscribers reacting to `Disconnected` observe the
                // final state of a clean close. Abnormal ends emit
                // `Reconnecting` or `ConnectionLost` below instead.
                if let SessionEnd::Clean = end {
                    set_status(&shared, ConnectionStatus::Disconnected).await;
                    let _ = shared.events.send(WatchEvent::Disconnected {
                        execution_id: execution_id.clone(),
                    });
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(execution_id, error = %e, "WebSocket connect failed");
            }
        }

        if cancel.is_cancelled() {
            set_status(&shared, ConnectionStatus::Disconnected).await;
            return;
        }

        if attempts >= config.max_reconnect_attempts {
            tracing::error!(execution_id, attempts, "Reconnect attempts exhausted");
            let _ = shared.events.send(WatchEvent::ConnectionLost {
                execution_id: execution_id.clone(),
                attempts,
            });
            set_status(&shared, ConnectionStatus::Disconnected).await;
            return;
        }

        attempts += 1;
        tracing::info!(
            execution_id,
            attempt = attempts,
            delay_ms = config.reconnect_delay.as_millis() as u64,
            "Scheduling reconnect",
        );
        let _ = shared.events.send(WatchEvent::Reconnecting {
            execution_id: execution_id.clone(),
            attempt: attempts,
        });
        tokio::select! {
            _ = cancel.cancelled() => {
                set_status(&shared, ConnectionStatus::Disconnected).await;
                return;
            }
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
}

/// Pump one live session: heartbeat ticks out, outbound payloads out,
/// inbound frames through the classifier into the state machine.
async fn run_session(
    ws_stream: WsStream,
    execution_id: &str,
    shared: &Shared,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
    config: &ConnectionConfig,
) -> SessionEnd {
    let (mut sink, mut stream) = ws_stream.split();
    // First tick one full interval after connect, not immediately.
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    })))
                    .await;
                return SessionEnd::Clean;
            }
            _ = heartbeat.tick() => {
                if let Err(e) = sink.send(Message::Text(HEARTBEAT_FRAME.to_string())).await {
                    tracing::warn!(execution_id, error = %e, "Heartbeat send failed");
                    report_fault(execution_id, shared, &e);
                    return SessionEnd::Abnormal;
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(payload) => {
                        if let Err(e) = sink.send(Message::Text(payload)).await {
                            tracing::warn!(execution_id, error = %e, "Outbound send failed");
                            report_fault(execution_id, shared, &e);
                            return SessionEnd::Abnormal;
                        }
                    }
                    // The monitor handle was dropped without a
                    // disconnect; close cleanly instead of leaking.
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Clean;
                    }
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, execution_id, shared).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        tracing::trace!(execution_id, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        // Handled automatically by tungstenite.
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let normal = frame
                            .as_ref()
                            .map(|f| f.code == CloseCode::Normal)
                            .unwrap_or(false);
                        tracing::info!(execution_id, ?frame, "Execution stream closed");
                        return if normal { SessionEnd::Clean } else { SessionEnd::Abnormal };
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        tracing::error!(execution_id, error = %e, "WebSocket receive error");
                        report_fault(execution_id, shared, &e);
                        return SessionEnd::Abnormal;
                    }
                    None => {
                        tracing::warn!(execution_id, "Execution stream exhausted");
                        return SessionEnd::Abnormal;
                    }
                }
            }
        }
    }
}

/// Classify one inbound frame, fold it into the state machine, append
/// it to the observable log, and broadcast the new snapshot.
async fn handle_frame(text: &str, execution_id: &str, shared: &Shared) {
    let classified = Classified::receive(text);
    let snapshot = {
        let mut state = shared.state.write().await;
        state.apply(&classified.message, classified.received_at);
        state.clone()
    };
    shared.log.write().await.push(classified);
    let _ = shared.events.send(WatchEvent::StateChanged {
        execution_id: execution_id.to_string(),
        snapshot,
    });
}

async fn set_status(shared: &Shared, status: ConnectionStatus) {
    *shared.status.write().await = status;
}

/// Broadcast a non-fatal transport fault before the session ends.
fn report_fault(execution_id: &str, shared: &Shared, error: &impl std::fmt::Display) {
    let _ = shared.events.send(WatchEvent::TransportError {
        execution_id: execution_id.to_string(),
        detail: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn send_while_disconnected_is_a_noop() {
        let monitor = ExecutionMonitor::new(ConnectionConfig::default());
        monitor.send("ping").await;
        assert_eq!(
            monitor.connection_status().await,
            ConnectionStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let monitor = ExecutionMonitor::new(ConnectionConfig::default());
        monitor.disconnect().await;
        monitor.disconnect().await;
        assert_eq!(
            monitor.connection_status().await,
            ConnectionStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn reconnect_attempts_are_bounded() {
        // Bind then drop a listener so the port refuses connections.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let monitor = ExecutionMonitor::new(ConnectionConfig {
            host: "127.0.0.1".into(),
            port,
            reconnect_delay: Duration::from_millis(5),
            max_reconnect_attempts: 2,
            ..Default::default()
        });
        let mut events = monitor.subscribe();
        monitor.connect("e1").await;

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(event) = events.recv().await {
                    if matches!(event, WatchEvent::ConnectionLost { .. }) {
                        return event;
                    }
                }
            }
        })
        .await
        .expect("expected ConnectionLost before timeout");

        assert_matches!(event, WatchEvent::ConnectionLost { attempts: 2, .. });

        monitor.disconnect().await;
        assert_eq!(
            monitor.connection_status().await,
            ConnectionStatus::Disconnected
        );
    }
}
