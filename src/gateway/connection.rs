//! Gateway connection driver.
//!
//! Owns the transport and the session FSM. A single task selects over the
//! input queue (heartbeat ticks, reconnect timers, stop requests) and the
//! transport's receive side, feeding everything through
//! [`GatewaySession::handle`] and executing the resulting actions.
//!
//! Opening the transport is bounded by the connect timeout and keeps
//! watching the input queue, so a `Stop` is honoured even while a connect
//! is hanging.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::protocol::{GatewayEvent, InboundFrame, OutboundFrame};
use super::session::{ConnectionState, GatewaySession, SessionAction, SessionInput, SessionSettings};
use super::transport::Transport;
use crate::error::GatewayError;

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Invoked once per dispatched application event, on the receive task.
pub type EventCallback = Box<dyn FnMut(GatewayEvent) -> Result<(), CallbackError> + Send>;

pub struct GatewayConnection<T: Transport> {
    session: GatewaySession,
    transport: T,
    transport_open: bool,
    on_event: EventCallback,
    inputs_tx: mpsc::UnboundedSender<SessionInput>,
    inputs_rx: mpsc::UnboundedReceiver<SessionInput>,
    state_tx: watch::Sender<ConnectionState>,
    heartbeat_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    handshake_task: Option<JoinHandle<()>>,
    /// Inputs that arrived while the transport was being opened
    deferred: VecDeque<SessionInput>,
    fatal: Option<GatewayError>,
}

/// Control handle for a spawned connection.
pub struct ConnectionHandle {
    inputs_tx: mpsc::UnboundedSender<SessionInput>,
    state_rx: watch::Receiver<ConnectionState>,
    task: JoinHandle<Result<(), GatewayError>>,
}

impl ConnectionHandle {
    /// Terminate the session: stops the heartbeat and closes the socket.
    pub fn stop(&self) {
        if self.inputs_tx.send(SessionInput::Stop).is_err() {
            debug!("[GATEWAY] Stop requested after connection task ended");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the connection task. Returns the fatal error if the reconnect
    /// budget ran out.
    pub async fn join(self) -> Result<(), GatewayError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(GatewayError::WebSocket(format!("gateway task aborted: {}", e))),
        }
    }
}

impl<T: Transport + 'static> GatewayConnection<T> {
    pub fn new(settings: SessionSettings, transport: T, on_event: EventCallback) -> Self {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            session: GatewaySession::new(settings),
            transport,
            transport_open: false,
            on_event,
            inputs_tx,
            inputs_rx,
            state_tx,
            heartbeat_task: None,
            reconnect_task: None,
            handshake_task: None,
            deferred: VecDeque::new(),
            fatal: None,
        }
    }

    pub fn spawn(self) -> ConnectionHandle {
        let inputs_tx = self.inputs_tx.clone();
        let state_rx = self.state_tx.subscribe();
        let task = tokio::spawn(self.run());
        ConnectionHandle {
            inputs_tx,
            state_rx,
            task,
        }
    }

    pub async fn run(mut self) -> Result<(), GatewayError> {
        self.apply(SessionInput::Start).await;

        loop {
            if self.session.state() == ConnectionState::Terminated {
                self.shutdown().await;
                return Ok(());
            }
            if let Some(err) = self.fatal.take() {
                self.shutdown().await;
                return Err(err);
            }

            let input = tokio::select! {
                biased;
                Some(input) = self.inputs_rx.recv() => Some(input),
                frame = self.transport.recv(), if self.transport_open => match frame {
                    Some(Ok(text)) => match InboundFrame::decode(&text) {
                        Ok(frame) => Some(SessionInput::Frame(frame)),
                        Err(e) => {
                            warn!("⚠️ [GATEWAY] Dropping undecodable frame: {}", e);
                            None
                        }
                    },
                    Some(Err(e)) => Some(SessionInput::TransportClosed { reason: e.to_string() }),
                    None => Some(SessionInput::TransportClosed { reason: "closed by peer".to_string() }),
                },
            };

            if let Some(input) = input {
                self.apply(input).await;
            }
        }
    }

    async fn apply(&mut self, input: SessionInput) {
        let mut pending = VecDeque::from([input]);

        while let Some(input) = pending.pop_front() {
            let actions = self.session.handle(input);
            self.state_tx.send_replace(self.session.state());

            for action in actions {
                if let Some(follow_up) = self.perform(action).await {
                    pending.push_back(follow_up);
                }
            }
            pending.extend(self.deferred.drain(..));
            self.state_tx.send_replace(self.session.state());
        }
    }

    async fn perform(&mut self, action: SessionAction) -> Option<SessionInput> {
        match action {
            SessionAction::OpenTransport => self.open_transport().await,
            SessionAction::CloseTransport => {
                if self.transport_open {
                    self.transport.close().await;
                    self.transport_open = false;
                }
                None
            }
            SessionAction::Send(frame) => self.send_frame(frame).await,
            SessionAction::StartHeartbeat(interval) => {
                self.start_heartbeat(interval);
                None
            }
            SessionAction::StopHeartbeat => {
                if let Some(task) = self.heartbeat_task.take() {
                    task.abort();
                }
                None
            }
            SessionAction::ScheduleReconnect { delay, .. } => {
                self.schedule_reconnect(delay);
                None
            }
            SessionAction::StartHandshakeTimer { generation, timeout } => {
                self.start_handshake_timer(generation, timeout);
                None
            }
            SessionAction::CancelHandshakeTimer => {
                if let Some(task) = self.handshake_task.take() {
                    task.abort();
                }
                None
            }
            SessionAction::Dispatch(event) => {
                self.dispatch(event);
                None
            }
            SessionAction::Fatal(err) => {
                self.fatal = Some(err);
                None
            }
        }
    }

    /// Open the transport within the connect timeout. A `Stop` arriving
    /// meanwhile abandons the attempt; other inputs are held back until the
    /// open has resolved.
    async fn open_transport(&mut self) -> Option<SessionInput> {
        let timeout = self.session.settings().connect_timeout;
        let inputs_rx = &mut self.inputs_rx;
        let deferred = &mut self.deferred;
        let open = tokio::time::timeout(timeout, self.transport.open());
        tokio::pin!(open);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(input) = inputs_rx.recv() => {
                    if input == SessionInput::Stop {
                        info!("🛑 [GATEWAY] Stop requested while connecting, abandoning open");
                        return Some(SessionInput::Stop);
                    }
                    deferred.push_back(input);
                }
                outcome = &mut open => break outcome,
            }
        };

        match outcome {
            Ok(Ok(())) => {
                self.transport_open = true;
                None
            }
            Ok(Err(e)) => Some(SessionInput::ConnectFailed(e.to_string())),
            Err(_) => Some(SessionInput::ConnectFailed(format!(
                "connect timed out after {:?}",
                timeout
            ))),
        }
    }

    async fn send_frame(&mut self, frame: OutboundFrame) -> Option<SessionInput> {
        let is_heartbeat = matches!(frame, OutboundFrame::Heartbeat { .. });
        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("❌ [GATEWAY] Failed to encode {}: {}", frame, e);
                return None;
            }
        };

        debug!("📤 [GATEWAY] Sending {}", frame);
        match self.transport.send(text).await {
            Ok(()) => None,
            Err(e) if is_heartbeat => Some(SessionInput::HeartbeatFailed(e.to_string())),
            Err(e) => Some(SessionInput::TransportClosed {
                reason: format!("send {} failed: {}", frame, e),
            }),
        }
    }

    fn start_heartbeat(&mut self, interval: Duration) {
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }

        let interval = interval.max(Duration::from_millis(1));
        let tx = self.inputs_tx.clone();
        self.heartbeat_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if tx.send(SessionInput::HeartbeatDue).is_err() {
                    break;
                }
            }
        }));
    }

    fn schedule_reconnect(&mut self, delay: Duration) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }

        let tx = self.inputs_tx.clone();
        self.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SessionInput::ReconnectDue);
        }));
    }

    fn start_handshake_timer(&mut self, generation: u64, timeout: Duration) {
        if let Some(task) = self.handshake_task.take() {
            task.abort();
        }

        let tx = self.inputs_tx.clone();
        self.handshake_task = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(SessionInput::HandshakeTimeout { generation });
        }));
    }

    fn dispatch(&mut self, event: GatewayEvent) {
        let event_type = event.event_type.clone();
        let callback = &mut self.on_event;

        match std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("❌ [GATEWAY] Event callback failed for {}: {}", event_type, e),
            Err(_) => error!("💥 [GATEWAY] Event callback panicked for {}", event_type),
        }
    }

    async fn shutdown(&mut self) {
        let tasks = [
            self.heartbeat_task.take(),
            self.reconnect_task.take(),
            self.handshake_task.take(),
        ];
        for task in tasks.into_iter().flatten() {
            task.abort();
        }
        if self.transport_open {
            self.transport.close().await;
            self.transport_open = false;
        }
    }
}
