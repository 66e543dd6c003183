//! Gateway session state machine.
//!
//! `GatewaySession` holds no sockets or timers. The connection driver feeds
//! it [`SessionInput`]s and carries out the [`SessionAction`]s it returns, so
//! every transition can be exercised directly in tests.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::backoff::ReconnectBackoff;
use super::protocol::{GatewayEvent, InboundFrame, OutboundFrame, SessionIdentity};
use crate::config::ListenerConfig;
use crate::constants::log_events;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Identifying,
    Resuming,
    Connected,
    ReconnectScheduled,
    Terminated,
}

impl ConnectionState {
    /// States in which the peer expects heartbeats.
    pub fn is_handshaking_or_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Identifying | ConnectionState::Resuming | ConnectionState::Connected
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Start,
    /// Opening the transport failed
    ConnectFailed(String),
    Frame(InboundFrame),
    TransportClosed { reason: String },
    HeartbeatDue,
    HeartbeatFailed(String),
    ReconnectDue,
    /// The handshake timer armed for `generation` ran out
    HandshakeTimeout { generation: u64 },
    Stop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    OpenTransport,
    CloseTransport,
    Send(OutboundFrame),
    StartHeartbeat(Duration),
    StopHeartbeat,
    ScheduleReconnect { attempt: u32, delay: Duration },
    StartHandshakeTimer { generation: u64, timeout: Duration },
    CancelHandshakeTimer,
    Dispatch(GatewayEvent),
    Fatal(GatewayError),
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub identity: SessionIdentity,
    pub heartbeat_override: Option<Duration>,
    pub reconnect_base: f64,
    pub reconnect_cap: Duration,
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl SessionSettings {
    pub fn from_listener(config: &ListenerConfig) -> Self {
        Self {
            identity: SessionIdentity {
                token: config.token.clone(),
                intents: config.intents,
                properties: config.properties.clone(),
            },
            heartbeat_override: config.heartbeat_override_ms.map(Duration::from_millis),
            reconnect_base: config.reconnect.base,
            reconnect_cap: Duration::from_secs(config.reconnect.cap_secs),
            max_reconnect_attempts: config.reconnect.max_attempts,
            connect_timeout: Duration::from_secs(config.reconnect.connect_timeout_secs),
            handshake_timeout: Duration::from_secs(config.reconnect.handshake_timeout_secs),
        }
    }
}

pub struct GatewaySession {
    settings: SessionSettings,
    state: ConnectionState,
    session_id: Option<String>,
    last_sequence: Option<u64>,
    user_name: Option<String>,
    backoff: ReconnectBackoff,
    exhausted: bool,
    handshake_generation: u64,
}

impl GatewaySession {
    pub fn new(settings: SessionSettings) -> Self {
        let backoff = ReconnectBackoff::new(settings.reconnect_base, settings.reconnect_cap);
        Self {
            settings,
            state: ConnectionState::Disconnected,
            session_id: None,
            last_sequence: None,
            user_name: None,
            backoff,
            exhausted: false,
            handshake_generation: 0,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Name of the connected account, known after READY.
    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    /// True once the reconnect budget is spent.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn handle(&mut self, input: SessionInput) -> Vec<SessionAction> {
        if self.state == ConnectionState::Terminated {
            return Vec::new();
        }

        match input {
            SessionInput::Start => self.on_start(),
            SessionInput::ConnectFailed(reason) => {
                if self.state != ConnectionState::Connecting {
                    return Vec::new();
                }
                warn!("🔌 [GATEWAY] Connect failed: {}", reason);
                self.schedule_reconnect()
            }
            SessionInput::Frame(frame) => self.on_frame(frame),
            SessionInput::TransportClosed { reason } => self.on_fault("transport closed", &reason),
            SessionInput::HeartbeatFailed(reason) => self.on_fault("heartbeat failed", &reason),
            SessionInput::HeartbeatDue => {
                if self.state.is_handshaking_or_connected() {
                    vec![self.heartbeat()]
                } else {
                    Vec::new()
                }
            }
            SessionInput::ReconnectDue => {
                if self.state != ConnectionState::ReconnectScheduled || self.exhausted {
                    return Vec::new();
                }
                info!(
                    "🔄 [GATEWAY] Reconnecting (attempt {}/{})",
                    self.backoff.attempt(),
                    self.settings.max_reconnect_attempts
                );
                self.begin_connect()
            }
            SessionInput::HandshakeTimeout { generation } => {
                if generation != self.handshake_generation || !self.is_handshaking() {
                    return Vec::new();
                }
                warn!(
                    "⏰ [GATEWAY] No READY within {:?} (state {:?})",
                    self.settings.handshake_timeout, self.state
                );
                self.schedule_reconnect()
            }
            SessionInput::Stop => {
                info!("🛑 [GATEWAY] Stopping session");
                self.state = ConnectionState::Terminated;
                vec![SessionAction::StopHeartbeat, SessionAction::CloseTransport]
            }
        }
    }

    fn on_start(&mut self) -> Vec<SessionAction> {
        if self.state != ConnectionState::Disconnected {
            return Vec::new();
        }
        self.begin_connect()
    }

    /// The handshake timer runs from the open until READY / RESUMED.
    fn begin_connect(&mut self) -> Vec<SessionAction> {
        self.state = ConnectionState::Connecting;
        self.handshake_generation += 1;
        vec![
            SessionAction::StartHandshakeTimer {
                generation: self.handshake_generation,
                timeout: self.settings.handshake_timeout,
            },
            SessionAction::OpenTransport,
        ]
    }

    fn on_frame(&mut self, frame: InboundFrame) -> Vec<SessionAction> {
        match frame {
            InboundFrame::Hello {
                heartbeat_interval_ms,
            } => self.on_hello(heartbeat_interval_ms),
            InboundFrame::HeartbeatAck => {
                debug!("💓 [GATEWAY] Heartbeat acknowledged");
                Vec::new()
            }
            InboundFrame::HeartbeatRequest => {
                if self.state.is_handshaking_or_connected() {
                    vec![self.heartbeat()]
                } else {
                    Vec::new()
                }
            }
            InboundFrame::Dispatch(event) => self.on_dispatch(event),
            InboundFrame::Reconnect => {
                if !self.is_live() {
                    return Vec::new();
                }
                info!("🔄 [GATEWAY] Peer requested reconnect");
                self.schedule_reconnect()
            }
            InboundFrame::InvalidSession { resumable } => {
                if !self.is_live() {
                    return Vec::new();
                }
                if !resumable || self.state == ConnectionState::Resuming {
                    warn!("⚠️ [GATEWAY] Session invalidated, next handshake will identify");
                    self.session_id = None;
                    self.last_sequence = None;
                } else {
                    warn!("⚠️ [GATEWAY] Session invalidated (resumable)");
                }
                self.schedule_reconnect()
            }
            InboundFrame::Unknown { op } => {
                debug!("[GATEWAY] Ignoring unknown op {}", op);
                Vec::new()
            }
        }
    }

    fn on_hello(&mut self, heartbeat_interval_ms: u64) -> Vec<SessionAction> {
        if self.state != ConnectionState::Connecting {
            debug!("[GATEWAY] Ignoring hello in state {:?}", self.state);
            return Vec::new();
        }

        let interval = self
            .settings
            .heartbeat_override
            .unwrap_or_else(|| Duration::from_millis(heartbeat_interval_ms));
        let mut actions = vec![SessionAction::StartHeartbeat(interval)];

        match (&self.session_id, self.last_sequence) {
            (Some(session_id), Some(sequence)) => {
                info!("🔁 [GATEWAY] Resuming session {} at seq {}", session_id, sequence);
                self.state = ConnectionState::Resuming;
                actions.push(SessionAction::Send(OutboundFrame::Resume {
                    token: self.settings.identity.token.clone(),
                    session_id: session_id.clone(),
                    sequence,
                }));
            }
            _ => {
                info!("🪪 [GATEWAY] Identifying (heartbeat every {:?})", interval);
                self.state = ConnectionState::Identifying;
                actions.push(SessionAction::Send(OutboundFrame::Identify(
                    self.settings.identity.clone(),
                )));
            }
        }
        actions
    }

    fn on_dispatch(&mut self, event: GatewayEvent) -> Vec<SessionAction> {
        if let Some(seq) = event.sequence {
            self.last_sequence = Some(seq);
        }

        let connected = match event.event_type.as_str() {
            "READY" => {
                self.session_id = event
                    .data
                    .get("session_id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                self.user_name = event
                    .data
                    .get("user")
                    .and_then(|u| u.get("username"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                self.mark_connected()
            }
            "RESUMED" => self.mark_connected(),
            _ => false,
        };

        let mut actions = vec![SessionAction::Dispatch(event)];
        if connected {
            actions.push(SessionAction::CancelHandshakeTimer);
        }
        actions
    }

    fn mark_connected(&mut self) -> bool {
        if matches!(
            self.state,
            ConnectionState::Identifying | ConnectionState::Resuming
        ) {
            info!(
                event = log_events::GATEWAY_CONNECTED,
                "✅ [GATEWAY] Connected (session={:?}, user={:?})",
                self.session_id,
                self.user_name
            );
            self.state = ConnectionState::Connected;
            self.backoff.reset();
            return true;
        }
        false
    }

    fn on_fault(&mut self, what: &str, reason: &str) -> Vec<SessionAction> {
        if !self.is_live() {
            return Vec::new();
        }
        warn!("⚠️ [GATEWAY] {}: {}", what, reason);
        self.schedule_reconnect()
    }

    /// A transport is open or being opened.
    fn is_live(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting
                | ConnectionState::Identifying
                | ConnectionState::Resuming
                | ConnectionState::Connected
        )
    }

    fn is_handshaking(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Identifying | ConnectionState::Resuming
        )
    }

    fn heartbeat(&self) -> SessionAction {
        SessionAction::Send(OutboundFrame::Heartbeat {
            last_sequence: self.last_sequence,
        })
    }

    fn schedule_reconnect(&mut self) -> Vec<SessionAction> {
        self.state = ConnectionState::ReconnectScheduled;
        let mut actions = vec![
            SessionAction::StopHeartbeat,
            SessionAction::CancelHandshakeTimer,
            SessionAction::CloseTransport,
        ];

        if self.backoff.attempt() >= self.settings.max_reconnect_attempts {
            self.exhausted = true;
            let attempts = self.backoff.attempt();
            tracing::error!(
                event = log_events::GATEWAY_FATAL,
                "💀 [GATEWAY] Giving up after {} reconnect attempts",
                attempts
            );
            actions.push(SessionAction::Fatal(GatewayError::ReconnectExhausted { attempts }));
            return actions;
        }

        let delay = self.backoff.next_delay();
        let attempt = self.backoff.attempt();
        info!(
            event = log_events::GATEWAY_RECONNECT_SCHEDULED,
            "⏳ [GATEWAY] Reconnect {} scheduled in {:?}", attempt, delay
        );
        actions.push(SessionAction::ScheduleReconnect { attempt, delay });
        actions
    }
}
