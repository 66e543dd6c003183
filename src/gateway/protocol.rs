//! Gateway wire frames.
//!
//! Every frame is a JSON object `{op, d, s, t}`. Inbound frames are decoded
//! into [`InboundFrame`]; outbound frames are built from [`OutboundFrame`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ClientProperties;
use crate::error::GatewayError;

pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

/// Application event surfaced to the dispatch callback.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayEvent {
    pub event_type: String,
    pub sequence: Option<u64>,
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    Hello { heartbeat_interval_ms: u64 },
    HeartbeatAck,
    /// Peer asks for an immediate heartbeat
    HeartbeatRequest,
    Dispatch(GatewayEvent),
    Reconnect,
    InvalidSession { resumable: bool },
    Unknown { op: u8 },
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, GatewayError> {
        let payload: GatewayPayload = serde_json::from_str(text)?;
        Self::from_payload(payload)
    }

    pub fn from_payload(payload: GatewayPayload) -> Result<Self, GatewayError> {
        let frame = match payload.op {
            opcode::HELLO => {
                let interval = payload
                    .d
                    .get("heartbeat_interval")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| GatewayError::Decode("hello without heartbeat_interval".into()))?;
                InboundFrame::Hello {
                    heartbeat_interval_ms: interval,
                }
            }
            opcode::HEARTBEAT_ACK => InboundFrame::HeartbeatAck,
            opcode::HEARTBEAT => InboundFrame::HeartbeatRequest,
            opcode::DISPATCH => {
                let event_type = payload
                    .t
                    .ok_or_else(|| GatewayError::Decode("dispatch without event type".into()))?;
                InboundFrame::Dispatch(GatewayEvent {
                    event_type,
                    sequence: payload.s,
                    data: payload.d,
                })
            }
            opcode::RECONNECT => InboundFrame::Reconnect,
            opcode::INVALID_SESSION => InboundFrame::InvalidSession {
                resumable: payload.d.as_bool().unwrap_or(false),
            },
            op => InboundFrame::Unknown { op },
        };
        Ok(frame)
    }
}

/// Credentials and capabilities sent with identify/resume.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionIdentity {
    pub token: String,
    pub intents: u64,
    pub properties: ClientProperties,
}

#[derive(Clone, Debug, PartialEq)]
pub enum OutboundFrame {
    Heartbeat {
        last_sequence: Option<u64>,
    },
    Identify(SessionIdentity),
    Resume {
        token: String,
        session_id: String,
        sequence: u64,
    },
}

impl OutboundFrame {
    pub fn op(&self) -> u8 {
        match self {
            OutboundFrame::Heartbeat { .. } => opcode::HEARTBEAT,
            OutboundFrame::Identify(_) => opcode::IDENTIFY,
            OutboundFrame::Resume { .. } => opcode::RESUME,
        }
    }

    pub fn to_payload(&self) -> GatewayPayload {
        let d = match self {
            OutboundFrame::Heartbeat { last_sequence } => json!(last_sequence),
            OutboundFrame::Identify(identity) => json!({
                "token": identity.token,
                "intents": identity.intents,
                "properties": {
                    "os": identity.properties.os,
                    "browser": identity.properties.browser,
                    "device": identity.properties.device,
                },
                "presence": {
                    "status": "online",
                    "afk": false,
                },
            }),
            OutboundFrame::Resume {
                token,
                session_id,
                sequence,
            } => json!({
                "token": token,
                "session_id": session_id,
                "seq": sequence,
            }),
        };
        GatewayPayload {
            op: self.op(),
            d,
            s: None,
            t: None,
        }
    }

    pub fn encode(&self) -> Result<String, GatewayError> {
        Ok(serde_json::to_string(&self.to_payload())?)
    }
}

/// Frame kind for logs; never includes the token.
impl std::fmt::Display for OutboundFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutboundFrame::Heartbeat { last_sequence } => write!(f, "heartbeat(seq={:?})", last_sequence),
            OutboundFrame::Identify(identity) => write!(f, "identify(intents={})", identity.intents),
            OutboundFrame::Resume {
                session_id, sequence, ..
            } => write!(f, "resume(session={}, seq={})", session_id, sequence),
        }
    }
}
