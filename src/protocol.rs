//! Gateway wire protocol
//!
//! Every frame is a JSON object `{op, d, s, t}`:
//!
//! ```text
//! op  opcode (see `Opcode`)
//! d   payload, shape depends on op / t
//! s   sequence number, dispatch frames only
//! t   dispatch type, dispatch frames only
//! ```
//!
//! Only the subset of opcodes the bridge consumes is modelled; anything else
//! decodes as `Opcode::Other` and is ignored by the session.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::ClientProperties;
use crate::error::{GatewayError, GatewayResult};

// =============================================================================
// Opcodes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Server -> client application event
    Dispatch,
    /// Client -> server keepalive; server may also request one
    Heartbeat,
    /// Client -> server handshake
    Identify,
    /// Server -> client greeting carrying the heartbeat interval
    Hello,
    /// Server -> client keepalive acknowledgement
    HeartbeatAck,
    Other(u8),
}

impl From<u8> for Opcode {
    fn from(op: u8) -> Self {
        match op {
            0 => Opcode::Dispatch,
            1 => Opcode::Heartbeat,
            2 => Opcode::Identify,
            10 => Opcode::Hello,
            11 => Opcode::HeartbeatAck,
            other => Opcode::Other(other),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        match op {
            Opcode::Dispatch => 0,
            Opcode::Heartbeat => 1,
            Opcode::Identify => 2,
            Opcode::Hello => 10,
            Opcode::HeartbeatAck => 11,
            Opcode::Other(other) => other,
        }
    }
}

/// Dispatch event names the session understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchType {
    Ready,
    MessageCreate,
    Other(String),
}

impl DispatchType {
    /// Accepts both the platform spelling (`MESSAGE_CREATE`) and the
    /// kebab-case spelling (`message-created`).
    pub fn parse(name: &str) -> Self {
        match name {
            "READY" | "ready" => DispatchType::Ready,
            "MESSAGE_CREATE" | "message-created" => DispatchType::MessageCreate,
            other => DispatchType::Other(other.to_string()),
        }
    }
}

// =============================================================================
// Frames
// =============================================================================

/// Raw gateway frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    pub fn new(op: Opcode, d: Value) -> Self {
        Self {
            op: op.into(),
            d,
            s: None,
            t: None,
        }
    }

    pub fn opcode(&self) -> Opcode {
        Opcode::from(self.op)
    }

    pub fn decode(text: &str) -> GatewayResult<Self> {
        serde_json::from_str(text).map_err(|e| GatewayError::MalformedFrame(e.to_string()))
    }

    pub fn encode(&self) -> GatewayResult<String> {
        serde_json::to_string(self).map_err(|e| GatewayError::MalformedFrame(e.to_string()))
    }

    /// Heartbeat carrying the last seen sequence (null when none yet)
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        Self::new(Opcode::Heartbeat, json!(sequence))
    }

    /// Identify carrying the credential, capability bitmask and client metadata
    pub fn identify(token: &str, intents: u64, properties: &ClientProperties) -> Self {
        Self::new(
            Opcode::Identify,
            json!({
                "token": token,
                "intents": intents,
                "properties": {
                    "os": properties.os,
                    "browser": properties.browser,
                    "device": properties.device,
                },
            }),
        )
    }
}

/// Hello payload
#[derive(Debug, Clone, Deserialize)]
pub struct HelloPayload {
    #[serde(alias = "heartbeat_interval_ms")]
    pub heartbeat_interval: u64,
}

/// Inbound frame classified by opcode and dispatch type
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub opcode: Opcode,
    /// Only set for dispatch frames
    pub dispatch_type: Option<DispatchType>,
    pub payload: Value,
    pub sequence: Option<u64>,
}

impl InboundEvent {
    pub fn decode(text: &str) -> GatewayResult<Self> {
        GatewayFrame::decode(text).map(Self::from)
    }
}

impl From<GatewayFrame> for InboundEvent {
    fn from(frame: GatewayFrame) -> Self {
        let opcode = frame.opcode();
        let dispatch_type = match opcode {
            Opcode::Dispatch => frame.t.as_deref().map(DispatchType::parse),
            _ => None,
        };
        Self {
            opcode,
            dispatch_type,
            payload: frame.d,
            sequence: frame.s,
        }
    }
}
