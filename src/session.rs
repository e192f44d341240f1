//! Per-connection gateway session state
//!
//! `Session` is the synchronous half of the protocol handler: it consumes
//! classified inbound events and tells the driver in `gateway` what to do
//! next. It owns no I/O and no timers, so every rule here is testable
//! without a socket.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{DispatchType, HelloPayload, InboundEvent, Opcode};
use crate::types::{ChatMessage, MessagePayload, ReadyPayload};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    AwaitingHello,
    AwaitingReady,
    Ready,
    Closed,
}

/// What the driver must do after an event
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Hello received: send Identify and start heartbeating at this interval
    Handshake { heartbeat_interval: Duration },
    /// Server asked for an immediate heartbeat
    HeartbeatNow,
    /// Ready received; session id and self identity are known
    Ready,
    /// Deliver to subscribers
    Deliver(ChatMessage),
    Continue,
}

/// Delivery policy for message events
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub dedup_capacity: usize,
    pub assistant_id: Option<String>,
    pub mirror_self: bool,
}

impl From<&GatewayConfig> for SessionPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            dedup_capacity: config.dedup_capacity,
            assistant_id: config.assistant_id.clone(),
            mirror_self: config.mirror_self,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            dedup_capacity: 10_000,
            assistant_id: None,
            mirror_self: false,
        }
    }
}

/// Bounded FIFO set of message ids already delivered
#[derive(Debug)]
struct SeenIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns `false` if the id was already present
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.ids.remove(&oldest);
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Point-in-time view of a session, for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub ready: bool,
    pub epoch: u64,
    pub session_id: Option<String>,
    pub self_id: Option<String>,
    pub sequence: Option<u64>,
    pub heartbeat_interval_ms: Option<u64>,
    pub last_heartbeat_ack: Option<DateTime<Utc>>,
}

/// Gateway session: exactly one per connection attempt
#[derive(Debug)]
pub struct Session {
    state: ConnectionState,
    sequence: Option<u64>,
    session_id: Option<String>,
    self_id: Option<String>,
    heartbeat_interval: Option<Duration>,
    last_ack: Option<DateTime<Utc>>,
    seen: SeenIds,
    policy: SessionPolicy,
}

impl Session {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            sequence: None,
            session_id: None,
            self_id: None,
            heartbeat_interval: None,
            last_ack: None,
            seen: SeenIds::new(policy.dedup_capacity),
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn self_id(&self) -> Option<&str> {
        self.self_id.as_deref()
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    /// Transport opened
    pub fn opened(&mut self) {
        self.state = ConnectionState::AwaitingHello;
    }

    /// Transport closed or errored
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    pub fn status(&self, epoch: u64) -> SessionStatus {
        SessionStatus {
            state: self.state,
            ready: self.state == ConnectionState::Ready,
            epoch,
            session_id: self.session_id.clone(),
            self_id: self.self_id.clone(),
            sequence: self.sequence,
            heartbeat_interval_ms: self.heartbeat_interval.map(|d| d.as_millis() as u64),
            last_heartbeat_ack: self.last_ack,
        }
    }

    /// Apply one inbound event
    ///
    /// Errors are payload decode failures; the caller logs and drops them and
    /// the session stays usable.
    pub fn process(&mut self, event: InboundEvent) -> GatewayResult<Step> {
        if self.state == ConnectionState::Closed {
            return Ok(Step::Continue);
        }

        if let Some(seq) = event.sequence {
            self.sequence = Some(self.sequence.map_or(seq, |current| current.max(seq)));
        }

        match event.opcode {
            Opcode::Hello => self.on_hello(event.payload),
            Opcode::HeartbeatAck => {
                self.last_ack = Some(Utc::now());
                debug!("Heartbeat acknowledged");
                Ok(Step::Continue)
            }
            Opcode::Heartbeat => Ok(Step::HeartbeatNow),
            Opcode::Dispatch => match event.dispatch_type {
                Some(DispatchType::Ready) => self.on_ready(event.payload),
                Some(DispatchType::MessageCreate) => self.on_message(event.payload),
                Some(DispatchType::Other(name)) => {
                    debug!(dispatch = %name, "Ignoring dispatch");
                    Ok(Step::Continue)
                }
                None => Err(GatewayError::MalformedFrame(
                    "dispatch frame without type".to_string(),
                )),
            },
            Opcode::Identify | Opcode::Other(_) => {
                debug!(op = u8::from(event.opcode), "Unhandled gateway op");
                Ok(Step::Continue)
            }
        }
    }

    fn on_hello(&mut self, payload: serde_json::Value) -> GatewayResult<Step> {
        let hello: HelloPayload = serde_json::from_value(payload)
            .map_err(|e| GatewayError::MalformedFrame(format!("hello: {}", e)))?;

        if self.state != ConnectionState::AwaitingHello {
            debug!(state = ?self.state, "Ignoring repeated hello");
            return Ok(Step::Continue);
        }

        let interval = Duration::from_millis(hello.heartbeat_interval);
        self.heartbeat_interval = Some(interval);
        self.state = ConnectionState::AwaitingReady;
        Ok(Step::Handshake {
            heartbeat_interval: interval,
        })
    }

    fn on_ready(&mut self, payload: serde_json::Value) -> GatewayResult<Step> {
        let ready: ReadyPayload = serde_json::from_value(payload)
            .map_err(|e| GatewayError::MalformedFrame(format!("ready: {}", e)))?;

        if self.state != ConnectionState::AwaitingReady {
            debug!(state = ?self.state, "Ignoring ready outside the handshake");
            return Ok(Step::Continue);
        }

        info!(
            session_id = %ready.session_id,
            self_id = %ready.user.id,
            "Gateway ready"
        );
        self.session_id = Some(ready.session_id);
        self.self_id = Some(ready.user.id);
        self.state = ConnectionState::Ready;
        Ok(Step::Ready)
    }

    fn on_message(&mut self, payload: serde_json::Value) -> GatewayResult<Step> {
        let payload: MessagePayload = serde_json::from_value(payload)
            .map_err(|e| GatewayError::MalformedFrame(format!("message: {}", e)))?;

        if self.state != ConnectionState::Ready {
            debug!(message_id = %payload.id, state = ?self.state, "Dropping message before ready");
            return Ok(Step::Continue);
        }

        // Self filter runs before dedup so dropped echoes never occupy the set
        let is_self = self.self_id.as_deref() == Some(payload.author.id.as_str());
        if is_self && !self.policy.mirror_self {
            debug!(message_id = %payload.id, "Dropping self-authored message");
            return Ok(Step::Continue);
        }

        if !self.seen.insert(&payload.id) {
            debug!(message_id = %payload.id, "Dropping duplicate message");
            return Ok(Step::Continue);
        }

        Ok(Step::Deliver(ChatMessage::from_payload(
            payload,
            self.self_id.as_deref(),
            self.policy.assistant_id.as_deref(),
        )))
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}
