//! Gateway client
//!
//! Drives a `Session` over a `TransportHandle`:
//! - waits for Hello (bounded), then sends Identify
//! - heartbeats on the server-supplied interval with the latest sequence
//! - publishes accepted message events through the dispatcher
//!
//! Each attach starts a new epoch. Tasks spawned for an older epoch stop
//! touching shared state as soon as a newer connection exists.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::dispatcher::{Dispatcher, Subscription};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{GatewayFrame, InboundEvent};
use crate::session::{ConnectionState, Session, SessionPolicy, SessionStatus, Step};
use crate::transport::{TransportEvent, TransportEvents, TransportHandle, WsTransport};
use crate::types::ChatMessage;

struct ActiveConnection {
    epoch: u64,
    transport: TransportHandle,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl ActiveConnection {
    fn shutdown(self) {
        self.heartbeat.abort();
        self.reader.abort();
        self.transport.close();
    }
}

struct Shared {
    session: Mutex<Session>,
    epoch: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    connection: Mutex<Option<ActiveConnection>>,
    dispatcher: Dispatcher<ChatMessage>,
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Publish `state` only while `epoch` is still the live connection
    ///
    /// Checked under the session lock; a newer attach bumps the epoch before
    /// it takes that lock to reset the session.
    fn set_state_for(&self, epoch: u64, state: ConnectionState) -> bool {
        let _session = self.session.lock();
        if !self.is_current(epoch) {
            return false;
        }
        self.set_state(state);
        true
    }

    /// Mark the session for `epoch` closed, unless a newer one replaced it
    fn close_session(&self, epoch: u64) {
        let mut session = self.session.lock();
        if self.is_current(epoch) {
            session.close();
            self.set_state(ConnectionState::Closed);
        }
    }

    /// Decode and apply one frame on behalf of `epoch`
    ///
    /// Malformed input is logged and dropped. Frames from a superseded
    /// connection are refused.
    fn apply(&self, epoch: u64, text: &str) -> GatewayResult<Option<Step>> {
        let event = match InboundEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping gateway frame: {}", e);
                return Ok(None);
            }
        };
        let mut session = self.session.lock();
        if !self.is_current(epoch) {
            return Err(superseded());
        }
        match session.process(event) {
            Ok(step) => Ok(Some(step)),
            Err(e) => {
                warn!("Dropping gateway event: {}", e);
                Ok(None)
            }
        }
    }

    async fn handle_step(&self, epoch: u64, transport: &TransportHandle, step: Step) {
        match step {
            Step::Deliver(message) => {
                debug!(message_id = %message.id, author = %message.author_id, "Publishing message");
                self.dispatcher.publish(&message);
            }
            Step::Ready => {
                self.set_state_for(epoch, ConnectionState::Ready);
            }
            Step::HeartbeatNow => {
                let sequence = self.session.lock().sequence();
                if let Err(e) = transport.send(&GatewayFrame::heartbeat(sequence)).await {
                    debug!("Requested heartbeat not sent: {}", e);
                }
            }
            Step::Handshake { .. } | Step::Continue => {}
        }
    }

    /// Transport for `epoch` ended on its own
    fn connection_closed(&self, epoch: u64, reason: &str) {
        if !self.is_current(epoch) {
            debug!(epoch, "Ignoring close of stale connection");
            return;
        }

        let connection = {
            let mut slot = self.connection.lock();
            match slot.as_ref() {
                Some(active) if active.epoch == epoch => slot.take(),
                _ => None,
            }
        };
        if let Some(active) = connection {
            // Called from the reader itself, so only the heartbeat is aborted
            active.heartbeat.abort();
            active.transport.close();
        }

        self.close_session(epoch);
        warn!("❌ Gateway connection closed: {}", reason);
    }

    /// Drop whatever connection is active and invalidate its tasks
    ///
    /// Returns the new epoch.
    fn teardown(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(active) = self.connection.lock().take() {
            active.shutdown();
        }
        epoch
    }
}

fn superseded() -> GatewayError {
    GatewayError::Closed("superseded by a newer connection".to_string())
}

/// Real-time gateway client
#[derive(Clone)]
pub struct GatewayClient {
    config: GatewayConfig,
    shared: Arc<Shared>,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let shared = Shared {
            session: Mutex::new(Session::new(SessionPolicy::from(&config))),
            epoch: AtomicU64::new(0),
            state_tx,
            connection: Mutex::new(None),
            dispatcher: Dispatcher::new(),
        };
        Self {
            config,
            shared: Arc::new(shared),
        }
    }

    /// Open a WebSocket to the configured gateway and complete the handshake
    pub async fn connect(&self) -> GatewayResult<()> {
        info!("🔌 Connecting to gateway {}", self.config.url);
        match WsTransport::open(&self.config.url).await {
            Ok((transport, events)) => self.attach(transport, events).await,
            Err(e) => {
                self.shared.set_state(ConnectionState::Closed);
                Err(e)
            }
        }
    }

    /// Run the protocol over an already-open transport
    ///
    /// Returns once Identify has been sent. Ready arrives asynchronously;
    /// use `wait_ready` or `state` to observe it.
    pub async fn attach(
        &self,
        transport: TransportHandle,
        mut events: TransportEvents,
    ) -> GatewayResult<()> {
        let shared = &self.shared;
        let epoch = shared.teardown();

        let fresh = {
            let mut session = shared.session.lock();
            let fresh = shared.is_current(epoch);
            if fresh {
                *session = Session::new(SessionPolicy::from(&self.config));
                session.opened();
                shared.set_state(ConnectionState::AwaitingHello);
            }
            fresh
        };
        if !fresh {
            transport.close();
            return Err(superseded());
        }

        let heartbeat_interval = match self.await_hello(epoch, &transport, &mut events).await {
            Ok(interval) => interval,
            Err(e) => {
                transport.close();
                shared.close_session(epoch);
                return Err(e);
            }
        };
        info!(
            "👋 Hello received, heartbeat every {}ms",
            heartbeat_interval.as_millis()
        );

        let identify =
            GatewayFrame::identify(&self.config.token, self.config.intents, &self.config.properties);
        if let Err(e) = transport.send(&identify).await {
            transport.close();
            shared.close_session(epoch);
            return Err(e);
        }
        if !shared.set_state_for(epoch, ConnectionState::AwaitingReady) {
            debug!(epoch, "Connection superseded after identify");
            transport.close();
            return Err(superseded());
        }
        debug!("Identify sent");

        // A newer attach bumps the epoch before it takes the slot, so this
        // connection is either refused here or shut down by that attach
        let mut slot = shared.connection.lock();
        if !shared.is_current(epoch) {
            drop(slot);
            transport.close();
            return Err(superseded());
        }
        let heartbeat = tokio::spawn(heartbeat_loop(
            shared.clone(),
            transport.clone(),
            epoch,
            heartbeat_interval,
        ));
        let reader = tokio::spawn(read_loop(shared.clone(), transport.clone(), events, epoch));
        *slot = Some(ActiveConnection {
            epoch,
            transport,
            reader,
            heartbeat,
        });

        Ok(())
    }

    async fn await_hello(
        &self,
        epoch: u64,
        transport: &TransportHandle,
        events: &mut TransportEvents,
    ) -> GatewayResult<Duration> {
        let limit = self.config.handshake_timeout;
        let deadline = Instant::now() + limit;

        loop {
            let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    warn!("No hello within {:?}", limit);
                    return Err(GatewayError::HandshakeTimeout(limit));
                }
            };

            match event {
                Some(TransportEvent::Frame(text)) => match self.shared.apply(epoch, &text)? {
                    Some(Step::Handshake { heartbeat_interval }) => return Ok(heartbeat_interval),
                    Some(step) => self.shared.handle_step(epoch, transport, step).await,
                    None => {}
                },
                Some(TransportEvent::Closed { reason }) => {
                    return Err(GatewayError::Closed(reason));
                }
                None => return Err(GatewayError::Closed("transport dropped".to_string())),
            }
        }
    }

    /// Register a message callback
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe(callback)
    }

    pub fn dispatcher(&self) -> &Dispatcher<ChatMessage> {
        &self.shared.dispatcher
    }

    /// Watch connection state changes
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        let epoch = self.shared.epoch.load(Ordering::SeqCst);
        self.shared.session.lock().status(epoch)
    }

    pub fn is_ready(&self) -> bool {
        *self.shared.state_tx.borrow() == ConnectionState::Ready
    }

    /// Wait up to `limit` for the session to become ready
    pub async fn wait_ready(&self, limit: Duration) -> bool {
        let mut state = self.state();
        matches!(
            tokio::time::timeout(limit, state.wait_for(|s| *s == ConnectionState::Ready)).await,
            Ok(Ok(_))
        )
    }

    /// Resolves once the current connection has closed
    pub async fn closed(&self) {
        let mut state = self.state();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Close the connection and stop all tasks. Safe to call repeatedly.
    pub fn disconnect(&self) {
        self.shared.teardown();
        self.shared.session.lock().close();
        self.shared.set_state(ConnectionState::Closed);
        info!("Gateway client disconnected");
    }
}

async fn heartbeat_loop(
    shared: Arc<Shared>,
    transport: TransportHandle,
    epoch: u64,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !shared.is_current(epoch) {
            break;
        }
        let sequence = shared.session.lock().sequence();
        match transport.send(&GatewayFrame::heartbeat(sequence)).await {
            Ok(()) => debug!(?sequence, "Heartbeat sent"),
            Err(e) => {
                debug!("Heartbeat stopped: {}", e);
                break;
            }
        }
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    transport: TransportHandle,
    mut events: TransportEvents,
    epoch: u64,
) {
    let reason = loop {
        match events.recv().await {
            Some(TransportEvent::Frame(text)) => match shared.apply(epoch, &text) {
                Ok(Some(step)) => shared.handle_step(epoch, &transport, step).await,
                Ok(None) => {}
                Err(_) => return,
            },
            Some(TransportEvent::Closed { reason }) => break reason,
            None => break "transport dropped".to_string(),
        }
    };

    shared.connection_closed(epoch, &reason);
}
