//! WebSocket transport to the gateway
//!
//! Owns exactly one duplex connection per `TransportHandle`. Inbound text
//! frames and the final close are delivered as `TransportEvent`s on a channel;
//! outbound frames go through a writer task. No retry or reconnect logic
//! lives here.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::GatewayFrame;

const OUTBOUND_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 256;

/// Something that happened on the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text frame received
    Frame(String),
    /// Connection closed or errored; always the last event
    Closed { reason: String },
}

/// Receiving side of a transport
pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// Sending side of a transport
///
/// Close travels on its own signal so it is never lost behind a full
/// outbound queue.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    tx: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
    closing: Arc<Notify>,
}

impl TransportHandle {
    fn new(tx: mpsc::Sender<String>, open: Arc<AtomicBool>, closing: Arc<Notify>) -> Self {
        Self { tx, open, closing }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue a frame for sending
    pub async fn send(&self, frame: &GatewayFrame) -> GatewayResult<()> {
        if !self.is_open() {
            return Err(GatewayError::NotConnected);
        }
        let text = frame.encode()?;
        self.tx
            .send(text)
            .await
            .map_err(|_| GatewayError::NotConnected)
    }

    /// Close the connection. Idempotent; frames still queued are discarded.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.closing.notify_one();
        }
    }
}

/// WebSocket transport factory
pub struct WsTransport;

impl WsTransport {
    /// Open a connection to `url`
    pub async fn open(url: &str) -> GatewayResult<(TransportHandle, TransportEvents)> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        info!("Connected to gateway at {}", url);

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let (evt_tx, evt_rx) = mpsc::channel::<TransportEvent>(INBOUND_BUFFER);
        let open = Arc::new(AtomicBool::new(true));
        let closing = Arc::new(Notify::new());

        // Task to send outgoing frames
        let writer_open = open.clone();
        let writer_closing = closing.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = writer_closing.notified() => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    outbound = out_rx.recv() => match outbound {
                        Some(text) => {
                            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                                debug!("Gateway send failed: {}", e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            writer_open.store(false, Ordering::SeqCst);
        });

        // Task to receive incoming frames
        let reader_open = open.clone();
        tokio::spawn(async move {
            let reason = loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if evt_tx
                            .send(TransportEvent::Frame(text.as_str().to_owned()))
                            .await
                            .is_err()
                        {
                            break "receiver dropped".to_string();
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            if evt_tx.send(TransportEvent::Frame(text)).await.is_err() {
                                break "receiver dropped".to_string();
                            }
                        }
                        Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!("{} {}", u16::from(frame.code), frame.reason.as_str()),
                            None => "closed by peer".to_string(),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };

            reader_open.store(false, Ordering::SeqCst);
            info!("Disconnected from gateway: {}", reason);
            let _ = evt_tx.send(TransportEvent::Closed { reason }).await;
        });

        Ok((TransportHandle::new(out_tx, open, closing), evt_rx))
    }
}

/// Peer side of an in-memory transport
#[cfg(test)]
pub(crate) struct MemoryPeer {
    pub inbound: mpsc::Sender<TransportEvent>,
    pub outbound: mpsc::Receiver<String>,
    open: Arc<AtomicBool>,
    closing: Arc<Notify>,
}

#[cfg(test)]
impl MemoryPeer {
    pub async fn push(&self, text: impl Into<String>) {
        self.inbound
            .send(TransportEvent::Frame(text.into()))
            .await
            .unwrap();
    }

    /// Next outbound frame
    pub async fn next_frame(&mut self) -> Option<GatewayFrame> {
        let text = self.outbound.recv().await?;
        Some(GatewayFrame::decode(&text).unwrap())
    }

    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }

    /// Resolves once the local side has closed
    pub async fn wait_closed(&self) {
        self.closing.notified().await;
    }
}

/// Transport backed by channels instead of a socket
#[cfg(test)]
pub(crate) fn memory_pair() -> (TransportHandle, TransportEvents, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let (evt_tx, evt_rx) = mpsc::channel(INBOUND_BUFFER);
    let open = Arc::new(AtomicBool::new(true));
    let closing = Arc::new(Notify::new());
    let handle = TransportHandle::new(out_tx, open.clone(), closing.clone());
    (
        handle,
        evt_rx,
        MemoryPeer {
            inbound: evt_tx,
            outbound: out_rx,
            open,
            closing,
        },
    )
}
