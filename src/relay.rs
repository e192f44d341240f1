//! User message relay
//!
//! Resolves the user's thread through the bridge and submits the raw text
//! over REST. Every failure comes back as a single `RelayFailed`.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bridge::ThreadBridge;
use crate::error::{ApiError, RelayCause, RelayFailed};
use crate::session::ConnectionState;
use crate::types::{ChatUser, Delivery};

/// Platform limit for one message
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Split content into chunks of at most `limit` bytes, preferring newlines
pub fn chunk_message(content: &str, limit: usize) -> Vec<&str> {
    if content.len() <= limit {
        return vec![content];
    }

    let mut chunks = Vec::new();
    let mut remaining = content;

    while !remaining.is_empty() {
        if remaining.len() <= limit {
            chunks.push(remaining);
            break;
        }

        let mut boundary = limit;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let split_at = match remaining[..boundary].rfind('\n') {
            Some(0) | None => boundary,
            Some(newline) => newline,
        };

        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk);
        remaining = rest.strip_prefix('\n').unwrap_or(rest);
    }

    chunks
}

pub struct MessageRelay {
    bridge: Arc<ThreadBridge>,
    session: Option<watch::Receiver<ConnectionState>>,
}

impl MessageRelay {
    pub fn new(bridge: Arc<ThreadBridge>) -> Self {
        Self {
            bridge,
            session: None,
        }
    }

    /// Refuse to relay while the watched gateway session is not ready
    pub fn with_session(mut self, state: watch::Receiver<ConnectionState>) -> Self {
        self.session = Some(state);
        self
    }

    pub fn bridge(&self) -> &Arc<ThreadBridge> {
        &self.bridge
    }

    fn session_ready(&self) -> bool {
        self.session
            .as_ref()
            .is_none_or(|state| *state.borrow() == ConnectionState::Ready)
    }

    /// Relay one message from `user` into their support thread
    pub async fn send_user_message(
        &self,
        user: &ChatUser,
        content: &str,
    ) -> Result<Delivery, RelayFailed> {
        if content.trim().is_empty() {
            return Err(RelayFailed::new(&user.id, RelayCause::EmptyContent));
        }
        if !self.session_ready() {
            warn!(user_id = %user.id, "Relay refused: gateway session not ready");
            return Err(RelayFailed::new(&user.id, RelayCause::SessionUnavailable));
        }

        let thread_id = self
            .bridge
            .resolve_thread(user)
            .await
            .map_err(|e| RelayFailed::new(&user.id, RelayCause::ThreadResolution(e)))?;

        match self.submit(&thread_id, content).await {
            Ok(message_id) => {
                info!("📤 Relayed message {} from {} to thread {}", message_id, user.id, thread_id);
                Ok(Delivery {
                    thread_id,
                    message_id,
                })
            }
            Err((sent, e)) => {
                if e.is_not_found() {
                    debug!(thread_id = %thread_id, "Thread vanished, dropping mapping");
                    self.bridge.forget_thread(&thread_id);
                }
                let cause = if sent.is_empty() {
                    RelayCause::Submission(e)
                } else {
                    warn!(
                        thread_id = %thread_id,
                        posted = sent.len(),
                        "Message only partially relayed"
                    );
                    RelayCause::PartialSubmission { sent, cause: e }
                };
                Err(RelayFailed::new(&user.id, cause))
            }
        }
    }

    /// Post every chunk; returns the id of the last one
    ///
    /// On failure, also returns the ids of the chunks already posted.
    async fn submit(
        &self,
        thread_id: &str,
        content: &str,
    ) -> Result<String, (Vec<String>, ApiError)> {
        let mut sent = Vec::new();
        for chunk in chunk_message(content, MAX_MESSAGE_LENGTH) {
            match self.bridge.api().send_message(thread_id, chunk, None).await {
                Ok(message) => sent.push(message.id),
                Err(e) => return Err((sent, e)),
            }
        }
        sent.pop()
            .ok_or_else(|| (Vec::new(), ApiError::Decode("nothing was sent".to_string())))
    }
}
