//! Canned in-thread replies
//!
//! Subscribes to gateway messages and, for human-authored messages posted
//! inside a support thread the bridge owns, replies after a short delay
//! through its own REST identity.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::bridge::ThreadBridge;
use crate::dispatcher::{Dispatcher, Subscription};
use crate::rest::ThreadApi;
use crate::types::ChatMessage;

pub struct AutoResponder {
    bridge: Arc<ThreadBridge>,
    api: Arc<dyn ThreadApi>,
    text: String,
    delay: Duration,
}

impl AutoResponder {
    pub fn new(
        bridge: Arc<ThreadBridge>,
        api: Arc<dyn ThreadApi>,
        text: impl Into<String>,
        delay: Duration,
    ) -> Self {
        Self {
            bridge,
            api,
            text: text.into(),
            delay,
        }
    }

    /// Thread to reply in, if this message warrants a reply
    fn reply_target(&self, message: &ChatMessage) -> Option<String> {
        if message.author_is_automated || message.is_self || message.is_assistant {
            return None;
        }
        let channel_id = message.channel_id.as_deref()?;
        self.bridge
            .owns_thread(channel_id)
            .then(|| channel_id.to_string())
    }

    /// Must be called from within a tokio runtime; replies are spawned
    pub fn handle(&self, message: &ChatMessage) {
        let Some(thread_id) = self.reply_target(message) else {
            return;
        };

        let api = self.api.clone();
        let text = self.text.clone();
        let delay = self.delay;
        let reply_to = message.id.clone();
        debug!(thread_id = %thread_id, message_id = %reply_to, "Scheduling auto-reply");

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = api.send_message(&thread_id, &text, Some(&reply_to)).await {
                warn!(thread_id = %thread_id, error = %e, "Auto-reply failed");
            }
        });
    }

    /// Register on a message dispatcher
    pub fn subscribe(self: Arc<Self>, dispatcher: &Dispatcher<ChatMessage>) -> Subscription {
        dispatcher.subscribe(move |message: &ChatMessage| {
            self.handle(message);
            Ok(())
        })
    }
}
