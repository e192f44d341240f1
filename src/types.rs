//! Message and thread types shared by the gateway, bridge and relay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Gateway Payloads (platform -> bridge)
// =============================================================================

/// Author object embedded in message payloads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Set for automated (bot) accounts
    #[serde(default)]
    pub bot: bool,
}

/// Reply reference attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReference {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Payload of a message-created dispatch
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub author: Author,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_reference: Option<MessageReference>,
}

/// Payload of the ready dispatch
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    pub user: Author,
}

// =============================================================================
// Application Messages (bridge -> chat widget)
// =============================================================================

/// Chat message delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    /// Channel or thread the message was posted in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Message this one replies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_reference: Option<String>,
    pub author_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    pub author_is_automated: bool,
    /// Authored by the configured assistant identity
    pub is_assistant: bool,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Authored by this session's own identity
    pub is_self: bool,
}

impl ChatMessage {
    /// Build from a message-created payload
    pub fn from_payload(
        payload: MessagePayload,
        self_id: Option<&str>,
        assistant_id: Option<&str>,
    ) -> Self {
        let is_self = self_id == Some(payload.author.id.as_str());
        let is_assistant = assistant_id == Some(payload.author.id.as_str());
        Self {
            id: payload.id,
            channel_id: payload.channel_id,
            thread_reference: payload.message_reference.and_then(|r| r.message_id),
            author_id: payload.author.id,
            author_name: payload.author.username,
            author_is_automated: payload.author.bot,
            is_assistant,
            content: payload.content,
            timestamp: payload.timestamp,
            is_self,
        }
    }
}

// =============================================================================
// Users and Threads
// =============================================================================

/// End-user of the chat widget, as known to the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl ChatUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Human-readable label used in thread names: `Name[id]`
    pub fn label(&self) -> String {
        format!("{}[{}]", self.name, self.id)
    }

    /// First message posted into a freshly created support thread
    pub fn intro_message(&self) -> String {
        let mut intro = format!("📝 **New Support Thread**\nUser: {}\n", self.name);
        if let Some(email) = &self.email {
            intro.push_str(&format!("Email: {}\n", email));
        }
        intro.push_str(&format!(
            "ID: {}\n\nThe user has started a support conversation. Please assist them with their inquiry.",
            self.id
        ));
        intro
    }
}

/// Remote thread as seen through the REST surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

/// Thread creation request
#[derive(Debug, Clone, Serialize)]
pub struct NewThread {
    pub name: String,
    pub auto_archive_duration: u32,
}

/// Message accepted by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// Result of relaying one user message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub thread_id: String,
    pub message_id: String,
}

/// Outcome of a thread action such as resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}
