//! Platform REST client
//!
//! Handles:
//! - Thread lookup (existence / archived check)
//! - Thread creation under the support channel
//! - Message submission into a thread
//! - Thread archival

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::types::{NewThread, SentMessage, ThreadInfo};

/// Public thread channel type
const PUBLIC_THREAD: u8 = 11;

/// REST operations the bridge needs from the platform
#[async_trait]
pub trait ThreadApi: Send + Sync {
    /// Fetch a thread; `RemoteNotFound` if it no longer exists
    async fn fetch_thread(&self, thread_id: &str) -> ApiResult<ThreadInfo>;

    /// Create a thread under `channel_id`
    async fn create_thread(&self, channel_id: &str, thread: &NewThread) -> ApiResult<ThreadInfo>;

    /// Post a text message, optionally as a reply
    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> ApiResult<SentMessage>;

    /// Mark a thread archived
    async fn archive_thread(&self, thread_id: &str) -> ApiResult<()>;
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    thread_metadata: Option<ThreadMetadata>,
}

#[derive(Debug, Deserialize)]
struct ThreadMetadata {
    #[serde(default)]
    archived: bool,
}

impl From<ChannelResponse> for ThreadInfo {
    fn from(channel: ChannelResponse) -> Self {
        Self {
            id: channel.id,
            name: channel.name,
            archived: channel.thread_metadata.is_some_and(|m| m.archived),
        }
    }
}

// =============================================================================
// Platform Client
// =============================================================================

/// REST client authenticated as one bot identity
#[derive(Clone)]
pub struct PlatformClient {
    api_base: String,
    token: String,
    http_client: Client,
}

impl PlatformClient {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> ApiResult<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }

    /// Map non-success statuses to typed errors
    async fn check(response: Response, resource: &str) -> ApiResult<Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::RemoteNotFound(resource.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Platform error for {}: {} - {}", resource, status, body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> ApiResult<T> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ThreadApi for PlatformClient {
    async fn fetch_thread(&self, thread_id: &str) -> ApiResult<ThreadInfo> {
        debug!("Fetching thread {}", thread_id);

        let response = self
            .http_client
            .get(self.url(&format!("/channels/{}", thread_id)))
            .header("Authorization", self.authorization())
            .send()
            .await?;

        let response = Self::check(response, &format!("thread {}", thread_id)).await?;
        let channel: ChannelResponse = Self::decode(response).await?;
        Ok(channel.into())
    }

    async fn create_thread(&self, channel_id: &str, thread: &NewThread) -> ApiResult<ThreadInfo> {
        debug!("Creating thread {:?} in channel {}", thread.name, channel_id);

        let body = json!({
            "name": thread.name,
            "auto_archive_duration": thread.auto_archive_duration,
            "type": PUBLIC_THREAD,
        });

        let response = self
            .http_client
            .post(self.url(&format!("/channels/{}/threads", channel_id)))
            .header("Authorization", self.authorization())
            .json(&body)
            .send()
            .await?;

        let response = Self::check(response, &format!("channel {}", channel_id)).await?;
        let channel: ChannelResponse = Self::decode(response).await?;
        info!("Thread created successfully: {}", channel.id);
        Ok(channel.into())
    }

    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> ApiResult<SentMessage> {
        debug!(
            "Sending message to {}: {} chars",
            channel_id,
            content.chars().count()
        );

        let mut body = json!({ "content": content });
        if let Some(message_id) = reply_to {
            body["message_reference"] = json!({ "message_id": message_id });
        }

        let response = self
            .http_client
            .post(self.url(&format!("/channels/{}/messages", channel_id)))
            .header("Authorization", self.authorization())
            .json(&body)
            .send()
            .await?;

        let response = Self::check(response, &format!("thread {}", channel_id)).await?;
        Self::decode(response).await
    }

    async fn archive_thread(&self, thread_id: &str) -> ApiResult<()> {
        debug!("Archiving thread {}", thread_id);

        let response = self
            .http_client
            .patch(self.url(&format!("/channels/{}", thread_id)))
            .header("Authorization", self.authorization())
            .json(&json!({ "archived": true }))
            .send()
            .await?;

        Self::check(response, &format!("thread {}", thread_id)).await?;
        info!("Thread {} archived", thread_id);
        Ok(())
    }
}
