//! Thread Bridge Library
//!
//! Bridges a web chat widget to a real-time messaging platform: each
//! end-user gets one support thread, user messages are relayed into it, and
//! replies arrive over the platform's event gateway.
//!
//! # Architecture
//!
//! ```text
//! read path:   Gateway ──WebSocket──▶ Transport ─▶ Session ─▶ Dispatcher ─▶ subscribers
//! write path:  Relay ─▶ ThreadBridge ─▶ PlatformClient ──HTTPS──▶ Platform REST API
//! ```
//!
//! # Usage
//!
//! ```bash
//! export BOT_TOKEN=your_bot_token
//! export SUPPORT_CHANNEL_ID=123456789012345678
//! export ASSISTANT_BOT_TOKEN=other_bot_token   # optional auto-responder
//!
//! thread-bridge
//! ```
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use thread_bridge::prelude::*;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = BridgeConfig::from_env()?;
//! let api = Arc::new(PlatformClient::new(&config.api_base, &config.bot_token, config.http_timeout())?);
//! let bridge = Arc::new(ThreadBridge::new(api, config.bridge()));
//!
//! let gateway = GatewayClient::new(config.gateway());
//! let _sub = gateway.subscribe(|message| {
//!     println!("{}: {}", message.author_id, message.content);
//!     Ok(())
//! });
//! gateway.connect().await?;
//!
//! let relay = MessageRelay::new(bridge).with_session(gateway.state());
//! relay.send_user_message(&ChatUser::new("u1", "Alex"), "Hello!").await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod relay;
pub mod responder;
pub mod rest;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use bridge::ThreadBridge;
pub use config::BridgeConfig;
pub use dispatcher::{Dispatcher, Subscription};
pub use error::{ApiError, GatewayError, RelayCause, RelayFailed};
pub use gateway::GatewayClient;
pub use relay::MessageRelay;
pub use responder::AutoResponder;
pub use rest::{PlatformClient, ThreadApi};
pub use session::{ConnectionState, SessionStatus};
pub use types::*;

/// Prelude for common imports
pub mod prelude {
    pub use crate::bridge::ThreadBridge;
    pub use crate::config::BridgeConfig;
    pub use crate::error::{ApiError, GatewayError, RelayFailed};
    pub use crate::gateway::GatewayClient;
    pub use crate::relay::MessageRelay;
    pub use crate::rest::{PlatformClient, ThreadApi};
    pub use crate::session::ConnectionState;
    pub use crate::types::*;
}
