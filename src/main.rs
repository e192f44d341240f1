//! Thread Bridge - Main Entry Point
//!
//! Long-running gateway session for the support bridge:
//! 1. Connects to the platform gateway and keeps the session alive
//! 2. Logs every inbound chat message
//! 3. Optionally answers messages in support threads with a canned reply
//!
//! Reconnects with exponential backoff whenever the connection drops.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thread_bridge::prelude::*;
use thread_bridge::AutoResponder;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,thread_bridge=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Thread bridge starting...");

    // Load configuration
    let config = BridgeConfig::from_env()?;
    info!("📋 Configuration loaded");

    let api: Arc<dyn ThreadApi> = Arc::new(
        PlatformClient::new(&config.api_base, &config.bot_token, config.http_timeout())
            .context("Failed to build platform client")?,
    );
    let bridge = Arc::new(ThreadBridge::new(api.clone(), config.bridge()));
    let gateway = GatewayClient::new(config.gateway());

    let _log_subscription = gateway.subscribe(|message: &ChatMessage| {
        info!(
            "💬 [{}] {}: {}",
            message.channel_id.as_deref().unwrap_or("-"),
            message.author_name.as_deref().unwrap_or(&message.author_id),
            message.content
        );
        Ok(())
    });

    // Auto-responder replies through the assistant identity when one is configured
    let _responder_subscription = match &config.assistant_bot_token {
        Some(token) => {
            let assistant: Arc<dyn ThreadApi> = Arc::new(
                PlatformClient::new(&config.api_base, token, config.http_timeout())
                    .context("Failed to build assistant client")?,
            );
            let responder = Arc::new(AutoResponder::new(
                bridge.clone(),
                assistant,
                config.auto_reply_text.clone(),
                Duration::from_millis(config.auto_reply_delay_ms),
            ));
            info!("🤖 Auto-responder enabled");
            Some(responder.subscribe(gateway.dispatcher()))
        }
        None => {
            info!("⏭️ Auto-responder disabled");
            None
        }
    };

    let supervisor = tokio::spawn(run_gateway(
        gateway.clone(),
        Duration::from_secs(config.reconnect_delay_secs),
        Duration::from_secs(config.reconnect_max_delay_secs),
        Duration::from_secs(config.handshake_timeout_secs),
    ));

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => info!("📢 Shutdown signal received"),
        Err(err) => error!("Unable to listen for shutdown signal: {}", err),
    }

    info!("🛑 Shutting down gateway...");
    supervisor.abort();
    gateway.disconnect();

    info!("✅ Thread bridge stopped");
    Ok(())
}

/// Keep a gateway session open, reconnecting with exponential backoff
async fn run_gateway(
    gateway: GatewayClient,
    base_delay: Duration,
    max_delay: Duration,
    ready_timeout: Duration,
) {
    let mut delay = base_delay;

    loop {
        match gateway.connect().await {
            Ok(()) => {
                if gateway.wait_ready(ready_timeout).await {
                    info!("✅ Gateway session ready");
                    delay = base_delay;
                } else {
                    warn!("Gateway session not ready within {:?}", ready_timeout);
                }
                gateway.closed().await;
            }
            Err(e) => error!("Gateway connection failed: {}", e),
        }

        warn!("🔄 Reconnecting in {:?}", delay);
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(max_delay);
    }
}
