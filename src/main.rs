// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Hub Server
//!
//! Real-time private messaging between users identified by email.
//! Provides:
//! - WebSocket endpoint at `/chat?user=<email>` for messages, receipts and presence
//! - HTTP endpoints for health checks and Prometheus metrics
//! - Durable dialog history (JSON file or SQLite)

use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tracing::{info, warn};

use chat_hub::config::HubConfig;
use chat_hub::http::{create_router, HttpState};
use chat_hub::server::ChatServer;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_hub=info".parse().unwrap()),
        )
        .init();

    // Load configuration
    let config = HubConfig::from_env();
    let start_time = Instant::now();

    info!("Starting Chat Hub v{}", env!("CARGO_PKG_VERSION"));
    info!("WebSocket: {}", config.listen_addr);
    info!("Storage: {:?} in {}", config.storage_backend, config.data_dir.display());
    match &config.users_file {
        Some(path) => info!("User directory: {}", path.display()),
        None => warn!("No CHAT_USERS_FILE set, users are tracked in memory only"),
    }
    if config.enforce_message_ownership {
        info!("Edits and deletes restricted to the sender");
    }

    let hub = Arc::new(chat_hub::open_hub(&config).expect("Failed to open message log"));
    info!(
        "Loaded {} messages in {} dialogs",
        hub.store.message_count(),
        hub.store.dialog_count()
    );

    // Health and metrics endpoints
    // By default, bind to localhost for security (metrics contain internal info)
    let http_router = create_router(HttpState {
        hub: hub.clone(),
        metrics_token: config.metrics_token.clone(),
        start_time,
    });
    let http_listener = TcpListener::bind(&config.http_addr)
        .await
        .expect("Failed to bind HTTP listener");
    info!("HTTP server listening on {}", config.http_addr);
    tokio::spawn(async move {
        axum::serve(http_listener, http_router).await.unwrap();
    });

    // Start TCP listener for WebSocket
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .expect("Failed to bind WebSocket listener");
    info!("WebSocket server listening on {}", config.listen_addr);

    ChatServer::new(hub, &config).run(listener).await;
}
