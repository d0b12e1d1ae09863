// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Accept Loop
//!
//! Accepts TCP connections, enforces the connection limit and the upgrade
//! timeout, binds the identity from `/chat?user=<email>` and hands the socket
//! to the connection handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::handler::{self, ConnectionDeps};
use crate::hub::Hub;

/// Path of the hub's WebSocket endpoint.
pub const CHAT_PATH: &str = "/chat";

/// Reads the identity from the upgrade request URI.
///
/// The `user` query parameter is percent-decoded and trimmed; a missing or
/// blank value is rejected.
pub fn identity_from_uri(uri: &Uri) -> Result<String, (StatusCode, &'static str)> {
    if uri.path() != CHAT_PATH {
        return Err((StatusCode::NOT_FOUND, "unknown endpoint"));
    }
    let query = uri.query().unwrap_or("");
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "user")
        .map(|(_, value)| value.trim().to_string())
        .filter(|user| !user.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "missing user query parameter"))
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Accepts WebSocket clients for a hub.
pub struct ChatServer {
    hub: Arc<Hub>,
    limiter: Arc<Semaphore>,
    max_connections: usize,
    max_message_size: usize,
    idle_timeout: Duration,
    handshake_timeout: Duration,
}

impl ChatServer {
    pub fn new(hub: Arc<Hub>, config: &HubConfig) -> Self {
        ChatServer {
            hub,
            limiter: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            max_message_size: config.max_message_size,
            idle_timeout: config.idle_timeout(),
            handshake_timeout: config.handshake_timeout(),
        }
    }

    /// Runs the accept loop until the listener fails.
    pub async fn run(self, listener: TcpListener) {
        while let Ok((stream, _addr)) = listener.accept().await {
            // Enforce connection limit
            let permit = match self.limiter.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(
                        "Connection rejected: at max capacity ({})",
                        self.max_connections
                    );
                    self.hub.metrics.connection_errors.inc();
                    drop(stream);
                    continue;
                }
            };

            let deps = ConnectionDeps {
                hub: self.hub.clone(),
                max_message_size: self.max_message_size,
                idle_timeout: self.idle_timeout,
            };
            let handshake_timeout = self.handshake_timeout;

            tokio::spawn(async move {
                // Keep the permit for the lifetime of the connection
                let _permit = permit;
                let metrics = deps.hub.metrics.clone();

                let mut identity = None;
                let callback = |request: &Request, response: Response| {
                    match identity_from_uri(request.uri()) {
                        Ok(user) => {
                            identity = Some(user);
                            Ok(response)
                        }
                        Err((status, reason)) => {
                            debug!("Upgrade refused: {}", reason);
                            Err(reject(status, reason))
                        }
                    }
                };

                // Slowloris protection for clients that never finish the upgrade
                let upgrade = timeout(handshake_timeout, accept_hdr_async(stream, callback)).await;
                match (upgrade, identity) {
                    (Ok(Ok(ws_stream)), Some(identity)) => {
                        metrics.connections_total.inc();
                        metrics.connections_active.inc();
                        handler::handle_connection(ws_stream, identity, deps).await;
                        metrics.connections_active.dec();
                        info!("WebSocket connection closed");
                    }
                    (Ok(Ok(_)), None) => {
                        metrics.connection_errors.inc();
                    }
                    (Ok(Err(e)), _) => {
                        warn!("WebSocket handshake failed: {}", e);
                        metrics.connection_errors.inc();
                    }
                    (Err(_), _) => {
                        warn!("WebSocket handshake timeout (slowloris protection)");
                        metrics.connection_errors.inc();
                    }
                }
            });
        }
    }
}
