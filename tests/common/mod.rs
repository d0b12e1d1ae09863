// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for hub integration tests.
//!
//! Starts a real hub on port 0 and talks to it over WebSocket using raw JSON
//! envelopes, so the wire format is checked from the outside.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use chat_hub::config::HubConfig;
use chat_hub::hub::Hub;
use chat_hub::server::ChatServer;
use chat_hub::storage::StorageBackend;

pub const FRAME_HEADER_SIZE: usize = 4;
const RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Config for an in-memory hub.
#[allow(dead_code)]
pub fn memory_config() -> HubConfig {
    HubConfig {
        storage_backend: StorageBackend::Memory,
        ..HubConfig::default()
    }
}

/// Starts a hub for `config` on an ephemeral port.
pub async fn start_hub(config: HubConfig) -> (SocketAddr, Arc<Hub>) {
    let hub = Arc::new(chat_hub::open_hub(&config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(ChatServer::new(hub.clone(), &config).run(listener));
    (addr, hub)
}

/// Encodes a JSON value into a binary frame (4-byte BE length prefix + JSON).
pub fn encode_envelope(envelope: &Value) -> Vec<u8> {
    let json = serde_json::to_vec(envelope).unwrap();
    let len = json.len() as u32;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + json.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&json);
    frame
}

/// Decodes a binary frame back to a JSON value.
pub fn decode_envelope(data: &[u8]) -> Value {
    assert!(data.len() >= FRAME_HEADER_SIZE, "Frame too short");
    serde_json::from_slice(&data[FRAME_HEADER_SIZE..]).unwrap()
}

/// A connected test client.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    pub connection_id: String,
}

#[allow(dead_code)]
impl TestClient {
    /// Connects as `user` and consumes the `Welcome` push.
    pub async fn connect(addr: SocketAddr, user: &str) -> TestClient {
        let url = format!("ws://{}/chat?user={}", addr, user.replace('@', "%40"));
        let (ws, _) = connect_async(url).await.expect("WebSocket connect failed");
        let mut client = TestClient {
            ws,
            connection_id: String::new(),
        };
        let welcome = client.recv_type("Welcome").await;
        client.connection_id = welcome["connection_id"].as_str().unwrap().to_string();
        client
    }

    /// Sends a call payload in an envelope.
    pub async fn call(&mut self, payload: Value) {
        self.send_envelope(json!({"version": 1, "payload": payload}))
            .await;
    }

    pub async fn send_envelope(&mut self, envelope: Value) {
        self.ws
            .send(Message::Binary(encode_envelope(&envelope)))
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, data: Vec<u8>) {
        self.ws.send(Message::Binary(data)).await.unwrap();
    }

    /// Next envelope of any type.
    pub async fn recv(&mut self) -> Value {
        loop {
            let msg = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("Timed out waiting for push")
                .expect("Stream ended")
                .expect("WebSocket error");
            if let Message::Binary(data) = msg {
                return decode_envelope(&data);
            }
        }
    }

    /// Skips pushes until one with payload `type == kind` arrives; returns its payload.
    pub async fn recv_type(&mut self, kind: &str) -> Value {
        loop {
            let envelope = self.recv().await;
            if envelope["payload"]["type"] == kind {
                return envelope["payload"].clone();
            }
        }
    }

    /// Waits for the next `UserStatusChanged` about `email`; returns the status name.
    pub async fn recv_status(&mut self, email: &str) -> String {
        loop {
            let payload = self.recv_type("UserStatusChanged").await;
            if payload["email"] == email {
                return payload["status"].as_str().unwrap().to_string();
            }
        }
    }

    /// Collects everything pushed within `window`.
    pub async fn drain(&mut self, window: Duration) -> Vec<Value> {
        let mut payloads = Vec::new();
        while let Ok(Some(Ok(msg))) = timeout(window, self.ws.next()).await {
            if let Message::Binary(data) = msg {
                payloads.push(decode_envelope(&data)["payload"].clone());
            }
        }
        payloads
    }

    /// Sends a private message and waits for the echo to learn its id.
    pub async fn send_private(&mut self, to: &str, text: &str) -> u64 {
        self.call(json!({
            "type": "SendPrivateMessage",
            "to_email": to,
            "text": text,
            "is_file": false
        }))
        .await;
        let pushed = self.recv_type("ReceivePrivateMessage").await;
        pushed["message"]["id"].as_u64().unwrap()
    }

    /// Fetches the dialog with `with_email` through a request/reply call.
    pub async fn dialog(&mut self, with_email: &str) -> Vec<Value> {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.send_envelope(json!({
            "version": 1,
            "request_id": request_id,
            "payload": {"type": "GetDialogMessages", "with_email": with_email}
        }))
        .await;
        loop {
            let envelope = self.recv().await;
            if envelope["request_id"] == request_id.as_str() {
                return envelope["payload"]["messages"].as_array().unwrap().clone();
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
