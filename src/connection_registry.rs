// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Registry
//!
//! Tracks live connections so the hub can push events to them.
//!
//! Each connection gets a fresh id and a bounded channel. The registry maps
//! connection ids to identities and back; one identity may hold several
//! connections at once (multi-device). It does not decide presence: it only
//! reports when an identity's connection count leaves or reaches zero.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::message::identity_key;

/// Ephemeral handle of one live channel.
pub type ConnectionId = String;

/// Default per-connection push buffer.
pub const DEFAULT_PUSH_BUFFER: usize = 64;

/// A pre-encoded frame pushed to a connected client.
#[derive(Debug, Clone)]
pub struct PushFrame {
    /// The encoded binary frame to send over WebSocket.
    pub data: Vec<u8>,
}

/// Result of registering a new channel.
#[derive(Debug)]
pub struct Registration {
    pub connection_id: ConnectionId,
    pub receiver: mpsc::Receiver<PushFrame>,
    /// True when the identity had no live connection before this one.
    pub first_for_identity: bool,
}

/// Result of removing a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    /// Identity as supplied when the channel was registered.
    pub identity: String,
    /// Live connections the identity still holds.
    pub remaining: usize,
}

struct Connection {
    identity: String,
    tx: mpsc::Sender<PushFrame>,
}

#[derive(Default)]
struct Connections {
    by_id: HashMap<ConnectionId, Connection>,
    by_identity: HashMap<String, HashSet<ConnectionId>>,
}

/// Thread-safe registry of connected clients.
pub struct ConnectionRegistry {
    connections: RwLock<Connections>,
    push_buffer: usize,
}

impl ConnectionRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::with_push_buffer(DEFAULT_PUSH_BUFFER)
    }

    /// Creates a registry whose connections buffer up to `push_buffer` frames.
    pub fn with_push_buffer(push_buffer: usize) -> Self {
        ConnectionRegistry {
            connections: RwLock::new(Connections::default()),
            push_buffer: push_buffer.max(1),
        }
    }

    /// Registers a new channel for `identity`.
    pub fn register(&self, identity: &str) -> Registration {
        let (tx, receiver) = mpsc::channel(self.push_buffer);
        let connection_id = uuid::Uuid::new_v4().to_string();

        let mut connections = self.connections.write().unwrap();
        let ids = connections
            .by_identity
            .entry(identity_key(identity))
            .or_default();
        let first_for_identity = ids.is_empty();
        ids.insert(connection_id.clone());
        connections.by_id.insert(
            connection_id.clone(),
            Connection {
                identity: identity.to_string(),
                tx,
            },
        );

        Registration {
            connection_id,
            receiver,
            first_for_identity,
        }
    }

    /// Removes a channel. Returns `None` if it was already gone (e.g. after logout).
    pub fn unregister(&self, connection_id: &str) -> Option<Unregistered> {
        let mut connections = self.connections.write().unwrap();
        let conn = connections.by_id.remove(connection_id)?;
        let key = identity_key(&conn.identity);
        let remaining = match connections.by_identity.get_mut(&key) {
            Some(ids) => {
                ids.remove(connection_id);
                ids.len()
            }
            None => 0,
        };
        if remaining == 0 {
            connections.by_identity.remove(&key);
        }
        Some(Unregistered {
            identity: conn.identity,
            remaining,
        })
    }

    /// Removes every channel of `identity`. Returns how many were removed.
    ///
    /// The removed channels stop receiving pushes; their sockets stay open
    /// until the client closes them.
    pub fn remove_identity(&self, identity: &str) -> usize {
        let mut connections = self.connections.write().unwrap();
        let ids = connections
            .by_identity
            .remove(&identity_key(identity))
            .unwrap_or_default();
        for id in &ids {
            connections.by_id.remove(id);
        }
        ids.len()
    }

    /// Identity behind a connection.
    pub fn identity_of(&self, connection_id: &str) -> Option<String> {
        let connections = self.connections.read().unwrap();
        connections
            .by_id
            .get(connection_id)
            .map(|c| c.identity.clone())
    }

    /// Live connections of `identity`.
    pub fn connections_of(&self, identity: &str) -> Vec<ConnectionId> {
        let connections = self.connections.read().unwrap();
        connections
            .by_identity
            .get(&identity_key(identity))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Deduplicated union of the live connections of several identities.
    pub fn connections_of_any(&self, identities: &[&str]) -> Vec<ConnectionId> {
        let connections = self.connections.read().unwrap();
        let mut targets: HashSet<ConnectionId> = HashSet::new();
        for identity in identities {
            if let Some(ids) = connections.by_identity.get(&identity_key(identity)) {
                targets.extend(ids.iter().cloned());
            }
        }
        targets.into_iter().collect()
    }

    /// Every live connection.
    pub fn all_connections(&self) -> Vec<ConnectionId> {
        let connections = self.connections.read().unwrap();
        connections.by_id.keys().cloned().collect()
    }

    /// Queues a frame for one connection. Returns false if the connection is
    /// gone or its buffer is full; the frame is then dropped.
    pub fn try_send(&self, connection_id: &str, frame: PushFrame) -> bool {
        let connections = self.connections.read().unwrap();
        let Some(conn) = connections.by_id.get(connection_id) else {
            return false;
        };
        match conn.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Push buffer full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Push channel closed, dropping frame");
                false
            }
        }
    }

    /// Queues the same frame for each target. Returns how many were queued.
    pub fn send_to(&self, targets: &[ConnectionId], frame: &PushFrame) -> usize {
        targets
            .iter()
            .filter(|id| self.try_send(id, frame.clone()))
            .count()
    }

    /// Returns whether `identity` has at least one live connection.
    pub fn is_connected(&self, identity: &str) -> bool {
        let connections = self.connections.read().unwrap();
        connections
            .by_identity
            .contains_key(&identity_key(identity))
    }

    /// Returns the number of currently connected channels.
    pub fn connected_count(&self) -> usize {
        let connections = self.connections.read().unwrap();
        connections.by_id.len()
    }

    /// Returns the number of identities with at least one live channel.
    pub fn identity_count(&self) -> usize {
        let connections = self.connections.read().unwrap();
        connections.by_identity.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
