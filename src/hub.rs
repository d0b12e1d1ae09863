// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Hub
//!
//! Owns the registry, presence, dialog store and metrics, and fans events
//! out to connected clients. Per-call operations live in `router`,
//! `delivery` and `edits`; this module holds the connection lifecycle,
//! presence calls and the push helpers they share.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::HubConfig;
use crate::connection_registry::{ConnectionId, ConnectionRegistry, PushFrame, Registration};
use crate::dialog_store::DialogStore;
use crate::directory::{UserDirectory, UserStatus};
use crate::error::HubError;
use crate::metrics::HubMetrics;
use crate::presence::PresenceManager;
use crate::protocol::{create_welcome, encode_message, Envelope, ServerEnvelope, ServerEvent};

/// Tunables the hub takes from configuration.
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub push_buffer: usize,
    pub enforce_message_ownership: bool,
}

impl Default for HubOptions {
    fn default() -> Self {
        HubOptions {
            push_buffer: crate::connection_registry::DEFAULT_PUSH_BUFFER,
            enforce_message_ownership: false,
        }
    }
}

impl From<&HubConfig> for HubOptions {
    fn from(config: &HubConfig) -> Self {
        HubOptions {
            push_buffer: config.push_buffer,
            enforce_message_ownership: config.enforce_message_ownership,
        }
    }
}

/// Who is making a call: the connection and the identity bound at upgrade.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub connection_id: ConnectionId,
    pub identity: String,
}

impl CallerContext {
    /// Short connection label for log lines (never the email).
    pub fn label(&self) -> &str {
        self.connection_id
            .get(..8)
            .unwrap_or(&self.connection_id)
    }
}

/// The hub aggregate, shared by every connection task.
pub struct Hub {
    pub registry: ConnectionRegistry,
    pub presence: PresenceManager,
    pub store: DialogStore,
    pub metrics: HubMetrics,
    pub(crate) enforce_ownership: bool,
}

impl Hub {
    pub fn new(
        store: DialogStore,
        directory: Arc<dyn UserDirectory>,
        metrics: HubMetrics,
        options: HubOptions,
    ) -> Self {
        metrics.messages_stored.set(store.message_count() as i64);
        Hub {
            registry: ConnectionRegistry::with_push_buffer(options.push_buffer),
            presence: PresenceManager::new(directory),
            store,
            metrics,
            enforce_ownership: options.enforce_message_ownership,
        }
    }

    /// Registers a new channel, greets it and announces presence.
    ///
    /// On an identity's first connection, a known user is announced with
    /// `UserRegistered` and then, if it changed, its status.
    pub fn connect(&self, identity: &str) -> (CallerContext, Registration) {
        let registration = self.registry.register(identity);
        let caller = CallerContext {
            connection_id: registration.connection_id.clone(),
            identity: identity.to_string(),
        };

        self.push(
            std::slice::from_ref(&caller.connection_id),
            &create_welcome(&caller.connection_id, identity),
        );

        if registration.first_for_identity {
            if let Some(profile) = self.presence.profile(identity) {
                self.broadcast(ServerEvent::UserRegistered { user: profile });
            }
            self.presence
                .on_first_connect(identity, |status| self.broadcast_status(identity, status));
        }

        info!("[{}] Connected", caller.label());
        (caller, registration)
    }

    /// Removes a channel. The identity goes Offline when it was the last one.
    ///
    /// Status broadcasts happen under the presence lock, so a racing
    /// reconnect can never be overtaken by a stale Offline.
    pub fn disconnect(&self, caller: &CallerContext) {
        let Some(gone) = self.registry.unregister(&caller.connection_id) else {
            // Already removed by logout
            debug!("[{}] Disconnected after logout", caller.label());
            return;
        };

        if gone.remaining == 0 {
            let still_connected = || self.registry.is_connected(&gone.identity);
            self.presence
                .on_last_disconnect(&gone.identity, still_connected, |status| {
                    self.broadcast_status(&gone.identity, status)
                });
        }
        info!(
            "[{}] Disconnected ({} connections left for identity)",
            caller.label(),
            gone.remaining
        );
    }

    /// Explicit status change by numeric code. Broadcast even when unchanged.
    pub fn set_status(&self, caller: &CallerContext, code: i64) -> Result<UserStatus, HubError> {
        let status = UserStatus::from_code(code).ok_or(HubError::Malformed("unknown status code"))?;
        Ok(self.presence.set_status(&caller.identity, status, |status| {
            self.broadcast_status(&caller.identity, status)
        }))
    }

    /// Drops every channel of the caller's identity and announces Offline.
    pub fn logout(&self, caller: &CallerContext) {
        let removed = self.registry.remove_identity(&caller.identity);
        self.presence
            .logout(&caller.identity, |status| self.broadcast_status(&caller.identity, status));
        info!("[{}] Logged out ({} connections closed)", caller.label(), removed);
    }

    fn broadcast_status(&self, email: &str, status: UserStatus) {
        self.metrics.presence_broadcasts.inc();
        self.broadcast(ServerEvent::UserStatusChanged {
            email: email.to_string(),
            status,
        });
    }

    // ------------------------------------------------------------------------
    // Push helpers
    // ------------------------------------------------------------------------

    /// Encodes once and queues the envelope for each target.
    pub(crate) fn push(&self, targets: &[ConnectionId], envelope: &ServerEnvelope) -> usize {
        let data = match encode_message(envelope) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to encode push: {}", e);
                return 0;
            }
        };
        let queued = self.registry.send_to(targets, &PushFrame { data });
        let dropped = targets.len() - queued;
        if dropped > 0 {
            self.metrics.pushes_dropped.inc_by(dropped as u64);
        }
        queued
    }

    /// Pushes to every live connection.
    pub(crate) fn broadcast(&self, event: ServerEvent) -> usize {
        self.push(&self.registry.all_connections(), &Envelope::new(event))
    }

    /// Pushes to every connection of the given identities, once per connection.
    pub(crate) fn push_to_identities(&self, identities: &[&str], event: ServerEvent) -> usize {
        self.push(
            &self.registry.connections_of_any(identities),
            &Envelope::new(event),
        )
    }

    pub(crate) fn refresh_store_gauges(&self) {
        self.metrics
            .messages_stored
            .set(self.store.message_count() as i64);
        self.metrics
            .persist_failures
            .set(self.store.persist_failures() as i64);
    }
}
