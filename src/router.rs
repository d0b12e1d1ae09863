// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Router
//!
//! Accepts private messages, persists them and pushes them to both
//! participants. Also serves dialog history and the public room.

use tracing::debug;

use crate::error::HubError;
use crate::hub::{CallerContext, Hub};
use crate::message::{ChatMessage, MessageDraft};
use crate::protocol::ServerEvent;

impl Hub {
    /// Sends a private message from the caller.
    ///
    /// The sender is always the caller's identity; `draft.from_email` is
    /// overwritten. The recipient does not have to exist or be online: the
    /// message is stored either way and pushed to whichever connections of
    /// both parties are live.
    pub fn send_private_message(
        &self,
        caller: &CallerContext,
        mut draft: MessageDraft,
    ) -> Result<ChatMessage, HubError> {
        if draft.to_email.trim().is_empty() {
            return Err(HubError::Malformed("to_email is empty"));
        }
        draft.from_email = caller.identity.clone();
        draft.to_email = draft.to_email.trim().to_string();

        let message = self.store.insert(draft);
        self.metrics.private_messages_total.inc();
        self.refresh_store_gauges();

        let pushed = self.push_to_identities(
            &[&message.from_email, &message.to_email],
            ServerEvent::ReceivePrivateMessage {
                message: message.clone(),
            },
        );
        debug!(
            "[{}] Message {} stored, pushed to {} connections",
            caller.label(),
            message.id,
            pushed
        );
        Ok(message)
    }

    /// History between the caller and `with_email`, oldest first.
    pub fn dialog_messages(&self, caller: &CallerContext, with_email: &str) -> Vec<ChatMessage> {
        if with_email.trim().is_empty() {
            return Vec::new();
        }
        self.store.dialog(&caller.identity, with_email)
    }

    /// Public room message. Broadcast to everyone, never stored.
    pub fn send_public_message(&self, user: &str, message: &str) -> usize {
        self.broadcast(ServerEvent::ReceiveMessage {
            user: user.to_string(),
            message: message.to_string(),
        })
    }
}
