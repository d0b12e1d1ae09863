// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Edit/Delete Pipeline
//!
//! Edits and deletes are announced to every connected client, not just the
//! dialog participants. Ownership is only checked when the hub is configured
//! to enforce it.

use chrono::Utc;
use tracing::{info, warn};

use crate::directory::UserProfile;
use crate::error::HubError;
use crate::hub::{CallerContext, Hub};
use crate::message::{ChatMessage, MessageId};
use crate::protocol::ServerEvent;

impl Hub {
    /// Replaces a message's text and moves its timestamp to now.
    pub fn edit_message(
        &self,
        caller: &CallerContext,
        message_id: MessageId,
        text: &str,
    ) -> Result<ChatMessage, HubError> {
        self.check_owner(caller, message_id)?;
        let edited = self
            .store
            .edit(message_id, text, Utc::now())
            .ok_or(HubError::NotFound(message_id))?;

        self.metrics.messages_edited.inc();
        self.refresh_store_gauges();
        self.broadcast(ServerEvent::MessageEdited {
            message_id,
            text: edited.text.clone(),
        });
        Ok(edited)
    }

    /// Removes a message for good.
    pub fn delete_message(
        &self,
        caller: &CallerContext,
        message_id: MessageId,
    ) -> Result<ChatMessage, HubError> {
        self.check_owner(caller, message_id)?;
        let removed = self
            .store
            .delete(message_id)
            .ok_or(HubError::NotFound(message_id))?;

        self.metrics.messages_deleted.inc();
        self.refresh_store_gauges();
        self.broadcast(ServerEvent::MessageDeleted { message_id });
        info!("[{}] Deleted message {}", caller.label(), message_id);
        Ok(removed)
    }

    /// Announces an updated profile to everyone.
    pub fn broadcast_profile_changed(&self, profile: UserProfile) -> usize {
        self.broadcast(ServerEvent::UserProfileChanged { user: profile })
    }

    // The sender of a message never changes and ids are never reused, so a
    // lookup before the mutation is enough.
    fn check_owner(&self, caller: &CallerContext, message_id: MessageId) -> Result<(), HubError> {
        if !self.enforce_ownership {
            return Ok(());
        }
        let msg = self
            .store
            .find(message_id)
            .ok_or(HubError::NotFound(message_id))?;
        if msg.is_sent_by(&caller.identity) {
            Ok(())
        } else {
            warn!(
                "[{}] Refused change to message {} owned by another user",
                caller.label(),
                message_id
            );
            Err(HubError::NotOwner(message_id))
        }
    }
}
