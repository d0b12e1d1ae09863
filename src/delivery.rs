// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Delivery receipts: `Sent -> Delivered -> Read`, forward only.

use tracing::debug;

use crate::dialog_store::StatusOutcome;
use crate::error::HubError;
use crate::hub::Hub;
use crate::message::{MessageId, MessageStatus};
use crate::protocol::ServerEvent;

impl Hub {
    pub fn mark_delivered(&self, message_id: MessageId) -> Result<bool, HubError> {
        self.advance(message_id, MessageStatus::Delivered)
    }

    /// Read may be reached straight from Sent.
    pub fn mark_read(&self, message_id: MessageId) -> Result<bool, HubError> {
        self.advance(message_id, MessageStatus::Read)
    }

    /// Returns whether the status actually moved. Only a real transition is
    /// pushed, and only to the two participants.
    fn advance(&self, message_id: MessageId, status: MessageStatus) -> Result<bool, HubError> {
        match self.store.advance_status(message_id, status) {
            None => Err(HubError::NotFound(message_id)),
            Some(StatusOutcome::Unchanged(msg)) => {
                debug!("Message {} already {}, ignoring {}", msg.id, msg.status, status);
                Ok(false)
            }
            Some(StatusOutcome::Advanced(msg)) => {
                self.metrics.status_changes_total.inc();
                self.refresh_store_gauges();
                self.push_to_identities(
                    &[&msg.from_email, &msg.to_email],
                    ServerEvent::MessageStatusChanged {
                        message_id: msg.id,
                        status: msg.status,
                    },
                );
                Ok(true)
            }
        }
    }
}
