// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error Types
//!
//! `StoreError` covers durable-write and load failures of the message log and
//! user directory. `HubError` covers call-level failures raised by the hub.
//! Neither is ever sent back to a client: the connection handler logs them.

use thiserror::Error;

use crate::message::MessageId;

/// Failure of a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed log data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Failure of a hub operation invoked by a connected client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The message id does not exist (never created, or already deleted).
    #[error("message {0} not found")]
    NotFound(MessageId),
    /// A required field of the call is missing or out of range.
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    /// Caller is not the sender of the message and ownership is enforced.
    #[error("caller does not own message {0}")]
    NotOwner(MessageId),
}

impl HubError {
    /// Unknown ids are expected (racing deletes, stale clients) and stay quiet.
    pub fn is_silent(&self) -> bool {
        matches!(self, HubError::NotFound(_))
    }
}
