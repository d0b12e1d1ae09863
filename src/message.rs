// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Private Message Model
//!
//! The message record shared by the dialog store, the router and the wire
//! protocol, plus the canonical dialog key that addresses a pair of identities.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Process-wide message id. Assigned once, never reused.
pub type MessageId = u64;

/// Normalizes an identity (email) for lookups. Identities are case-insensitive.
pub fn identity_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Delivery state of a private message. Ordered: `Sent < Delivered < Read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    /// Status name as carried in push events and the message log.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sent => "Sent",
            MessageStatus::Delivered => "Delivered",
            MessageStatus::Read => "Read",
        }
    }

    /// Numeric code used by older message logs.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(MessageStatus::Sent),
            1 => Some(MessageStatus::Delivered),
            2 => Some(MessageStatus::Read),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Sent" => Some(MessageStatus::Sent),
            "Delivered" => Some(MessageStatus::Delivered),
            "Read" => Some(MessageStatus::Read),
            _ => None,
        }
    }

    /// Status only moves forward. `Read` may be reached straight from `Sent`.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        next > self
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order-independent key of the dialog between two identities.
///
/// Both identities are normalized and sorted, so `(a, b)` and `(b, a)`
/// address the same dialog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DialogKey(String);

impl DialogKey {
    pub fn new(a: &str, b: &str) -> Self {
        let a = identity_key(a);
        let b = identity_key(b);
        if a <= b {
            DialogKey(format!("{}|{}", a, b))
        } else {
            DialogKey(format!("{}|{}", b, a))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DialogKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored private message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub from_email: String,
    pub to_email: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub is_file: bool,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default, with = "base64_bytes")]
    pub file_content: Option<Vec<u8>>,
    pub status: MessageStatus,
    /// Carried for log compatibility. Deletion is physical, so this stays false.
    #[serde(default)]
    pub is_deleted: bool,
}

impl ChatMessage {
    /// Dialog this message belongs to, regardless of direction.
    pub fn dialog_key(&self) -> DialogKey {
        DialogKey::new(&self.from_email, &self.to_email)
    }

    /// Whether `email` is the sender.
    pub fn is_sent_by(&self, email: &str) -> bool {
        identity_key(&self.from_email) == identity_key(email)
    }
}

/// A send intent before the store stamps it with id, time and status.
#[derive(Debug, Clone, Default)]
pub struct MessageDraft {
    pub from_email: String,
    pub to_email: String,
    pub text: String,
    pub is_file: bool,
    pub file_name: Option<String>,
    pub file_content: Option<Vec<u8>>,
}

impl MessageDraft {
    pub fn text(from_email: &str, to_email: &str, text: &str) -> Self {
        MessageDraft {
            from_email: from_email.to_string(),
            to_email: to_email.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn stamp(self, id: MessageId, timestamp: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id,
            from_email: self.from_email,
            to_email: self.to_email,
            text: self.text,
            timestamp,
            is_file: self.is_file,
            file_name: self.file_name,
            file_content: self.file_content,
            status: MessageStatus::Sent,
            is_deleted: false,
        }
    }
}

/// Serde adapter: optional byte payloads travel as standard base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        match encoded {
            Some(s) if !s.is_empty() => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}
