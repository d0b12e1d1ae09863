// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Wire Protocol
//!
//! Binary WebSocket frames: a 4-byte big-endian length followed by a JSON
//! envelope. Client calls and server pushes are tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::directory::UserProfile;
use crate::message::{base64_bytes, ChatMessage, MessageId, MessageStatus};

pub const PROTOCOL_VERSION: u8 = 1;
pub const FRAME_HEADER_SIZE: usize = 4;

/// Features announced in `Welcome`.
pub const FEATURES: &[&str] = &[
    "private_messages",
    "delivery_receipts",
    "edit_delete",
    "presence",
    "do_not_disturb",
    "file_messages",
    "public_room",
];

/// Frame envelope shared by both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub version: u8,
    /// Set by the client on calls that expect a reply; echoed in the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub payload: P,
}

pub type ClientEnvelope = Envelope<ClientCall>;
pub type ServerEnvelope = Envelope<ServerEvent>;

impl<P> Envelope<P> {
    pub fn new(payload: P) -> Self {
        Envelope {
            version: PROTOCOL_VERSION,
            request_id: None,
            payload,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Calls a connected client may invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCall {
    SendPrivateMessage {
        to_email: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        is_file: bool,
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default, with = "base64_bytes")]
        file_content: Option<Vec<u8>>,
    },
    GetDialogMessages {
        with_email: String,
    },
    MarkDelivered {
        message_id: MessageId,
    },
    MarkRead {
        message_id: MessageId,
    },
    EditMessage {
        message_id: MessageId,
        text: String,
    },
    DeleteMessage {
        message_id: MessageId,
    },
    /// Numeric status code: 0 Offline, 1 Online, 2 DoNotDisturb.
    SetStatus {
        status: i64,
    },
    Logout,
    // Public room
    SendMessage {
        user: String,
        message: String,
    },
    BroadcastUserProfileChanged {
        user: UserProfile,
    },
    #[serde(other)]
    Unknown,
}

/// Events pushed by the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    Welcome {
        connection_id: String,
        identity: String,
        server_version: String,
        features: Vec<String>,
    },
    ReceivePrivateMessage {
        message: ChatMessage,
    },
    DialogMessages {
        with_email: String,
        messages: Vec<ChatMessage>,
    },
    MessageStatusChanged {
        message_id: MessageId,
        status: MessageStatus,
    },
    MessageEdited {
        message_id: MessageId,
        text: String,
    },
    MessageDeleted {
        message_id: MessageId,
    },
    UserStatusChanged {
        email: String,
        status: crate::directory::UserStatus,
    },
    UserRegistered {
        user: UserProfile,
    },
    UserProfileChanged {
        user: UserProfile,
    },
    ReceiveMessage {
        user: String,
        message: String,
    },
}

/// Creates the greeting pushed right after a connection registers.
pub fn create_welcome(connection_id: &str, identity: &str) -> ServerEnvelope {
    Envelope::new(ServerEvent::Welcome {
        connection_id: connection_id.to_string(),
        identity: identity.to_string(),
        server_version: env!("CARGO_PKG_VERSION").to_string(),
        features: FEATURES.iter().map(|f| f.to_string()).collect(),
    })
}

/// Decodes an envelope from binary data (with length prefix).
pub fn decode_message<P: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<Envelope<P>, String> {
    if data.len() < FRAME_HEADER_SIZE {
        return Err("Frame too short".to_string());
    }

    let mut header = [0u8; FRAME_HEADER_SIZE];
    header.copy_from_slice(&data[..FRAME_HEADER_SIZE]);
    let declared = u32::from_be_bytes(header) as usize;
    let json = &data[FRAME_HEADER_SIZE..];
    if declared != json.len() {
        return Err(format!(
            "Length prefix {} does not match body of {} bytes",
            declared,
            json.len()
        ));
    }

    serde_json::from_slice(json).map_err(|e| e.to_string())
}

/// Encodes an envelope to binary data (with length prefix).
pub fn encode_message<P: Serialize>(envelope: &Envelope<P>) -> Result<Vec<u8>, String> {
    let json = serde_json::to_vec(envelope).map_err(|e| e.to_string())?;
    let len = u32::try_from(json.len()).map_err(|_| "Frame too large".to_string())?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + json.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&json);

    Ok(frame)
}
