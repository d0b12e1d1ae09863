// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connection Handler
//!
//! Handles individual client connections: registers the channel with the
//! hub, dispatches client calls and forwards pushes from other handlers.
//! Replies to request/response calls are written straight to the socket;
//! only pushes go through the registry buffer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::error::HubError;
use crate::hub::{CallerContext, Hub};
use crate::message::MessageDraft;
use crate::protocol::{self, ClientCall, ClientEnvelope, Envelope, ServerEnvelope, ServerEvent};

/// Shared dependencies for handling a WebSocket connection.
#[derive(Clone)]
pub struct ConnectionDeps {
    pub hub: Arc<Hub>,
    pub max_message_size: usize,
    pub idle_timeout: Duration,
}

/// Handles a WebSocket connection for an identity bound at upgrade time.
pub async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    identity: String,
    deps: ConnectionDeps,
) {
    let ConnectionDeps {
        hub,
        max_message_size,
        idle_timeout,
    } = deps;

    let (mut write, mut read) = ws_stream.split();
    let (caller, mut registration) = hub.connect(&identity);
    let session = caller.label().to_string();

    // Multiplex client frames with pushes queued by other handlers
    loop {
        let msg = tokio::select! {
            ws_msg = timeout(idle_timeout, read.next()) => {
                match ws_msg {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        debug!("[{}] Disconnected", session);
                        break;
                    }
                    Err(_) => {
                        warn!("[{}] Idle timeout (slowloris protection)", session);
                        break;
                    }
                }
            }
            Some(frame) = registration.receiver.recv() => {
                if write.send(Message::Binary(frame.data)).await.is_err() {
                    debug!("[{}] Failed to forward push", session);
                    break;
                }
                continue;
            }
        };

        match msg {
            Ok(Message::Binary(data)) => {
                if data.len() > max_message_size {
                    warn!("[{}] Message too large: {} bytes", session, data.len());
                    hub.metrics.calls_rejected.inc();
                    continue;
                }

                let envelope: ClientEnvelope = match protocol::decode_message(&data) {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("[{}] Failed to decode message: {}", session, e);
                        hub.metrics.calls_rejected.inc();
                        continue;
                    }
                };

                hub.metrics.calls_received.inc();
                let started = Instant::now();
                let reply = match handle_call(&hub, &caller, envelope) {
                    Ok(reply) => reply,
                    Err(e) => {
                        if e.is_silent() {
                            debug!("[{}] {}", session, e);
                        } else {
                            warn!("[{}] Call refused: {}", session, e);
                            hub.metrics.calls_rejected.inc();
                        }
                        None
                    }
                };
                hub.metrics
                    .call_duration
                    .observe(started.elapsed().as_secs_f64());

                if let Some(reply) = reply {
                    match protocol::encode_message(&reply) {
                        Ok(data) => {
                            if write.send(Message::Binary(data)).await.is_err() {
                                debug!("[{}] Failed to send reply", session);
                                break;
                            }
                        }
                        Err(e) => warn!("[{}] Failed to encode reply: {}", session, e),
                    }
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                debug!("[{}] Client sent close", session);
                break;
            }
            Ok(_) => {
                // Ignore text, pong, etc.
            }
            Err(e) => {
                warn!("[{}] Connection error: {}", session, e);
                break;
            }
        }
    }

    hub.disconnect(&caller);
}

/// Dispatches one decoded client call.
///
/// Returns the reply for request/response calls, to be written on the
/// caller's own socket.
pub fn handle_call(
    hub: &Hub,
    caller: &CallerContext,
    envelope: ClientEnvelope,
) -> Result<Option<ServerEnvelope>, HubError> {
    let ClientEnvelope {
        request_id,
        payload,
        ..
    } = envelope;

    match payload {
        ClientCall::SendPrivateMessage {
            to_email,
            text,
            is_file,
            file_name,
            file_content,
        } => {
            hub.send_private_message(
                caller,
                MessageDraft {
                    from_email: caller.identity.clone(),
                    to_email,
                    text,
                    is_file,
                    file_name,
                    file_content,
                },
            )?;
        }
        ClientCall::GetDialogMessages { with_email } => {
            let messages = hub.dialog_messages(caller, &with_email);
            let reply = Envelope::new(ServerEvent::DialogMessages {
                with_email,
                messages,
            })
            .with_request_id(request_id);
            return Ok(Some(reply));
        }
        ClientCall::MarkDelivered { message_id } => {
            hub.mark_delivered(message_id)?;
        }
        ClientCall::MarkRead { message_id } => {
            hub.mark_read(message_id)?;
        }
        ClientCall::EditMessage { message_id, text } => {
            hub.edit_message(caller, message_id, &text)?;
        }
        ClientCall::DeleteMessage { message_id } => {
            hub.delete_message(caller, message_id)?;
        }
        ClientCall::SetStatus { status } => {
            hub.set_status(caller, status)?;
        }
        ClientCall::Logout => hub.logout(caller),
        ClientCall::SendMessage { user, message } => {
            hub.send_public_message(&user, &message);
        }
        ClientCall::BroadcastUserProfileChanged { user } => {
            hub.broadcast_profile_changed(user);
        }
        ClientCall::Unknown => {
            debug!("[{}] Unknown message type", caller.label());
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::tests::{drain, hub_with_users};

    #[tokio::test]
    async fn test_dialog_reply_echoes_request_id() {
        let hub = hub_with_users(&["a@x", "b@x"]);
        let (alice, mut a) = hub.connect("a@x");
        handle_call(
            &hub,
            &alice,
            Envelope::new(ClientCall::SendPrivateMessage {
                to_email: "b@x".into(),
                text: "hi".into(),
                is_file: false,
                file_name: None,
                file_content: None,
            }),
        )
        .unwrap();
        drain(&mut a.receiver);

        let call = Envelope::new(ClientCall::GetDialogMessages {
            with_email: "b@x".into(),
        })
        .with_request_id(Some("req-1".into()));
        let reply = handle_call(&hub, &alice, call).unwrap().unwrap();

        assert_eq!(reply.request_id.as_deref(), Some("req-1"));
        match reply.payload {
            ServerEvent::DialogMessages { messages, .. } => assert_eq!(messages.len(), 1),
            other => panic!("unexpected reply: {:?}", other),
        }
        // Replies bypass the push buffer
        assert!(drain(&mut a.receiver).is_empty());
    }

    #[tokio::test]
    async fn test_dialog_reply_survives_full_push_buffer() {
        let hub = hub_with_users(&["a@x"]);
        let (alice, mut a) = hub.connect("a@x");
        for i in 0..70 {
            hub.send_public_message("a@x", &format!("flood {}", i));
        }

        let call = Envelope::new(ClientCall::GetDialogMessages {
            with_email: "b@x".into(),
        })
        .with_request_id(Some("req-1".into()));
        let reply = handle_call(&hub, &alice, call).unwrap().unwrap();
        assert_eq!(reply.request_id.as_deref(), Some("req-1"));
        assert!(matches!(reply.payload, ServerEvent::DialogMessages { .. }));
        assert!(hub.metrics.pushes_dropped.get() > 0);
        drain(&mut a.receiver);
    }

    #[tokio::test]
    async fn test_dialog_reply_after_logout() {
        let hub = hub_with_users(&["a@x"]);
        let (alice, _a) = hub.connect("a@x");
        hub.logout(&alice);

        let call = Envelope::new(ClientCall::GetDialogMessages {
            with_email: "b@x".into(),
        })
        .with_request_id(Some("req-2".into()));
        let reply = handle_call(&hub, &alice, call).unwrap().unwrap();
        assert_eq!(reply.request_id.as_deref(), Some("req-2"));
    }

    #[tokio::test]
    async fn test_push_calls_have_no_reply() {
        let hub = hub_with_users(&["a@x"]);
        let (alice, _a) = hub.connect("a@x");
        let reply = handle_call(&hub, &alice, Envelope::new(ClientCall::SetStatus { status: 2 }))
            .unwrap();
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_sender_comes_from_connection() {
        let hub = hub_with_users(&["a@x", "b@x"]);
        let (alice, _a) = hub.connect("a@x");
        handle_call(
            &hub,
            &alice,
            Envelope::new(ClientCall::SendPrivateMessage {
                to_email: "b@x".into(),
                text: "hi".into(),
                is_file: false,
                file_name: None,
                file_content: None,
            }),
        )
        .unwrap();

        assert_eq!(hub.store.find(1).unwrap().from_email, "a@x");
    }

    #[tokio::test]
    async fn test_unknown_ids_and_calls_are_quiet() {
        let hub = hub_with_users(&["a@x"]);
        let (alice, _a) = hub.connect("a@x");

        let err = handle_call(&hub, &alice, Envelope::new(ClientCall::MarkRead { message_id: 9 }))
            .unwrap_err();
        assert!(err.is_silent());
        assert!(matches!(
            handle_call(&hub, &alice, Envelope::new(ClientCall::Unknown)),
            Ok(None)
        ));
    }

    #[tokio::test]
    async fn test_bad_status_code_is_malformed() {
        let hub = hub_with_users(&["a@x"]);
        let (alice, _a) = hub.connect("a@x");
        let err = handle_call(&hub, &alice, Envelope::new(ClientCall::SetStatus { status: -1 }))
            .unwrap_err();
        assert!(matches!(err, HubError::Malformed(_)));
    }
}
