// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Dialog Store
//!
//! In-memory index of every private message, grouped by dialog, backed by a
//! durable `MessageLog`. Owns the message id counter.
//!
//! One coarse mutex guards all mutations and snapshot reads. The log write
//! happens inside that critical section, so writers never interleave partial
//! state. Durability is best-effort: a failed log write is logged and counted,
//! and the in-memory mutation stands.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::message::{ChatMessage, DialogKey, MessageDraft, MessageId, MessageStatus};
use crate::storage::{LogChange, MemoryMessageLog, MessageLog};

/// Result of a status request on an existing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Status moved forward and was persisted.
    Advanced(ChatMessage),
    /// Message already at or past the requested status. Nothing changed.
    Unchanged(ChatMessage),
}

#[derive(Default)]
struct Dialogs {
    by_key: HashMap<DialogKey, Vec<ChatMessage>>,
    key_of: HashMap<MessageId, DialogKey>,
}

impl Dialogs {
    fn push(&mut self, msg: ChatMessage) {
        let key = msg.dialog_key();
        self.key_of.insert(msg.id, key.clone());
        self.by_key.entry(key).or_default().push(msg);
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        let key = self.key_of.get(&id)?;
        self.by_key.get_mut(key)?.iter_mut().find(|m| m.id == id)
    }

    fn get(&self, id: MessageId) -> Option<&ChatMessage> {
        let key = self.key_of.get(&id)?;
        self.by_key.get(key)?.iter().find(|m| m.id == id)
    }

    fn remove(&mut self, id: MessageId) -> Option<ChatMessage> {
        let key = self.key_of.remove(&id)?;
        let list = self.by_key.get_mut(&key)?;
        let pos = list.iter().position(|m| m.id == id)?;
        let removed = list.remove(pos);
        if list.is_empty() {
            self.by_key.remove(&key);
        }
        Some(removed)
    }
}

/// Durable, canonically keyed collection of per-pair message histories.
pub struct DialogStore {
    dialogs: Mutex<Dialogs>,
    last_id: AtomicU64,
    log: Box<dyn MessageLog>,
    persist_failures: AtomicU64,
}

impl DialogStore {
    /// Opens the store, replaying the log in order to rebuild the index.
    ///
    /// A missing log yields an empty store. So does a corrupt one, after a
    /// warning: startup never fails on bad history. The id counter never
    /// starts below the highest id the log still holds.
    pub fn open(log: Box<dyn MessageLog>) -> Self {
        let messages = match log.load() {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Message log unreadable, starting with empty history: {}", e);
                Vec::new()
            }
        };

        let mut dialogs = Dialogs::default();
        let mut last_id = 0;
        for msg in messages {
            if dialogs.key_of.contains_key(&msg.id) {
                warn!("Skipping duplicate message id {} in log", msg.id);
                continue;
            }
            last_id = last_id.max(msg.id);
            dialogs.push(msg);
        }

        match log.max_id() {
            Ok(Some(stored)) if stored > last_id => {
                warn!("Message log holds unreadable entries up to id {}", stored);
                last_id = stored;
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to read highest stored message id: {}", e),
        }

        info!(
            "Loaded {} messages in {} dialogs (last id {})",
            dialogs.key_of.len(),
            dialogs.by_key.len(),
            last_id
        );

        DialogStore {
            dialogs: Mutex::new(dialogs),
            last_id: AtomicU64::new(last_id),
            log,
            persist_failures: AtomicU64::new(0),
        }
    }

    /// Creates a store with no durable backing (for testing).
    pub fn in_memory() -> Self {
        Self::open(Box::new(MemoryMessageLog::new()))
    }

    /// Stamps a draft with the next id, the current time and `Sent`, stores it
    /// and persists before returning.
    pub fn insert(&self, draft: MessageDraft) -> ChatMessage {
        let mut dialogs = self.dialogs.lock().unwrap();
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let msg = draft.stamp(id, Utc::now());
        dialogs.push(msg.clone());
        self.persist(&dialogs, LogChange::Insert(&msg));
        msg
    }

    /// Snapshot of the dialog between `a` and `b`, oldest first.
    pub fn dialog(&self, a: &str, b: &str) -> Vec<ChatMessage> {
        let key = DialogKey::new(a, b);
        let mut messages = {
            let dialogs = self.dialogs.lock().unwrap();
            dialogs.by_key.get(&key).cloned().unwrap_or_default()
        };
        messages.sort_by(|x, y| x.timestamp.cmp(&y.timestamp).then(x.id.cmp(&y.id)));
        messages
    }

    /// Looks a message up by id across all dialogs.
    pub fn find(&self, id: MessageId) -> Option<ChatMessage> {
        let dialogs = self.dialogs.lock().unwrap();
        dialogs.get(id).cloned()
    }

    /// Moves a message forward to `status`. Returns `None` for unknown ids.
    pub fn advance_status(&self, id: MessageId, status: MessageStatus) -> Option<StatusOutcome> {
        let mut dialogs = self.dialogs.lock().unwrap();
        let msg = dialogs.get_mut(id)?;
        if !msg.status.can_advance_to(status) {
            return Some(StatusOutcome::Unchanged(msg.clone()));
        }
        msg.status = status;
        let updated = msg.clone();
        self.persist(&dialogs, LogChange::Update(&updated));
        Some(StatusOutcome::Advanced(updated))
    }

    /// Replaces the text and bumps the timestamp to `at`.
    pub fn edit(&self, id: MessageId, text: &str, at: DateTime<Utc>) -> Option<ChatMessage> {
        let mut dialogs = self.dialogs.lock().unwrap();
        let msg = dialogs.get_mut(id)?;
        msg.text = text.to_string();
        msg.timestamp = at;
        let updated = msg.clone();
        self.persist(&dialogs, LogChange::Update(&updated));
        Some(updated)
    }

    /// Physically removes a message from its dialog.
    pub fn delete(&self, id: MessageId) -> Option<ChatMessage> {
        let mut dialogs = self.dialogs.lock().unwrap();
        let removed = dialogs.remove(id)?;
        self.persist(&dialogs, LogChange::Delete(id));
        Some(removed)
    }

    /// Highest id handed out so far (0 when empty).
    pub fn last_id(&self) -> MessageId {
        self.last_id.load(Ordering::SeqCst)
    }

    pub fn message_count(&self) -> usize {
        self.dialogs.lock().unwrap().key_of.len()
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.lock().unwrap().by_key.len()
    }

    /// Number of log writes that failed since startup.
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    fn persist(&self, dialogs: &Dialogs, change: LogChange<'_>) {
        let mut all = dialogs.by_key.values().flatten();
        if let Err(e) = self.log.record(change, &mut all) {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Failed to persist message log, keeping change in memory: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::storage::{JsonMessageLog, SqliteMessageLog};

    struct FailingLog;

    impl MessageLog for FailingLog {
        fn load(&self) -> Result<Vec<ChatMessage>, StoreError> {
            Ok(Vec::new())
        }

        fn record(
            &self,
            _change: LogChange<'_>,
            _all: &mut dyn Iterator<Item = &ChatMessage>,
        ) -> Result<(), StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "read-only filesystem").into())
        }
    }

    #[test]
    fn test_insert_assigns_next_id_and_sent() {
        let store = DialogStore::in_memory();
        let first = store.insert(MessageDraft::text("a@x", "b@x", "one"));
        let second = store.insert(MessageDraft::text("b@x", "a@x", "two"));

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.status, MessageStatus::Sent);
        assert_eq!(store.last_id(), 2);
    }

    #[test]
    fn test_dialog_is_shared_by_both_directions() {
        let store = DialogStore::in_memory();
        store.insert(MessageDraft::text("a@x", "b@x", "ping"));
        store.insert(MessageDraft::text("B@X", "a@x", "pong"));
        store.insert(MessageDraft::text("a@x", "c@x", "elsewhere"));

        let ab = store.dialog("a@x", "b@x");
        let ba = store.dialog("b@x", "a@x");
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 2);
        assert_eq!(store.dialog_count(), 2);
        assert_eq!(store.message_count(), 3);
    }

    #[test]
    fn test_dialog_sorted_by_timestamp_after_edit() {
        let store = DialogStore::in_memory();
        let first = store.insert(MessageDraft::text("a@x", "b@x", "first"));
        let second = store.insert(MessageDraft::text("a@x", "b@x", "second"));

        let later = Utc::now() + chrono::Duration::seconds(1);
        store.edit(first.id, "first, edited", later).unwrap();

        let ids: Vec<MessageId> = store.dialog("a@x", "b@x").iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_advance_status_forward_only() {
        let store = DialogStore::in_memory();
        let msg = store.insert(MessageDraft::text("a@x", "b@x", "hi"));

        let read = store.advance_status(msg.id, MessageStatus::Read).unwrap();
        assert!(matches!(read, StatusOutcome::Advanced(ref m) if m.status == MessageStatus::Read));

        let again = store.advance_status(msg.id, MessageStatus::Read).unwrap();
        assert!(matches!(again, StatusOutcome::Unchanged(_)));

        let back = store.advance_status(msg.id, MessageStatus::Delivered).unwrap();
        assert!(matches!(back, StatusOutcome::Unchanged(ref m) if m.status == MessageStatus::Read));
    }

    #[test]
    fn test_unknown_ids_are_none() {
        let store = DialogStore::in_memory();
        assert!(store.advance_status(99, MessageStatus::Read).is_none());
        assert!(store.edit(99, "x", Utc::now()).is_none());
        assert!(store.delete(99).is_none());
        assert!(store.find(99).is_none());
    }

    #[test]
    fn test_delete_removes_physically_and_ids_are_not_reused() {
        let store = DialogStore::in_memory();
        let msg = store.insert(MessageDraft::text("a@x", "b@x", "bye"));

        assert_eq!(store.delete(msg.id).map(|m| m.id), Some(msg.id));
        assert!(store.dialog("a@x", "b@x").is_empty());
        assert_eq!(store.dialog_count(), 0);

        let next = store.insert(MessageDraft::text("a@x", "b@x", "again"));
        assert_eq!(next.id, msg.id + 1);
    }

    #[test]
    fn test_reopen_restores_dialogs_and_id_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dialogs.json");

        let before = {
            let store = DialogStore::open(Box::new(JsonMessageLog::new(&path)));
            store.insert(MessageDraft::text("a@x", "b@x", "one"));
            let two = store.insert(MessageDraft::text("b@x", "a@x", "two"));
            store.insert(MessageDraft::text("a@x", "c@x", "three"));
            store.advance_status(two.id, MessageStatus::Delivered);
            store.dialog("a@x", "b@x")
        };

        let store = DialogStore::open(Box::new(JsonMessageLog::new(&path)));
        assert_eq!(store.dialog("a@x", "b@x"), before);
        assert_eq!(store.last_id(), 3);
        assert_eq!(store.insert(MessageDraft::text("a@x", "b@x", "four")).id, 4);
    }

    #[test]
    fn test_corrupt_log_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dialogs.json");
        std::fs::write(&path, b"[{\"Id\": ").unwrap();

        let store = DialogStore::open(Box::new(JsonMessageLog::new(&path)));
        assert_eq!(store.message_count(), 0);
        assert_eq!(store.last_id(), 0);
    }

    #[test]
    fn test_unreadable_sqlite_row_does_not_rewind_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dialogs.db");

        {
            let store = DialogStore::open(Box::new(SqliteMessageLog::open(&path).unwrap()));
            for text in ["one", "two", "three"] {
                store.insert(MessageDraft::text("a@x", "b@x", text));
            }
        }
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute("UPDATE messages SET status = 'Seen' WHERE id = 3", [])
            .unwrap();

        let store = DialogStore::open(Box::new(SqliteMessageLog::open(&path).unwrap()));
        assert_eq!(store.message_count(), 2);
        assert_eq!(store.last_id(), 3);

        let next = store.insert(MessageDraft::text("a@x", "b@x", "four"));
        assert_eq!(next.id, 4);
        assert_eq!(store.persist_failures(), 0);
    }

    #[test]
    fn test_failed_write_keeps_mutation() {
        let store = DialogStore::open(Box::new(FailingLog));
        let msg = store.insert(MessageDraft::text("a@x", "b@x", "kept"));

        assert_eq!(store.find(msg.id).map(|m| m.text), Some("kept".to_string()));
        assert_eq!(store.persist_failures(), 1);
    }

    #[test]
    fn test_concurrent_inserts_get_unique_ids() {
        let store = std::sync::Arc::new(DialogStore::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|i| {
                            store
                                .insert(MessageDraft::text("a@x", "b@x", &format!("{}-{}", t, i)))
                                .id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<MessageId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 200);
        assert_eq!(store.last_id(), 200);
    }
}
