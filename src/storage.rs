// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Log Storage
//!
//! Durable backends for the dialog store. The store keeps every message in
//! memory and reports each mutation here while holding its lock.
//!
//! - `JsonMessageLog` rewrites the whole log (sorted by timestamp) on every
//!   mutation. This is the `dialogs.json` format older deployments already have.
//! - `SqliteMessageLog` applies one row-level statement per mutation.
//! - `MemoryMessageLog` keeps nothing (tests and development).
//!
//! Every backend must reproduce all messages and their ids on `load`, so the
//! store can resume its id counter after a restart. Row stores that skip an
//! unreadable row still report its id through `max_id`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::message::{base64_bytes, ChatMessage, MessageId, MessageStatus};

/// A single mutation of the dialog store.
#[derive(Debug, Clone, Copy)]
pub enum LogChange<'a> {
    Insert(&'a ChatMessage),
    Update(&'a ChatMessage),
    Delete(MessageId),
}

/// Trait for message log backends.
pub trait MessageLog: Send + Sync {
    /// Loads every stored message in log order.
    fn load(&self) -> Result<Vec<ChatMessage>, StoreError>;

    /// Highest id held by the backend, counting entries `load` skipped.
    fn max_id(&self) -> Result<Option<MessageId>, StoreError> {
        Ok(None)
    }

    /// Records a mutation. `all` yields the store's full contents after the
    /// mutation, for backends that rewrite a snapshot.
    fn record(
        &self,
        change: LogChange<'_>,
        all: &mut dyn Iterator<Item = &ChatMessage>,
    ) -> Result<(), StoreError>;
}

// ============================================================================
// In-Memory Log (for testing and development)
// ============================================================================

/// Log that persists nothing. Messages are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryMessageLog;

impl MemoryMessageLog {
    pub fn new() -> Self {
        MemoryMessageLog
    }
}

impl MessageLog for MemoryMessageLog {
    fn load(&self) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(Vec::new())
    }

    fn record(
        &self,
        _change: LogChange<'_>,
        _all: &mut dyn Iterator<Item = &ChatMessage>,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}

// ============================================================================
// JSON File Log (full rewrite per mutation)
// ============================================================================

/// On-disk record layout of `dialogs.json`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LogRecord {
    id: MessageId,
    from_email: String,
    to_email: String,
    #[serde(default)]
    text: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    is_file: bool,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(deserialize_with = "status_name_or_code")]
    status: MessageStatus,
    #[serde(default, with = "base64_bytes")]
    file_content: Option<Vec<u8>>,
    #[serde(default)]
    is_deleted: bool,
}

/// Older logs store the status as its integer code; newer ones use the name.
fn status_name_or_code<'de, D: Deserializer<'de>>(d: D) -> Result<MessageStatus, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Code(u64),
        Name(String),
    }

    match Raw::deserialize(d)? {
        Raw::Code(code) => MessageStatus::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status code {}", code))),
        Raw::Name(name) => MessageStatus::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status {:?}", name))),
    }
}

impl From<&ChatMessage> for LogRecord {
    fn from(m: &ChatMessage) -> Self {
        LogRecord {
            id: m.id,
            from_email: m.from_email.clone(),
            to_email: m.to_email.clone(),
            text: m.text.clone(),
            timestamp: m.timestamp,
            is_file: m.is_file,
            file_name: m.file_name.clone(),
            status: m.status,
            file_content: m.file_content.clone(),
            is_deleted: m.is_deleted,
        }
    }
}

impl From<LogRecord> for ChatMessage {
    fn from(r: LogRecord) -> Self {
        ChatMessage {
            id: r.id,
            from_email: r.from_email,
            to_email: r.to_email,
            text: r.text,
            timestamp: r.timestamp,
            is_file: r.is_file,
            file_name: r.file_name,
            file_content: r.file_content,
            status: r.status,
            is_deleted: r.is_deleted,
        }
    }
}

/// Flat JSON array of every message, rewritten in full on each mutation.
pub struct JsonMessageLog {
    path: PathBuf,
}

impl JsonMessageLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        JsonMessageLog {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MessageLog for JsonMessageLog {
    fn load(&self) -> Result<Vec<ChatMessage>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read(&self.path)?;
        let records: Vec<LogRecord> = serde_json::from_slice(&data)?;
        Ok(records.into_iter().map(ChatMessage::from).collect())
    }

    fn record(
        &self,
        _change: LogChange<'_>,
        all: &mut dyn Iterator<Item = &ChatMessage>,
    ) -> Result<(), StoreError> {
        let mut records: Vec<LogRecord> = all.map(LogRecord::from).collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        let json = serde_json::to_vec_pretty(&records)?;

        // Write-then-rename; the old log stays intact until the new one is complete
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ============================================================================
// SQLite Log (row-level writes)
// ============================================================================

/// SQLite-backed message log. One statement per mutation.
pub struct SqliteMessageLog {
    conn: Mutex<Connection>,
}

impl SqliteMessageLog {
    /// Opens or creates a SQLite database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY,
                from_email TEXT NOT NULL,
                to_email TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                is_file INTEGER NOT NULL,
                file_name TEXT,
                file_content BLOB,
                status TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        Ok(SqliteMessageLog {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory SQLite database (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::open(":memory:")
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let status: String = row.get(8)?;
    let status = MessageStatus::from_name(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            8,
            rusqlite::types::Type::Text,
            format!("unknown status {:?}", status).into(),
        )
    })?;
    Ok(ChatMessage {
        id: row.get::<_, i64>(0)? as MessageId,
        from_email: row.get(1)?,
        to_email: row.get(2)?,
        text: row.get(3)?,
        timestamp: row.get(4)?,
        is_file: row.get(5)?,
        file_name: row.get(6)?,
        file_content: row.get(7)?,
        status,
        is_deleted: row.get(9)?,
    })
}

impl MessageLog for SqliteMessageLog {
    fn load(&self) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, from_email, to_email, text, timestamp, is_file,
                    file_name, file_content, status, is_deleted
             FROM messages ORDER BY id ASC",
        )?;
        let mut messages = Vec::new();
        for row in stmt.query_map([], row_to_message)? {
            match row {
                Ok(msg) => messages.push(msg),
                Err(e) => warn!("Skipping unreadable message row: {}", e),
            }
        }
        Ok(messages)
    }

    fn max_id(&self) -> Result<Option<MessageId>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let max: Option<i64> =
            conn.query_row("SELECT MAX(id) FROM messages", [], |row| row.get(0))?;
        Ok(max.map(|id| id as MessageId))
    }

    fn record(
        &self,
        change: LogChange<'_>,
        _all: &mut dyn Iterator<Item = &ChatMessage>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        match change {
            LogChange::Insert(m) => {
                conn.execute(
                    "INSERT INTO messages (id, from_email, to_email, text, timestamp, is_file,
                                           file_name, file_content, status, is_deleted)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        m.id as i64,
                        m.from_email,
                        m.to_email,
                        m.text,
                        m.timestamp,
                        m.is_file,
                        m.file_name,
                        m.file_content,
                        m.status.as_str(),
                        m.is_deleted
                    ],
                )?;
            }
            LogChange::Update(m) => {
                conn.execute(
                    "UPDATE messages SET text = ?1, timestamp = ?2, status = ?3, is_deleted = ?4
                     WHERE id = ?5",
                    params![
                        m.text,
                        m.timestamp,
                        m.status.as_str(),
                        m.is_deleted,
                        m.id as i64
                    ],
                )?;
            }
            LogChange::Delete(id) => {
                conn.execute("DELETE FROM messages WHERE id = ?1", params![id as i64])?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Storage Factory
// ============================================================================

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// In-memory only (lost on restart).
    Memory,
    /// `dialogs.json`, rewritten on every mutation.
    #[default]
    Json,
    /// SQLite database with row-level writes.
    Sqlite,
}

impl StorageBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "memory" => Some(StorageBackend::Memory),
            "json" => Some(StorageBackend::Json),
            "sqlite" => Some(StorageBackend::Sqlite),
            _ => None,
        }
    }
}

/// Creates a message log for the backend type, rooted at `data_dir`.
pub fn create_message_log(
    backend: StorageBackend,
    data_dir: &Path,
) -> Result<Box<dyn MessageLog>, StoreError> {
    if backend != StorageBackend::Memory {
        std::fs::create_dir_all(data_dir)?;
    }
    Ok(match backend {
        StorageBackend::Memory => Box::new(MemoryMessageLog::new()),
        StorageBackend::Json => Box::new(JsonMessageLog::new(data_dir.join("dialogs.json"))),
        StorageBackend::Sqlite => Box::new(SqliteMessageLog::open(data_dir.join("dialogs.db"))?),
    })
}

// ============================================================================
// Tests
// ============================================================================
