// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! User Directory
//!
//! The hub does not own user accounts. Registration, login and profile edits
//! live in an external service that keeps a flat `users.json`. The hub only
//! needs two things from it: look up a profile by email (to announce users
//! and resolve presence) and record presence changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::message::identity_key;

/// Availability of a user as broadcast to every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UserStatus {
    #[default]
    Offline,
    Online,
    DoNotDisturb,
}

impl UserStatus {
    /// Maps the numeric code clients send with `SetStatus`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(UserStatus::Offline),
            1 => Some(UserStatus::Online),
            2 => Some(UserStatus::DoNotDisturb),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            UserStatus::Offline => 0,
            UserStatus::Online => 1,
            UserStatus::DoNotDisturb => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Offline => "Offline",
            UserStatus::Online => "Online",
            UserStatus::DoNotDisturb => "DoNotDisturb",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Offline" => Some(UserStatus::Offline),
            "Online" => Some(UserStatus::Online),
            "DoNotDisturb" => Some(UserStatus::DoNotDisturb),
            _ => None,
        }
    }
}

/// Public projection of a user account, as announced to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default = "enabled")]
    pub notifications_enabled: bool,
    #[serde(default = "enabled")]
    pub sound_enabled: bool,
    #[serde(default = "enabled")]
    pub banner_enabled: bool,
}

fn enabled() -> bool {
    true
}

impl UserProfile {
    /// Minimal profile with default settings (for tests and tooling).
    pub fn new(email: &str, name: &str) -> Self {
        UserProfile {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: name.to_string(),
            avatar_url: None,
            bio: None,
            status: UserStatus::Offline,
            notifications_enabled: true,
            sound_enabled: true,
            banner_enabled: true,
        }
    }
}

/// Narrow interface to the external user directory.
pub trait UserDirectory: Send + Sync {
    /// Looks a user up by email (case-insensitive).
    fn get(&self, email: &str) -> Option<UserProfile>;

    /// Records a presence change. Returns `Ok(false)` for unknown users.
    fn update_status(&self, email: &str, status: UserStatus) -> Result<bool, StoreError>;
}

// ============================================================================
// In-Memory Directory (for testing and development)
// ============================================================================

/// In-memory directory keyed by normalized email.
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, UserProfile>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub fn insert(&self, profile: UserProfile) {
        let mut users = self.users.write().unwrap();
        users.insert(identity_key(&profile.email), profile);
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn get(&self, email: &str) -> Option<UserProfile> {
        let users = self.users.read().unwrap();
        users.get(&identity_key(email)).cloned()
    }

    fn update_status(&self, email: &str, status: UserStatus) -> Result<bool, StoreError> {
        let mut users = self.users.write().unwrap();
        match users.get_mut(&identity_key(email)) {
            Some(user) => {
                user.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// JSON File Directory (users.json shared with the account service)
// ============================================================================

/// Layout of one `users.json` entry, as far as the hub reads it.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserRecord {
    #[serde(default)]
    id: String,
    email: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default, deserialize_with = "status_code_or_name")]
    status: UserStatus,
    #[serde(default = "enabled")]
    notifications_enabled: bool,
    #[serde(default = "enabled")]
    sound_enabled: bool,
    #[serde(default = "enabled")]
    banner_enabled: bool,
}

fn status_code_or_name<'de, D: Deserializer<'de>>(d: D) -> Result<UserStatus, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Code(i64),
        Name(String),
    }

    match Raw::deserialize(d)? {
        Raw::Code(code) => UserStatus::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown user status {}", code))),
        Raw::Name(name) => UserStatus::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown user status {:?}", name))),
    }
}

impl From<UserRecord> for UserProfile {
    fn from(r: UserRecord) -> Self {
        UserProfile {
            id: r.id,
            email: r.email,
            name: r.name,
            avatar_url: r.avatar_url,
            bio: r.bio,
            status: r.status,
            notifications_enabled: r.notifications_enabled,
            sound_enabled: r.sound_enabled,
            banner_enabled: r.banner_enabled,
        }
    }
}

struct JsonUsers {
    /// Raw entries, so fields the hub does not know survive a rewrite.
    records: Vec<Map<String, Value>>,
    modified: Option<SystemTime>,
}

/// Directory backed by the account service's `users.json`.
///
/// The file is re-read whenever its modification time changes, so users
/// registered by the account service become visible without a restart.
pub struct JsonUserDirectory {
    path: PathBuf,
    users: RwLock<JsonUsers>,
}

impl JsonUserDirectory {
    /// Opens the directory. A missing or unreadable file yields no users.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let users = Self::read(&path);
        JsonUserDirectory {
            path,
            users: RwLock::new(users),
        }
    }

    pub fn len(&self) -> usize {
        self.refresh_if_changed();
        self.users.read().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn modified(path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    fn read(path: &Path) -> JsonUsers {
        let modified = Self::modified(path);
        let records = match std::fs::read(path) {
            Ok(data) => match serde_json::from_slice::<Vec<Map<String, Value>>>(&data) {
                Ok(records) => records,
                Err(e) => {
                    warn!("User directory unreadable, treating as empty: {}", e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Failed to read user directory: {}", e);
                Vec::new()
            }
        };
        JsonUsers { records, modified }
    }

    fn refresh_if_changed(&self) {
        let current = Self::modified(&self.path);
        let stale = self.users.read().unwrap().modified != current;
        if stale {
            debug!("User directory changed on disk, reloading");
            *self.users.write().unwrap() = Self::read(&self.path);
        }
    }

    fn matches(record: &Map<String, Value>, key: &str) -> bool {
        record
            .get("Email")
            .and_then(Value::as_str)
            .is_some_and(|email| identity_key(email) == key)
    }

    fn write(&self, users: &mut JsonUsers) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&users.records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        users.modified = Self::modified(&self.path);
        Ok(())
    }
}

impl UserDirectory for JsonUserDirectory {
    fn get(&self, email: &str) -> Option<UserProfile> {
        self.refresh_if_changed();
        let key = identity_key(email);
        let users = self.users.read().unwrap();
        let record = users.records.iter().find(|r| Self::matches(r, &key))?;
        match serde_json::from_value::<UserRecord>(Value::Object(record.clone())) {
            Ok(record) => Some(record.into()),
            Err(e) => {
                warn!("Skipping malformed user record: {}", e);
                None
            }
        }
    }

    fn update_status(&self, email: &str, status: UserStatus) -> Result<bool, StoreError> {
        let key = identity_key(email);
        let mut users = self.users.write().unwrap();
        // Re-read under the write lock; the account service may have written
        // since the last mtime check
        *users = Self::read(&self.path);
        let Some(record) = users.records.iter_mut().find(|r| Self::matches(r, &key)) else {
            return Ok(false);
        };
        record.insert("Status".to_string(), Value::from(status.code()));
        self.write(&mut users)?;
        Ok(true)
    }
}
