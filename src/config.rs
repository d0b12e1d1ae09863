// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Hub Configuration
//!
//! Configuration loaded from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::connection_registry::DEFAULT_PUSH_BUFFER;
use crate::storage::StorageBackend;

/// Hub server configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address the WebSocket endpoint listens on.
    pub listen_addr: SocketAddr,
    /// Address of the health/metrics HTTP server.
    pub http_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum frame size in bytes.
    pub max_message_size: usize,
    /// Idle timeout in seconds (for slowloris protection).
    pub idle_timeout_secs: u64,
    /// WebSocket upgrade timeout in seconds.
    pub handshake_timeout_secs: u64,
    /// Message log backend.
    pub storage_backend: StorageBackend,
    /// Data directory for the message log.
    pub data_dir: PathBuf,
    /// Account service's user file. Without it, users live in memory only.
    pub users_file: Option<PathBuf>,
    /// Frames buffered per connection before pushes are dropped.
    pub push_buffer: usize,
    /// Refuse edits and deletes from anyone but the sender.
    pub enforce_message_ownership: bool,
    /// Bearer token required by `/metrics`, if set.
    pub metrics_token: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            http_addr: SocketAddr::from(([127, 0, 0, 1], 5001)),
            max_connections: 1000,
            max_message_size: 10 * 1024 * 1024, // 10 MB, file messages included
            idle_timeout_secs: 300,             // 5 minutes
            handshake_timeout_secs: 10,
            storage_backend: StorageBackend::Json,
            data_dir: PathBuf::from("./data"),
            users_file: None,
            push_buffer: DEFAULT_PUSH_BUFFER,
            enforce_message_ownership: false,
            metrics_token: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(parsed) = val.trim().parse() {
            *target = parsed;
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl HubConfig {
    /// Loads configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        env_parse("CHAT_LISTEN_ADDR", &mut config.listen_addr);
        env_parse("CHAT_HTTP_ADDR", &mut config.http_addr);
        env_parse("CHAT_MAX_CONNECTIONS", &mut config.max_connections);
        env_parse("CHAT_MAX_MESSAGE_SIZE", &mut config.max_message_size);
        env_parse("CHAT_IDLE_TIMEOUT", &mut config.idle_timeout_secs);
        env_parse("CHAT_HANDSHAKE_TIMEOUT", &mut config.handshake_timeout_secs);
        env_parse("CHAT_PUSH_BUFFER", &mut config.push_buffer);

        if let Ok(val) = std::env::var("CHAT_STORAGE_BACKEND") {
            if let Some(backend) = StorageBackend::parse(&val) {
                config.storage_backend = backend;
            }
        }

        if let Ok(val) = std::env::var("CHAT_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("CHAT_USERS_FILE") {
            if !val.trim().is_empty() {
                config.users_file = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var("CHAT_ENFORCE_OWNERSHIP") {
            if let Some(flag) = parse_flag(&val) {
                config.enforce_message_ownership = flag;
            }
        }

        if let Ok(val) = std::env::var("CHAT_METRICS_TOKEN") {
            if !val.is_empty() {
                config.metrics_token = Some(val);
            }
        }

        config
    }

    /// Returns the idle timeout as a Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Returns the handshake timeout as a Duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();

        assert_eq!(config.listen_addr.port(), 5000);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.max_message_size, 10 * 1024 * 1024);
        assert_eq!(config.storage_backend, StorageBackend::Json);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!(!config.enforce_message_ownership);
        assert!(config.users_file.is_none());
    }

    #[test]
    fn test_durations() {
        let config = HubConfig::default();
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" off "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
