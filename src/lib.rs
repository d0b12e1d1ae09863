// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod config;
pub mod connection_registry;
pub mod delivery;
pub mod dialog_store;
pub mod directory;
pub mod edits;
pub mod error;
pub mod handler;
pub mod http;
pub mod hub;
pub mod message;
pub mod metrics;
pub mod presence;
pub mod protocol;
pub mod router;
pub mod server;
pub mod storage;

use std::sync::Arc;

use config::HubConfig;
use dialog_store::DialogStore;
use directory::{JsonUserDirectory, MemoryUserDirectory, UserDirectory};
use error::StoreError;
use hub::{Hub, HubOptions};
use metrics::HubMetrics;
use storage::create_message_log;

/// Opens the message log and user directory named by `config` and builds the hub.
pub fn open_hub(config: &HubConfig) -> Result<Hub, StoreError> {
    let log = create_message_log(config.storage_backend, &config.data_dir)?;
    let directory: Arc<dyn UserDirectory> = match &config.users_file {
        Some(path) => Arc::new(JsonUserDirectory::open(path)),
        None => Arc::new(MemoryUserDirectory::new()),
    };
    Ok(Hub::new(
        DialogStore::open(log),
        directory,
        HubMetrics::new(),
        HubOptions::from(config),
    ))
}
