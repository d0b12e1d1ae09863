// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Presence Manager
//!
//! Derives Online/Offline from the live-connection count of each identity
//! and tracks explicit DoNotDisturb. Every transition hands the status to an
//! `announce` callback while the presence lock is still held, so announcements
//! go out in the same order the transitions happened.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::directory::{UserDirectory, UserProfile, UserStatus};
use crate::message::identity_key;

/// Presence state per identity, seeded lazily from the user directory.
pub struct PresenceManager {
    directory: Arc<dyn UserDirectory>,
    states: Mutex<HashMap<String, UserStatus>>,
}

impl PresenceManager {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        PresenceManager {
            directory,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Current status of `email`. Unknown identities are Offline.
    pub fn status_of(&self, email: &str) -> UserStatus {
        let mut states = self.states.lock().unwrap();
        self.current(&mut states, email)
    }

    /// Directory profile of `email`, if the account service knows it.
    pub fn profile(&self, email: &str) -> Option<UserProfile> {
        self.directory.get(email)
    }

    /// First connection of an identity. Offline becomes Online;
    /// DoNotDisturb is kept.
    pub fn on_first_connect(
        &self,
        email: &str,
        announce: impl FnOnce(UserStatus),
    ) -> Option<UserStatus> {
        let mut states = self.states.lock().unwrap();
        match self.current(&mut states, email) {
            UserStatus::Offline => {
                self.apply(&mut states, email, UserStatus::Online);
                announce(UserStatus::Online);
                Some(UserStatus::Online)
            }
            UserStatus::Online | UserStatus::DoNotDisturb => None,
        }
    }

    /// Last connection of an identity went away.
    ///
    /// `still_connected` is evaluated under the presence lock, so a
    /// reconnect racing with this call does not leave the identity Offline.
    pub fn on_last_disconnect(
        &self,
        email: &str,
        still_connected: impl FnOnce() -> bool,
        announce: impl FnOnce(UserStatus),
    ) -> Option<UserStatus> {
        let mut states = self.states.lock().unwrap();
        if still_connected() {
            return None;
        }
        match self.current(&mut states, email) {
            UserStatus::Offline => None,
            UserStatus::Online | UserStatus::DoNotDisturb => {
                self.apply(&mut states, email, UserStatus::Offline);
                announce(UserStatus::Offline);
                Some(UserStatus::Offline)
            }
        }
    }

    /// Explicit status change. Always reported, even if unchanged.
    pub fn set_status(
        &self,
        email: &str,
        status: UserStatus,
        announce: impl FnOnce(UserStatus),
    ) -> UserStatus {
        let mut states = self.states.lock().unwrap();
        self.apply(&mut states, email, status);
        announce(status);
        status
    }

    /// Explicit logout. Always reported as Offline.
    pub fn logout(&self, email: &str, announce: impl FnOnce(UserStatus)) -> UserStatus {
        self.set_status(email, UserStatus::Offline, announce)
    }

    fn current(&self, states: &mut HashMap<String, UserStatus>, email: &str) -> UserStatus {
        *states.entry(identity_key(email)).or_insert_with(|| {
            self.directory
                .get(email)
                .map(|profile| profile.status)
                .unwrap_or_default()
        })
    }

    fn apply(&self, states: &mut HashMap<String, UserStatus>, email: &str, status: UserStatus) {
        states.insert(identity_key(email), status);
        if let Err(e) = self.directory.update_status(email, status) {
            warn!("Failed to record presence change: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryUserDirectory;
    use crate::error::StoreError;

    fn quiet(_: UserStatus) {}

    fn manager_with(users: &[(&str, UserStatus)]) -> (PresenceManager, Arc<MemoryUserDirectory>) {
        let directory = Arc::new(MemoryUserDirectory::new());
        for (email, status) in users {
            let mut profile = UserProfile::new(email, "User");
            profile.status = *status;
            directory.insert(profile);
        }
        (PresenceManager::new(directory.clone()), directory)
    }

    #[test]
    fn test_first_connect_goes_online() {
        let (presence, directory) = manager_with(&[("a@x", UserStatus::Offline)]);

        assert_eq!(presence.on_first_connect("a@x", quiet), Some(UserStatus::Online));
        assert_eq!(directory.get("a@x").unwrap().status, UserStatus::Online);
        // Already online: nothing to announce
        assert_eq!(presence.on_first_connect("A@x", quiet), None);
    }

    #[test]
    fn test_do_not_disturb_survives_connect() {
        let (presence, _) = manager_with(&[("a@x", UserStatus::DoNotDisturb)]);
        assert_eq!(presence.on_first_connect("a@x", quiet), None);
        assert_eq!(presence.status_of("a@x"), UserStatus::DoNotDisturb);
    }

    #[test]
    fn test_last_disconnect_goes_offline() {
        let (presence, directory) = manager_with(&[("a@x", UserStatus::Offline)]);
        presence.on_first_connect("a@x", quiet);

        assert_eq!(
            presence.on_last_disconnect("a@x", || false, quiet),
            Some(UserStatus::Offline)
        );
        assert_eq!(directory.get("a@x").unwrap().status, UserStatus::Offline);
        assert_eq!(presence.on_last_disconnect("a@x", || false, quiet), None);
    }

    #[test]
    fn test_disconnect_skipped_when_reconnected() {
        let (presence, _) = manager_with(&[]);
        presence.on_first_connect("a@x", quiet);

        assert_eq!(presence.on_last_disconnect("a@x", || true, quiet), None);
        assert_eq!(presence.status_of("a@x"), UserStatus::Online);
    }

    #[test]
    fn test_unknown_identity_tracked_in_memory() {
        let (presence, directory) = manager_with(&[]);
        assert_eq!(presence.on_first_connect("ghost@x", quiet), Some(UserStatus::Online));
        assert_eq!(presence.status_of("ghost@x"), UserStatus::Online);
        assert!(directory.get("ghost@x").is_none());
    }

    #[test]
    fn test_set_status_reports_unchanged_value() {
        let (presence, _) = manager_with(&[("a@x", UserStatus::Online)]);
        assert_eq!(
            presence.set_status("a@x", UserStatus::Online, quiet),
            UserStatus::Online
        );
        assert_eq!(
            presence.set_status("a@x", UserStatus::DoNotDisturb, quiet),
            UserStatus::DoNotDisturb
        );
        assert_eq!(presence.logout("a@x", quiet), UserStatus::Offline);
        assert_eq!(presence.status_of("a@x"), UserStatus::Offline);
    }

    #[test]
    fn test_announce_runs_under_presence_lock() {
        let (presence, _) = manager_with(&[]);
        let mut announced = Vec::new();

        presence.on_first_connect("a@x", |status| {
            assert!(presence.states.try_lock().is_err());
            announced.push(status);
        });
        presence.on_last_disconnect("a@x", || false, |status| {
            assert!(presence.states.try_lock().is_err());
            announced.push(status);
        });
        assert_eq!(announced, vec![UserStatus::Online, UserStatus::Offline]);
    }

    #[test]
    fn test_no_announcement_without_transition() {
        let (presence, _) = manager_with(&[("a@x", UserStatus::DoNotDisturb)]);
        presence.on_first_connect("a@x", |_| panic!("nothing to announce"));
        presence.on_last_disconnect("a@x", || true, |_| panic!("still connected"));
    }

    struct BrokenDirectory;

    impl UserDirectory for BrokenDirectory {
        fn get(&self, _email: &str) -> Option<UserProfile> {
            None
        }

        fn update_status(&self, _email: &str, _status: UserStatus) -> Result<bool, StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }
    }

    #[test]
    fn test_directory_failure_does_not_block_transition() {
        let presence = PresenceManager::new(Arc::new(BrokenDirectory));
        assert_eq!(presence.on_first_connect("a@x", quiet), Some(UserStatus::Online));
        assert_eq!(presence.status_of("a@x"), UserStatus::Online);
    }
}
