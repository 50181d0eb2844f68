//! # Lobby and Player Key-Value Sync
//!
//! Session platforms usually offer string key-value slots on the lobby and on
//! each member. [`KeyValueSync`] watches a registered set of keys and, on each
//! poll, reports which of them changed since the previous snapshot.
//!
//! ## Change Rules
//! - Only registered keys are compared
//! - A key seen for the first time counts as changed
//! - A poll where nothing differs reports `None`, never an empty list
//!
//! The platform side is abstracted by [`KeyValueSource`]. Unset keys read as
//! the empty string.

use crate::core::types::PeerId;
use crate::error::SyncError;
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, error};

/// Platform-provided lobby and member data slots
pub trait KeyValueSource {
    fn lobby_value(&self, key: &str) -> String;

    fn player_value(&self, player: PeerId, key: &str) -> String;

    /// Returns `false` when the platform refuses the write
    fn set_lobby_value(&mut self, key: &str, value: &str) -> bool;

    /// Sets the local player's value
    fn set_player_value(&mut self, key: &str, value: &str) -> bool;
}

/// Watched keys and their last observed values
#[derive(Debug, Default, Clone)]
pub struct KeyValueSync {
    lobby_keys: Vec<String>,
    player_keys: Vec<String>,
    last_lobby: HashMap<String, String>,
    last_player: HashMap<PeerId, HashMap<String, String>>,
}

impl KeyValueSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_lobby_key(&mut self, key: impl Into<String>) -> Result<(), SyncError> {
        register_key(&mut self.lobby_keys, key.into(), "Lobby")
    }

    pub fn register_player_key(&mut self, key: impl Into<String>) -> Result<(), SyncError> {
        register_key(&mut self.player_keys, key.into(), "Player")
    }

    pub fn lobby_keys(&self) -> &[String] {
        &self.lobby_keys
    }

    pub fn player_keys(&self) -> &[String] {
        &self.player_keys
    }

    /// Compare lobby keys against the snapshot and update it
    pub fn poll_lobby<S: KeyValueSource + ?Sized>(&mut self, store: &S) -> Option<Vec<String>> {
        let changed = diff_keys(&self.lobby_keys, &mut self.last_lobby, |key| {
            store.lobby_value(key)
        });
        if let Some(keys) = &changed {
            debug!(?keys, "Lobby data updated");
        }
        changed
    }

    /// Compare one player's keys against the snapshot and update it
    pub fn poll_player<S: KeyValueSource + ?Sized>(
        &mut self,
        player: PeerId,
        store: &S,
    ) -> Option<Vec<String>> {
        let snapshot = self.last_player.entry(player).or_default();
        let changed = diff_keys(&self.player_keys, snapshot, |key| {
            store.player_value(player, key)
        });
        if let Some(keys) = &changed {
            debug!(player = %player, ?keys, "Player data updated");
        }
        changed
    }

    /// Forget all snapshots; registered keys stay
    pub fn reset(&mut self) {
        self.last_lobby.clear();
        self.last_player.clear();
    }
}

fn register_key(keys: &mut Vec<String>, key: String, scope: &str) -> Result<(), SyncError> {
    if keys.contains(&key) {
        error!(key = %key, "{scope} data key is already defined");
        return Err(SyncError::DuplicateKey(key));
    }
    keys.push(key);
    Ok(())
}

fn diff_keys<F>(
    keys: &[String],
    snapshot: &mut HashMap<String, String>,
    mut read: F,
) -> Option<Vec<String>>
where
    F: FnMut(&str) -> String,
{
    let mut changed = Vec::new();
    for key in keys {
        let current = read(key);
        if snapshot.get(key) != Some(&current) {
            changed.push(key.clone());
        }
        snapshot.insert(key.clone(), current);
    }
    (!changed.is_empty()).then_some(changed)
}

fn parse_value<T: FromStr>(key: &str, raw: String) -> Result<Option<T>, SyncError> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>().map(Some).map_err(|_| {
        let err = SyncError::Parse {
            key: key.to_owned(),
            value: raw.clone(),
            target: std::any::type_name::<T>(),
        };
        error!(error = %err, "Could not parse data value");
        err
    })
}

/// Typed lobby read. Unset keys yield `None`.
pub fn lobby_value<T, S>(store: &S, key: &str) -> Result<Option<T>, SyncError>
where
    T: FromStr,
    S: KeyValueSource + ?Sized,
{
    parse_value(key, store.lobby_value(key))
}

/// Typed player read. Unset keys yield `None`.
pub fn player_value<T, S>(store: &S, player: PeerId, key: &str) -> Result<Option<T>, SyncError>
where
    T: FromStr,
    S: KeyValueSource + ?Sized,
{
    parse_value(key, store.player_value(player, key))
}

pub fn has_lobby_value<S: KeyValueSource + ?Sized>(store: &S, key: &str) -> bool {
    !store.lobby_value(key).is_empty()
}

pub fn has_player_value<S: KeyValueSource + ?Sized>(store: &S, player: PeerId, key: &str) -> bool {
    !store.player_value(player, key).is_empty()
}

/// Store `value`'s string form in a lobby slot
pub fn set_lobby_value<S, V>(store: &mut S, key: &str, value: V) -> Result<(), SyncError>
where
    S: KeyValueSource + ?Sized,
    V: Display,
{
    if store.set_lobby_value(key, &value.to_string()) {
        Ok(())
    } else {
        error!(key, "Error setting lobby data");
        Err(SyncError::Rejected(key.to_owned()))
    }
}

/// Store `value`'s string form in the local player's slot
pub fn set_player_value<S, V>(store: &mut S, key: &str, value: V) -> Result<(), SyncError>
where
    S: KeyValueSource + ?Sized,
    V: Display,
{
    if store.set_player_value(key, &value.to_string()) {
        Ok(())
    } else {
        error!(key, "Error setting player data");
        Err(SyncError::Rejected(key.to_owned()))
    }
}
