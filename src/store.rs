//! Sled-backed durable state for the engine.
//!
//! One database with a tree per logical table: `profiles`, `overrides`,
//! `watchlist`, `groups`. Values are serde_json. All mutations on a given
//! identity are serialized through an owned per-key mutex so concurrent
//! events from the same identity across groups cannot lose updates.
//! Cross-identity readers (sweep, aggregation) read without the key lock
//! and tolerate slightly stale snapshots.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sled::Db;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::config::Settings;
use crate::errors::{with_retry, EngineError, EngineResult};
use crate::event::ModerationEvent;
use crate::profile::{
    GroupState, IdentityProfile, MessageKind, OverrideKind, OverrideRecord, WatchlistEntry,
};

const TREE_PROFILES: &str = "profiles";
const TREE_OVERRIDES: &str = "overrides";
const TREE_WATCHLIST: &str = "watchlist";
const TREE_GROUPS: &str = "groups";

/// Registry of per-identity mutexes. Entries are created on demand and
/// kept for the identity's lifetime, mirroring the never-deleted profiles.
struct KeyLocks {
    inner: RwLock<HashMap<i64, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    async fn acquire(&self, key: i64) -> OwnedMutexGuard<()> {
        let existing = { self.inner.read().await.get(&key).cloned() };
        let lock = match existing {
            Some(lock) => lock,
            None => {
                let mut map = self.inner.write().await;
                map.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
            }
        };
        lock.lock_owned().await
    }
}

/// Aggregate totals across the whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSummary {
    pub total_identities: u64,
    pub total_messages: u64,
    pub total_warnings: u64,
    pub total_deletions: u64,
    pub watchlist_size: u64,
    pub shadowbanned: u64,
}

pub struct ProfileStore {
    db: Db,
    locks: KeyLocks,
    retry_attempts: u32,
}

impl ProfileStore {
    pub fn open(path: impl AsRef<Path>, settings: &Settings) -> EngineResult<Self> {
        let db = sled::open(path.as_ref())
            .map_err(|e| EngineError::storage("open_database", e))?;
        Ok(Self {
            db,
            locks: KeyLocks::new(),
            retry_attempts: settings.storage_retry_attempts.max(1),
        })
    }

    fn tree(&self, name: &str) -> EngineResult<sled::Tree> {
        self.db
            .open_tree(name)
            .map_err(|e| EngineError::storage(format!("open_tree:{name}"), e))
    }

    fn key(id: i64) -> Vec<u8> {
        id.to_string().into_bytes()
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        tree: &sled::Tree,
        key: &[u8],
    ) -> EngineResult<Option<T>> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(tree: &sled::Tree, key: &[u8], value: &T) -> EngineResult<()> {
        let bytes = serde_json::to_vec(value)?;
        tree.insert(key, bytes)?;
        tree.flush()?;
        Ok(())
    }

    // ---- profiles ------------------------------------------------------

    /// Read a profile without creating it. No key lock: snapshot read.
    pub fn read_profile(&self, identity_id: i64) -> EngineResult<Option<IdentityProfile>> {
        let tree = self.tree(TREE_PROFILES)?;
        Self::get_json(&tree, &Self::key(identity_id))
    }

    /// Fetch the profile for an identity, creating it on first sight.
    pub async fn get_or_create(
        &self,
        identity_id: i64,
        now: i64,
    ) -> EngineResult<IdentityProfile> {
        let _guard = self.locks.acquire(identity_id).await;
        let tree = self.tree(TREE_PROFILES)?;
        let key = Self::key(identity_id);
        if let Some(profile) = Self::get_json::<IdentityProfile>(&tree, &key)? {
            return Ok(profile);
        }
        let profile = IdentityProfile::new(identity_id, now);
        Self::put_json(&tree, &key, &profile)?;
        Ok(profile)
    }

    /// Atomic read-modify-write on one profile, creating it if absent.
    /// Retried on transient storage failures.
    pub async fn update_profile<T>(
        &self,
        identity_id: i64,
        mut mutate: impl FnMut(&mut IdentityProfile) -> T,
    ) -> EngineResult<T> {
        let _guard = self.locks.acquire(identity_id).await;
        let key = Self::key(identity_id);
        with_retry("update_profile", self.retry_attempts, || {
            let tree = self.tree(TREE_PROFILES)?;
            let mut profile = Self::get_json::<IdentityProfile>(&tree, &key)?
                .unwrap_or_else(|| IdentityProfile::new(identity_id, 0));
            let out = mutate(&mut profile);
            Self::put_json(&tree, &key, &profile)?;
            Ok(out)
        })
        .await
    }

    /// Fold an observed event into the identity's counters and history,
    /// returning the updated snapshot.
    pub async fn record_event(
        &self,
        event: &ModerationEvent,
        settings: &Settings,
    ) -> EngineResult<IdentityProfile> {
        let flood_window = settings.flood_window_secs;
        let history_len = settings.repeat_history_len;
        let probation = settings.probation_secs;
        let event = event.clone();
        self.update_profile(event.identity_id, move |profile| {
            if profile.first_seen == 0 {
                profile.first_seen = event.timestamp;
            }
            profile.last_seen = event.timestamp;
            profile.groups.insert(event.group_id);
            // Sticky: a detected shell stays flagged even if later events
            // omit the marker.
            if event.is_deleted_account {
                profile.is_deleted = true;
            }

            if let Some(username) = &event.username {
                if profile.username.as_deref().is_some_and(|u| u != username.as_str()) {
                    profile.identity_changes += 1;
                }
                profile.username = Some(username.clone());
            }
            if let Some(name) = &event.display_name {
                if profile.display_name.as_deref().is_some_and(|n| n != name.as_str()) {
                    profile.identity_changes += 1;
                }
                profile.display_name = Some(name.clone());
            }

            if event.is_join {
                profile.probation_until = event.timestamp + probation;
            } else {
                profile.messages_sent += 1;
                if event.has_link {
                    profile.links_sent += 1;
                }
                if event.is_forward {
                    profile.forwards_sent += 1;
                    if profile.first_forward_ts == 0 {
                        profile.first_forward_ts = event.timestamp;
                    }
                }
                if profile.first_message_ts == 0 {
                    profile.first_message_ts = event.timestamp;
                    profile.first_message_kind = Some(if event.is_forward {
                        MessageKind::Forward
                    } else if event.has_link {
                        MessageKind::Link
                    } else {
                        MessageKind::Text
                    });
                }

                profile.event_window.push(event.timestamp);
                profile
                    .event_window
                    .retain(|ts| event.timestamp - ts <= flood_window);

                if let Some(hash) = &event.content_hash {
                    profile.recent_hashes.push((hash.clone(), event.timestamp));
                    let len = profile.recent_hashes.len();
                    if len > history_len {
                        profile.recent_hashes.drain(..len - history_len);
                    }
                }
            }
            profile.clone()
        })
        .await
    }

    /// Touch `last_seen` only. Used on the shadowban discard path.
    pub async fn touch_seen(&self, identity_id: i64, now: i64) -> EngineResult<()> {
        self.update_profile(identity_id, |profile| {
            if profile.first_seen == 0 {
                profile.first_seen = now;
            }
            profile.last_seen = now;
        })
        .await
    }

    /// Apply a score delta and floor atomically, returning (old, new).
    /// The floor is applied as `max`, never added.
    pub async fn apply_score_delta(
        &self,
        identity_id: i64,
        delta: i64,
        floor: Option<i64>,
        now: i64,
    ) -> EngineResult<(i64, i64)> {
        self.update_profile(identity_id, |profile| {
            let old = profile.score;
            let mut new = (old + delta).max(0);
            if let Some(floor) = floor {
                new = new.max(floor);
            }
            profile.score = new;
            profile.last_scored_ts = now;
            (old, new)
        })
        .await
    }

    pub async fn set_shadowban(&self, identity_id: i64, enabled: bool) -> EngineResult<()> {
        self.update_profile(identity_id, |profile| {
            profile.shadowbanned = enabled;
        })
        .await
    }

    /// One page of profiles ordered by key, starting after `after`.
    /// Never holds a store-wide lock.
    pub fn profiles_page(
        &self,
        after: Option<i64>,
        page_size: usize,
    ) -> EngineResult<Vec<IdentityProfile>> {
        let tree = self.tree(TREE_PROFILES)?;
        let iter: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> = match after {
            Some(id) => {
                let start = Self::key(id);
                Box::new(tree.range((
                    std::ops::Bound::Excluded(start),
                    std::ops::Bound::<Vec<u8>>::Unbounded,
                )))
            }
            None => Box::new(tree.iter()),
        };
        let mut page = Vec::with_capacity(page_size);
        for item in iter.take(page_size) {
            let (_, bytes) = item?;
            page.push(serde_json::from_slice(&bytes)?);
        }
        Ok(page)
    }

    // ---- overrides -----------------------------------------------------

    pub fn read_override(&self, identity_id: i64) -> EngineResult<Option<OverrideRecord>> {
        let tree = self.tree(TREE_OVERRIDES)?;
        Self::get_json(&tree, &Self::key(identity_id))
    }

    pub async fn write_override(&self, record: &OverrideRecord) -> EngineResult<()> {
        let _guard = self.locks.acquire(record.identity_id).await;
        let tree = self.tree(TREE_OVERRIDES)?;
        Self::put_json(&tree, &Self::key(record.identity_id), record)
    }

    pub async fn clear_override(&self, identity_id: i64) -> EngineResult<bool> {
        let _guard = self.locks.acquire(identity_id).await;
        let tree = self.tree(TREE_OVERRIDES)?;
        let existed = tree.remove(Self::key(identity_id))?.is_some();
        tree.flush()?;
        Ok(existed)
    }

    pub fn override_kind(&self, identity_id: i64) -> EngineResult<Option<OverrideKind>> {
        Ok(self.read_override(identity_id)?.map(|r| r.kind))
    }

    // ---- watchlist -----------------------------------------------------

    /// Idempotent upsert of externally flagged identities. Re-running with
    /// the same export refreshes `last_synced` without duplicating entries
    /// or disturbing `first_synced`. Returns the number of new entries.
    pub fn upsert_watchlist(
        &self,
        entries: &[(i64, Option<String>)],
        source: &str,
        now: i64,
    ) -> EngineResult<usize> {
        let tree = self.tree(TREE_WATCHLIST)?;
        let mut added = 0;
        for (identity_id, reason) in entries {
            let key = Self::key(*identity_id);
            let entry = match Self::get_json::<WatchlistEntry>(&tree, &key)? {
                Some(mut existing) => {
                    existing.reason = reason.clone();
                    existing.source = source.to_string();
                    existing.last_synced = now;
                    existing
                }
                None => {
                    added += 1;
                    WatchlistEntry {
                        identity_id: *identity_id,
                        reason: reason.clone(),
                        source: source.to_string(),
                        first_synced: now,
                        last_synced: now,
                    }
                }
            };
            let bytes = serde_json::to_vec(&entry)?;
            tree.insert(key, bytes)?;
        }
        tree.flush()?;
        Ok(added)
    }

    /// Remove entries not present in the latest export. Only called when
    /// pruning is enabled in configuration. Returns the number removed.
    pub fn prune_watchlist_absent(
        &self,
        present: &std::collections::HashSet<i64>,
    ) -> EngineResult<usize> {
        let tree = self.tree(TREE_WATCHLIST)?;
        let mut removed = 0;
        for item in tree.iter() {
            let (key, bytes) = item?;
            let entry: WatchlistEntry = serde_json::from_slice(&bytes)?;
            if !present.contains(&entry.identity_id) {
                tree.remove(key)?;
                removed += 1;
            }
        }
        if removed > 0 {
            tree.flush()?;
        }
        Ok(removed)
    }

    pub fn in_watchlist(&self, identity_id: i64) -> EngineResult<Option<WatchlistEntry>> {
        let tree = self.tree(TREE_WATCHLIST)?;
        Self::get_json(&tree, &Self::key(identity_id))
    }

    pub fn watchlist_len(&self) -> EngineResult<usize> {
        Ok(self.tree(TREE_WATCHLIST)?.len())
    }

    // ---- group state ---------------------------------------------------

    pub fn read_group_state(&self, group_id: i64) -> EngineResult<GroupState> {
        let tree = self.tree(TREE_GROUPS)?;
        Ok(Self::get_json(&tree, &Self::key(group_id))?
            .unwrap_or_else(|| GroupState::new(group_id)))
    }

    pub fn write_group_state(&self, state: &GroupState) -> EngineResult<()> {
        let tree = self.tree(TREE_GROUPS)?;
        Self::put_json(&tree, &Self::key(state.group_id), state)
    }

    // ---- aggregates ----------------------------------------------------

    /// Full-store totals. Snapshot read, may lag in-flight writers.
    pub fn counts_summary(&self) -> EngineResult<StoreSummary> {
        let tree = self.tree(TREE_PROFILES)?;
        let mut summary = StoreSummary {
            watchlist_size: self.watchlist_len()? as u64,
            ..StoreSummary::default()
        };
        for item in tree.iter() {
            let (_, bytes) = item?;
            let profile: IdentityProfile = serde_json::from_slice(&bytes)?;
            summary.total_identities += 1;
            summary.total_messages += profile.messages_sent;
            summary.total_warnings += profile.warnings;
            summary.total_deletions += profile.deletions;
            if profile.shadowbanned {
                summary.shadowbanned += 1;
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (ProfileStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::default();
        let store = ProfileStore::open(dir.path().join("db"), &settings).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn get_or_create_is_stable() {
        let (store, _dir) = test_store();
        let first = store.get_or_create(10, 100).await.unwrap();
        let second = store.get_or_create(10, 200).await.unwrap();
        assert_eq!(first.first_seen, second.first_seen);
    }

    #[tokio::test]
    async fn record_event_tracks_counters_and_history() {
        let (store, _dir) = test_store();
        let settings = Settings::default();
        let mut event = ModerationEvent::message(5, 1, 1_000, "h1");
        event.has_link = true;
        let profile = store.record_event(&event, &settings).await.unwrap();
        assert_eq!(profile.messages_sent, 1);
        assert_eq!(profile.links_sent, 1);
        assert_eq!(profile.recent_hashes.len(), 1);
        assert!(profile.groups.contains(&1));
    }

    #[tokio::test]
    async fn deleted_shell_flag_is_sticky() {
        let (store, _dir) = test_store();
        let settings = Settings::default();
        let mut event = ModerationEvent::message(6, 1, 1_000, "h1");
        event.is_deleted_account = true;
        store.record_event(&event, &settings).await.unwrap();

        let later = ModerationEvent::message(6, 1, 2_000, "h2");
        let profile = store.record_event(&later, &settings).await.unwrap();
        assert!(profile.is_deleted);
    }

    #[tokio::test]
    async fn score_floor_is_max_not_additive() {
        let (store, _dir) = test_store();
        store.get_or_create(7, 0).await.unwrap();
        let (_, new) = store.apply_score_delta(7, 10, Some(60), 100).await.unwrap();
        assert_eq!(new, 60);
        // A second floored delta does not stack the floor on top.
        let (_, newer) = store.apply_score_delta(7, 5, Some(60), 200).await.unwrap();
        assert_eq!(newer, 65);
    }

    #[tokio::test]
    async fn concurrent_deltas_do_not_lose_updates() {
        let (store, _dir) = test_store();
        let store = Arc::new(store);
        store.get_or_create(9, 0).await.unwrap();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.apply_score_delta(9, 1, None, 0).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let profile = store.read_profile(9).unwrap().unwrap();
        assert_eq!(profile.score, 20);
    }

    #[tokio::test]
    async fn watchlist_upsert_is_idempotent() {
        let (store, _dir) = test_store();
        let entries = vec![(1, Some("spam".to_string())), (2, None)];
        let added = store.upsert_watchlist(&entries, "export", 100).unwrap();
        assert_eq!(added, 2);
        let added_again = store.upsert_watchlist(&entries, "export", 200).unwrap();
        assert_eq!(added_again, 0);
        assert_eq!(store.watchlist_len().unwrap(), 2);
        let entry = store.in_watchlist(1).unwrap().unwrap();
        assert_eq!(entry.first_synced, 100);
        assert_eq!(entry.last_synced, 200);
    }

    #[tokio::test]
    async fn group_state_round_trips() {
        let (store, _dir) = test_store();
        let mut state = store.read_group_state(99).unwrap();
        assert!(state.locked);
        state.locked = false;
        store.write_group_state(&state).unwrap();
        assert!(!store.read_group_state(99).unwrap().locked);
    }

    #[tokio::test]
    async fn profiles_page_walks_in_order() {
        let (store, _dir) = test_store();
        for id in [3, 1, 2] {
            store.get_or_create(id, 0).await.unwrap();
        }
        let first = store.profiles_page(None, 2).unwrap();
        assert_eq!(first.len(), 2);
        let last_id = first.last().unwrap().identity_id;
        let rest = store.profiles_page(Some(last_id), 2).unwrap();
        assert_eq!(rest.len(), 1);
    }
}
