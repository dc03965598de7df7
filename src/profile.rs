//! Persisted records: identity profiles, watchlist entries, overrides,
//! and per-group state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::Thresholds;

/// Behavioral state for one identity. Created on first observed event,
/// mutated on every event and by sweep/override actions, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProfile {
    pub identity_id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub first_seen: i64,
    pub last_seen: i64,
    /// Groups this identity has been observed in.
    #[serde(default)]
    pub groups: BTreeSet<i64>,

    /// Rolling event timestamps inside the flood window.
    #[serde(default)]
    pub event_window: Vec<i64>,
    /// Most recent content hashes with their timestamps, newest last.
    #[serde(default)]
    pub recent_hashes: Vec<(String, i64)>,

    #[serde(default)]
    pub messages_sent: u64,
    #[serde(default)]
    pub links_sent: u64,
    #[serde(default)]
    pub forwards_sent: u64,
    #[serde(default)]
    pub warnings: u64,
    #[serde(default)]
    pub deletions: u64,
    /// Times the username or display name changed after first sight.
    #[serde(default)]
    pub identity_changes: u64,

    #[serde(default)]
    pub first_message_ts: i64,
    #[serde(default)]
    pub first_message_kind: Option<MessageKind>,
    #[serde(default)]
    pub first_forward_ts: i64,

    /// Cumulative risk score, decayed over time.
    #[serde(default)]
    pub score: i64,
    /// When the score was last updated, anchor for decay.
    #[serde(default)]
    pub last_scored_ts: i64,

    /// Links posted before this timestamp score as probation violations.
    #[serde(default)]
    pub probation_until: i64,

    #[serde(default)]
    pub shadowbanned: bool,
    /// Deleted-account shell, as reported by the platform collaborator.
    #[serde(default)]
    pub is_deleted: bool,
}

impl IdentityProfile {
    pub fn new(identity_id: i64, now: i64) -> Self {
        Self {
            identity_id,
            username: None,
            display_name: None,
            first_seen: now,
            last_seen: now,
            groups: BTreeSet::new(),
            event_window: Vec::new(),
            recent_hashes: Vec::new(),
            messages_sent: 0,
            links_sent: 0,
            forwards_sent: 0,
            warnings: 0,
            deletions: 0,
            identity_changes: 0,
            first_message_ts: 0,
            first_message_kind: None,
            first_forward_ts: 0,
            score: 0,
            last_scored_ts: 0,
            probation_until: 0,
            shadowbanned: false,
            is_deleted: false,
        }
    }

    /// Messages that were not forwards.
    pub fn originated(&self) -> u64 {
        self.messages_sent.saturating_sub(self.forwards_sent)
    }

    /// Whether the identity is inside its post-join probation window.
    pub fn on_probation(&self, now: i64) -> bool {
        self.probation_until > now
    }

    pub fn display(&self) -> String {
        if let Some(name) = &self.display_name {
            name.clone()
        } else if let Some(username) = &self.username {
            format!("@{username}")
        } else {
            self.identity_id.to_string()
        }
    }
}

/// Coarse classification of an identity's first message, used by sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Link,
    Forward,
}

/// A locally mirrored entry of the externally flagged identity list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub identity_id: i64,
    pub reason: Option<String>,
    pub source: String,
    pub first_synced: i64,
    pub last_synced: i64,
}

/// Admin-issued override, the highest-priority input to enforcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub identity_id: i64,
    pub kind: OverrideKind,
    pub note: Option<String>,
    pub author: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    /// Resulting action never exceeds warn, regardless of score.
    Allow,
    /// Resulting action is always ban, regardless of score.
    ForceBan,
}

/// Per-group flags and threshold overrides. Persists across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupState {
    pub group_id: i64,
    /// Activation gate: while locked, only telemetry is captured.
    pub locked: bool,
    /// Patrol flag: standdown suppresses enforcement without locking.
    pub patrol: bool,
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
}

impl GroupState {
    /// Groups start locked with patrol enabled.
    pub fn new(group_id: i64) -> Self {
        Self {
            group_id,
            locked: true,
            patrol: true,
            thresholds: None,
        }
    }

    /// Whether automated enforcement may run for this group.
    pub fn enforcement_enabled(&self) -> bool {
        !self.locked && self.patrol
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_groups_are_locked() {
        let state = GroupState::new(42);
        assert!(state.locked);
        assert!(!state.enforcement_enabled());
    }

    #[test]
    fn probation_window() {
        let mut profile = IdentityProfile::new(1, 1_000);
        profile.probation_until = 1_600;
        assert!(profile.on_probation(1_500));
        assert!(!profile.on_probation(1_600));
    }

    #[test]
    fn display_prefers_name_then_handle() {
        let mut profile = IdentityProfile::new(7, 0);
        assert_eq!(profile.display(), "7");
        profile.username = Some("spotter".to_string());
        assert_eq!(profile.display(), "@spotter");
        profile.display_name = Some("Spotter".to_string());
        assert_eq!(profile.display(), "Spotter");
    }
}
