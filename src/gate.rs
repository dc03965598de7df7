//! Per-group activation gate.
//!
//! While a group is locked, automated enforcement is suppressed and only
//! telemetry is captured. Unlocking requires an exact out-of-band secret;
//! the comparison is constant-time and attempts are rate-limited per
//! admin so the outcome of a failure reveals nothing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::config::Settings;
use crate::errors::EngineResult;
use crate::store::ProfileStore;

/// Sliding-window attempt counter keyed by admin id.
pub struct AttemptLimiter {
    attempts: RwLock<HashMap<i64, Vec<Instant>>>,
    max_attempts: usize,
    window: Duration,
}

impl AttemptLimiter {
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            attempts: RwLock::new(HashMap::new()),
            max_attempts,
            window,
        }
    }

    /// Record one attempt; returns false when the caller is over budget.
    pub async fn allow(&self, admin_id: i64) -> bool {
        let mut attempts = self.attempts.write().await;
        let now = Instant::now();
        let entry = attempts.entry(admin_id).or_default();
        entry.retain(|at| now.duration_since(*at) < self.window);
        if entry.len() >= self.max_attempts {
            return false;
        }
        entry.push(now);
        true
    }

    /// Drop expired entries so the map stays bounded.
    pub async fn cleanup_expired(&self) {
        let mut attempts = self.attempts.write().await;
        let now = Instant::now();
        for entry in attempts.values_mut() {
            entry.retain(|at| now.duration_since(*at) < self.window);
        }
        attempts.retain(|_, entry| !entry.is_empty());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked,
    AlreadyUnlocked,
    /// Wrong secret or rate-limited. Deliberately indistinguishable.
    Denied,
}

pub struct ActivationGate {
    secret_digest: [u8; 32],
    limiter: AttemptLimiter,
}

impl ActivationGate {
    pub fn new(settings: &Settings) -> Self {
        Self {
            secret_digest: digest(&settings.activation_secret),
            limiter: AttemptLimiter::new(
                settings.activation_max_attempts,
                Duration::from_secs(settings.activation_attempt_window_secs),
            ),
        }
    }

    /// Whether automated enforcement may run for this group right now.
    pub fn enforcement_enabled(&self, store: &ProfileStore, group_id: i64) -> EngineResult<bool> {
        Ok(store.read_group_state(group_id)?.enforcement_enabled())
    }

    pub fn is_locked(&self, store: &ProfileStore, group_id: i64) -> EngineResult<bool> {
        Ok(store.read_group_state(group_id)?.locked)
    }

    /// Attempt to unlock a group. Failure is a silent no-op: no partial
    /// match information, identical result whether the secret was wrong
    /// or the attempt was rate-limited.
    pub async fn try_unlock(
        &self,
        store: &ProfileStore,
        group_id: i64,
        admin_id: i64,
        candidate: &str,
    ) -> EngineResult<UnlockOutcome> {
        if !self.limiter.allow(admin_id).await {
            tracing::warn!(group_id, admin_id, "activation attempt rate-limited");
            return Ok(UnlockOutcome::Denied);
        }
        if digest(candidate) != self.secret_digest {
            tracing::warn!(group_id, admin_id, "activation attempt failed");
            return Ok(UnlockOutcome::Denied);
        }

        let mut state = store.read_group_state(group_id)?;
        if !state.locked {
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }
        state.locked = false;
        store.write_group_state(&state)?;
        tracing::info!(group_id, admin_id, "activation gate unlocked");
        Ok(UnlockOutcome::Unlocked)
    }

    /// Locking is always permitted for an authorized admin.
    pub fn lock(&self, store: &ProfileStore, group_id: i64, admin_id: i64) -> EngineResult<()> {
        let mut state = store.read_group_state(group_id)?;
        state.locked = true;
        store.write_group_state(&state)?;
        tracing::info!(group_id, admin_id, "activation gate locked");
        Ok(())
    }

    /// Toggle the patrol/standdown flag without touching the lock.
    pub fn set_patrol(
        &self,
        store: &ProfileStore,
        group_id: i64,
        enabled: bool,
    ) -> EngineResult<()> {
        let mut state = store.read_group_state(group_id)?;
        state.patrol = enabled;
        store.write_group_state(&state)?;
        tracing::info!(group_id, patrol = enabled, "patrol flag updated");
        Ok(())
    }
}

/// Fixed-width digest comparison keeps the check constant-time in the
/// candidate's content.
fn digest(value: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn gate_and_store(secret: &str) -> (ActivationGate, ProfileStore, tempfile::TempDir) {
        let mut settings = Settings::default();
        settings.activation_secret = secret.to_string();
        settings.activation_max_attempts = 3;
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path().join("db"), &settings).unwrap();
        (ActivationGate::new(&settings), store, dir)
    }

    #[tokio::test]
    async fn wrong_secret_is_a_noop() {
        let (gate, store, _dir) = gate_and_store("open-sesame");
        let outcome = gate.try_unlock(&store, 1, 42, "guess").await.unwrap();
        assert_eq!(outcome, UnlockOutcome::Denied);
        assert!(gate.is_locked(&store, 1).unwrap());
    }

    #[tokio::test]
    async fn correct_secret_unlocks_and_persists() {
        let (gate, store, _dir) = gate_and_store("open-sesame");
        let outcome = gate.try_unlock(&store, 1, 42, "open-sesame").await.unwrap();
        assert_eq!(outcome, UnlockOutcome::Unlocked);
        assert!(!gate.is_locked(&store, 1).unwrap());
        // Other groups stay locked.
        assert!(gate.is_locked(&store, 2).unwrap());
    }

    #[tokio::test]
    async fn attempts_are_rate_limited_per_admin() {
        let (gate, store, _dir) = gate_and_store("open-sesame");
        for _ in 0..3 {
            gate.try_unlock(&store, 1, 42, "bad").await.unwrap();
        }
        // Budget exhausted: even the right secret is denied for this admin.
        let outcome = gate.try_unlock(&store, 1, 42, "open-sesame").await.unwrap();
        assert_eq!(outcome, UnlockOutcome::Denied);
        // A different admin is unaffected.
        let outcome = gate.try_unlock(&store, 1, 7, "open-sesame").await.unwrap();
        assert_eq!(outcome, UnlockOutcome::Unlocked);
    }

    #[tokio::test]
    async fn lock_is_always_permitted() {
        let (gate, store, _dir) = gate_and_store("s");
        gate.try_unlock(&store, 1, 42, "s").await.unwrap();
        gate.lock(&store, 1, 42).unwrap();
        assert!(gate.is_locked(&store, 1).unwrap());
    }
}
