//! Periodic mirror of the remote export into the local watchlist.
//!
//! Runs are single-flight: an overlapping trigger is a logged no-op. A
//! failed fetch leaves the existing watchlist untouched and doubles a
//! capped backoff before the next attempt.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::config::Settings;
use crate::errors::EngineResult;
use crate::reputation::HttpReputationClient;
use crate::store::ProfileStore;

const WATCHLIST_SOURCE: &str = "remote_export";
const MAX_BACKOFF_SECS: u64 = 3600;

/// Outcome of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Completed; carries (entries seen, new entries, pruned entries).
    Completed {
        seen: usize,
        added: usize,
        pruned: usize,
    },
    /// Another run was already in flight.
    AlreadyRunning,
    /// Fetch failed; the watchlist was left untouched.
    FetchFailed,
}

pub struct WatchlistSync {
    store: Arc<ProfileStore>,
    client: Arc<HttpReputationClient>,
    prune_stale: bool,
    interval: Duration,
    in_flight: Mutex<()>,
    backoff_secs: AtomicU64,
}

impl WatchlistSync {
    pub fn new(
        store: Arc<ProfileStore>,
        client: Arc<HttpReputationClient>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            client,
            prune_stale: settings.prune_stale_watchlist,
            interval: Duration::from_secs(settings.watchlist_sync_interval_secs),
            in_flight: Mutex::new(()),
            backoff_secs: AtomicU64::new(0),
        }
    }

    /// Run one sync. Safe to call from a timer and on demand concurrently.
    pub async fn run_once(&self) -> EngineResult<SyncOutcome> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("watchlist sync already in flight, skipping trigger");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let entries = match self.client.fetch_export().await {
            Ok(entries) => entries,
            Err(err) => {
                let backoff = self.bump_backoff();
                tracing::warn!(
                    error = %err,
                    next_retry_secs = backoff,
                    "watchlist export fetch failed, keeping existing watchlist"
                );
                return Ok(SyncOutcome::FetchFailed);
            }
        };
        self.backoff_secs.store(0, Ordering::Relaxed);

        let now = Utc::now().timestamp();
        let seen = entries.len();
        let added = self.store.upsert_watchlist(&entries, WATCHLIST_SOURCE, now)?;
        let pruned = if self.prune_stale {
            let present: HashSet<i64> = entries.iter().map(|(id, _)| *id).collect();
            self.store.prune_watchlist_absent(&present)?
        } else {
            0
        };

        tracing::info!(seen, added, pruned, "watchlist sync complete");
        Ok(SyncOutcome::Completed { seen, added, pruned })
    }

    fn bump_backoff(&self) -> u64 {
        let current = self.backoff_secs.load(Ordering::Relaxed);
        let next = if current == 0 {
            self.interval.as_secs().min(60).max(5)
        } else {
            (current * 2).min(MAX_BACKOFF_SECS)
        };
        self.backoff_secs.store(next, Ordering::Relaxed);
        next
    }

    /// Extra delay to observe after a failed run.
    pub fn current_backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs.load(Ordering::Relaxed))
    }

    /// Timer loop for `shadowpi run`. Never returns.
    pub async fn run_forever(self: Arc<Self>) {
        loop {
            if let Err(err) = self.run_once().await {
                tracing::error!(error = %err, "watchlist sync storage failure");
            }
            tokio::time::sleep(self.interval + self.current_backoff()).await;
        }
    }
}
