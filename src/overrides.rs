//! Admin-issued override ledger.
//!
//! Overrides outrank every computed outcome: `allow` caps the resulting
//! action at warn, `force-ban` always bans. At most one active record per
//! identity; `clear` removes it. Every write is timestamped and
//! attributed for audit.

use chrono::Utc;

use crate::errors::EngineResult;
use crate::profile::{OverrideKind, OverrideRecord};
use crate::store::ProfileStore;

pub struct OverrideLedger<'a> {
    store: &'a ProfileStore,
}

impl<'a> OverrideLedger<'a> {
    pub fn new(store: &'a ProfileStore) -> Self {
        Self { store }
    }

    pub async fn allow(
        &self,
        identity_id: i64,
        note: Option<&str>,
        author: &str,
    ) -> EngineResult<()> {
        self.write(identity_id, OverrideKind::Allow, note, author).await
    }

    pub async fn force_ban(
        &self,
        identity_id: i64,
        note: Option<&str>,
        author: &str,
    ) -> EngineResult<()> {
        self.write(identity_id, OverrideKind::ForceBan, note, author)
            .await
    }

    pub async fn clear(&self, identity_id: i64) -> EngineResult<bool> {
        let existed = self.store.clear_override(identity_id).await?;
        if existed {
            tracing::info!(identity_id, "override cleared");
        }
        Ok(existed)
    }

    pub fn read(&self, identity_id: i64) -> EngineResult<Option<OverrideRecord>> {
        self.store.read_override(identity_id)
    }

    async fn write(
        &self,
        identity_id: i64,
        kind: OverrideKind,
        note: Option<&str>,
        author: &str,
    ) -> EngineResult<()> {
        let record = OverrideRecord {
            identity_id,
            kind,
            note: note.map(str::to_string),
            author: author.to_string(),
            updated_at: Utc::now().timestamp(),
        };
        self.store.write_override(&record).await?;
        tracing::info!(identity_id, kind = ?kind, author, "override stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    #[tokio::test]
    async fn latest_write_wins_and_clear_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::open(dir.path().join("db"), &Settings::default()).unwrap();
        let ledger = OverrideLedger::new(&store);

        ledger.allow(5, Some("vouched"), "mod_a").await.unwrap();
        assert_eq!(
            ledger.read(5).unwrap().unwrap().kind,
            OverrideKind::Allow
        );

        ledger.force_ban(5, None, "mod_b").await.unwrap();
        let record = ledger.read(5).unwrap().unwrap();
        assert_eq!(record.kind, OverrideKind::ForceBan);
        assert_eq!(record.author, "mod_b");

        assert!(ledger.clear(5).await.unwrap());
        assert!(ledger.read(5).unwrap().is_none());
        assert!(!ledger.clear(5).await.unwrap());
    }
}
