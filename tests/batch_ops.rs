//! Batch surfaces: roster import, sweeps, and watchlist refresh.

use std::sync::Arc;

use shadowpi::actions::{ActionKind, RecordingSink};
use shadowpi::config::Settings;
use shadowpi::reputation::parse_export;
use shadowpi::roster::import_roster;
use shadowpi::store::ProfileStore;
use shadowpi::sweep::{SweepEngine, SweepMode};

fn test_store() -> (Arc<ProfileStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::open(dir.path().join("db"), &Settings::default()).unwrap();
    (Arc::new(store), dir)
}

#[tokio::test]
async fn roster_import_skips_malformed_lines() {
    let (store, _dir) = test_store();
    let body = "\
12345 @alice Alice Smith
67890, @bob
no numeric id here
";
    let summary = import_roster(&store, 7, body).await.unwrap();
    assert_eq!(summary.imported, 2);
    assert_eq!(summary.skipped, 1);

    let alice = store.read_profile(12345).unwrap().unwrap();
    assert_eq!(alice.username.as_deref(), Some("alice"));
    assert_eq!(alice.display_name.as_deref(), Some("Alice Smith"));
    assert!(alice.groups.contains(&7));

    let bob = store.read_profile(67890).unwrap().unwrap();
    assert_eq!(bob.username.as_deref(), Some("bob"));
}

#[tokio::test]
async fn roster_import_is_idempotent() {
    let (store, _dir) = test_store();
    let body = "111 @carol\n222 @dave\n";
    import_roster(&store, 9, body).await.unwrap();
    let again = import_roster(&store, 9, body).await.unwrap();
    assert_eq!(again.imported, 2);

    let carol = store.read_profile(111).unwrap().unwrap();
    assert_eq!(carol.groups.len(), 1);
}

#[tokio::test]
async fn repeated_clean_sweep_does_not_double_shadowban() {
    let (store, _dir) = test_store();
    let settings = Settings::default();
    let now = chrono::Utc::now().timestamp();

    // A profile past the shadowban cutoff: forward-on-join, churn, incidents.
    store
        .update_profile(42, |profile| {
            profile.first_seen = now - 5 * 86_400;
            profile.messages_sent = 4;
            profile.forwards_sent = 4;
            profile.first_forward_ts = profile.first_seen + 30;
            profile.identity_changes = 3;
            profile.warnings = 1;
            profile.groups.insert(1);
        })
        .await
        .unwrap();
    // A quiet member below every cutoff.
    store
        .update_profile(43, |profile| {
            profile.first_seen = now - 86_400;
            profile.messages_sent = 50;
            profile.username = Some("@regular".to_string());
            profile.display_name = Some("Reg Ular".to_string());
            profile.groups.insert(1);
        })
        .await
        .unwrap();

    let sweeper = SweepEngine::new(store.clone(), settings);
    let sink = RecordingSink::new();

    let first = sweeper.run(1, SweepMode::Clean, None, &sink).await.unwrap();
    assert_eq!(first.scanned, 2);
    assert_eq!(first.shadowbans_applied, 1);
    assert!(store.read_profile(42).unwrap().unwrap().shadowbanned);

    let second = sweeper.run(1, SweepMode::Clean, None, &sink).await.unwrap();
    assert_eq!(second.shadowbans_applied, 0);
    assert_eq!(sink.count_of(ActionKind::Discard), 1);
}

#[tokio::test]
async fn report_sweep_takes_no_actions_and_is_stable() {
    let (store, _dir) = test_store();
    let now = chrono::Utc::now().timestamp();

    for id in [70, 71] {
        store
            .update_profile(id, |profile| {
                profile.first_seen = now - 10 * 86_400;
                profile.forwards_sent = 5;
                profile.messages_sent = 5;
                profile.first_forward_ts = profile.first_seen + 10;
                profile.identity_changes = 4;
                profile.warnings = 2;
                profile.groups.insert(3);
            })
            .await
            .unwrap();
    }

    let sweeper = SweepEngine::new(store.clone(), Settings::default());
    let sink = RecordingSink::new();
    let first = sweeper.run(3, SweepMode::Report, None, &sink).await.unwrap();
    let second = sweeper.run(3, SweepMode::Report, None, &sink).await.unwrap();

    assert!(sink.records().is_empty());
    assert_eq!(first.actions_taken, 0);
    assert_eq!(
        first
            .high_risk
            .iter()
            .map(|r| (r.identity_id, r.score))
            .collect::<Vec<_>>(),
        second
            .high_risk
            .iter()
            .map(|r| (r.identity_id, r.score))
            .collect::<Vec<_>>(),
    );
    assert!(!store.read_profile(70).unwrap().unwrap().shadowbanned);
}

#[tokio::test]
async fn sweep_only_touches_the_requested_group() {
    let (store, _dir) = test_store();
    let now = chrono::Utc::now().timestamp();
    store
        .update_profile(55, |profile| {
            profile.first_seen = now - 86_400;
            profile.groups.insert(2);
        })
        .await
        .unwrap();

    let sweeper = SweepEngine::new(store, Settings::default());
    let sink = RecordingSink::new();
    let report = sweeper.run(999, SweepMode::Report, None, &sink).await.unwrap();
    assert_eq!(report.scanned, 0);
}

#[tokio::test]
async fn export_refresh_applied_twice_changes_nothing() {
    let (store, _dir) = test_store();
    let body = "\
# CAS export
1000,spam
2000
bogus line
3000,flood
";
    let entries = parse_export(body);
    assert_eq!(entries.len(), 3);

    let added = store.upsert_watchlist(&entries, "remote_export", 100).unwrap();
    assert_eq!(added, 3);
    let added_again = store.upsert_watchlist(&entries, "remote_export", 200).unwrap();
    assert_eq!(added_again, 0);
    assert_eq!(store.watchlist_len().unwrap(), 3);

    let entry = store.in_watchlist(1000).unwrap().unwrap();
    assert_eq!(entry.reason.as_deref(), Some("spam"));
    assert_eq!(entry.first_synced, 100);
    assert_eq!(entry.last_synced, 200);
}
