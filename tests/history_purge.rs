//! Commit history and purge tests.

use std::sync::Arc;
use strata::{
    ChangeKind, Document, ManualClock, Metadata, ObjectId, PurgeMode, RevisionStore, StoreEvent,
    SubscriptionConfig, SubscriptionFilter,
};

fn store() -> RevisionStore {
    RevisionStore::in_memory_with_clock(Arc::new(ManualClock::new(1)))
}

fn version(n: u32) -> Document {
    Document::new("concept", "1").with_field("term", format!("v{}", n))
}

fn commit(store: &RevisionStore, branch: &str, doc: Document) {
    let mut staging = store.prepare_commit();
    staging.stage_change(doc);
    staging
        .commit("", branch, store.current_time(), "tester", "update")
        .unwrap();
}

fn term(store: &RevisionStore, reference: &str) -> Option<String> {
    store
        .read(reference, |s| {
            Ok(s.get("concept", "1")
                .and_then(|d| d.get("term").and_then(|v| v.as_str()).map(String::from)))
        })
        .unwrap()
}

#[test]
fn test_history_is_newest_first() {
    let store = store();
    for n in 1..=3 {
        commit(&store, "MAIN", version(n));
    }
    commit(
        &store,
        "MAIN",
        Document::new("concept", "2").with_field("term", "other"),
    );

    let history = store.history(&ObjectId::new("concept", "1"));
    assert_eq!(history.len(), 3);
    assert!(history[0].timestamp > history[1].timestamp);
    assert!(history[1].timestamp > history[2].timestamp);
    assert_eq!(history[2].details[0].kind, ChangeKind::Added);
    assert_eq!(history[0].details[0].kind, ChangeKind::Changed);
    assert!(history.iter().all(|c| c.details.len() == 1));

    assert_eq!(store.commits_on("MAIN").len(), 4);
    assert!(store.get_commit("missing").is_err());
}

#[test]
fn test_history_spans_branches() {
    let store = store();
    commit(&store, "MAIN", version(1));
    let child = store.create_branch("MAIN", "a", Metadata::new()).unwrap();
    commit(&store, &child, version(2));

    let branches: Vec<String> = store
        .history(&ObjectId::new("concept", "1"))
        .into_iter()
        .map(|c| c.branch)
        .collect();
    assert_eq!(branches, vec![child, "MAIN".to_string()]);
}

#[test]
fn test_purge_removes_superseded_revisions() {
    let store = store();
    for n in 1..=3 {
        commit(&store, "MAIN", version(n));
    }
    let before = store.stats().revision_count;

    let report = store.purge("MAIN", PurgeMode::All).unwrap();
    assert_eq!(report.revisions_removed, 2);
    assert_eq!(store.stats().revision_count, before - 2);
    assert_eq!(term(&store, "MAIN").as_deref(), Some("v3"));

    // History survives a purge.
    assert_eq!(store.history(&ObjectId::new("concept", "1")).len(), 3);
    assert_eq!(store.purge("MAIN", PurgeMode::All).unwrap().revisions_removed, 0);
}

#[test]
fn test_purge_keeps_revisions_visible_from_child_base() {
    let store = store();
    commit(&store, "MAIN", version(1));
    let child = store.create_branch("MAIN", "a", Metadata::new()).unwrap();
    commit(&store, "MAIN", version(2));
    commit(&store, "MAIN", version(3));

    let history_only = store.purge("MAIN", PurgeMode::History).unwrap();
    assert_eq!(history_only.revisions_removed, 0);

    let report = store.purge("MAIN", PurgeMode::All).unwrap();
    assert_eq!(report.segments_scanned, 2);
    assert_eq!(report.revisions_removed, 1);

    assert_eq!(term(&store, "MAIN").as_deref(), Some("v3"));
    assert_eq!(term(&store, &child).as_deref(), Some("v1"));
    assert_eq!(term(&store, &format!("{}^", child)).as_deref(), Some("v1"));
}

#[test]
fn test_purge_latest_only_scans_current_segment() {
    let store = store();
    commit(&store, "MAIN", version(1));
    commit(&store, "MAIN", version(2));
    store.create_branch("MAIN", "a", Metadata::new()).unwrap();
    commit(&store, "MAIN", version(3));
    commit(&store, "MAIN", version(4));

    let latest = store.purge("MAIN", PurgeMode::Latest).unwrap();
    assert_eq!(latest.segments_scanned, 1);
    assert_eq!(latest.revisions_removed, 1);

    let history = store.purge("MAIN", PurgeMode::History).unwrap();
    assert_eq!(history.revisions_removed, 1);
    assert_eq!(term(&store, "MAIN").as_deref(), Some("v4"));
}

#[test]
fn test_purge_keeps_what_an_open_read_sees() {
    let store = store();
    commit(&store, "MAIN", version(1));
    commit(&store, "MAIN", version(2));

    let seen = store
        .read("MAIN", |s| {
            commit(&store, "MAIN", version(3));
            let report = store.purge("MAIN", PurgeMode::All)?;
            // v1 is gone, v2 is pinned by this read.
            assert_eq!(report.revisions_removed, 1);
            Ok(s.get("concept", "1").and_then(|d| d.get("term").cloned()))
        })
        .unwrap();
    assert_eq!(seen, Some(serde_json::json!("v2")));

    // Once the read finished v2 can go.
    assert_eq!(store.purge("MAIN", PurgeMode::All).unwrap().revisions_removed, 1);
    assert_eq!(term(&store, "MAIN").as_deref(), Some("v3"));
}

#[test]
fn test_purge_of_branch_leaves_parent_alone() {
    let store = store();
    commit(&store, "MAIN", version(1));
    let child = store.create_branch("MAIN", "a", Metadata::new()).unwrap();
    commit(&store, &child, version(2));
    commit(&store, &child, version(3));

    let report = store.purge(&child, PurgeMode::All).unwrap();
    assert_eq!(report.revisions_removed, 1);
    assert_eq!(term(&store, &child).as_deref(), Some("v3"));
    assert_eq!(term(&store, "MAIN").as_deref(), Some("v1"));
    assert!(store.purge("MAIN/missing", PurgeMode::All).is_err());
}

#[test]
fn test_purge_notifies_subscribers() {
    let store = store();
    let handle = store.subscribe(SubscriptionConfig {
        filter: SubscriptionFilter::all(),
        ..Default::default()
    });
    commit(&store, "MAIN", version(1));
    commit(&store, "MAIN", version(2));
    store.purge("MAIN", PurgeMode::All).unwrap();

    let events: Vec<StoreEvent> = handle.receiver.try_iter().collect();
    assert!(matches!(events.last(), Some(StoreEvent::Purged { report }) if report.revisions_removed == 1));
}
