use chrono::NaiveDate;
use mnemo_core::ScopeKey;
use mnemo_store::{IndexManager, KnowledgeStore};

fn sample_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 28).expect("valid date")
}

#[test]
fn functional_index_reconciles_writes_from_other_handles() {
    let temp = tempfile::tempdir().expect("tempdir");
    let writer = KnowledgeStore::new(temp.path());
    let reader = IndexManager::new(KnowledgeStore::new(temp.path()));

    writer
        .append_log(&ScopeKey::Global, sample_date(), "first entry")
        .expect("first append");
    reader.rebuild_if_stale().expect("first rebuild");
    let before = reader
        .scan(&[ScopeKey::Global], usize::MAX, 0)
        .expect("scan");
    assert_eq!(before.len(), 1);

    // Mutations from a different handle are picked up by marker comparison.
    std::thread::sleep(std::time::Duration::from_millis(5));
    writer
        .put_preference(&ScopeKey::Global, "editor", "vim")
        .expect("preference");
    let report = reader.rebuild_if_stale().expect("second rebuild");
    assert_eq!(report.rebuilt_artifacts, 1);

    let after = reader
        .scan(&[ScopeKey::Global], usize::MAX, 0)
        .expect("scan");
    assert_eq!(after.len(), 2);
}

#[test]
fn functional_rebuild_is_idempotent_across_fresh_handles() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = KnowledgeStore::new(temp.path());
    store
        .append_log(&ScopeKey::Global, sample_date(), "entry")
        .expect("append");
    store
        .assert_fact(&ScopeKey::Global, "topic", "statement", 0.9)
        .expect("fact");

    let first = IndexManager::new(KnowledgeStore::new(temp.path()))
        .rebuild_if_stale()
        .expect("first rebuild");
    assert_eq!(first.rebuilt_artifacts, 2);

    // A brand new handle reads the persisted snapshot and finds nothing stale.
    let second = IndexManager::new(KnowledgeStore::new(temp.path()))
        .rebuild_if_stale()
        .expect("second rebuild");
    assert_eq!(second.rebuilt_artifacts, 0);
    assert_eq!(second.removed_artifacts, 0);
}

#[test]
fn functional_deleted_artifacts_drop_out_of_the_index() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = KnowledgeStore::new(temp.path());
    let path = store
        .append_log(&ScopeKey::Global, sample_date(), "short lived entry")
        .expect("append");
    let index = IndexManager::new(store);
    index.rebuild_if_stale().expect("rebuild");

    std::fs::remove_file(path).expect("remove day file");
    let report = index.rebuild_if_stale().expect("rebuild after delete");
    assert_eq!(report.removed_artifacts, 1);
    assert!(index
        .scan(&[ScopeKey::Global], usize::MAX, 0)
        .expect("scan")
        .is_empty());
}
