use std::thread;

use chrono::NaiveDate;
use mnemo_core::ScopeKey;
use mnemo_store::KnowledgeStore;

fn sample_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 28).expect("valid date")
}

#[test]
fn functional_concurrent_preference_writers_leave_exactly_one_winner() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_path_buf();

    let writers = (0..2)
        .map(|index| {
            let root = root.clone();
            thread::spawn(move || {
                let store = KnowledgeStore::new(root);
                for round in 0..10 {
                    store
                        .put_preference(
                            &ScopeKey::Global,
                            "contended",
                            format!("writer-{index}-round-{round}").as_str(),
                        )
                        .expect("preference write");
                }
            })
        })
        .collect::<Vec<_>>();
    for writer in writers {
        writer.join().expect("writer thread");
    }

    let store = KnowledgeStore::new(root);
    let merged = store
        .merged_preferences(&[ScopeKey::Global])
        .expect("merged");
    assert_eq!(merged.len(), 1);
    // The surviving value is one of the writes, never an interleaved blend.
    assert!(merged[0].value.starts_with("writer-0") || merged[0].value.starts_with("writer-1"));
    assert!(merged[0].value.ends_with("round-9"));
}

#[test]
fn functional_concurrent_same_day_journal_appends_are_all_present() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_path_buf();

    let writers = (0..4)
        .map(|index| {
            let root = root.clone();
            thread::spawn(move || {
                let store = KnowledgeStore::new(root);
                store
                    .append_log(
                        &ScopeKey::Global,
                        sample_date(),
                        format!("entry from writer {index}").as_str(),
                    )
                    .expect("journal append");
            })
        })
        .collect::<Vec<_>>();
    for writer in writers {
        writer.join().expect("writer thread");
    }

    let store = KnowledgeStore::new(root);
    let day = store
        .journal()
        .read_day(sample_date())
        .expect("read day")
        .expect("day exists");
    for index in 0..4 {
        assert!(day.contains(format!("entry from writer {index}").as_str()));
    }
    // One front matter block regardless of how many writers raced.
    assert_eq!(day.matches("type: daily_log").count(), 1);
}

#[test]
fn functional_concurrent_fact_assertions_never_leave_two_current() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().to_path_buf();

    let writers = (0..2)
        .map(|index| {
            let root = root.clone();
            thread::spawn(move || {
                let store = KnowledgeStore::new(root);
                for round in 0..5 {
                    store
                        .assert_fact(
                            &ScopeKey::Global,
                            "contended subject",
                            format!("statement {index}-{round}").as_str(),
                            0.9,
                        )
                        .expect("fact assert");
                }
            })
        })
        .collect::<Vec<_>>();
    for writer in writers {
        writer.join().expect("writer thread");
    }

    let store = KnowledgeStore::new(root);
    let current = store
        .facts()
        .current()
        .expect("current facts")
        .into_iter()
        .filter(|fact| fact.subject == "contended subject")
        .collect::<Vec<_>>();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].version, 10);

    let history = store
        .facts()
        .history(&ScopeKey::Global, "contended subject")
        .expect("history");
    assert_eq!(history.len(), 10);
    // Every superseded version points at its successor.
    for pair in history.windows(2) {
        assert_eq!(
            pair[0].superseded_by.as_deref(),
            Some(pair[1].id.as_str())
        );
    }
    assert!(history.last().expect("last").superseded_by.is_none());
}
