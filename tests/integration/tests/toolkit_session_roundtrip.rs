use chrono::NaiveDate;
use mnemo_core::{ScopeContext, ScopeKey};
use mnemo_graph::TripleFilter;
use mnemo_retrieval::{SearchMode, SearchRequest};
use mnemo_tools::Toolkit;

fn project_toolkit(root: &std::path::Path) -> Toolkit {
    Toolkit::new(
        root,
        ScopeContext {
            app: Some("shell".to_string()),
            project: Some("mnemo".to_string()),
        },
    )
}

fn sample_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 8, 28).expect("valid date")
}

#[test]
fn functional_full_session_write_then_bootstrap_then_search() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toolkit = project_toolkit(temp.path());

    toolkit
        .write_preference(None, "editor", "user prefers vim keybindings")
        .expect("preference");
    toolkit
        .write_fact(None, "test runner", "the project standardized on nextest", 0.9)
        .expect("fact");
    toolkit
        .write_log(None, Some(sample_date()), "migrated the suite to nextest")
        .expect("log");
    toolkit
        .assert_relation(None, "nextest", "replaces", "cargo test", 1.0, None)
        .expect("relation");

    // A fresh handle over the same root sees everything at bootstrap.
    let rejoined = project_toolkit(temp.path());
    let report = rejoined.initialize(10).expect("initialize");
    assert_eq!(report.scopes.len(), 3);
    assert_eq!(report.preferences.len(), 1);
    assert!(report
        .recent_headers
        .iter()
        .any(|header| header.id == "journal:2026-08-28"));

    let search = rejoined
        .search(SearchRequest {
            query: "nextest".to_string(),
            mode: SearchMode::Lexical,
            ..SearchRequest::default()
        })
        .expect("search");
    assert!(search.hits.len() >= 2);

    let graph = rejoined
        .graph_query(
            TripleFilter {
                limit: 10,
                ..TripleFilter::default()
            },
            Some("nextest"),
            2,
        )
        .expect("graph query");
    assert_eq!(graph.stats.triple_count, 1);
    let traversal = graph.traversal.expect("traversal");
    assert!(traversal
        .paths
        .iter()
        .any(|path| path.entities.last().map(String::as_str) == Some("cargo test")));
}

#[test]
fn functional_fact_supersession_is_visible_across_handles() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toolkit = project_toolkit(temp.path());

    let first = toolkit
        .write_fact(None, "deploy target", "deploys go to staging", 0.8)
        .expect("first fact");
    let second = toolkit
        .write_fact(None, "deploy target", "deploys go straight to production", 0.9)
        .expect("second fact");
    assert_eq!(second.version, first.version + 1);

    let rejoined = project_toolkit(temp.path());
    let current = rejoined
        .query_facts(Some("deploy"), 10, 0)
        .expect("query");
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, second.id);
    assert!(current[0].statement.contains("production"));

    let history = rejoined
        .store()
        .facts()
        .history(&second.scope, "deploy target")
        .expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].superseded_by.as_deref(), Some(second.id.as_str()));
    assert!(history[1].superseded_by.is_none());
}

#[test]
fn functional_project_scope_shadows_global_without_destroying_it() {
    let temp = tempfile::tempdir().expect("tempdir");
    let global = Toolkit::new(temp.path(), ScopeContext::default());
    global
        .write_preference(None, "indent", "spaces")
        .expect("global preference");

    let project = project_toolkit(temp.path());
    project
        .write_preference(None, "indent", "tabs")
        .expect("project preference");

    let project_view = project.initialize(10).expect("project initialize");
    let indent = project_view
        .preferences
        .iter()
        .find(|record| record.key == "indent")
        .expect("indent preference");
    assert_eq!(indent.scope, ScopeKey::Project("mnemo".to_string()));
    assert_eq!(indent.value, "tabs");

    let global_view = global.initialize(10).expect("global initialize");
    let indent = global_view
        .preferences
        .iter()
        .find(|record| record.key == "indent")
        .expect("indent preference");
    assert_eq!(indent.scope, ScopeKey::Global);
    assert_eq!(indent.value, "spaces");
}

#[test]
fn regression_read_content_refuses_ids_outside_the_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toolkit = project_toolkit(temp.path());
    toolkit
        .write_log(None, Some(sample_date()), "only legitimate content")
        .expect("log");

    assert!(toolkit.read_content("journal:2026-08-28").is_ok());
    assert!(toolkit.read_content("journal:../../etc/passwd").is_err());
    assert!(toolkit.read_content("no-such-id").is_err());
}
