mod args;

use anyhow::Result;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use mnemo_core::ScopeContext;
use mnemo_graph::TripleFilter;
use mnemo_retrieval::{SearchMode, SearchRequest};
use mnemo_tools::Toolkit;

use args::{Cli, CliSearchMode, Command};

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let context = ScopeContext {
        app: cli.app.clone(),
        project: cli.project.clone(),
    };
    let toolkit = Toolkit::new(cli.storage_dir.clone(), context);

    match cli.command {
        Command::Init { recent } => {
            let report = toolkit.initialize(recent)?;
            print_json(&report)
        }
        Command::Headers { limit, offset } => {
            let headers = toolkit.read_headers(limit, offset)?;
            print_json(&headers)
        }
        Command::Read { id } => {
            let content = toolkit.read_content(id.as_str())?;
            print!("{content}");
            Ok(())
        }
        Command::Log {
            content,
            date,
            scope,
        } => {
            let report = toolkit.write_log(scope, date, content.as_str())?;
            print_json(&report)
        }
        Command::Pref { key, value, scope } => {
            let record = toolkit.write_preference(scope, key.as_str(), value.as_str())?;
            print_json(&record)
        }
        Command::Fact {
            subject,
            statement,
            confidence,
            scope,
        } => {
            let fact = toolkit.write_fact(scope, subject.as_str(), statement.as_str(), confidence)?;
            print_json(&fact)
        }
        Command::Facts {
            subject,
            limit,
            offset,
        } => {
            let facts = toolkit.query_facts(subject.as_deref(), limit, offset)?;
            print_json(&facts)
        }
        Command::Search {
            query,
            mode,
            limit,
            rerank,
            deadline_ms,
        } => {
            let report = toolkit.search(SearchRequest {
                query,
                mode: match mode {
                    CliSearchMode::Lexical => SearchMode::Lexical,
                    CliSearchMode::Vector => SearchMode::Vector,
                    CliSearchMode::Hybrid => SearchMode::Hybrid,
                    CliSearchMode::Graph => SearchMode::Graph,
                },
                limit,
                rerank,
                deadline_ms,
                ..SearchRequest::default()
            })?;
            print_json(&report)
        }
        Command::Relate {
            subject,
            predicate,
            object,
            confidence,
            source_fact,
            scope,
        } => {
            let triple = toolkit.assert_relation(
                scope,
                subject.as_str(),
                predicate.as_str(),
                object.as_str(),
                confidence,
                source_fact.as_deref(),
            )?;
            print_json(&triple)
        }
        Command::Graph {
            contains,
            from,
            hops,
            limit,
        } => {
            let report = toolkit.graph_query(
                TripleFilter {
                    contains,
                    limit,
                    ..TripleFilter::default()
                },
                from.as_deref(),
                hops,
            )?;
            print_json(&report)
        }
    }
}
