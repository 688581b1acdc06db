use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use mnemo_core::ScopeKey;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_confidence(value: &str) -> Result<f32, String> {
    let parsed = value
        .parse::<f32>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err("value must be in range 0.0..=1.0".to_string());
    }
    Ok(parsed)
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|error| format!("failed to parse date (expected YYYY-MM-DD): {error}"))
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum CliSearchMode {
    Lexical,
    Vector,
    #[default]
    Hybrid,
    Graph,
}

#[derive(Debug, Parser)]
#[command(
    name = "mnemo",
    about = "Persistent scoped memory for autonomous agents",
    version
)]
pub struct Cli {
    #[arg(
        long = "storage-dir",
        env = "MNEMO_STORAGE_DIR",
        default_value = ".mnemo",
        help = "Storage root holding journals, preferences, facts, graph, and index"
    )]
    pub storage_dir: PathBuf,

    #[arg(
        long,
        env = "MNEMO_APP",
        help = "Application scope name (writes target the most specific scope)"
    )]
    pub app: Option<String>,

    #[arg(
        long,
        env = "MNEMO_PROJECT",
        help = "Project scope name (writes target the most specific scope)"
    )]
    pub project: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve the scope chain, merged preferences, and recent headers
    Init {
        #[arg(long, default_value_t = 10, value_parser = parse_positive_usize)]
        recent: usize,
    },
    /// List headers for everything visible in the current scopes
    Headers {
        #[arg(long, default_value_t = 20, value_parser = parse_positive_usize)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Print the full content behind one header id
    Read {
        id: String,
    },
    /// Append a journal entry
    Log {
        content: String,
        #[arg(long, value_parser = parse_date, help = "Entry date, defaults to today")]
        date: Option<NaiveDate>,
        #[arg(long, help = "Target scope, overrides the default write scope")]
        scope: Option<ScopeKey>,
    },
    /// Set a preference in the current write scope
    Pref {
        key: String,
        value: String,
        #[arg(long, help = "Target scope, overrides the default write scope")]
        scope: Option<ScopeKey>,
    },
    /// Record a fact, superseding the current fact with the same subject
    Fact {
        subject: String,
        statement: String,
        #[arg(long, default_value_t = 1.0, value_parser = parse_confidence)]
        confidence: f32,
        #[arg(long, help = "Target scope, overrides the default write scope")]
        scope: Option<ScopeKey>,
    },
    /// Query current facts visible from the scope chain
    Facts {
        #[arg(long, help = "Substring filter on the fact subject")]
        subject: Option<String>,
        #[arg(long, default_value_t = 20, value_parser = parse_positive_usize)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Search the indexed corpus
    Search {
        query: String,
        #[arg(long, value_enum, default_value_t = CliSearchMode::Hybrid)]
        mode: CliSearchMode,
        #[arg(long, default_value_t = 10, value_parser = parse_positive_usize)]
        limit: usize,
        #[arg(long, default_value_t = false, help = "Rerank results via the configured provider")]
        rerank: bool,
        #[arg(long, help = "Soft time budget in milliseconds; expiry returns partial results")]
        deadline_ms: Option<u64>,
    },
    /// Assert a relation edge in the current write scope
    Relate {
        subject: String,
        predicate: String,
        object: String,
        #[arg(long, default_value_t = 1.0, value_parser = parse_confidence)]
        confidence: f32,
        #[arg(long, help = "Fact id this relation was derived from")]
        source_fact: Option<String>,
        #[arg(long, help = "Target scope, overrides the default write scope")]
        scope: Option<ScopeKey>,
    },
    /// Look up relations, optionally traversing from a start entity
    Graph {
        #[arg(long, help = "Substring matched against subject, predicate, or object")]
        contains: Option<String>,
        #[arg(long, help = "Entity to traverse outward from")]
        from: Option<String>,
        #[arg(long, default_value_t = 2, value_parser = parse_positive_usize)]
        hops: usize,
        #[arg(long, default_value_t = 20, value_parser = parse_positive_usize)]
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn unit_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn unit_confidence_parser_rejects_out_of_range() {
        assert!(parse_confidence("0.5").is_ok());
        assert!(parse_confidence("1.5").is_err());
        assert!(parse_confidence("-0.1").is_err());
    }

    #[test]
    fn unit_date_parser_requires_iso_shape() {
        assert!(parse_date("2026-08-28").is_ok());
        assert!(parse_date("28/08/2026").is_err());
    }
}
