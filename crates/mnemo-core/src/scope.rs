//! Scope hierarchy resolution and precedence merging.
//!
//! Scopes form a closed three-level hierarchy: `project:<name>` overrides
//! `app:<name>` overrides `global`. Resolution is pure logic with no I/O;
//! unknown scopes are an open set created implicitly on first write.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Enumerates the scope namespaces a stored entry can belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeKey {
    Global,
    App(String),
    Project(String),
}

impl ScopeKey {
    /// Parses an `app:` or `project:` qualified name, or `global`.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == "global" {
            return Some(ScopeKey::Global);
        }
        if let Some(name) = trimmed.strip_prefix("app:") {
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            return Some(ScopeKey::App(name.to_string()));
        }
        if let Some(name) = trimmed.strip_prefix("project:") {
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            return Some(ScopeKey::Project(name.to_string()));
        }
        None
    }

    /// Lower is more specific; used for conflict precedence.
    pub fn specificity(&self) -> u8 {
        match self {
            ScopeKey::Project(_) => 0,
            ScopeKey::App(_) => 1,
            ScopeKey::Global => 2,
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Global => formatter.write_str("global"),
            ScopeKey::App(name) => write!(formatter, "app:{name}"),
            ScopeKey::Project(name) => write!(formatter, "project:{name}"),
        }
    }
}

impl FromStr for ScopeKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ScopeKey::parse(value)
            .ok_or_else(|| format!("invalid scope '{value}' (expected global, app:<name>, or project:<name>)"))
    }
}

impl Serialize for ScopeKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.to_string().as_str())
    }
}

impl<'de> Deserialize<'de> for ScopeKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ScopeKey::from_str(raw.as_str()).map_err(de::Error::custom)
    }
}

/// Request context a caller supplies when reading or writing memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScopeContext {
    pub app: Option<String>,
    pub project: Option<String>,
}

/// Maps a request context to the ordered set of visible scopes.
///
/// Most specific first, `global` always last. Absent fields are omitted.
pub fn resolve_scopes(context: &ScopeContext) -> Vec<ScopeKey> {
    let mut scopes = Vec::with_capacity(3);
    if let Some(project) = context
        .project
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        scopes.push(ScopeKey::Project(project.to_string()));
    }
    if let Some(app) = context
        .app
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        scopes.push(ScopeKey::App(app.to_string()));
    }
    scopes.push(ScopeKey::Global);
    scopes.dedup();
    scopes
}

/// Accessor seam for records that participate in precedence merging.
pub trait Scoped {
    fn scope(&self) -> &ScopeKey;
    fn merge_key(&self) -> &str;
    fn updated_unix_ms(&self) -> u64;
}

/// Picks, per logical key, the record from the most specific visible scope.
///
/// Records outside `precedence` are invisible. Same-specificity conflicts
/// (two different `app:` scopes both visible) and same-scope rewrites both
/// fall back to most-recently-updated wins. Output is ordered by merge key.
pub fn merge_preferences<T: Scoped + Clone>(records: &[T], precedence: &[ScopeKey]) -> Vec<T> {
    let mut winners: Vec<&T> = Vec::new();
    for record in records {
        if !precedence.contains(record.scope()) {
            continue;
        }
        match winners
            .iter()
            .position(|existing| existing.merge_key() == record.merge_key())
        {
            Some(index) => {
                let existing = winners[index];
                let candidate_rank = record.scope().specificity();
                let existing_rank = existing.scope().specificity();
                let wins = candidate_rank < existing_rank
                    || (candidate_rank == existing_rank
                        && record.updated_unix_ms() >= existing.updated_unix_ms());
                if wins {
                    winners[index] = record;
                }
            }
            None => winners.push(record),
        }
    }
    winners.sort_by(|left, right| left.merge_key().cmp(right.merge_key()));
    winners.into_iter().cloned().collect()
}
