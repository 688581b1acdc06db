//! Persistent embedding cache, one JSONL record per document version.
//!
//! Records are keyed by document id and stamped with the document's change
//! marker; a cached vector is fresh only when its marker still matches the
//! document's. The stream is append-only, folded to latest-per-id on load.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use mnemo_core::LockCoordinator;

const VECTOR_STREAM_FILE: &str = "vectors/embeddings.jsonl";
const VECTOR_SCHEMA_VERSION: u32 = 1;
const VECTOR_LOCK_RESOURCE: &str = "vectors";
const VECTOR_LOCK_WAIT: Duration = Duration::from_millis(5_000);

fn default_schema_version() -> u32 {
    VECTOR_SCHEMA_VERSION
}

/// Cached embedding for one document version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub id: String,
    pub change_marker_ms: u64,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorStore {
    root: PathBuf,
    locks: LockCoordinator,
}

impl VectorStore {
    pub fn new(root: impl Into<PathBuf>, locks: LockCoordinator) -> Self {
        Self {
            root: root.into(),
            locks,
        }
    }

    pub fn stream_path(&self) -> PathBuf {
        self.root.join(VECTOR_STREAM_FILE)
    }

    /// Latest cached record per document id. Unparseable lines are skipped.
    pub fn load(&self) -> Result<HashMap<String, VectorRecord>> {
        let path = self.stream_path();
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read vector stream {}", path.display()))?;
        let mut folded = HashMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<VectorRecord>(line) {
                Ok(record) => {
                    folded.insert(record.id.clone(), record);
                }
                Err(error) => {
                    tracing::warn!(%error, "store_record_skipped_corrupt");
                }
            }
        }
        Ok(folded)
    }

    /// Appends freshly computed records under the vector resource lock.
    pub fn store(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self
            .locks
            .acquire(VECTOR_LOCK_RESOURCE, VECTOR_LOCK_WAIT)
            .context("failed to lock vector stream")?;
        let path = self.stream_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open vector stream {}", path.display()))?;
        for record in records {
            let line =
                serde_json::to_string(record).context("failed to encode vector record")?;
            writeln!(file, "{line}")
                .with_context(|| format!("failed to append to {}", path.display()))?;
        }
        file.flush()
            .with_context(|| format!("failed to flush {}", path.display()))
    }
}
