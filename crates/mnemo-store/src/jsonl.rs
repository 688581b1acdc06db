//! Append-only JSONL stream helpers shared by the preference and fact stores.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create store directory {}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open record stream {}", path.display()))?;
    let encoded = serde_json::to_string(record).context("failed to encode record")?;
    file.write_all(encoded.as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .and_then(|()| file.flush())
        .with_context(|| format!("failed to append record to {}", path.display()))?;
    Ok(())
}

/// Loads every parseable record in write order. A corrupt line is skipped
/// with a warning rather than failing the whole load, so one damaged record
/// never takes the store down.
pub(crate) fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open record stream {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read {} at line {}", path.display(), index + 1)
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(trimmed) {
            Ok(record) => records.push(record),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    %error,
                    "store_record_skipped_corrupt"
                );
            }
        }
    }
    Ok(records)
}
