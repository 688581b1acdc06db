use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

/// Replaces `path` with `content` via a sibling temp file and rename, so
/// concurrent readers observe either the old snapshot or the new one and
/// never a torn write. The temp file is flushed to disk before the rename.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let temp_path = sibling_temp_path(path, parent_dir);
    let result = write_then_rename(&temp_path, path, content);
    if result.is_err() {
        // Leave no orphaned temp file behind a failed swap.
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_then_rename(temp_path: &Path, path: &Path, content: &str) -> Result<()> {
    let mut file = File::create(temp_path)
        .with_context(|| format!("failed to create temporary file {}", temp_path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("failed to write temporary file {}", temp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync temporary file {}", temp_path.display()))?;
    drop(file);
    fs::rename(temp_path, path).with_context(|| {
        format!(
            "failed to swap {} into place at {}",
            temp_path.display(),
            path.display()
        )
    })
}

fn sibling_temp_path(path: &Path, parent_dir: &Path) -> PathBuf {
    let stem = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("snapshot");
    parent_dir.join(format!(
        ".{stem}.tmp-{}-{}",
        std::process::id(),
        current_unix_timestamp_ms()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested").join("sample.txt");
        write_text_atomic(&path, "hello world").expect("write");
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "hello world");
    }

    #[test]
    fn unit_write_text_atomic_replaces_existing_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("sample.txt");
        write_text_atomic(&path, "first").expect("first write");
        write_text_atomic(&path, "second").expect("second write");
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(contents, "second");
    }

    #[test]
    fn unit_write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "content").expect_err("must fail");
        assert!(error.to_string().contains("is a directory"));
    }

    #[test]
    fn unit_write_text_atomic_leaves_no_temp_files() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("sample.txt");
        write_text_atomic(&path, "content").expect("write");
        let leftovers = fs::read_dir(tempdir.path())
            .expect("list")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
