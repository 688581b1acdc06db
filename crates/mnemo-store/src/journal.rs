//! Append-only daily journal, one Markdown file per calendar date grouped by
//! year / month / ISO-week directories.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Local, NaiveDate, Timelike};

use mnemo_core::{LockCoordinator, ScopeKey};

use crate::DEFAULT_LOCK_WAIT;

const JOURNAL_DIR_NAME: &str = "memory";

/// Dated narrative log store. Entries are only ever appended; two concurrent
/// writers for the same date are serialized by the per-day lock and both
/// entries survive in write order.
#[derive(Debug, Clone)]
pub struct Journal {
    root: PathBuf,
    locks: LockCoordinator,
}

impl Journal {
    pub fn new(root: PathBuf, locks: LockCoordinator) -> Self {
        Self { root, locks }
    }

    /// Path of the day file: `memory/YYYY/MM_<month>/week_WW/YYYY-MM-DD.md`.
    pub fn day_path(&self, date: NaiveDate) -> PathBuf {
        let month_dir = format!("{:02}_{}", date.month(), month_name(date.month()));
        let week_dir = format!("week_{:02}", date.iso_week().week());
        self.root
            .join(JOURNAL_DIR_NAME)
            .join(format!("{:04}", date.year()))
            .join(month_dir)
            .join(week_dir)
            .join(format!("{date}.md"))
    }

    /// Appends one timestamped entry for `date`, creating the day file with a
    /// small front-matter header on first write.
    pub fn append(&self, scope: &ScopeKey, date: NaiveDate, content: &str) -> Result<PathBuf> {
        let content = content.trim();
        if content.is_empty() {
            bail!("journal entry must not be empty");
        }

        let path = self.day_path(date);
        let resource = format!("journal-{date}");
        let _guard = self
            .locks
            .acquire(resource.as_str(), DEFAULT_LOCK_WAIT)
            .with_context(|| format!("failed to lock journal for {date}"))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create journal directory {}", parent.display())
            })?;
        }

        let is_new = !path.exists() || fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open journal file {}", path.display()))?;

        if is_new {
            let header = format!("---\ntype: daily_log\ndate: \"{date}\"\n---\n");
            file.write_all(header.as_bytes())
                .with_context(|| format!("failed to write journal header {}", path.display()))?;
        }

        let now = Local::now();
        let scope_tag = match scope {
            ScopeKey::Global => String::new(),
            other => format!(" [{other}]"),
        };
        let entry = format!(
            "\n### {:02}:{:02}{scope_tag}\n{content}\n",
            now.hour(),
            now.minute()
        );
        file.write_all(entry.as_bytes())
            .and_then(|()| file.flush())
            .with_context(|| format!("failed to append journal entry {}", path.display()))?;
        Ok(path)
    }

    /// Full text of one day file, `None` when no entries exist for the date.
    pub fn read_day(&self, date: NaiveDate) -> Result<Option<String>> {
        let path = self.day_path(date);
        if !path.exists() {
            return Ok(None);
        }
        fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("failed to read journal file {}", path.display()))
    }

    /// Day files for the most recent `days` calendar dates ending at `until`,
    /// newest first, existing files only.
    pub fn recent_days(&self, until: NaiveDate, days: u32) -> Vec<(NaiveDate, PathBuf)> {
        (0..days)
            .filter_map(|offset| until.checked_sub_days(chrono::Days::new(offset as u64)))
            .map(|date| (date, self.day_path(date)))
            .filter(|(_, path)| path.exists())
            .collect()
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.root.join(JOURNAL_DIR_NAME)
    }
}

fn month_name(month: u32) -> &'static str {
    match month {
        1 => "january",
        2 => "february",
        3 => "march",
        4 => "april",
        5 => "may",
        6 => "june",
        7 => "july",
        8 => "august",
        9 => "september",
        10 => "october",
        11 => "november",
        _ => "december",
    }
}
