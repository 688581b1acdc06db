//! Cross-process resource locks with lease expiry.
//!
//! Every mutating component acquires the named resource lock before its
//! read-modify-write sequence. Locks are advisory lease files shared through
//! the storage directory, so independent OS processes observe them. A crashed
//! holder's lease expires after its TTL and is reclaimed by the next caller.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::time_utils::{current_unix_timestamp_ms, is_expired_unix};

const LOCK_DIR_NAME: &str = ".locks";
const LOCK_RETRY_SLEEP_MS: u64 = 25;
const DEFAULT_LOCK_TTL_MS: u64 = 30_000;

/// Enumerates lock acquisition failures callers must act on.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out acquiring lock '{resource}' after {waited_ms}ms")]
    Timeout { resource: String, waited_ms: u64 },
    #[error("lock '{resource}' io failure: {source}")]
    Io {
        resource: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct LeaseBody {
    holder_id: String,
    acquired_unix_ms: u64,
    ttl_ms: u64,
}

/// Coordinates exclusive cross-process access to named logical resources.
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    lock_dir: PathBuf,
    ttl: Duration,
}

impl LockCoordinator {
    /// Creates a coordinator whose lease files live under `<root>/.locks`.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: storage_root.into().join(LOCK_DIR_NAME),
            ttl: Duration::from_millis(DEFAULT_LOCK_TTL_MS),
        }
    }

    /// Overrides the lease TTL bounding a crashed holder's damage.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Acquires the exclusive lock for `resource`, blocking up to `timeout`.
    pub fn acquire(&self, resource: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let path = self.lock_path(resource);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                resource: resource.to_string(),
                source,
            })?;
        }

        let holder_id = next_holder_id();
        let started = Instant::now();

        loop {
            match OpenOptions::new().create_new(true).write(true).open(&path) {
                Ok(mut file) => {
                    let lease = LeaseBody {
                        holder_id: holder_id.clone(),
                        acquired_unix_ms: current_unix_timestamp_ms(),
                        ttl_ms: self.ttl.as_millis() as u64,
                    };
                    let encoded =
                        serde_json::to_string(&lease).unwrap_or_else(|_| holder_id.clone());
                    file.write_all(encoded.as_bytes())
                        .and_then(|()| file.flush())
                        .map_err(|source| LockError::Io {
                            resource: resource.to_string(),
                            source,
                        })?;
                    tracing::debug!(resource, holder_id = %holder_id, "lock_acquired");
                    return Ok(LockGuard {
                        path,
                        holder_id,
                        released: false,
                    });
                }
                Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                    if reclaim_expired_lease(&path, resource) {
                        continue;
                    }
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(LockError::Timeout {
                            resource: resource.to_string(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    thread::sleep(Duration::from_millis(LOCK_RETRY_SLEEP_MS));
                }
                Err(source) => {
                    return Err(LockError::Io {
                        resource: resource.to_string(),
                        source,
                    });
                }
            }
        }
    }

    fn lock_path(&self, resource: &str) -> PathBuf {
        let safe_name = resource
            .chars()
            .map(|character| {
                if character.is_ascii_alphanumeric() || character == '-' || character == '_' {
                    character
                } else {
                    '-'
                }
            })
            .collect::<String>();
        self.lock_dir.join(format!("{safe_name}.lock"))
    }
}

/// Removes an expired lease so a new holder can take over. Reclaiming after a
/// crash is legitimate but logged distinctly from the never-locked case.
fn reclaim_expired_lease(path: &Path, resource: &str) -> bool {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return false,
    };
    let expired = match serde_json::from_str::<LeaseBody>(raw.as_str()) {
        Ok(lease) => is_expired_unix(
            Some(lease.acquired_unix_ms.saturating_add(lease.ttl_ms)),
            current_unix_timestamp_ms(),
        ),
        // An unparseable lease body cannot belong to a live holder.
        Err(_) => true,
    };
    if !expired {
        return false;
    }
    let removed = fs::remove_file(path).is_ok();
    if removed {
        tracing::warn!(resource, "lock_reclaimed_expired");
    }
    removed
}

/// Exclusive hold over one resource; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    holder_id: String,
    released: bool,
}

impl LockGuard {
    /// Releases the lock. Idempotent; a lease already reclaimed by another
    /// holder is left untouched.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let still_ours = fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str::<LeaseBody>(raw.as_str()).ok())
            .map(|lease| lease.holder_id == self.holder_id)
            .unwrap_or(false);
        if still_ours {
            let _ = fs::remove_file(&self.path);
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn next_holder_id() -> String {
    let nonce: u32 = rand::thread_rng().gen();
    format!(
        "{}-{}-{nonce:08x}",
        std::process::id(),
        current_unix_timestamp_ms()
    )
}
