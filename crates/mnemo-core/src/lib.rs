//! Foundational utilities shared across Mnemo crates.
//!
//! Provides atomic file-write helpers, time utilities, the scope hierarchy
//! resolver, and the cross-process lock coordinator used by every component
//! that mutates persisted state.

pub mod atomic_io;
pub mod lock;
pub mod scope;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use lock::{LockCoordinator, LockError, LockGuard};
pub use scope::{merge_preferences, resolve_scopes, ScopeContext, ScopeKey};
pub use time_utils::{current_unix_timestamp_ms, is_expired_unix};
