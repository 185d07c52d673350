//!
//! veld SQLite3 Bridging Layer
//!
//! Implements the concurrency-safety core of the veld SQLite3
//! binding. The veld runtime holds a process-wide exclusivity lock
//! around managed values while the engine performs blocking work and
//! stores error text per connection, so three protocols govern every
//! native call:
//!
//! - The execution lock bridge releases the runtime lock around every
//!   native call and, for calls with a meaningful result code, copies
//!   the engine's error text while the connection's own mutex is held
//!   (`bridge`).
//! - A fast-fail in-use flag per wrapped handle rejects overlapping
//!   calls instead of queueing them (`guard`).
//! - Failures inside engine-invoked callbacks whose calling
//!   convention has no error channel go through the ordered
//!   unraisable dispatcher (`unraisable`).
//!
//! Value marshalling between engine values and runtime values,
//! including multi-valued IN-constraint expansion and the no-change
//! sentinel, lives in `convert`. Operations legal only inside a named
//! callback phase consult the call-context tracker (`context`).
//!
//! The wrapped `Connection` and `Cursor` handles carry these
//! protocols; the full high-level API surface (blobs, backups,
//! statement caching) is out of scope here.
//!

pub mod bridge;
pub mod connection;
pub mod context;
pub mod convert;
pub mod cursor;
pub mod error;
pub mod guard;
pub mod unraisable;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

    /// Hook-registry state is process-wide; tests that install hooks
    /// serialize on this.
    pub(crate) fn registry_lock() -> MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

pub use connection::{Connection, ScalarFn, TraceFn};
pub use convert::{convert_value, ConvertOptions, SourceValue, ValueTag};
pub use cursor::Cursor;
pub use error::{Result, SqliteError};
pub use unraisable::report_unraisable;
