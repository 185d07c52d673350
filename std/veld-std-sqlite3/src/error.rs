//!
//! Binding Error Types
//!
//! The taxonomy the binding surfaces synchronously:
//! - programming errors (concurrent misuse, closed handles, context
//!   misuse) are never swallowed
//! - engine errors carry the result code plus the error text captured
//!   under the connection mutex
//! - conversion errors abort only the conversion they arose in
//!
//! Unraisable conditions are not errors in this sense; they are
//! absorbed by the dispatcher in `unraisable`.
//!

use std::os::raw::c_int;

use libsqlite3_sys as ffi;
use thiserror::Error;
use veld_std_core::{Exception, ExceptionKind};

pub type Result<T, E = SqliteError> = std::result::Result<T, E>;

/// Errors surfaced by binding operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SqliteError {
    /// The same object is already executing a call, in another thread
    /// or re-entrantly in this one. Fast-fail, never queued.
    #[error(
        "you are trying to use the same object concurrently in two threads \
         or re-entrantly within the same thread, which is not allowed"
    )]
    ThreadingViolation,

    #[error("the connection has been closed")]
    ConnectionClosed,

    #[error("the cursor has been closed")]
    CursorClosed,

    /// A checked native call returned a code outside its accepted
    /// set. `message` is the owned copy captured under the db mutex.
    #[error("engine error {code}: {message}")]
    Engine { code: i32, message: String },

    /// Value marshalling failed; partially built state was discarded.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// The operation is legal only inside the named callback phase.
    #[error("operation is only valid inside a '{0}' callback")]
    ContextRequired(&'static str),
}

impl SqliteError {
    pub(crate) fn engine(code: c_int, message: impl Into<String>) -> Self {
        SqliteError::Engine {
            code,
            message: message.into(),
        }
    }
}

impl From<SqliteError> for Exception {
    fn from(err: SqliteError) -> Self {
        let kind = match &err {
            SqliteError::ThreadingViolation => ExceptionKind::Threading,
            SqliteError::ConnectionClosed | SqliteError::CursorClosed => ExceptionKind::Closed,
            SqliteError::Engine { code, .. } => ExceptionKind::Db { code: *code },
            SqliteError::Conversion(_) => ExceptionKind::Conversion,
            SqliteError::ContextRequired(_) => ExceptionKind::ContextMisuse,
        };
        Exception::new(kind, err.to_string())
    }
}

/// Accepted set for checked calls that must return plain OK.
pub(crate) const OK_ONLY: &[c_int] = &[ffi::SQLITE_OK];

/// Accepted set for stepping calls: ok, row available, done.
pub(crate) const STEP_CODES: &[c_int] = &[ffi::SQLITE_OK, ffi::SQLITE_ROW, ffi::SQLITE_DONE];
