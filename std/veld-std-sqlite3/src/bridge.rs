//!
//! Execution Lock Bridge
//!
//! Every native call goes through one of two shapes:
//!
//! - Void call: release the runtime lock, invoke the operation,
//!   reacquire the lock. No result code is consulted.
//! - Checked call: release the runtime lock, enter the connection's
//!   own mutex, invoke the operation, and if its result code is
//!   outside the accepted set copy the engine's error text into owned
//!   storage before the mutex is released; then leave the mutex and
//!   reacquire the runtime lock.
//!
//! The engine stores error text per connection, not per thread:
//! another thread can overwrite it the instant the connection mutex
//! is released, so capture must happen inside that window. Lock
//! ordering is fixed everywhere: runtime lock off before the
//! connection mutex goes on, connection mutex off before the runtime
//! lock comes back.
//!

use std::ffi::CStr;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicPtr, Ordering};

use libsqlite3_sys as ffi;
use veld_std_core::LockSession;

use crate::error::{Result, SqliteError};

/// Owned reference to a native connection handle, nulled on close.
pub(crate) struct DbHandle {
    ptr: AtomicPtr<ffi::sqlite3>,
}

// The raw handle is only ever driven through the bridge, which pairs
// every call with the runtime-lock discipline, and per-object overlap
// is rejected by the in-use guard.
unsafe impl Send for DbHandle {}
unsafe impl Sync for DbHandle {}

impl DbHandle {
    pub(crate) fn new(ptr: *mut ffi::sqlite3) -> Self {
        Self {
            ptr: AtomicPtr::new(ptr),
        }
    }

    /// The live handle, or `ConnectionClosed`.
    pub(crate) fn get(&self) -> Result<*mut ffi::sqlite3> {
        let ptr = self.ptr.load(Ordering::SeqCst);
        if ptr.is_null() {
            return Err(SqliteError::ConnectionClosed);
        }
        Ok(ptr)
    }

    /// Nulls the handle, returning the previous pointer.
    pub(crate) fn take(&self) -> *mut ffi::sqlite3 {
        self.ptr.swap(std::ptr::null_mut(), Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.ptr.load(Ordering::SeqCst).is_null()
    }

    /// Void call: runtime lock released around `op`, result code not
    /// consulted.
    pub(crate) fn call_void<R>(
        &self,
        session: &mut LockSession,
        op: impl FnOnce(*mut ffi::sqlite3) -> R,
    ) -> Result<R> {
        let db = self.get()?;
        Ok(session.allow_threads(|| op(db)))
    }

    /// Checked call: runtime lock released, connection mutex held
    /// around `op` and the error-text capture that follows a result
    /// code outside `accepted`.
    pub(crate) fn call_checked(
        &self,
        session: &mut LockSession,
        accepted: &[c_int],
        op: impl FnOnce(*mut ffi::sqlite3) -> c_int,
    ) -> Result<c_int> {
        let db = self.get()?;
        let (code, captured) = session.allow_threads(|| unsafe {
            let mutex = ffi::sqlite3_db_mutex(db);
            ffi::sqlite3_mutex_enter(mutex);
            let code = op(db);
            // Owned copy while the mutex still protects the text.
            let captured = if accepted.contains(&code) {
                None
            } else {
                Some(error_message(db))
            };
            ffi::sqlite3_mutex_leave(mutex);
            (code, captured)
        });
        match captured {
            None => Ok(code),
            Some(message) => Err(SqliteError::engine(code, message)),
        }
    }
}

/// Copies the connection's current error text into owned storage.
///
/// Caller must hold the connection mutex (or be the handle's sole
/// owner, as during open).
pub(crate) unsafe fn error_message(db: *mut ffi::sqlite3) -> String {
    let text = unsafe { ffi::sqlite3_errmsg(db) };
    if text.is_null() {
        return String::from("unknown error");
    }
    unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
}

/// Generic text for a result code, independent of any handle. Used
/// where the handle may no longer be safe to interrogate, as after a
/// failed close.
pub(crate) fn error_code_text(code: c_int) -> String {
    let text = unsafe { ffi::sqlite3_errstr(code) };
    if text.is_null() {
        return format!("result code {code}");
    }
    unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned()
}
