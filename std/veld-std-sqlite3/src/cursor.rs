//!
//! Wrapped Statement Handle
//!
//! A cursor owns one prepared statement and a back-reference to the
//! connection that controls its validity. The connection invalidates
//! every live cursor before it closes. Each cursor permits one
//! in-flight call; row and column access route through the bridge.
//!

use std::ffi::CString;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, Weak};

use libsqlite3_sys as ffi;
use veld_std_core::{LockSession, Value};

use crate::connection::Connection;
use crate::convert;
use crate::error::{Result, SqliteError, OK_ONLY, STEP_CODES};
use crate::guard::InUse;

/// A prepared statement wrapped for bridged access.
pub struct Cursor {
    connection: Arc<Connection>,
    stmt: AtomicPtr<ffi::sqlite3_stmt>,
    in_use: InUse,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor").finish_non_exhaustive()
    }
}

// The raw statement is only driven through the bridge under the
// cursor's in-use guard.
unsafe impl Send for Cursor {}
unsafe impl Sync for Cursor {}

impl Cursor {
    /// Prepares `sql` on `connection`.
    ///
    /// Statement compilation takes no in-use guard: it serializes on
    /// the connection's own mutex inside the checked call, so
    /// independent cursors of one connection can be prepared from
    /// different threads, each capturing its own error text.
    pub fn prepare(
        connection: &Arc<Connection>,
        session: &mut LockSession,
        sql: &str,
    ) -> Result<Arc<Cursor>> {
        let c_sql = CString::new(sql)
            .map_err(|_| SqliteError::Conversion("SQL contains a NUL byte".to_string()))?;
        let mut stmt = std::ptr::null_mut();
        let stmt_out = &mut stmt;
        connection
            .handle()
            .call_checked(session, OK_ONLY, |db| unsafe {
                ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), -1, stmt_out, std::ptr::null_mut())
            })?;
        if stmt.is_null() {
            return Err(SqliteError::Conversion(
                "statement contains no SQL".to_string(),
            ));
        }
        let cursor = Arc::new(Cursor {
            connection: Arc::clone(connection),
            stmt: AtomicPtr::new(stmt),
            in_use: InUse::new(),
        });
        connection.register_cursor(Arc::downgrade(&cursor));
        Ok(cursor)
    }

    fn stmt(&self) -> Result<*mut ffi::sqlite3_stmt> {
        let ptr = self.stmt.load(Ordering::SeqCst);
        if ptr.is_null() {
            // Distinguish "cursor closed" from "whole connection gone".
            if self.connection.is_closed() {
                return Err(SqliteError::ConnectionClosed);
            }
            return Err(SqliteError::CursorClosed);
        }
        Ok(ptr)
    }

    /// Whether a call is currently in flight on this cursor.
    pub fn busy(&self) -> bool {
        self.in_use.in_use()
    }

    /// Binds a runtime value to the 1-based parameter `index`.
    pub fn bind(&self, session: &mut LockSession, index: i32, value: &Value) -> Result<()> {
        let _use = self.in_use.try_enter()?;
        let stmt = self.stmt()?;
        convert::bind_value(self.connection.handle(), session, stmt, index as c_int, value)
    }

    /// Steps the statement. Returns true while a row is available.
    pub fn step(&self, session: &mut LockSession) -> Result<bool> {
        let _use = self.in_use.try_enter()?;
        let stmt = self.stmt()?;
        let code = self
            .connection
            .handle()
            .call_checked(session, STEP_CODES, |_db| unsafe {
                ffi::sqlite3_step(stmt)
            })?;
        Ok(code == ffi::SQLITE_ROW)
    }

    /// Number of columns in the result set.
    pub fn column_count(&self, session: &mut LockSession) -> Result<i32> {
        let _use = self.in_use.try_enter()?;
        let stmt = self.stmt()?;
        self.connection
            .handle()
            .call_void(session, |_db| unsafe { ffi::sqlite3_column_count(stmt) })
    }

    /// Converts column `col` of the current row.
    pub fn column(&self, session: &mut LockSession, col: i32) -> Result<Value> {
        let _use = self.in_use.try_enter()?;
        let stmt = self.stmt()?;
        convert::convert_column(self.connection.handle(), session, stmt, col as c_int)
    }

    /// Resets the statement for re-execution. Bindings survive.
    pub fn reset(&self, session: &mut LockSession) -> Result<()> {
        let _use = self.in_use.try_enter()?;
        let stmt = self.stmt()?;
        self.connection
            .handle()
            .call_checked(session, OK_ONLY, |_db| unsafe { ffi::sqlite3_reset(stmt) })?;
        Ok(())
    }

    /// Finalizes the statement. Later use reports `CursorClosed`.
    pub fn close(&self, session: &mut LockSession) -> Result<()> {
        self.invalidate(session)
    }

    /// Finalizes the statement; called by `close` and by the owning
    /// connection before it closes itself.
    pub(crate) fn invalidate(&self, session: &mut LockSession) -> Result<()> {
        let _use = self.in_use.try_enter()?;
        let stmt = self.stmt.swap(std::ptr::null_mut(), Ordering::SeqCst);
        if stmt.is_null() {
            return Ok(());
        }
        self.connection.handle().call_void(session, |_db| unsafe {
            ffi::sqlite3_finalize(stmt);
        })?;
        Ok(())
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        let stmt = self.stmt.swap(std::ptr::null_mut(), Ordering::SeqCst);
        if !stmt.is_null() {
            // No session here; the serialized engine makes a bare
            // finalize safe, and the connection is still open because
            // this cursor holds a strong reference to it.
            unsafe { ffi::sqlite3_finalize(stmt) };
        }
    }
}

/// Kept by the connection so dependents can be invalidated on close.
pub(crate) type CursorRef = Weak<Cursor>;
