//!
//! Wrapped Connection Handle
//!
//! The connection owns the native handle, the in-use guard that
//! rejects overlapping calls, the call-context tracker for operations
//! restricted to callback phases, and weak references to dependent
//! cursors so they can be invalidated before the handle closes.
//!
//! Engine-invoked callbacks registered here (scalar functions, the
//! statement trace hook) run inside native frames. Their trampolines
//! reacquire the runtime lock, push a shadow-stack frame, and route
//! failures either through the engine's own error channel or through
//! the unraisable dispatcher when the calling convention has none.
//!

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use libsqlite3_sys as ffi;
use veld_std_core::{exception, stack, Exception, LockSession, RuntimeLock, Value};

use crate::bridge::{self, DbHandle};
use crate::context::{self, CallContext};
use crate::convert::{self, ConvertOptions, ProtectedValue};
use crate::cursor::CursorRef;
use crate::error::{Result, SqliteError, OK_ONLY};
use crate::guard::InUse;
use crate::unraisable::report_unraisable;

/// A scalar function implemented in managed code.
pub type ScalarFn = Box<dyn Fn(&[Value]) -> std::result::Result<Value, Exception> + Send + Sync>;

/// A statement trace hook implemented in managed code.
pub type TraceFn = Box<dyn Fn(&str) -> std::result::Result<(), Exception> + Send + Sync>;

struct ScalarState {
    name: String,
    func: ScalarFn,
}

struct TraceState {
    hook: TraceFn,
}

/// A native connection wrapped for bridged access.
pub struct Connection {
    handle: DbHandle,
    in_use: InUse,
    call_context: CallContext,
    cursors: Mutex<Vec<CursorRef>>,
    trace_hook: Mutex<Option<Box<TraceState>>>,
}

impl Connection {
    /// Opens a database file, creating it if absent.
    pub fn open(session: &mut LockSession, path: &str) -> Result<Arc<Connection>> {
        let c_path = CString::new(path)
            .map_err(|_| SqliteError::Conversion("path contains a NUL byte".to_string()))?;
        let (code, db) = session.allow_threads(|| unsafe {
            let mut db = std::ptr::null_mut();
            let code = ffi::sqlite3_open_v2(
                c_path.as_ptr(),
                &mut db,
                ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
                std::ptr::null(),
            );
            (code, db)
        });
        if code != ffi::SQLITE_OK {
            // Even on failure a handle may come back carrying the
            // error text; it is ours alone, so reading it is safe.
            let message = if db.is_null() {
                bridge::error_code_text(code)
            } else {
                let message = unsafe { bridge::error_message(db) };
                unsafe { ffi::sqlite3_close(db) };
                message
            };
            return Err(SqliteError::engine(code, message));
        }
        Ok(Arc::new(Connection {
            handle: DbHandle::new(db),
            in_use: InUse::new(),
            call_context: CallContext::new(),
            cursors: Mutex::new(Vec::new()),
            trace_hook: Mutex::new(None),
        }))
    }

    /// Opens a private in-memory database.
    pub fn open_memory(session: &mut LockSession) -> Result<Arc<Connection>> {
        Connection::open(session, ":memory:")
    }

    pub(crate) fn handle(&self) -> &DbHandle {
        &self.handle
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    /// The callback-phase tracker for this connection.
    pub fn call_context(&self) -> &CallContext {
        &self.call_context
    }

    pub(crate) fn register_cursor(&self, cursor: CursorRef) {
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        cursors.retain(|c| c.upgrade().is_some());
        cursors.push(cursor);
    }

    /// Runs one or more SQL statements, discarding any rows.
    pub fn execute(&self, session: &mut LockSession, sql: &str) -> Result<()> {
        let _use = self.in_use.try_enter()?;
        let c_sql = CString::new(sql)
            .map_err(|_| SqliteError::Conversion("SQL contains a NUL byte".to_string()))?;
        self.handle.call_checked(session, OK_ONLY, |db| unsafe {
            ffi::sqlite3_exec(
                db,
                c_sql.as_ptr(),
                None,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        })?;
        Ok(())
    }

    /// Closes the connection after invalidating every dependent
    /// cursor. Idempotent.
    pub fn close(&self, session: &mut LockSession) -> Result<()> {
        let _use = self.in_use.try_enter()?;
        if self.handle.is_closed() {
            return Ok(());
        }
        let dependents: Vec<_> = {
            let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
            cursors.drain(..).filter_map(|c| c.upgrade()).collect()
        };
        for cursor in &dependents {
            cursor.invalidate(session)?;
        }
        let db = self.handle.get()?;
        // A failed close may leave the handle's own storage in an
        // uncertain state, so the report uses the generic text for
        // the code rather than interrogating the handle.
        let code = session.allow_threads(|| unsafe { ffi::sqlite3_close(db) });
        if code != ffi::SQLITE_OK {
            return Err(SqliteError::engine(code, bridge::error_code_text(code)));
        }
        self.handle.take();
        Ok(())
    }

    /// Asks the engine to abort any in-flight operation on this
    /// connection. Deliberately takes no in-use guard: interrupting a
    /// call in progress is the whole point.
    pub fn interrupt(&self, session: &mut LockSession) -> Result<()> {
        self.handle
            .call_void(session, |db| unsafe { ffi::sqlite3_interrupt(db) })
    }

    /// Rowid of the most recent successful insert.
    pub fn last_insert_rowid(&self, session: &mut LockSession) -> Result<i64> {
        let _use = self.in_use.try_enter()?;
        self.handle
            .call_void(session, |db| unsafe { ffi::sqlite3_last_insert_rowid(db) })
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self, session: &mut LockSession) -> Result<i64> {
        let _use = self.in_use.try_enter()?;
        self.handle
            .call_void(session, |db| unsafe { ffi::sqlite3_changes64(db) })
    }

    /// Declares whether a virtual table honors constraints in its
    /// update callback. Legal only inside the table-connect phase;
    /// outside it the engine would be configured for whatever table
    /// happened to be connecting.
    ///
    /// No in-use guard: this runs nested inside an engine callback of
    /// a call that already holds the guard.
    pub fn vtab_config_constraint_support(
        &self,
        session: &mut LockSession,
        enabled: bool,
    ) -> Result<()> {
        if !self.call_context.active(context::CONNECT) {
            return Err(SqliteError::ContextRequired(context::CONNECT));
        }
        let flag: c_int = enabled.into();
        self.handle.call_checked(session, OK_ONLY, |db| unsafe {
            ffi::sqlite3_vtab_config(db, ffi::SQLITE_VTAB_CONSTRAINT_SUPPORT, flag)
        })?;
        Ok(())
    }

    /// Registers a scalar function. `nargs` of -1 accepts any arity.
    pub fn create_scalar_function(
        &self,
        session: &mut LockSession,
        name: &str,
        nargs: i32,
        deterministic: bool,
        func: ScalarFn,
    ) -> Result<()> {
        let _use = self.in_use.try_enter()?;
        let c_name = CString::new(name)
            .map_err(|_| SqliteError::Conversion("function name contains a NUL byte".to_string()))?;
        let mut flags = ffi::SQLITE_UTF8;
        if deterministic {
            flags |= ffi::SQLITE_DETERMINISTIC;
        }
        let state = Box::into_raw(Box::new(ScalarState {
            name: name.to_string(),
            func,
        }));
        // The engine invokes the destructor even when registration
        // fails, so the raw state is never leaked or double-freed.
        self.handle.call_checked(session, OK_ONLY, |db| unsafe {
            ffi::sqlite3_create_function_v2(
                db,
                c_name.as_ptr(),
                nargs as c_int,
                flags,
                state.cast::<c_void>(),
                Some(scalar_trampoline),
                None,
                None,
                Some(scalar_destroy),
            )
        })?;
        Ok(())
    }

    /// Installs or removes the statement trace hook. A failing hook
    /// cannot fail the traced statement; its error goes through the
    /// unraisable dispatcher.
    pub fn set_trace_hook(&self, session: &mut LockSession, hook: Option<TraceFn>) -> Result<()> {
        let _use = self.in_use.try_enter()?;
        let new_state = hook.map(|hook| Box::new(TraceState { hook }));
        match &new_state {
            Some(state) => {
                let ctx = (&**state as *const TraceState).cast_mut().cast::<c_void>();
                self.handle.call_void(session, |db| unsafe {
                    ffi::sqlite3_trace_v2(
                        db,
                        ffi::SQLITE_TRACE_STMT as c_uint,
                        Some(trace_trampoline),
                        ctx,
                    );
                })?;
            }
            None => {
                self.handle.call_void(session, |db| unsafe {
                    ffi::sqlite3_trace_v2(db, 0, None, std::ptr::null_mut());
                })?;
            }
        }
        // The old state outlives its registration: the engine stopped
        // referencing it under the call above.
        *self.trace_hook.lock().unwrap_or_else(|e| e.into_inner()) = new_state;
        Ok(())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let db = self.handle.take();
        if !db.is_null() {
            // Deferred close: any statement a leaked cursor failed to
            // finalize keeps the handle as a zombie until it is.
            unsafe { ffi::sqlite3_close_v2(db) };
        }
    }
}

unsafe extern "C" fn scalar_trampoline(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let state = unsafe { &*ffi::sqlite3_user_data(ctx).cast::<ScalarState>() };
        // The caller released the runtime lock for the duration of
        // the native call; managed code runs with it held.
        let _session = RuntimeLock::acquire();
        let _frame = stack::push_frame(format!("scalar function {}", state.name), file!(), line!());

        let mut args = Vec::with_capacity(argc as usize);
        for i in 0..argc {
            let value = unsafe { ProtectedValue::from_raw(*argv.add(i as usize)) };
            match convert::convert_value(&value, ConvertOptions::NONE) {
                Ok(arg) => args.push(arg),
                Err(err) => {
                    convert::set_result_error(ctx, &err.to_string());
                    return;
                }
            }
        }

        match (state.func)(&args) {
            Ok(result) => {
                if let Err(err) = convert::set_result(ctx, &result) {
                    convert::set_result_error(ctx, &err.to_string());
                }
            }
            // The function call frame has an error channel; use it.
            Err(exc) => convert::set_result_error(ctx, &exc.message),
        }
    }));
    if outcome.is_err() {
        convert::set_result_error(ctx, "panic in scalar function");
    }
}

unsafe extern "C" fn scalar_destroy(state: *mut c_void) {
    drop(unsafe { Box::from_raw(state.cast::<ScalarState>()) });
}

unsafe extern "C" fn trace_trampoline(
    event: c_uint,
    ctx: *mut c_void,
    _stmt: *mut c_void,
    detail: *mut c_void,
) -> c_int {
    if event != ffi::SQLITE_TRACE_STMT as c_uint {
        return 0;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let state = unsafe { &*ctx.cast::<TraceState>() };
        let _session = RuntimeLock::acquire();
        let _frame = stack::push_frame("trace hook", file!(), line!());
        let sql = if detail.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(detail.cast::<c_char>()) }
                .to_string_lossy()
                .into_owned()
        };
        // This calling convention has no error channel; a failure
        // here must not be lost and must not fail the statement.
        if let Err(exc) = (state.hook)(&sql) {
            exception::raise(exc);
            report_unraisable(None, Some("statement trace failed"), Some("trace hook"));
        }
    }));
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::registry_lock;
    use veld_std_core::hooks;

    #[test]
    fn test_open_execute_close() {
        let mut session = RuntimeLock::acquire();
        let connection = Connection::open_memory(&mut session).unwrap();
        connection
            .execute(&mut session, "CREATE TABLE t(x); INSERT INTO t VALUES (7)")
            .unwrap();
        assert_eq!(connection.last_insert_rowid(&mut session).unwrap(), 1);
        assert_eq!(connection.changes(&mut session).unwrap(), 1);
        connection.close(&mut session).unwrap();
        assert!(connection.is_closed());
        // Idempotent.
        connection.close(&mut session).unwrap();
    }

    #[test]
    fn test_use_after_close_is_rejected() {
        let mut session = RuntimeLock::acquire();
        let connection = Connection::open_memory(&mut session).unwrap();
        let cursor = crate::Cursor::prepare(&connection, &mut session, "SELECT 1").unwrap();
        connection.close(&mut session).unwrap();
        assert_eq!(
            connection.execute(&mut session, "SELECT 1").unwrap_err(),
            SqliteError::ConnectionClosed
        );
        // The dependent cursor was invalidated with the connection.
        assert_eq!(
            cursor.step(&mut session).unwrap_err(),
            SqliteError::ConnectionClosed
        );
    }

    #[test]
    fn test_scalar_function_round_trip() {
        let mut session = RuntimeLock::acquire();
        let connection = Connection::open_memory(&mut session).unwrap();
        connection
            .create_scalar_function(
                &mut session,
                "reverse",
                1,
                true,
                Box::new(|args| match &args[0] {
                    Value::Text(s) => Ok(Value::Text(s.chars().rev().collect())),
                    other => Ok(other.clone()),
                }),
            )
            .unwrap();

        let cursor =
            crate::Cursor::prepare(&connection, &mut session, "SELECT reverse('abc')").unwrap();
        assert!(cursor.step(&mut session).unwrap());
        assert_eq!(
            cursor.column(&mut session, 0).unwrap(),
            Value::Text("cba".to_string())
        );
        cursor.close(&mut session).unwrap();
        connection.close(&mut session).unwrap();
    }

    #[test]
    fn test_scalar_function_failure_uses_engine_channel() {
        let mut session = RuntimeLock::acquire();
        let connection = Connection::open_memory(&mut session).unwrap();
        connection
            .create_scalar_function(
                &mut session,
                "broken",
                0,
                false,
                Box::new(|_args| {
                    Err(Exception::new(
                        veld_std_core::ExceptionKind::Unknown,
                        "broken on purpose",
                    ))
                }),
            )
            .unwrap();

        let cursor =
            crate::Cursor::prepare(&connection, &mut session, "SELECT broken()").unwrap();
        let err = cursor.step(&mut session).unwrap_err();
        match err {
            SqliteError::Engine { message, .. } => {
                assert!(message.contains("broken on purpose"), "message: {message}");
            }
            other => panic!("expected engine error, got {other:?}"),
        }
        cursor.close(&mut session).unwrap();
        connection.close(&mut session).unwrap();
    }

    #[test]
    fn test_trace_hook_failure_goes_unraisable() {
        let _serial = registry_lock();
        let mut session = RuntimeLock::acquire();
        let connection = Connection::open_memory(&mut session).unwrap();

        let seen = Arc::new(Mutex::new(None::<String>));
        let sink = Arc::clone(&seen);
        let previous = hooks::set_unraisable_hook(Some(Arc::new(move |info| {
            *sink.lock().unwrap() = Some(format!("{}: {}", info.exc_kind, info.exc_message));
            Ok(())
        })));

        connection
            .set_trace_hook(
                &mut session,
                Some(Box::new(|_sql| {
                    Err(Exception::new(
                        veld_std_core::ExceptionKind::Unknown,
                        "trace hook failed",
                    ))
                })),
            )
            .unwrap();

        // The statement itself still succeeds.
        connection.execute(&mut session, "SELECT 1").unwrap();
        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some("Unknown: trace hook failed")
        );

        connection.set_trace_hook(&mut session, None).unwrap();
        hooks::set_unraisable_hook(previous);
        connection.close(&mut session).unwrap();
    }

    #[test]
    fn test_vtab_config_requires_connect_phase() {
        let mut session = RuntimeLock::acquire();
        let connection = Connection::open_memory(&mut session).unwrap();

        assert_eq!(
            connection
                .vtab_config_constraint_support(&mut session, true)
                .unwrap_err(),
            SqliteError::ContextRequired(context::CONNECT)
        );

        // Inside the phase the gate opens and the call reaches the
        // engine, which rejects it outside a real table connect.
        let _phase = connection.call_context().enter(context::CONNECT);
        match connection.vtab_config_constraint_support(&mut session, true) {
            Err(SqliteError::Engine { .. }) | Ok(()) => {}
            other => panic!("expected the call to reach the engine, got {other:?}"),
        }
        connection.close(&mut session).unwrap();
    }

    #[test]
    fn test_interrupt_needs_no_guard() {
        let mut session = RuntimeLock::acquire();
        let connection = Connection::open_memory(&mut session).unwrap();
        connection.interrupt(&mut session).unwrap();
        connection.close(&mut session).unwrap();
    }
}
