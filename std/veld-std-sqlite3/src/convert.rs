//!
//! Value Marshalling
//!
//! Converts engine values to runtime `Value`s and back. Text and
//! blob reads always use the engine's explicit byte length, never a
//! terminator, so embedded NUL bytes survive.
//!
//! Two optional modes apply to the engine-to-runtime direction:
//!
//! - no-change mode: an engine value flagged "unchanged" (untouched
//!   columns in update-style callbacks) becomes the `NoChange`
//!   sentinel instead of null.
//! - constraint mode: a null flagged as the head of a multi-valued
//!   IN constraint expands into a deduplicated set; each element is
//!   converted with both modes disabled, and any mid-iteration engine
//!   failure aborts the whole expansion, discarding partial state.
//!
//! Column reads from a live row go through the bridge's void-call
//! pattern: even constant-time-looking accessors can trigger engine
//! work, so each one runs with the runtime lock released.
//!

use std::ffi::CString;
use std::os::raw::{c_char, c_int};

use libsqlite3_sys as ffi;
use veld_std_core::{LockSession, Value, ValueSet};

use crate::bridge::DbHandle;
use crate::error::{Result, SqliteError, OK_ONLY};

/// Native type tag of an engine value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueTag {
    Integer,
    Float,
    Text,
    Blob,
    Null,
}

/// Optional modes for engine-to-runtime conversion.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvertOptions {
    /// The value may be the head of a multi-valued IN constraint.
    pub in_constraint_possible: bool,
    /// The value may carry the "unchanged" flag.
    pub no_change_possible: bool,
}

impl ConvertOptions {
    /// Both optional modes disabled; used for ordinary column and
    /// argument conversion and for nested constraint elements.
    pub const NONE: ConvertOptions = ConvertOptions {
        in_constraint_possible: false,
        no_change_possible: false,
    };
}

/// Read access to one engine value. The seam exists so the
/// conversion protocol is testable without driving a virtual-table
/// filter through the engine.
pub trait SourceValue: Sized {
    fn tag(&self) -> ValueTag;
    fn read_int(&self) -> i64;
    fn read_float(&self) -> f64;
    /// UTF-8 text by explicit byte length.
    fn read_text(&self) -> Result<String>;
    /// Blob bytes by explicit byte length.
    fn read_blob(&self) -> Vec<u8>;
    /// Whether the engine reports this value as unchanged.
    fn is_unchanged(&self) -> bool;
    /// First element when this value heads an IN-constraint list,
    /// `None` otherwise.
    fn in_first(&self) -> Option<Self>;
    /// Next list element, `None` when exhausted. Only meaningful
    /// after `in_first` returned `Some`.
    fn in_next(&self) -> Result<Option<Self>>;
}

/// Converts one engine value to a runtime value.
pub fn convert_value<V: SourceValue>(value: &V, options: ConvertOptions) -> Result<Value> {
    if options.no_change_possible && value.is_unchanged() {
        return Ok(Value::NoChange);
    }
    match value.tag() {
        ValueTag::Integer => Ok(Value::Int(value.read_int())),
        ValueTag::Float => Ok(Value::Float(value.read_float())),
        ValueTag::Text => Ok(Value::Text(value.read_text()?)),
        ValueTag::Blob => Ok(Value::Bytes(value.read_blob())),
        ValueTag::Null => {
            if options.in_constraint_possible {
                if let Some(first) = value.in_first() {
                    return expand_in_list(value, first);
                }
            }
            Ok(Value::Null)
        }
    }
}

/// Expands a multi-valued IN constraint into a deduplicated set. Any
/// failure discards the elements accumulated so far.
fn expand_in_list<V: SourceValue>(head: &V, first: V) -> Result<Value> {
    let mut elements = ValueSet::new();
    let mut current = Some(first);
    while let Some(element) = current {
        // List elements are plain values: both optional modes off.
        elements.insert(convert_value(&element, ConvertOptions::NONE)?);
        current = head.in_next()?;
    }
    Ok(Value::Set(elements))
}

/// An engine value owned by the current callback frame.
pub(crate) struct ProtectedValue {
    ptr: *mut ffi::sqlite3_value,
}

impl ProtectedValue {
    /// Caller must ensure `ptr` stays valid for the frame of the
    /// callback that produced it.
    pub(crate) unsafe fn from_raw(ptr: *mut ffi::sqlite3_value) -> Self {
        Self { ptr }
    }
}

impl SourceValue for ProtectedValue {
    fn tag(&self) -> ValueTag {
        match unsafe { ffi::sqlite3_value_type(self.ptr) } {
            ffi::SQLITE_INTEGER => ValueTag::Integer,
            ffi::SQLITE_FLOAT => ValueTag::Float,
            ffi::SQLITE_TEXT => ValueTag::Text,
            ffi::SQLITE_BLOB => ValueTag::Blob,
            _ => ValueTag::Null,
        }
    }

    fn read_int(&self) -> i64 {
        unsafe { ffi::sqlite3_value_int64(self.ptr) }
    }

    fn read_float(&self) -> f64 {
        unsafe { ffi::sqlite3_value_double(self.ptr) }
    }

    fn read_text(&self) -> Result<String> {
        let bytes = unsafe {
            let data = ffi::sqlite3_value_text(self.ptr);
            let len = ffi::sqlite3_value_bytes(self.ptr) as usize;
            if data.is_null() || len == 0 {
                &[][..]
            } else {
                std::slice::from_raw_parts(data, len)
            }
        };
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SqliteError::Conversion("engine text is not valid UTF-8".to_string()))
    }

    fn read_blob(&self) -> Vec<u8> {
        unsafe {
            let data = ffi::sqlite3_value_blob(self.ptr);
            let len = ffi::sqlite3_value_bytes(self.ptr) as usize;
            if data.is_null() || len == 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(data.cast::<u8>(), len).to_vec()
            }
        }
    }

    fn is_unchanged(&self) -> bool {
        unsafe { ffi::sqlite3_value_nochange(self.ptr) != 0 }
    }

    fn in_first(&self) -> Option<Self> {
        let mut out = std::ptr::null_mut();
        let rc = unsafe { ffi::sqlite3_vtab_in_first(self.ptr, &mut out) };
        // Anything but OK means this value does not head a list.
        if rc == ffi::SQLITE_OK && !out.is_null() {
            Some(Self { ptr: out })
        } else {
            None
        }
    }

    fn in_next(&self) -> Result<Option<Self>> {
        let mut out = std::ptr::null_mut();
        let rc = unsafe { ffi::sqlite3_vtab_in_next(self.ptr, &mut out) };
        if rc != ffi::SQLITE_OK && rc != ffi::SQLITE_DONE {
            return Err(SqliteError::Conversion(format!(
                "in-list iteration failed with result {rc}"
            )));
        }
        if out.is_null() {
            Ok(None)
        } else {
            Ok(Some(Self { ptr: out }))
        }
    }
}

/// Converts one column of the current row.
///
/// Column accessors can materialize data on demand, so every one of
/// them is a void call. The engine forbids routing these through the
/// value interface ("unprotected values"), hence the parallel
/// dispatch.
pub(crate) fn convert_column(
    handle: &DbHandle,
    session: &mut LockSession,
    stmt: *mut ffi::sqlite3_stmt,
    col: c_int,
) -> Result<Value> {
    let tag = handle.call_void(session, |_db| unsafe { ffi::sqlite3_column_type(stmt, col) })?;
    match tag {
        ffi::SQLITE_INTEGER => {
            let v = handle.call_void(session, |_db| unsafe {
                ffi::sqlite3_column_int64(stmt, col)
            })?;
            Ok(Value::Int(v))
        }
        ffi::SQLITE_FLOAT => {
            let v = handle.call_void(session, |_db| unsafe {
                ffi::sqlite3_column_double(stmt, col)
            })?;
            Ok(Value::Float(v))
        }
        ffi::SQLITE_TEXT => {
            let bytes = handle.call_void(session, |_db| unsafe {
                let data = ffi::sqlite3_column_text(stmt, col);
                let len = ffi::sqlite3_column_bytes(stmt, col) as usize;
                if data.is_null() || len == 0 {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts(data, len).to_vec()
                }
            })?;
            String::from_utf8(bytes)
                .map(Value::Text)
                .map_err(|_| SqliteError::Conversion("engine text is not valid UTF-8".to_string()))
        }
        ffi::SQLITE_BLOB => {
            let bytes = handle.call_void(session, |_db| unsafe {
                let data = ffi::sqlite3_column_blob(stmt, col);
                let len = ffi::sqlite3_column_bytes(stmt, col) as usize;
                if data.is_null() || len == 0 {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts(data.cast::<u8>(), len).to_vec()
                }
            })?;
            Ok(Value::Bytes(bytes))
        }
        _ => Ok(Value::Null),
    }
}

/// Binds a runtime value to a statement parameter (1-based index).
/// The structural inverse of argument conversion.
pub(crate) fn bind_value(
    handle: &DbHandle,
    session: &mut LockSession,
    stmt: *mut ffi::sqlite3_stmt,
    index: c_int,
    value: &Value,
) -> Result<()> {
    match value {
        Value::Int(v) => {
            let v = *v;
            handle.call_checked(session, OK_ONLY, |_db| unsafe {
                ffi::sqlite3_bind_int64(stmt, index, v)
            })?;
        }
        Value::Float(v) => {
            let v = *v;
            handle.call_checked(session, OK_ONLY, |_db| unsafe {
                ffi::sqlite3_bind_double(stmt, index, v)
            })?;
        }
        Value::Text(s) => {
            let ptr = s.as_ptr().cast::<c_char>();
            let len = s.len() as c_int;
            handle.call_checked(session, OK_ONLY, |_db| unsafe {
                ffi::sqlite3_bind_text(stmt, index, ptr, len, ffi::SQLITE_TRANSIENT())
            })?;
        }
        Value::Bytes(b) if b.is_empty() => {
            handle.call_checked(session, OK_ONLY, |_db| unsafe {
                ffi::sqlite3_bind_zeroblob(stmt, index, 0)
            })?;
        }
        Value::Bytes(b) => {
            let ptr = b.as_ptr().cast::<std::os::raw::c_void>();
            let len = b.len() as c_int;
            handle.call_checked(session, OK_ONLY, |_db| unsafe {
                ffi::sqlite3_bind_blob(stmt, index, ptr, len, ffi::SQLITE_TRANSIENT())
            })?;
        }
        Value::Null => {
            handle.call_checked(session, OK_ONLY, |_db| unsafe {
                ffi::sqlite3_bind_null(stmt, index)
            })?;
        }
        Value::NoChange | Value::Set(_) => {
            return Err(SqliteError::Conversion(format!(
                "cannot bind a {} value",
                value.type_name()
            )));
        }
    }
    Ok(())
}

/// Sets a callback result from a runtime value. Runs inside the
/// engine's callback frame, so no bridging applies.
pub(crate) fn set_result(ctx: *mut ffi::sqlite3_context, value: &Value) -> Result<()> {
    match value {
        Value::Int(v) => unsafe { ffi::sqlite3_result_int64(ctx, *v) },
        Value::Float(v) => unsafe { ffi::sqlite3_result_double(ctx, *v) },
        Value::Text(s) => unsafe {
            ffi::sqlite3_result_text(
                ctx,
                s.as_ptr().cast::<c_char>(),
                s.len() as c_int,
                ffi::SQLITE_TRANSIENT(),
            )
        },
        Value::Bytes(b) => unsafe {
            ffi::sqlite3_result_blob(
                ctx,
                b.as_ptr().cast::<std::os::raw::c_void>(),
                b.len() as c_int,
                ffi::SQLITE_TRANSIENT(),
            )
        },
        Value::Null => unsafe { ffi::sqlite3_result_null(ctx) },
        Value::NoChange | Value::Set(_) => {
            return Err(SqliteError::Conversion(format!(
                "cannot return a {} value from a callback",
                value.type_name()
            )));
        }
    }
    Ok(())
}

/// Reports a callback failure through the engine's own channel.
pub(crate) fn set_result_error(ctx: *mut ffi::sqlite3_context, message: &str) {
    let sanitized = message.replace('\0', " ");
    if let Ok(text) = CString::new(sanitized) {
        unsafe { ffi::sqlite3_result_error(ctx, text.as_ptr(), -1) };
    }
}
