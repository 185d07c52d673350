//!
//! Exception Slot Primitives
//!
//! Provides the thread-local current-exception slot used by binding
//! crates when a native calling convention has no error channel: the
//! failing callback raises into the slot, and the unraisable
//! dispatcher consumes it once control returns to binding code.
//!
//! At most one exception is pending per thread. Raising over a
//! pending exception replaces it.
//!

use std::cell::RefCell;

use crate::stack::{self, StackFrame};

/// Classification of a runtime exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    /// Unclassified failure.
    Unknown,
    /// Concurrent or re-entrant use of an object that permits one
    /// in-flight call.
    Threading,
    /// Use of a closed handle.
    Closed,
    /// Native engine failure, carrying the engine result code.
    Db { code: i32 },
    /// Value marshalling failure.
    Conversion,
    /// An operation was invoked outside its required call context.
    ContextMisuse,
}

impl ExceptionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExceptionKind::Unknown => "Unknown",
            ExceptionKind::Threading => "ThreadingViolation",
            ExceptionKind::Closed => "HandleClosed",
            ExceptionKind::Db { .. } => "DbError",
            ExceptionKind::Conversion => "ConversionError",
            ExceptionKind::ContextMisuse => "ContextMisuse",
        }
    }
}

/// A runtime exception with an optional captured traceback.
#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: ExceptionKind,
    pub message: String,
    pub traceback: Vec<StackFrame>,
}

impl Exception {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    /// Formats the exception for display: kind, message, traceback.
    pub fn render(&self) -> String {
        format!(
            "{}: {}\n{}",
            self.kind.name(),
            self.message,
            stack::format_traceback(&self.traceback)
        )
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Exception>> = const { RefCell::new(None) };
}

/// Stores `exc` as this thread's pending exception, replacing any
/// previous one.
pub fn raise(exc: Exception) {
    CURRENT.with(|slot| {
        *slot.borrow_mut() = Some(exc);
    });
}

/// Whether an exception is pending on this thread.
pub fn occurred() -> bool {
    CURRENT.with(|slot| slot.borrow().is_some())
}

/// Takes the pending exception, leaving the slot clear.
pub fn fetch() -> Option<Exception> {
    CURRENT.with(|slot| slot.borrow_mut().take())
}

/// Clears the pending exception, if any.
pub fn clear() {
    CURRENT.with(|slot| {
        *slot.borrow_mut() = None;
    });
}

/// Attaches a shadow-stack traceback to the pending exception if it
/// does not already carry one.
pub fn normalize() {
    CURRENT.with(|slot| {
        if let Some(exc) = slot.borrow_mut().as_mut() {
            if exc.traceback.is_empty() {
                exc.traceback = stack::capture();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_fetch_clear() {
        clear();
        assert!(!occurred());
        raise(Exception::new(ExceptionKind::Unknown, "boom"));
        assert!(occurred());
        let exc = fetch().unwrap();
        assert_eq!(exc.message, "boom");
        assert!(!occurred());
        assert!(fetch().is_none());
    }

    #[test]
    fn test_raise_replaces_pending() {
        clear();
        raise(Exception::new(ExceptionKind::Unknown, "first"));
        raise(Exception::new(ExceptionKind::Conversion, "second"));
        let exc = fetch().unwrap();
        assert_eq!(exc.kind, ExceptionKind::Conversion);
        assert_eq!(exc.message, "second");
    }

    #[test]
    fn test_normalize_attaches_traceback() {
        clear();
        let _frame = stack::push_frame("cb", file!(), line!());
        raise(Exception::new(ExceptionKind::Db { code: 1 }, "engine"));
        normalize();
        let exc = fetch().unwrap();
        assert_eq!(exc.traceback.len(), 1);
        assert_eq!(exc.traceback[0].function, "cb");
    }

    #[test]
    fn test_render_includes_kind_and_message() {
        let exc = Exception::new(ExceptionKind::Threading, "busy");
        let text = exc.render();
        assert!(text.starts_with("ThreadingViolation: busy"));
    }
}
