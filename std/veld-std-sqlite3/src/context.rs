//!
//! Call-Context Tracker
//!
//! Some engine operations are legal only while nested inside a
//! specific upstream callback: declaring constraint support is valid
//! only during a `connect` callback, for example. The tracker keeps a
//! per-object stack of active tokens per context name. Entering
//! pushes a fresh token and returns a scoped guard; leaving happens
//! when the guard drops, on every exit path including failures.
//!
//! A leave that does not match its enter corrupts later queries and
//! is treated as a fatal programming defect (panic), not silently
//! ignored.
//!

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Context name for connect-phase callbacks.
pub const CONNECT: &str = "connect";

/// Context name for update-phase callbacks.
pub const UPDATE: &str = "update";

/// Per-object tracker of active callback phases.
pub struct CallContext {
    slots: Mutex<HashMap<&'static str, Vec<u64>>>,
    next_token: AtomicU64,
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Enters the named context. Nested and sequential entries of the
    /// same name compose; the innermost leave restores the previous
    /// state.
    pub fn enter(&self, name: &'static str) -> ContextGuard<'_> {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        let mut slots = self.slots.lock().unwrap();
        slots.entry(name).or_default().push(token);
        ContextGuard {
            context: self,
            name,
            token,
        }
    }

    /// Whether the named context is currently active.
    pub fn active(&self, name: &str) -> bool {
        let slots = self.slots.lock().unwrap();
        slots.get(name).is_some_and(|stack| !stack.is_empty())
    }

    /// Removes the given token from the top of the named stack.
    /// Called by `ContextGuard::drop`; a mismatch means enter/leave
    /// pairing was broken somewhere and later `active` queries can no
    /// longer be trusted.
    pub(crate) fn leave(&self, name: &'static str, token: u64) {
        let mut slots = self.slots.lock().unwrap();
        let popped = slots.get_mut(name).and_then(|stack| stack.pop());
        if popped != Some(token) {
            panic!("call context '{name}' corrupted: leave without matching enter");
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Leaves the context when dropped, restoring the saved state.
pub struct ContextGuard<'a> {
    context: &'a CallContext,
    name: &'static str,
    token: u64,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.context.leave(self.name, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_entries_compose() {
        let context = CallContext::new();
        assert!(!context.active(CONNECT));
        {
            let _outer = context.enter(CONNECT);
            assert!(context.active(CONNECT));
            {
                let _inner = context.enter(CONNECT);
                assert!(context.active(CONNECT));
            }
            // Inner leave restores the outer entry, not inactive.
            assert!(context.active(CONNECT));
        }
        assert!(!context.active(CONNECT));
    }

    #[test]
    fn test_names_are_independent() {
        let context = CallContext::new();
        let _connect = context.enter(CONNECT);
        assert!(context.active(CONNECT));
        assert!(!context.active(UPDATE));
    }

    #[test]
    fn test_leave_survives_error_paths() {
        let context = CallContext::new();
        let result: Result<(), ()> = (|| {
            let _guard = context.enter(UPDATE);
            Err(())
        })();
        assert!(result.is_err());
        assert!(!context.active(UPDATE));
    }

    #[test]
    fn test_unmatched_leave_is_fatal() {
        let context = CallContext::new();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            // No matching enter was ever made for this token.
            context.leave(CONNECT, 42);
        }));
        assert!(outcome.is_err());
    }
}
