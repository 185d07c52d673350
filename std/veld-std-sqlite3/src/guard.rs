//!
//! Fast-Fail Reentrancy Guard
//!
//! Each wrapped handle permits exactly one in-flight call. The flag
//! is detection, not mutual exclusion: there is no queue, an
//! overlapping call fails immediately with `ThreadingViolation` so
//! the first call's native work is never thrashed from another
//! thread. Callers control ordering; the library only reports misuse.
//!

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, SqliteError};

/// Per-object in-use flag.
pub struct InUse {
    flag: AtomicBool,
}

impl InUse {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Marks the object in use for the lifetime of the returned
    /// guard, or fails immediately if a call is already in flight.
    pub fn try_enter(&self) -> Result<UsageGuard<'_>> {
        if self
            .flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SqliteError::ThreadingViolation);
        }
        Ok(UsageGuard { flag: &self.flag })
    }

    /// Whether a call is currently in flight.
    pub fn in_use(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for InUse {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the in-use flag when dropped.
#[derive(Debug)]
pub struct UsageGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for UsageGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlapping_entry_fails_fast() {
        let in_use = InUse::new();
        let first = in_use.try_enter().unwrap();
        assert!(in_use.in_use());

        match in_use.try_enter() {
            Err(SqliteError::ThreadingViolation) => {}
            other => panic!("expected ThreadingViolation, got {other:?}"),
        }

        // The first call is unaffected by the failed second entry.
        drop(first);
        assert!(!in_use.in_use());
        let _again = in_use.try_enter().unwrap();
    }

    #[test]
    fn test_guard_clears_on_error_path() {
        let in_use = InUse::new();
        let result: Result<()> = (|| {
            let _guard = in_use.try_enter()?;
            Err(SqliteError::Conversion("mid-call failure".to_string()))
        })();
        assert!(result.is_err());
        assert!(!in_use.in_use());
    }
}
