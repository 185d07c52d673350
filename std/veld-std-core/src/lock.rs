//!
//! Runtime-Wide Exclusivity Lock
//!
//! The veld runtime requires a single process-wide lock around any
//! access to managed values. Binding crates hold it while touching
//! managed state and release it around every native call that might
//! block, so unrelated managed work on other threads keeps running
//! during native I/O.
//!
//! `LockSession` is the proof of holding: operations that need the
//! lock take `&mut LockSession`, and `allow_threads` is the only way
//! to run code with the lock released. The session is not `Send`, so
//! the lock is always released on the thread that acquired it.
//!
//! Lock ordering rule, fixed across all call sites: this lock is
//! released before any native mutex is entered, and every native
//! mutex is left before this lock is reacquired.
//!

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};

static RUNTIME_LOCK: Mutex<()> = Mutex::new(());

thread_local! {
    static HELD: Cell<bool> = const { Cell::new(false) };
}

/// The process-wide runtime lock.
pub struct RuntimeLock;

/// Proof that the current thread holds the runtime lock.
///
/// Dropping the session releases the lock.
pub struct LockSession {
    guard: Option<MutexGuard<'static, ()>>,
    _not_send: PhantomData<*const ()>,
}

impl RuntimeLock {
    /// Acquires the runtime lock, blocking until it is available.
    ///
    /// Panics if this thread already holds the lock: nested
    /// acquisition would self-deadlock and is a programming defect.
    pub fn acquire() -> LockSession {
        HELD.with(|held| {
            if held.get() {
                panic!("runtime lock already held by this thread");
            }
        });
        // A panic while holding the lock (itself a defect) must not
        // poison every later acquisition.
        let guard = RUNTIME_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        HELD.with(|held| held.set(true));
        LockSession {
            guard: Some(guard),
            _not_send: PhantomData,
        }
    }

    /// Whether the current thread holds the runtime lock.
    pub fn held_by_current_thread() -> bool {
        HELD.with(|held| held.get())
    }
}

impl LockSession {
    /// Releases the runtime lock, runs `f`, then reacquires it.
    ///
    /// Every native call that can block runs inside this window.
    pub fn allow_threads<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let guard = self.guard.take().expect("lock session already released");
        HELD.with(|held| held.set(false));
        drop(guard);

        let result = f();

        let guard = RUNTIME_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        HELD.with(|held| held.set(true));
        self.guard = Some(guard);
        result
    }
}

impl Drop for LockSession {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            HELD.with(|held| held.set(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_acquire_and_release() {
        assert!(!RuntimeLock::held_by_current_thread());
        {
            let _session = RuntimeLock::acquire();
            assert!(RuntimeLock::held_by_current_thread());
        }
        assert!(!RuntimeLock::held_by_current_thread());
    }

    #[test]
    fn test_allow_threads_releases_and_reacquires() {
        let mut session = RuntimeLock::acquire();
        let other_ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&other_ran);

        session.allow_threads(|| {
            assert!(!RuntimeLock::held_by_current_thread());
            // Another thread can take the lock while it is released.
            let handle = std::thread::spawn(move || {
                let _session = RuntimeLock::acquire();
                flag.store(true, Ordering::SeqCst);
            });
            handle.join().unwrap();
        });

        assert!(RuntimeLock::held_by_current_thread());
        assert!(other_ran.load(Ordering::SeqCst));
    }

    #[test]
    #[should_panic(expected = "already held")]
    fn test_nested_acquire_panics() {
        let _outer = RuntimeLock::acquire();
        let _inner = RuntimeLock::acquire();
    }
}
