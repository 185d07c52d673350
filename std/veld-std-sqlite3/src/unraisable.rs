//!
//! Unraisable Exception Dispatcher
//!
//! Engine-invoked callbacks (user functions, collations, hooks) run
//! inside native frames whose calling convention often has no error
//! channel. A failure there raises into the thread's exception slot
//! and is handed to this dispatcher, which reports it through an
//! ordered chain and guarantees that nothing escapes: the slot is
//! clear when it returns, always.
//!
//! Order, stopping at the first step that succeeds and discarding
//! each step's own failure:
//!
//! 1. complete the traceback from the shadow stack
//! 2. mirror through the engine's logging sink (never fatal)
//! 3. the call-site-scoped hook, if any
//! 4. the process-wide unraisable hook, with one bundled record
//! 5. the process-wide display hook
//! 6. unconditional display
//!
//! If a hook re-triggers the dispatcher, the re-entrant call performs
//! only the unconditional display, bounding recursion.
//!

use std::cell::Cell;
use std::ffi::CString;
use std::os::raw::c_char;

use libsqlite3_sys as ffi;
use veld_std_core::{exception, hooks, Exception, HookResult, UnraisableInfo};

/// Call-site-scoped hook signature (step 3).
pub type LocalHook<'a> = dyn Fn(&Exception) -> HookResult + 'a;

thread_local! {
    static REPORTING: Cell<bool> = const { Cell::new(false) };
}

struct ReportingGuard;

impl Drop for ReportingGuard {
    fn drop(&mut self) {
        REPORTING.with(|flag| flag.set(false));
    }
}

/// Reports the pending thread-local exception through the ordered
/// chain. No-op when no exception is pending. Never raises; the
/// exception slot is clear on return.
pub fn report_unraisable(
    local_hook: Option<&LocalHook<'_>>,
    err_msg: Option<&str>,
    object: Option<&str>,
) {
    exception::normalize();
    let Some(exc) = exception::fetch() else {
        return;
    };

    if REPORTING.with(|flag| flag.get()) {
        // A hook raised and re-triggered us; display and get out.
        display(&exc);
        exception::clear();
        return;
    }
    REPORTING.with(|flag| flag.set(true));
    let _reset = ReportingGuard;

    // Mirror through the engine's diagnostic channel. Failure here is
    // non-fatal and cannot be observed anyway.
    log_to_engine(&exc, err_msg);

    if let Some(hook) = local_hook {
        let outcome = hook(&exc);
        exception::clear();
        if outcome.is_ok() {
            return;
        }
    }

    if let Some(hook) = hooks::unraisable_hook() {
        let info = UnraisableInfo {
            exc_kind: exc.kind.name(),
            exc_message: exc.message.clone(),
            traceback: exc.traceback.clone(),
            err_msg: err_msg.map(String::from),
            object: object.map(String::from),
        };
        let outcome = hook(&info);
        exception::clear();
        if outcome.is_ok() {
            return;
        }
    }

    if let Some(hook) = hooks::display_hook() {
        let outcome = hook(&exc);
        exception::clear();
        if outcome.is_ok() {
            return;
        }
    }

    display(&exc);
    exception::clear();
}

fn display(exc: &Exception) {
    eprint!("unraisable exception\n{}", exc.render());
}

/// Best-effort mirror into the engine's logging sink.
fn log_to_engine(exc: &Exception, err_msg: Option<&str>) {
    let mut text = format!("unraisable {}: {}", exc.kind.name(), exc.message);
    if let Some(context) = err_msg {
        text = format!("{text} ({context})");
    }
    let sanitized = text.replace('\0', " ");
    if let Ok(message) = CString::new(sanitized) {
        unsafe {
            ffi::sqlite3_log(
                ffi::SQLITE_ERROR,
                c"%s".as_ptr().cast::<c_char>(),
                message.as_ptr(),
            );
        }
    }
}
