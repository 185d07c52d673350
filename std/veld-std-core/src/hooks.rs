//!
//! Process-Wide Hook Registry
//!
//! Holds the two process-wide hooks consulted by the unraisable
//! dispatcher: the unraisable hook, which receives one bundled
//! `UnraisableInfo` record, and the display hook, which receives the
//! exception itself.
//!
//! Lifecycle: hooks are set explicitly (last writer wins, `None`
//! unsets) and read by cloning the `Arc` under the registry lock, so
//! a running hook may itself replace the registry without
//! deadlocking. A hook that returns `Err` counts as failed and the
//! dispatcher moves to the next step.
//!

use std::sync::{Arc, LazyLock, RwLock};

use crate::exception::Exception;
use crate::stack::StackFrame;

/// Result of invoking a hook. `Err` means the hook itself failed.
pub type HookResult = Result<(), Exception>;

/// Process-wide unraisable hook signature.
pub type UnraisableHook = Arc<dyn Fn(&UnraisableInfo) -> HookResult + Send + Sync>;

/// Process-wide display hook signature.
pub type DisplayHook = Arc<dyn Fn(&Exception) -> HookResult + Send + Sync>;

/// Bundled record handed to the process-wide unraisable hook.
#[derive(Debug, Clone)]
pub struct UnraisableInfo {
    /// Exception kind name.
    pub exc_kind: &'static str,
    /// Exception message.
    pub exc_message: String,
    /// Captured traceback, most recent frame first.
    pub traceback: Vec<StackFrame>,
    /// Additional context from the report site, if any.
    pub err_msg: Option<String>,
    /// Description of the object that caused the exception, if any.
    pub object: Option<String>,
}

#[derive(Default)]
struct HookRegistry {
    unraisable: Option<UnraisableHook>,
    display: Option<DisplayHook>,
}

static HOOKS: LazyLock<RwLock<HookRegistry>> =
    LazyLock::new(|| RwLock::new(HookRegistry::default()));

/// Installs (or with `None`, removes) the process-wide unraisable
/// hook. Returns the previous hook.
pub fn set_unraisable_hook(hook: Option<UnraisableHook>) -> Option<UnraisableHook> {
    let mut registry = HOOKS.write().unwrap();
    std::mem::replace(&mut registry.unraisable, hook)
}

/// Current unraisable hook, if set.
pub fn unraisable_hook() -> Option<UnraisableHook> {
    HOOKS.read().unwrap().unraisable.clone()
}

/// Installs (or with `None`, removes) the process-wide display hook.
/// Returns the previous hook.
pub fn set_display_hook(hook: Option<DisplayHook>) -> Option<DisplayHook> {
    let mut registry = HOOKS.write().unwrap();
    std::mem::replace(&mut registry.display, hook)
}

/// Current display hook, if set.
pub fn display_hook() -> Option<DisplayHook> {
    HOOKS.read().unwrap().display.clone()
}
