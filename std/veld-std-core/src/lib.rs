//!
//! veld-std-core - Core Runtime Primitives
//!
//! This crate provides the host-runtime primitives shared by the veld
//! binding crates:
//!
//! - `Value` for generic runtime values: integers, floats,
//!   length-delimited text and bytes, null, unordered sets, and the
//!   no-change sentinel used by update-style callbacks
//! - Thread-local exception slot with raise/fetch/clear/normalize
//! - Shadow stack for reconstructing tracebacks at report time
//! - The runtime-wide exclusivity lock and its `LockSession` token
//! - Process-wide unraisable/display hook registry
//!
//! Binding crates release the runtime lock around blocking native
//! calls via `LockSession::allow_threads` and raise failures into the
//! exception slot when a native calling convention has no error
//! channel of its own.
//!

pub mod exception;
pub mod hooks;
pub mod lock;
pub mod stack;
pub mod value;

pub use exception::*;
pub use hooks::*;
pub use lock::*;
pub use stack::*;
pub use value::*;
