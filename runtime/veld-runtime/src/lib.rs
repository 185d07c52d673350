///
/// veld Runtime Static Library
///
/// Produces the static library (libveld_runtime.a) linked with
/// compiled veld object files. Aggregates the core runtime primitives
/// and the SQLite3 bridging layer.
///

pub use veld_std_core::*;
pub use veld_std_sqlite3::*;
