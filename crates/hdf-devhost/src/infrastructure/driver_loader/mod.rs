//! Driver loader implementations.
//!
//! - **`dynamic`** – opens `<library dir>/<prefix><module><suffix>` with
//!   `libloading` and resolves the exported entry symbol.
//! - **`builtin`** – entries compiled into the binary and registered by name.
//! - **`mock`** – scripted drivers that record their callbacks, for tests.

pub mod builtin;
pub mod dynamic;
pub mod mock;

pub use builtin::BuiltinDriverLoader;
pub use dynamic::DynamicDriverLoader;
