//! [`DriverInstaller`](crate::application::installer::DriverInstaller)
//! implementations.
//!
//! - **`process`** – the production installer: one child process per host.
//! - **`mock`** – a recording installer for tests.

pub mod mock;
pub mod process;

pub use process::ProcessInstaller;
