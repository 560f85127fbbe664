//! Kernel power-event sources.
//!
//! - **`signal`** – unix signals standing in for kernel events:
//!   `SIGUSR1` is a suspend, `SIGUSR2` a resume.
//! - **`mock`** – a source tests fire by hand.

pub mod mock;
pub mod signal;

pub use signal::SignalPowerSource;
