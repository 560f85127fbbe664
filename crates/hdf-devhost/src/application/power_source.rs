//! Source of kernel power events.

use std::sync::Arc;

use hdf_core::HdfResult;

/// Called with a raw kernel power event code.
pub type KernelEventCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Something that delivers kernel power events to the host.
///
/// Implementations live in the infrastructure layer: a unix signal source
/// for real hosts and a manual source for tests.
pub trait PowerEventSource: Send + Sync {
    /// Starts delivering events to `callback`.
    fn subscribe(&self, callback: KernelEventCallback) -> HdfResult<()>;
}
