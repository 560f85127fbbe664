//! Power-event source driven by tests.

use std::sync::{Mutex, PoisonError};

use hdf_core::{HdfError, HdfResult};

use crate::application::power_source::{KernelEventCallback, PowerEventSource};

/// Delivers events only when [`emit`](Self::emit) is called.
#[derive(Default)]
pub struct ManualPowerSource {
    subscribers: Mutex<Vec<KernelEventCallback>>,
    refuse: bool,
}

impl ManualPowerSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose `subscribe` always fails.
    pub fn refusing() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            refuse: true,
        }
    }

    /// Delivers `event` to every subscriber on the calling thread.
    pub fn emit(&self, event: u32) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in subscribers {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl PowerEventSource for ManualPowerSource {
    fn subscribe(&self, callback: KernelEventCallback) -> HdfResult<()> {
        if self.refuse {
            return Err(HdfError::NotSupported);
        }
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
        Ok(())
    }
}
