//! Abstract power states and the kernel event table that produces them.
//!
//! # Wake vs. sleep ordering (for beginners)
//!
//! Devices are added in configuration order, and every fan-out of a power
//! change walks them in a fixed direction:
//!
//! - **sleep-class** states (`Suspend`, `DozeSuspend`) walk forward, first
//!   added device first;
//! - **wake-class** states (`Resume`, `DozeResume`) walk in reverse, last
//!   added device first.
//!
//! [`PowerState::is_wake`] is the single switch every fan-out consults.

use serde::{Deserialize, Serialize};

use crate::error::HdfResult;

/// Kernel event: system suspend.
pub const KEVENT_POWER_SUSPEND: u32 = 0;
/// Kernel event: display turned off (doze).
pub const KEVENT_POWER_DISPLAY_OFF: u32 = 1;
/// Kernel event: system resume.
pub const KEVENT_POWER_RESUME: u32 = 2;
/// Kernel event: display turned on (doze exit).
pub const KEVENT_POWER_DISPLAY_ON: u32 = 3;

/// Power state propagated to device nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerState {
    DozeResume,
    DozeSuspend,
    Resume,
    Suspend,
    /// Sentinel for events the table does not know.  Never propagated.
    Invalid,
}

impl PowerState {
    /// Translates a kernel power event code.
    pub fn from_kernel_event(event: u32) -> Self {
        match event {
            KEVENT_POWER_SUSPEND => PowerState::Suspend,
            KEVENT_POWER_DISPLAY_OFF => PowerState::DozeSuspend,
            KEVENT_POWER_RESUME => PowerState::Resume,
            KEVENT_POWER_DISPLAY_ON => PowerState::DozeResume,
            _ => PowerState::Invalid,
        }
    }

    /// `false` only for [`PowerState::Invalid`].
    pub fn is_valid(self) -> bool {
        self != PowerState::Invalid
    }

    /// `true` for the wake class (`Resume`, `DozeResume`).
    pub fn is_wake(self) -> bool {
        matches!(self, PowerState::Resume | PowerState::DozeResume)
    }
}

/// Callbacks a driver registers to follow power transitions.
///
/// Every method defaults to accepting the transition.
pub trait PowerEventListener: Send + Sync {
    fn doze_resume(&self) -> HdfResult<()> {
        Ok(())
    }

    fn doze_suspend(&self) -> HdfResult<()> {
        Ok(())
    }

    fn resume(&self) -> HdfResult<()> {
        Ok(())
    }

    fn suspend(&self) -> HdfResult<()> {
        Ok(())
    }
}

/// Invokes the listener callback matching `state`.
///
/// [`PowerState::Invalid`] is accepted without calling anything.
pub fn notify_listener(listener: &dyn PowerEventListener, state: PowerState) -> HdfResult<()> {
    match state {
        PowerState::DozeResume => listener.doze_resume(),
        PowerState::DozeSuspend => listener.doze_suspend(),
        PowerState::Resume => listener.resume(),
        PowerState::Suspend => listener.suspend(),
        PowerState::Invalid => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HdfError;
    use std::sync::Mutex;

    #[test]
    fn test_kernel_event_table() {
        assert_eq!(PowerState::from_kernel_event(KEVENT_POWER_SUSPEND), PowerState::Suspend);
        assert_eq!(
            PowerState::from_kernel_event(KEVENT_POWER_DISPLAY_OFF),
            PowerState::DozeSuspend
        );
        assert_eq!(PowerState::from_kernel_event(KEVENT_POWER_RESUME), PowerState::Resume);
        assert_eq!(
            PowerState::from_kernel_event(KEVENT_POWER_DISPLAY_ON),
            PowerState::DozeResume
        );
    }

    #[test]
    fn test_unknown_kernel_event_is_invalid() {
        let state = PowerState::from_kernel_event(42);
        assert_eq!(state, PowerState::Invalid);
        assert!(!state.is_valid());
    }

    #[test]
    fn test_wake_class() {
        assert!(PowerState::Resume.is_wake());
        assert!(PowerState::DozeResume.is_wake());
        assert!(!PowerState::Suspend.is_wake());
        assert!(!PowerState::DozeSuspend.is_wake());
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
    }

    impl PowerEventListener for Recorder {
        fn resume(&self) -> HdfResult<()> {
            self.calls.lock().unwrap().push("resume");
            Ok(())
        }

        fn suspend(&self) -> HdfResult<()> {
            self.calls.lock().unwrap().push("suspend");
            Err(HdfError::Failure)
        }
    }

    #[test]
    fn test_notify_listener_routes_to_matching_callback() {
        let recorder = Recorder::default();
        assert_eq!(notify_listener(&recorder, PowerState::Resume), Ok(()));
        assert_eq!(
            notify_listener(&recorder, PowerState::Suspend),
            Err(HdfError::Failure)
        );
        // Defaults accept silently.
        assert_eq!(notify_listener(&recorder, PowerState::DozeSuspend), Ok(()));
        assert_eq!(*recorder.calls.lock().unwrap(), vec!["resume", "suspend"]);
    }
}
