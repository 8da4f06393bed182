//! Board capabilities the hub driver may use
//!
//! Boards differ in how the hub's reset and boot-mode lines are wired and in
//! how the host is kept awake after a wake interrupt. A board hands the hub
//! an implementation of [`HubPlatform`]; a board without any of these hooks
//! hands it nothing, and every call site copes with the absence.

use std::time::Duration;

use m4sh_transport::IrqLine;

use crate::error::HubError;

/// Optional board hooks
pub trait HubPlatform: Send + Sync {
    /// Pulse the hub reset line
    fn hw_reset(&self) -> Result<(), HubError>;

    /// Select bootloader (`true`) or application (`false`) on the next reset
    fn set_boot_mode(&self, bootloader: bool) -> Result<(), HubError>;

    /// Keep the host out of suspend while a wake interrupt is handled
    fn hold_wake(&self, line: IrqLine, duration: Duration);
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Call recorder used by hub tests
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum PlatformCall {
        Reset,
        BootMode(bool),
        HoldWake(IrqLine, Duration),
    }

    #[derive(Default)]
    pub struct RecordingPlatform {
        pub calls: Mutex<Vec<PlatformCall>>,
        pub fail_reset: Mutex<bool>,
    }

    impl HubPlatform for RecordingPlatform {
        fn hw_reset(&self) -> Result<(), HubError> {
            self.calls.lock().push(PlatformCall::Reset);
            if *self.fail_reset.lock() {
                return Err(HubError::Platform("reset line stuck".into()));
            }
            Ok(())
        }

        fn set_boot_mode(&self, bootloader: bool) -> Result<(), HubError> {
            self.calls.lock().push(PlatformCall::BootMode(bootloader));
            Ok(())
        }

        fn hold_wake(&self, line: IrqLine, duration: Duration) {
            self.calls.lock().push(PlatformCall::HoldWake(line, duration));
        }
    }
}
