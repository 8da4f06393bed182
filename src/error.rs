//! Hub driver error types

use m4sh_transport::{IrqLine, TransportError};
use thiserror::Error;

use crate::lifecycle::{PeripheralEvent, PeripheralState};

/// Errors from hub operations
#[derive(Error, Debug)]
pub enum HubError {
    /// Register bus error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Lifecycle event repeated without the opposite event in between
    #[error("Invalid transition: {event:?} while peripherals {state:?}")]
    InvalidTransition {
        state: PeripheralState,
        event: PeripheralEvent,
    },

    #[error("IRQ {0} already has a handler")]
    IrqAlreadyRegistered(IrqLine),

    #[error("IRQ {0} has no handler")]
    IrqNotRegistered(IrqLine),

    /// Platform capability failed (reset line, boot mode)
    #[error("Platform error: {0}")]
    Platform(String),

    /// Firmware download failed
    #[error("Download failed at 0x{address:08X}: {reason}")]
    Download { address: u32, reason: String },

    /// Operation needs the hub firmware running
    #[error("Hub not ready")]
    NotReady,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    /// True for stale record data; the next poll re-reads it
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_stale())
    }
}
