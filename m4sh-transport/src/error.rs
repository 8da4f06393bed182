//! Transport error types

use thiserror::Error;

use crate::overlay::OverlayError;
use crate::registers::Bank;

/// Errors that can occur during register bank access
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying bus (I2C/SPI) failure
    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("Hub disconnected")]
    Disconnected,

    /// Access past the end of a bank region
    #[error("Access out of range: {bank:?} offset 0x{offset:04X} len {len}")]
    OutOfRange { bank: Bank, offset: u16, len: usize },

    /// Single transfer larger than any register
    #[error("Register transfer of {size} bytes exceeds the {max}-byte limit")]
    RegisterTooLarge { size: usize, max: usize },

    /// No register is mapped at this address
    #[error("No register at {bank:?} offset 0x{offset:04X}")]
    UnknownRegister { bank: Bank, offset: u16 },

    /// Overlay decode failure (size mismatch, stale version)
    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

impl TransportError {
    /// True when the data was readable but its version byte was not the one
    /// expected. The next poll cycle re-reads it.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Overlay(OverlayError::StaleVersion { .. }))
    }
}
