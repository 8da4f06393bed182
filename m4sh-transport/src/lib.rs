//! Register protocol and bus access for the M4 sensor hub
//!
//! The hub is a satellite microcontroller that publishes sensor state in a
//! set of register banks. This crate describes that surface and how to reach
//! it:
//!
//! - [`registers`]: bank IDs and the (bank, offset, size) register map
//! - [`overlay`]: packed record layouts decoded from sensor registers
//! - [`irq`]: the no-wake / wake interrupt space and its register bit layout
//! - [`bus`]: serialized register access on top of a [`RegisterTransport`]
//! - [`memory`]: an in-memory register file implementing the transport
//!
//! ```text
//! [I2C / SPI backend | MemoryTransport]  ← implements RegisterTransport (raw I/O)
//!                |
//!          [RegisterBus]                 ← locking, range checks, typed records
//!                |
//!      [SensorHub / drivers]
//! ```

pub mod bus;
pub mod error;
pub mod irq;
pub mod memory;
pub mod overlay;
pub mod registers;

pub use bus::RegisterBus;
pub use error::TransportError;
pub use irq::{
    IrqClass, IrqLine, IrqMask, NoWakeIrq, WakeIrq, IRQ_NUM, NOWAKE_IRQ_MAX, WAKE_IRQ_MAX,
};
pub use memory::{MemoryTransport, Operation};
pub use overlay::{
    AccelData, CompassData, DownloadPacket, GestureData, GestureSlot, Overlay, OverlayError,
    PowerMode, PowerStateData, PressureData, SensorRecord,
};
pub use registers::{Bank, Register, RegisterInfo, MAX_REG_SIZE, MAX_STACK_BUF_SIZE};

use std::sync::Arc;

/// The core transport trait - bus backends implement this
///
/// Transfers are blocking. Implementations use interior mutability; the
/// [`RegisterBus`] on top serializes access so a backend never sees two
/// overlapping transfers to the same bank.
pub trait RegisterTransport: Send + Sync {
    /// Read `buf.len()` bytes starting at `offset` in `bank`
    fn read(&self, bank: Bank, offset: u16, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Write `data` starting at `offset` in `bank`
    fn write(&self, bank: Bank, offset: u16, data: &[u8]) -> Result<(), TransportError>;

    /// Whether transfers to different banks may run concurrently.
    /// A single shared bus returns `false` (the default).
    fn supports_concurrent_banks(&self) -> bool {
        false
    }

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Type alias for a shared transport
pub type BoxedTransport = Arc<dyn RegisterTransport>;
