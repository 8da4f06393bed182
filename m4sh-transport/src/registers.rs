//! Register bank map for the M4 sensor hub
//!
//! The hub exposes its state as a set of banks, each a fixed region of
//! `BANK_REGION_SIZE` bytes. A register is a (bank, offset, size) triple;
//! sensor records occupy one register each and are decoded with the
//! overlays in [`crate::overlay`].

use std::fmt;

use crate::irq;
use crate::overlay::{
    AccelData, CompassData, DownloadPacket, GestureData, Overlay, PowerStateData, PressureData,
};

/// Largest single register the hub exposes
pub const MAX_REG_SIZE: usize = 2048;

/// Largest staging buffer kept on the stack; bigger registers go through the heap
pub const MAX_STACK_BUF_SIZE: usize = 32;

/// Size of every bank region
pub const BANK_REGION_SIZE: usize = 0x800;

/// Register bank identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Bank {
    /// Firmware version, interrupt status and enable registers
    General = 0,
    Accel = 1,
    Compass = 2,
    Pressure = 3,
    Gesture = 4,
    /// Hub power state and power control
    Power = 5,
    /// Firmware download mailbox
    Download = 6,
}

impl Bank {
    /// Number of banks
    pub const COUNT: usize = 7;

    /// All banks in ID order
    pub const ALL: [Bank; Self::COUNT] = [
        Bank::General,
        Bank::Accel,
        Bank::Compass,
        Bank::Pressure,
        Bank::Gesture,
        Bank::Power,
        Bank::Download,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    /// Bank index, usable for per-bank tables
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Bank::General => "general",
            Bank::Accel => "accel",
            Bank::Compass => "compass",
            Bank::Pressure => "pressure",
            Bank::Gesture => "gesture",
            Bank::Power => "power",
            Bank::Download => "download",
        }
    }
}

impl fmt::Display for Bank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Location and width of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub bank: Bank,
    pub offset: u16,
    pub size: usize,
}

impl RegisterInfo {
    /// One past the last byte of the register within its bank
    pub const fn end(&self) -> usize {
        self.offset as usize + self.size
    }
}

/// Every register known to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    // General bank
    FirmwareVersion,
    HubState,
    NoWakeIrqStatus,
    NoWakeIrqEnable,
    WakeIrqStatus,
    WakeIrqEnable,

    // Sensor banks
    AccelRecord,
    AccelSampleRate,
    CompassRecord,
    CompassSampleRate,
    PressureRecord,
    PressureSampleRate,
    GestureRecord,

    // Power bank
    PowerStateRecord,
    PowerControl,

    // Download bank
    DownloadPacket,
}

impl Register {
    pub const ALL: &'static [Register] = &[
        Register::FirmwareVersion,
        Register::HubState,
        Register::NoWakeIrqStatus,
        Register::NoWakeIrqEnable,
        Register::WakeIrqStatus,
        Register::WakeIrqEnable,
        Register::AccelRecord,
        Register::AccelSampleRate,
        Register::CompassRecord,
        Register::CompassSampleRate,
        Register::PressureRecord,
        Register::PressureSampleRate,
        Register::GestureRecord,
        Register::PowerStateRecord,
        Register::PowerControl,
        Register::DownloadPacket,
    ];

    /// Bank, offset and size of the register
    pub const fn info(self) -> RegisterInfo {
        const fn reg(bank: Bank, offset: u16, size: usize) -> RegisterInfo {
            RegisterInfo { bank, offset, size }
        }
        match self {
            Register::FirmwareVersion => reg(Bank::General, 0x00, 2),
            Register::HubState => reg(Bank::General, 0x02, 1),
            Register::NoWakeIrqStatus => reg(Bank::General, 0x10, irq::NOWAKE_STATUS_BYTES),
            Register::NoWakeIrqEnable => reg(Bank::General, 0x14, irq::NOWAKE_STATUS_BYTES),
            Register::WakeIrqStatus => reg(Bank::General, 0x18, irq::WAKE_STATUS_BYTES),
            Register::WakeIrqEnable => reg(Bank::General, 0x1C, irq::WAKE_STATUS_BYTES),

            Register::AccelRecord => reg(Bank::Accel, 0x00, AccelData::SIZE),
            Register::AccelSampleRate => reg(Bank::Accel, 0x40, 2),
            Register::CompassRecord => reg(Bank::Compass, 0x00, CompassData::SIZE),
            Register::CompassSampleRate => reg(Bank::Compass, 0x40, 2),
            Register::PressureRecord => reg(Bank::Pressure, 0x00, PressureData::SIZE),
            Register::PressureSampleRate => reg(Bank::Pressure, 0x40, 2),
            Register::GestureRecord => reg(Bank::Gesture, 0x00, GestureData::SIZE),

            Register::PowerStateRecord => reg(Bank::Power, 0x00, PowerStateData::SIZE),
            Register::PowerControl => reg(Bank::Power, 0x40, 1),

            Register::DownloadPacket => reg(Bank::Download, 0x00, DownloadPacket::SIZE),
        }
    }

    /// Look up the register starting at `offset` in `bank`
    pub fn at(bank: Bank, offset: u16) -> Option<Register> {
        Self::ALL.iter().copied().find(|r| {
            let info = r.info();
            info.bank == bank && info.offset == offset
        })
    }

    /// Status registers latch bits set by the hub; writing a 1 clears the bit.
    pub const fn is_write_one_to_clear(self) -> bool {
        matches!(self, Register::NoWakeIrqStatus | Register::WakeIrqStatus)
    }

    /// Get human-readable register name
    pub fn name(self) -> &'static str {
        match self {
            Register::FirmwareVersion => "FIRMWARE_VERSION",
            Register::HubState => "HUB_STATE",
            Register::NoWakeIrqStatus => "NOWAKE_IRQ_STATUS",
            Register::NoWakeIrqEnable => "NOWAKE_IRQ_ENABLE",
            Register::WakeIrqStatus => "WAKE_IRQ_STATUS",
            Register::WakeIrqEnable => "WAKE_IRQ_ENABLE",
            Register::AccelRecord => "ACCEL_RECORD",
            Register::AccelSampleRate => "ACCEL_SAMPLE_RATE",
            Register::CompassRecord => "COMPASS_RECORD",
            Register::CompassSampleRate => "COMPASS_SAMPLE_RATE",
            Register::PressureRecord => "PRESSURE_RECORD",
            Register::PressureSampleRate => "PRESSURE_SAMPLE_RATE",
            Register::GestureRecord => "GESTURE_RECORD",
            Register::PowerStateRecord => "POWER_STATE_RECORD",
            Register::PowerControl => "POWER_CONTROL",
            Register::DownloadPacket => "DOWNLOAD_PACKET",
        }
    }
}

const _: () = {
    let mut i = 0;
    while i < Register::ALL.len() {
        let info = Register::ALL[i].info();
        assert!(info.size <= MAX_REG_SIZE);
        assert!(info.end() <= BANK_REGION_SIZE);
        // No two registers in a bank share a byte
        let mut j = i + 1;
        while j < Register::ALL.len() {
            let other = Register::ALL[j].info();
            if info.bank.index() == other.bank.index() {
                assert!(
                    info.end() <= other.offset as usize || other.end() <= info.offset as usize
                );
            }
            j += 1;
        }
        i += 1;
    }
};

/// Hub firmware state reported in `HUB_STATE`
pub mod hub_state {
    pub const BOOTLOADER: u8 = 0x00;
    pub const RUNNING: u8 = 0x01;
    pub const PANIC: u8 = 0xEE;
}

/// Values for `POWER_CONTROL`
pub mod power_control {
    pub const SLEEP: u8 = 0x00;
    pub const AWAKE: u8 = 0x01;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registers_do_not_overlap() {
        for (i, a) in Register::ALL.iter().enumerate() {
            for b in &Register::ALL[i + 1..] {
                let (ia, ib) = (a.info(), b.info());
                if ia.bank != ib.bank {
                    continue;
                }
                let disjoint = ia.end() <= ib.offset as usize || ib.end() <= ia.offset as usize;
                assert!(disjoint, "{} overlaps {}", a.name(), b.name());
            }
        }
    }

    #[test]
    fn test_register_lookup_by_address() {
        assert_eq!(Register::at(Bank::Accel, 0x00), Some(Register::AccelRecord));
        assert_eq!(Register::at(Bank::General, 0x18), Some(Register::WakeIrqStatus));
        assert_eq!(Register::at(Bank::Accel, 0x01), None);
    }

    #[test]
    fn test_bank_from_u8() {
        assert_eq!(Bank::from_u8(0), Some(Bank::General));
        assert_eq!(Bank::from_u8(6), Some(Bank::Download));
        assert_eq!(Bank::from_u8(7), None);
        for bank in Bank::ALL {
            assert_eq!(Bank::from_u8(bank as u8), Some(bank));
        }
    }

    #[test]
    fn test_only_status_registers_clear_on_write() {
        let w1c: Vec<_> = Register::ALL
            .iter()
            .filter(|r| r.is_write_one_to_clear())
            .collect();
        assert_eq!(w1c, [&Register::NoWakeIrqStatus, &Register::WakeIrqStatus]);
    }
}
