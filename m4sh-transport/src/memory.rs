//! In-memory register file
//!
//! Stands in for the hub on the far side of the bus: every bank is a plain
//! byte region, status registers clear on write-one, and each transfer is
//! appended to an operation log. The firmware side seeds records and raises
//! interrupts through the `load`/`raise_irq` helpers, which bypass the log.

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::irq::{IrqLine, IrqMask};
use crate::overlay::Overlay;
use crate::registers::{Bank, Register, BANK_REGION_SIZE};
use crate::RegisterTransport;

/// A transfer seen by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read { bank: Bank, offset: u16, len: usize },
    Write { bank: Bank, offset: u16, data: Vec<u8> },
}

struct MemoryState {
    banks: Vec<Vec<u8>>,
    operations: Vec<Operation>,
    fail_next_read: bool,
    fail_next_write: bool,
    fail_read_of: Option<Register>,
    fail_write_of: Option<Register>,
}

impl MemoryState {
    /// Consume a pending injected failure for a transfer at (bank, offset)
    fn take_failure(
        flag: &mut bool,
        target: &mut Option<Register>,
        bank: Bank,
        offset: u16,
    ) -> bool {
        if std::mem::take(flag) {
            return true;
        }
        match *target {
            Some(reg) if Register::at(bank, offset) == Some(reg) => {
                *target = None;
                true
            }
            _ => false,
        }
    }
}

/// Register file backed by host memory
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    concurrent_banks: bool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// All banks zeroed, single shared bus
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                banks: vec![vec![0u8; BANK_REGION_SIZE]; Bank::COUNT],
                operations: Vec::new(),
                fail_next_read: false,
                fail_next_write: false,
                fail_read_of: None,
                fail_write_of: None,
            }),
            concurrent_banks: false,
        }
    }

    /// Report independent per-bank access to the bus layer
    pub fn with_concurrent_banks(mut self, concurrent: bool) -> Self {
        self.concurrent_banks = concurrent;
        self
    }

    /// Firmware side: place raw bytes into a bank
    pub fn load(&self, bank: Bank, offset: u16, data: &[u8]) {
        let mut state = self.state.lock();
        let start = offset as usize;
        state.banks[bank.index()][start..start + data.len()].copy_from_slice(data);
    }

    /// Firmware side: publish a record into its register
    pub fn load_record<T: Overlay>(&self, record: &T) {
        let info = T::REGISTER.info();
        self.load(info.bank, info.offset, record.encode());
    }

    /// Firmware side: latch an interrupt in its class status register
    pub fn raise_irq(&self, line: IrqLine) {
        let reg = status_register(line);
        let current = self.peek_register(reg);
        let mut mask = IrqMask::from_register_bytes(line.class(), &current);
        mask.insert(line);
        let info = reg.info();
        self.load(info.bank, info.offset, &mask.to_register_bytes(line.class()));
    }

    /// Raw bytes currently held at a location
    pub fn peek(&self, bank: Bank, offset: u16, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        let start = offset as usize;
        state.banks[bank.index()][start..start + len].to_vec()
    }

    /// Raw bytes currently held in a register
    pub fn peek_register(&self, reg: Register) -> Vec<u8> {
        let info = reg.info();
        self.peek(info.bank, info.offset, info.size)
    }

    /// Transfers performed so far
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.state.lock().operations.clear();
    }

    /// Make the next read fail with a bus error
    pub fn fail_next_read(&self) {
        self.state.lock().fail_next_read = true;
    }

    /// Make the next write fail with a bus error
    pub fn fail_next_write(&self) {
        self.state.lock().fail_next_write = true;
    }

    /// Make the next read of `reg` fail; other transfers go through
    pub fn fail_next_read_of(&self, reg: Register) {
        self.state.lock().fail_read_of = Some(reg);
    }

    /// Make the next write to `reg` fail; other transfers go through
    pub fn fail_next_write_of(&self, reg: Register) {
        self.state.lock().fail_write_of = Some(reg);
    }
}

fn status_register(line: IrqLine) -> Register {
    if line.is_wake() {
        Register::WakeIrqStatus
    } else {
        Register::NoWakeIrqStatus
    }
}

fn check_range(bank: Bank, offset: u16, len: usize) -> Result<usize, TransportError> {
    let start = offset as usize;
    if start + len > BANK_REGION_SIZE {
        return Err(TransportError::OutOfRange { bank, offset, len });
    }
    Ok(start)
}

impl RegisterTransport for MemoryTransport {
    fn read(&self, bank: Bank, offset: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        let start = check_range(bank, offset, buf.len())?;
        let mut state = self.state.lock();
        let state = &mut *state;
        let fail = &mut state.fail_next_read;
        if MemoryState::take_failure(fail, &mut state.fail_read_of, bank, offset) {
            return Err(TransportError::Bus("injected read failure".into()));
        }
        buf.copy_from_slice(&state.banks[bank.index()][start..start + buf.len()]);
        state.operations.push(Operation::Read {
            bank,
            offset,
            len: buf.len(),
        });
        Ok(())
    }

    fn write(&self, bank: Bank, offset: u16, data: &[u8]) -> Result<(), TransportError> {
        let start = check_range(bank, offset, data.len())?;
        let mut state = self.state.lock();
        let state = &mut *state;
        let fail = &mut state.fail_next_write;
        if MemoryState::take_failure(fail, &mut state.fail_write_of, bank, offset) {
            return Err(TransportError::Bus("injected write failure".into()));
        }
        let w1c = Register::at(bank, offset).is_some_and(Register::is_write_one_to_clear);
        let region = &mut state.banks[bank.index()][start..start + data.len()];
        if w1c {
            for (cell, bits) in region.iter_mut().zip(data) {
                *cell &= !bits;
            }
        } else {
            region.copy_from_slice(data);
        }
        state.operations.push(Operation::Write {
            bank,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn supports_concurrent_banks(&self) -> bool {
        self.concurrent_banks
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::{NoWakeIrq, WakeIrq};

    #[test]
    fn test_status_register_write_one_to_clear() {
        let mem = MemoryTransport::new();
        mem.raise_irq(NoWakeIrq::Accel.into());
        mem.raise_irq(NoWakeIrq::Compass.into());
        assert_eq!(mem.peek_register(Register::NoWakeIrqStatus), vec![0x05, 0x00]);

        let info = Register::NoWakeIrqStatus.info();
        mem.write(info.bank, info.offset, &[0x01, 0x00]).unwrap();
        assert_eq!(mem.peek_register(Register::NoWakeIrqStatus), vec![0x04, 0x00]);
    }

    #[test]
    fn test_plain_register_overwrites() {
        let mem = MemoryTransport::new();
        let info = Register::WakeIrqEnable.info();
        mem.write(info.bank, info.offset, &[0xFF, 0x07]).unwrap();
        mem.write(info.bank, info.offset, &[0x01, 0x00]).unwrap();
        assert_eq!(mem.peek_register(Register::WakeIrqEnable), vec![0x01, 0x00]);
    }

    #[test]
    fn test_raise_wake_irq() {
        let mem = MemoryTransport::new();
        mem.raise_irq(WakeIrq::M4Ready.into());
        // local bit 8 -> second byte
        assert_eq!(mem.peek_register(Register::WakeIrqStatus), vec![0x00, 0x01]);
        assert_eq!(mem.peek_register(Register::NoWakeIrqStatus), vec![0x00, 0x00]);
    }

    #[test]
    fn test_out_of_range() {
        let mem = MemoryTransport::new();
        let mut buf = [0u8; 4];
        let err = mem.read(Bank::Accel, (BANK_REGION_SIZE - 2) as u16, &mut buf);
        assert!(matches!(err, Err(TransportError::OutOfRange { .. })));
    }

    #[test]
    fn test_failure_injection_is_one_shot() {
        let mem = MemoryTransport::new();
        let mut buf = [0u8; 1];
        mem.fail_next_read();
        assert!(mem.read(Bank::General, 0, &mut buf).is_err());
        assert!(mem.read(Bank::General, 0, &mut buf).is_ok());
        assert_eq!(mem.operations().len(), 1);
    }

    #[test]
    fn test_targeted_failure_skips_other_registers() {
        let mem = MemoryTransport::new();
        let wake = Register::WakeIrqStatus.info();
        let nowake = Register::NoWakeIrqStatus.info();
        let mut buf = [0u8; 2];
        mem.fail_next_read_of(Register::WakeIrqStatus);
        assert!(mem.read(nowake.bank, nowake.offset, &mut buf).is_ok());
        assert!(mem.read(wake.bank, wake.offset, &mut buf).is_err());
        assert!(mem.read(wake.bank, wake.offset, &mut buf).is_ok());

        mem.fail_next_write_of(Register::WakeIrqStatus);
        assert!(mem.write(nowake.bank, nowake.offset, &[0, 0]).is_ok());
        assert!(mem.write(wake.bank, wake.offset, &[0, 0]).is_err());
    }
}
