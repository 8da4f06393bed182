//! Serialized register access
//!
//! `RegisterBus` wraps a raw [`RegisterTransport`] and adds what every
//! caller needs: range and size checks, per-bank (or whole-bus) locking and
//! typed record reads.
//!
//! The transport decides the locking granularity. A single shared I2C/SPI
//! bus serializes every transfer; a backend that reports
//! `supports_concurrent_banks()` only serializes transfers to the same bank.

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

use crate::error::TransportError;
use crate::overlay::{Overlay, OverlayError, SensorRecord};
use crate::registers::{Bank, Register, BANK_REGION_SIZE, MAX_REG_SIZE, MAX_STACK_BUF_SIZE};
use crate::BoxedTransport;

enum BankLocks {
    /// One lock for the whole bus
    Shared(Mutex<()>),
    /// One lock per bank
    PerBank(Vec<Mutex<()>>),
}

impl BankLocks {
    fn lock(&self, bank: Bank) -> MutexGuard<'_, ()> {
        match self {
            BankLocks::Shared(lock) => lock.lock(),
            BankLocks::PerBank(locks) => locks[bank.index()].lock(),
        }
    }
}

/// Register bank access shared by every hub client
pub struct RegisterBus {
    transport: BoxedTransport,
    locks: BankLocks,
}

impl RegisterBus {
    pub fn new(transport: BoxedTransport) -> Self {
        let locks = if transport.supports_concurrent_banks() {
            BankLocks::PerBank((0..Bank::COUNT).map(|_| Mutex::new(())).collect())
        } else {
            BankLocks::Shared(Mutex::new(()))
        };
        debug!(
            "Register bus on {} transport ({} locking)",
            transport.name(),
            match &locks {
                BankLocks::Shared(_) => "shared",
                BankLocks::PerBank(_) => "per-bank",
            }
        );
        Self { transport, locks }
    }

    /// Get the underlying transport
    pub fn transport(&self) -> &BoxedTransport {
        &self.transport
    }

    fn check(bank: Bank, offset: u16, len: usize) -> Result<(), TransportError> {
        if len > MAX_REG_SIZE {
            return Err(TransportError::RegisterTooLarge {
                size: len,
                max: MAX_REG_SIZE,
            });
        }
        if offset as usize + len > BANK_REGION_SIZE {
            return Err(TransportError::OutOfRange { bank, offset, len });
        }
        Ok(())
    }

    /// Read raw bytes from a bank
    pub fn read_raw(&self, bank: Bank, offset: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        Self::check(bank, offset, buf.len())?;
        let _guard = self.locks.lock(bank);
        trace!("read {bank} 0x{offset:04X} len {}", buf.len());
        self.transport.read(bank, offset, buf)
    }

    /// Write raw bytes to a bank
    pub fn write_raw(&self, bank: Bank, offset: u16, data: &[u8]) -> Result<(), TransportError> {
        Self::check(bank, offset, data.len())?;
        let _guard = self.locks.lock(bank);
        trace!("write {bank} 0x{offset:04X} len {}", data.len());
        self.transport.write(bank, offset, data)
    }

    /// Read a whole register
    pub fn read_register(&self, reg: Register) -> Result<Vec<u8>, TransportError> {
        let info = reg.info();
        let mut buf = vec![0u8; info.size];
        self.read_raw(info.bank, info.offset, &mut buf)?;
        Ok(buf)
    }

    /// Write a whole register; `data` must be exactly the register size
    pub fn write_register(&self, reg: Register, data: &[u8]) -> Result<(), TransportError> {
        let info = reg.info();
        if data.len() != info.size {
            error!(
                "{}: write of {} bytes to {}-byte register",
                reg.name(),
                data.len(),
                info.size
            );
            return Err(OverlayError::SizeMismatch {
                record: reg.name(),
                expected: info.size,
                actual: data.len(),
            }
            .into());
        }
        self.write_raw(info.bank, info.offset, data)
    }

    /// Read the record of type `T` from (bank, offset), declared `size` bytes.
    ///
    /// `size` must equal the packed size of `T`; a mismatch is a caller bug
    /// and fails before touching the bus. Small records are staged on the
    /// stack, larger ones on the heap.
    pub fn read_record<T: Overlay>(
        &self,
        bank: Bank,
        offset: u16,
        size: usize,
    ) -> Result<T, TransportError> {
        if size != T::SIZE {
            error!(
                "{}: read of {size} bytes at {bank} 0x{offset:04X}, overlay is {} bytes",
                T::NAME,
                T::SIZE
            );
            return Err(OverlayError::SizeMismatch {
                record: T::NAME,
                expected: T::SIZE,
                actual: size,
            }
            .into());
        }

        let record = self.read_staged(bank, offset, size, |raw| Ok(T::decode(raw)?))?;

        record.check_version().map_err(|e| {
            debug!("{e}");
            e.into()
        })
    }

    /// Read the record of type `T` from its own register
    pub fn read<T: Overlay>(&self) -> Result<T, TransportError> {
        let info = T::REGISTER.info();
        self.read_record(info.bank, info.offset, info.size)
    }

    /// Read whatever record lives at (bank, offset), declared `size` bytes
    pub fn read_sensor_record(
        &self,
        bank: Bank,
        offset: u16,
        size: usize,
    ) -> Result<SensorRecord, TransportError> {
        let reg = Register::at(bank, offset)
            .filter(|r| SensorRecord::overlay_size(*r).is_some())
            .ok_or(TransportError::UnknownRegister { bank, offset })?;

        let expected = SensorRecord::overlay_size(reg).unwrap_or_default();
        if size != expected {
            error!(
                "{}: read of {size} bytes, overlay is {expected} bytes",
                reg.name()
            );
            return Err(OverlayError::SizeMismatch {
                record: reg.name(),
                expected,
                actual: size,
            }
            .into());
        }

        self.read_staged(bank, offset, size, |raw| match SensorRecord::decode(reg, raw) {
            Some(record) => Ok(record?),
            None => Err(TransportError::UnknownRegister { bank, offset }),
        })
    }

    /// Read `size` bytes into a stack buffer when they fit, the heap otherwise,
    /// and hand them to `decode`
    fn read_staged<R>(
        &self,
        bank: Bank,
        offset: u16,
        size: usize,
        decode: impl FnOnce(&[u8]) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        if size <= MAX_STACK_BUF_SIZE {
            let mut buf = [0u8; MAX_STACK_BUF_SIZE];
            self.read_raw(bank, offset, &mut buf[..size])?;
            decode(&buf[..size])
        } else {
            let mut buf = vec![0u8; size];
            self.read_raw(bank, offset, &mut buf)?;
            decode(&buf)
        }
    }

    /// Write a record into its own register
    pub fn write_record<T: Overlay>(&self, record: &T) -> Result<(), TransportError> {
        self.write_register(T::REGISTER, record.encode())
    }
}
