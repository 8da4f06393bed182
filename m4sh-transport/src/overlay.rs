//! Typed overlays for hub records
//!
//! Each sensor bank holds one record written by the hub firmware. The host
//! copies the raw bytes out and decodes them through one of the overlays
//! here. Overlays are `#[repr(C)]` structs built only from byte-aligned
//! little-endian field types, so the layout has no padding and is the same
//! on every toolchain. Reserved bytes are kept as opaque arrays and survive
//! decode/encode untouched.
//!
//! Every record starts with a version byte. Callers check it through
//! [`Overlay::check_version`] before trusting the payload.

use thiserror::Error;
use zerocopy::little_endian::{I16, I32, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::registers::Register;

/// Overlay decode errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    /// The byte range does not have the packed size of the overlay.
    /// This is a contract violation between the caller and the register map.
    #[error("{record}: size mismatch, overlay is {expected} bytes, got {actual}")]
    SizeMismatch {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Record version byte is not the one this host understands
    #[error("{record}: stale record, expected version {expected}, got {actual}")]
    StaleVersion {
        record: &'static str,
        expected: u8,
        actual: u8,
    },

    #[error("{record}: invalid value for {field}: 0x{value:02X}")]
    InvalidValue {
        record: &'static str,
        field: &'static str,
        value: u8,
    },
}

/// A fixed-layout record mapped onto a hub register
pub trait Overlay: FromBytes + IntoBytes + KnownLayout + Immutable + Unaligned + Copy {
    /// Record name for diagnostics
    const NAME: &'static str;

    /// Version byte written by compatible firmware
    const VERSION: u8;

    /// Declared packed size in bytes
    const SIZE: usize;

    /// Register this record lives in
    const REGISTER: Register;

    /// Decode from exactly `SIZE` bytes
    fn decode(bytes: &[u8]) -> Result<Self, OverlayError> {
        Self::read_from_bytes(bytes).map_err(|_| OverlayError::SizeMismatch {
            record: Self::NAME,
            expected: Self::SIZE,
            actual: bytes.len(),
        })
    }

    /// Packed byte representation
    fn encode(&self) -> &[u8] {
        self.as_bytes()
    }

    /// Leading version byte
    fn version(&self) -> u8 {
        self.as_bytes()[0]
    }

    /// Pass the record through if its version matches, otherwise report it stale
    fn check_version(self) -> Result<Self, OverlayError> {
        match self.version() {
            v if v == Self::VERSION => Ok(self),
            actual => Err(OverlayError::StaleVersion {
                record: Self::NAME,
                expected: Self::VERSION,
                actual,
            }),
        }
    }
}

// =============================================================================
// Sensor records
// =============================================================================

/// Accelerometer sample, milli-g per axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct AccelData {
    version: u8,
    test_cmd: u8,
    x: I32,
    y: I32,
    z: I32,
    timestamp: U64,
}

impl AccelData {
    pub fn new(x: i32, y: i32, z: i32, timestamp: u64) -> Self {
        Self {
            version: Self::VERSION,
            test_cmd: 0,
            x: I32::new(x),
            y: I32::new(y),
            z: I32::new(z),
            timestamp: U64::new(timestamp),
        }
    }

    /// Firmware self-test command echo (0 = none)
    pub fn test_cmd(&self) -> u8 {
        self.test_cmd
    }

    pub fn axes(&self) -> [i32; 3] {
        [self.x.get(), self.y.get(), self.z.get()]
    }

    /// Hub timestamp in milliseconds
    pub fn timestamp(&self) -> u64 {
        self.timestamp.get()
    }
}

impl Overlay for AccelData {
    const NAME: &'static str = "accel";
    const VERSION: u8 = 0x02;
    const SIZE: usize = 22;
    const REGISTER: Register = Register::AccelRecord;
}

/// Compass sample, hundredths of a microtesla per axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct CompassData {
    version: u8,
    test_cmd: u8,
    x: I32,
    y: I32,
    z: I32,
    accuracy: u8,
    _reserved: [u8; 1],
    timestamp: U64,
}

impl CompassData {
    pub fn new(axes: [i32; 3], accuracy: u8, timestamp: u64) -> Self {
        Self {
            version: Self::VERSION,
            test_cmd: 0,
            x: I32::new(axes[0]),
            y: I32::new(axes[1]),
            z: I32::new(axes[2]),
            accuracy,
            _reserved: [0],
            timestamp: U64::new(timestamp),
        }
    }

    pub fn test_cmd(&self) -> u8 {
        self.test_cmd
    }

    pub fn axes(&self) -> [i32; 3] {
        [self.x.get(), self.y.get(), self.z.get()]
    }

    /// Calibration accuracy, 0 (unreliable) to 3 (high)
    pub fn accuracy(&self) -> u8 {
        self.accuracy
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.get()
    }
}

impl Overlay for CompassData {
    const NAME: &'static str = "compass";
    const VERSION: u8 = 0x01;
    const SIZE: usize = 24;
    const REGISTER: Register = Register::CompassRecord;
}

/// Barometer sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PressureData {
    version: u8,
    _reserved: [u8; 1],
    pressure: I32,
    altitude: I32,
    temperature: I16,
    timestamp: U64,
}

impl PressureData {
    pub fn new(pressure_pa: i32, altitude_cm: i32, temperature_centi_c: i16, timestamp: u64) -> Self {
        Self {
            version: Self::VERSION,
            _reserved: [0],
            pressure: I32::new(pressure_pa),
            altitude: I32::new(altitude_cm),
            temperature: I16::new(temperature_centi_c),
            timestamp: U64::new(timestamp),
        }
    }

    /// Pressure in pascal
    pub fn pressure_pa(&self) -> i32 {
        self.pressure.get()
    }

    /// Altitude in centimeters
    pub fn altitude_cm(&self) -> i32 {
        self.altitude.get()
    }

    /// Temperature in hundredths of a degree Celsius
    pub fn temperature_centi_c(&self) -> i16 {
        self.temperature.get()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.get()
    }
}

impl Overlay for PressureData {
    const NAME: &'static str = "pressure";
    const VERSION: u8 = 0x01;
    const SIZE: usize = 20;
    const REGISTER: Register = Register::PressureRecord;
}

/// One detected gesture slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct GestureSlot {
    pub gesture: u8,
    pub confidence: u8,
    pub value: i8,
}

/// Gesture recognizer output, up to three gestures ranked by confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct GestureData {
    version: u8,
    slots: [GestureSlot; 3],
    _reserved: [u8; 2],
    timestamp: U64,
}

impl GestureData {
    pub fn new(slots: [GestureSlot; 3], timestamp: u64) -> Self {
        Self {
            version: Self::VERSION,
            slots,
            _reserved: [0; 2],
            timestamp: U64::new(timestamp),
        }
    }

    pub fn slots(&self) -> &[GestureSlot; 3] {
        &self.slots
    }

    /// Highest-ranked gesture, if any was detected
    pub fn primary(&self) -> Option<GestureSlot> {
        let slot = self.slots[0];
        (slot.gesture != gesture::NONE).then_some(slot)
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.get()
    }
}

impl Overlay for GestureData {
    const NAME: &'static str = "gesture";
    const VERSION: u8 = 0x01;
    const SIZE: usize = 20;
    const REGISTER: Register = Register::GestureRecord;
}

/// Gesture identifiers
pub mod gesture {
    pub const NONE: u8 = 0x00;
    pub const WRIST_ROTATE: u8 = 0x01;
    pub const TAP: u8 = 0x02;
    pub const SHAKE: u8 = 0x03;
    pub const LIFT: u8 = 0x04;
}

/// Hub power mode reported in [`PowerStateData`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerMode {
    Active = 0,
    Idle = 1,
    Sleep = 2,
    DeepSleep = 3,
}

impl PowerMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Active),
            1 => Some(Self::Idle),
            2 => Some(Self::Sleep),
            3 => Some(Self::DeepSleep),
            _ => None,
        }
    }
}

/// Hub power state snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct PowerStateData {
    version: u8,
    mode: u8,
    _reserved: [u8; 2],
    battery_mv: U16,
    wake_count: U32,
    timestamp: U64,
}

impl PowerStateData {
    pub fn new(mode: PowerMode, battery_mv: u16, wake_count: u32, timestamp: u64) -> Self {
        Self {
            version: Self::VERSION,
            mode: mode as u8,
            _reserved: [0; 2],
            battery_mv: U16::new(battery_mv),
            wake_count: U32::new(wake_count),
            timestamp: U64::new(timestamp),
        }
    }

    pub fn mode(&self) -> Result<PowerMode, OverlayError> {
        PowerMode::from_u8(self.mode).ok_or(OverlayError::InvalidValue {
            record: Self::NAME,
            field: "mode",
            value: self.mode,
        })
    }

    pub fn battery_mv(&self) -> u16 {
        self.battery_mv.get()
    }

    /// Times the hub has woken the host since boot
    pub fn wake_count(&self) -> u32 {
        self.wake_count.get()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.get()
    }
}

impl Overlay for PowerStateData {
    const NAME: &'static str = "power_state";
    const VERSION: u8 = 0x01;
    const SIZE: usize = 18;
    const REGISTER: Register = Register::PowerStateRecord;
}

// =============================================================================
// Download mailbox
// =============================================================================

/// Payload bytes carried by one download packet
pub const DOWNLOAD_PAYLOAD_SIZE: usize = 1024;

/// Download commands (host -> hub)
pub mod download_cmd {
    pub const IDLE: u8 = 0x00;
    pub const ERASE: u8 = 0x01;
    pub const WRITE: u8 = 0x02;
    /// Jump from the bootloader into the new image
    pub const BOOT: u8 = 0x03;
}

/// Download status (hub -> host)
pub mod download_status {
    pub const PENDING: u8 = 0x00;
    pub const OK: u8 = 0x01;
    pub const ERROR: u8 = 0x02;
}

/// Firmware download mailbox packet
///
/// The host writes a packet with status `PENDING`; the hub bootloader
/// executes it and rewrites the status in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct DownloadPacket {
    version: u8,
    command: u8,
    status: u8,
    _reserved: [u8; 1],
    address: U32,
    size: U16,
    checksum: U16,
    payload: [u8; DOWNLOAD_PAYLOAD_SIZE],
}

impl DownloadPacket {
    /// Build a command packet. `data` longer than a packet is rejected.
    pub fn new(command: u8, address: u32, data: &[u8]) -> Result<Self, OverlayError> {
        if data.len() > DOWNLOAD_PAYLOAD_SIZE {
            return Err(OverlayError::SizeMismatch {
                record: Self::NAME,
                expected: DOWNLOAD_PAYLOAD_SIZE,
                actual: data.len(),
            });
        }
        let mut payload = [0u8; DOWNLOAD_PAYLOAD_SIZE];
        payload[..data.len()].copy_from_slice(data);
        Ok(Self {
            version: Self::VERSION,
            command,
            status: download_status::PENDING,
            _reserved: [0],
            address: U32::new(address),
            size: U16::new(data.len() as u16),
            checksum: U16::new(download_checksum(data)),
            payload,
        })
    }

    pub fn command(&self) -> u8 {
        self.command
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    /// Hub side: record the result of executing the packet
    pub fn set_status(&mut self, status: u8) {
        self.status = status;
    }

    pub fn address(&self) -> u32 {
        self.address.get()
    }

    pub fn checksum(&self) -> u16 {
        self.checksum.get()
    }

    /// Valid payload bytes
    pub fn data(&self) -> &[u8] {
        let len = (self.size.get() as usize).min(DOWNLOAD_PAYLOAD_SIZE);
        &self.payload[..len]
    }

    /// True when the stored checksum matches the payload
    pub fn checksum_ok(&self) -> bool {
        download_checksum(self.data()) == self.checksum.get()
    }
}

impl Overlay for DownloadPacket {
    const NAME: &'static str = "download";
    const VERSION: u8 = 0x01;
    const SIZE: usize = 12 + DOWNLOAD_PAYLOAD_SIZE;
    const REGISTER: Register = Register::DownloadPacket;
}

/// Ones-complement of the 16-bit byte sum
pub fn download_checksum(data: &[u8]) -> u16 {
    let sum = data
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));
    !sum
}

const _: () = {
    assert!(std::mem::size_of::<AccelData>() == AccelData::SIZE);
    assert!(std::mem::size_of::<CompassData>() == CompassData::SIZE);
    assert!(std::mem::size_of::<PressureData>() == PressureData::SIZE);
    assert!(std::mem::size_of::<GestureData>() == GestureData::SIZE);
    assert!(std::mem::size_of::<PowerStateData>() == PowerStateData::SIZE);
    assert!(std::mem::size_of::<DownloadPacket>() == DownloadPacket::SIZE);
};

// =============================================================================
// Record dispatch
// =============================================================================

/// Any decoded hub record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorRecord {
    Accel(AccelData),
    Compass(CompassData),
    Pressure(PressureData),
    Gesture(GestureData),
    PowerState(PowerStateData),
    Download(Box<DownloadPacket>),
}

impl SensorRecord {
    /// Packed size of the overlay mapped at `register`, if it holds a record
    pub fn overlay_size(register: Register) -> Option<usize> {
        match register {
            Register::AccelRecord => Some(AccelData::SIZE),
            Register::CompassRecord => Some(CompassData::SIZE),
            Register::PressureRecord => Some(PressureData::SIZE),
            Register::GestureRecord => Some(GestureData::SIZE),
            Register::PowerStateRecord => Some(PowerStateData::SIZE),
            Register::DownloadPacket => Some(DownloadPacket::SIZE),
            _ => None,
        }
    }

    /// Decode the record at `register` and check its version.
    /// Returns `None` if the register does not hold a record.
    pub fn decode(register: Register, bytes: &[u8]) -> Option<Result<Self, OverlayError>> {
        fn typed<T: Overlay>(bytes: &[u8]) -> Result<T, OverlayError> {
            T::decode(bytes)?.check_version()
        }
        let record = match register {
            Register::AccelRecord => typed(bytes).map(Self::Accel),
            Register::CompassRecord => typed(bytes).map(Self::Compass),
            Register::PressureRecord => typed(bytes).map(Self::Pressure),
            Register::GestureRecord => typed(bytes).map(Self::Gesture),
            Register::PowerStateRecord => typed(bytes).map(Self::PowerState),
            Register::DownloadPacket => typed(bytes).map(|p| Self::Download(Box::new(p))),
            _ => return None,
        };
        Some(record)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Accel(_) => AccelData::NAME,
            Self::Compass(_) => CompassData::NAME,
            Self::Pressure(_) => PressureData::NAME,
            Self::Gesture(_) => GestureData::NAME,
            Self::PowerState(_) => PowerStateData::NAME,
            Self::Download(_) => DownloadPacket::NAME,
        }
    }

    /// Hub timestamp, for records that carry one
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Self::Accel(r) => Some(r.timestamp()),
            Self::Compass(r) => Some(r.timestamp()),
            Self::Pressure(r) => Some(r.timestamp()),
            Self::Gesture(r) => Some(r.timestamp()),
            Self::PowerState(r) => Some(r.timestamp()),
            Self::Download(_) => None,
        }
    }
}
