//! Hub interrupt space
//!
//! The hub multiplexes every event source onto one host interrupt and
//! reports which source fired in two status registers, one per class:
//!
//! ```text
//!  0                      NOWAKE_IRQ_MAX                 IRQ_NUM
//!  |------ no-wake --------|----------- wake -------------|
//! ```
//!
//! No-wake lines leave the host in its current power state; wake lines
//! require the host to leave low-power mode. Both ranges are contiguous and
//! the wake range starts exactly at `NOWAKE_IRQ_MAX`. Masks, status register
//! layouts and loop bounds are all derived from these two enums, so a new
//! source is added by appending a variant to the right enum and its `ALL`
//! table.

use std::fmt;

/// Interrupt sources that do not wake the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum NoWakeIrq {
    Accel = 0,
    Gyro = 1,
    Compass = 2,
    Fusion = 3,
    Pressure = 4,
    Temperature = 5,
    HeartRate = 6,
    Ppg = 7,
    Passive = 8,
}

impl NoWakeIrq {
    /// Declaration order, which is also index order
    pub const ALL: [NoWakeIrq; 9] = [
        NoWakeIrq::Accel,
        NoWakeIrq::Gyro,
        NoWakeIrq::Compass,
        NoWakeIrq::Fusion,
        NoWakeIrq::Pressure,
        NoWakeIrq::Temperature,
        NoWakeIrq::HeartRate,
        NoWakeIrq::Ppg,
        NoWakeIrq::Passive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NoWakeIrq::Accel => "NOWAKE_ACCEL",
            NoWakeIrq::Gyro => "NOWAKE_GYRO",
            NoWakeIrq::Compass => "NOWAKE_COMPASS",
            NoWakeIrq::Fusion => "NOWAKE_FUSION",
            NoWakeIrq::Pressure => "NOWAKE_PRESSURE",
            NoWakeIrq::Temperature => "NOWAKE_TEMPERATURE",
            NoWakeIrq::HeartRate => "NOWAKE_HEARTRATE",
            NoWakeIrq::Ppg => "NOWAKE_PPG",
            NoWakeIrq::Passive => "NOWAKE_PASSIVE",
        }
    }
}

/// Interrupt sources that wake the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum WakeIrq {
    Tilt = 0,
    Pedometer = 1,
    Gesture = 2,
    Still = 3,
    Motion = 4,
    SignificantMotion = 5,
    ActivityChange = 6,
    Als = 7,
    /// Hub firmware finished booting
    M4Ready = 8,
    Battery = 9,
    Log = 10,
}

impl WakeIrq {
    /// Declaration order; global index is `NOWAKE_IRQ_MAX + local`
    pub const ALL: [WakeIrq; 11] = [
        WakeIrq::Tilt,
        WakeIrq::Pedometer,
        WakeIrq::Gesture,
        WakeIrq::Still,
        WakeIrq::Motion,
        WakeIrq::SignificantMotion,
        WakeIrq::ActivityChange,
        WakeIrq::Als,
        WakeIrq::M4Ready,
        WakeIrq::Battery,
        WakeIrq::Log,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WakeIrq::Tilt => "WAKE_TILT",
            WakeIrq::Pedometer => "WAKE_PEDOMETER",
            WakeIrq::Gesture => "WAKE_GESTURE",
            WakeIrq::Still => "WAKE_STILL",
            WakeIrq::Motion => "WAKE_MOTION",
            WakeIrq::SignificantMotion => "WAKE_SIGNIFICANT_MOTION",
            WakeIrq::ActivityChange => "WAKE_ACTIVITY_CHANGE",
            WakeIrq::Als => "WAKE_ALS",
            WakeIrq::M4Ready => "WAKE_M4_READY",
            WakeIrq::Battery => "WAKE_BATTERY",
            WakeIrq::Log => "WAKE_LOG",
        }
    }
}

/// End of the no-wake range and start of the wake range
pub const NOWAKE_IRQ_MAX: u8 = NoWakeIrq::ALL.len() as u8;

/// Number of wake lines
pub const WAKE_IRQ_COUNT: u8 = WakeIrq::ALL.len() as u8;

/// End of the wake range
pub const WAKE_IRQ_MAX: u8 = NOWAKE_IRQ_MAX + WAKE_IRQ_COUNT;

/// Total number of interrupt lines
pub const IRQ_NUM: usize = WAKE_IRQ_MAX as usize;

/// Bytes in the no-wake status/enable registers
pub const NOWAKE_STATUS_BYTES: usize = (NOWAKE_IRQ_MAX as usize).div_ceil(8);

/// Bytes in the wake status/enable registers
pub const WAKE_STATUS_BYTES: usize = (WAKE_IRQ_COUNT as usize).div_ceil(8);

// Discriminants must match table position, and every line must fit the mask.
const _: () = {
    let mut i = 0;
    while i < NoWakeIrq::ALL.len() {
        assert!(NoWakeIrq::ALL[i] as usize == i);
        i += 1;
    }
    let mut i = 0;
    while i < WakeIrq::ALL.len() {
        assert!(WakeIrq::ALL[i] as usize == i);
        i += 1;
    }
    assert!(IRQ_NUM <= 32);
    assert!(NOWAKE_STATUS_BYTES <= 4 && WAKE_STATUS_BYTES <= 4);
};

/// Interrupt class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrqClass {
    NoWake,
    Wake,
}

impl IrqClass {
    /// First global index of the class
    pub const fn base(self) -> u8 {
        match self {
            IrqClass::NoWake => 0,
            IrqClass::Wake => NOWAKE_IRQ_MAX,
        }
    }

    /// Number of lines in the class
    pub const fn count(self) -> u8 {
        match self {
            IrqClass::NoWake => NOWAKE_IRQ_MAX,
            IrqClass::Wake => WAKE_IRQ_COUNT,
        }
    }

    /// Width of the class status/enable registers
    pub const fn status_bytes(self) -> usize {
        match self {
            IrqClass::NoWake => NOWAKE_STATUS_BYTES,
            IrqClass::Wake => WAKE_STATUS_BYTES,
        }
    }
}

/// A single interrupt line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrqLine {
    NoWake(NoWakeIrq),
    Wake(WakeIrq),
}

impl IrqLine {
    /// Global line number
    pub const fn index(self) -> u8 {
        match self {
            IrqLine::NoWake(irq) => irq as u8,
            IrqLine::Wake(irq) => NOWAKE_IRQ_MAX + irq as u8,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        if index < NOWAKE_IRQ_MAX {
            Some(IrqLine::NoWake(NoWakeIrq::ALL[index as usize]))
        } else if index < WAKE_IRQ_MAX {
            Some(IrqLine::Wake(WakeIrq::ALL[(index - NOWAKE_IRQ_MAX) as usize]))
        } else {
            None
        }
    }

    pub const fn class(self) -> IrqClass {
        match self {
            IrqLine::NoWake(_) => IrqClass::NoWake,
            IrqLine::Wake(_) => IrqClass::Wake,
        }
    }

    #[inline]
    pub const fn is_wake(self) -> bool {
        matches!(self, IrqLine::Wake(_))
    }

    /// Bit position within the class register
    pub const fn local_bit(self) -> u8 {
        self.index() - self.class().base()
    }

    pub fn name(self) -> &'static str {
        match self {
            IrqLine::NoWake(irq) => irq.name(),
            IrqLine::Wake(irq) => irq.name(),
        }
    }

    /// All lines in index order
    pub fn all() -> impl Iterator<Item = IrqLine> {
        (0..WAKE_IRQ_MAX).filter_map(IrqLine::from_index)
    }
}

impl From<NoWakeIrq> for IrqLine {
    fn from(irq: NoWakeIrq) -> Self {
        IrqLine::NoWake(irq)
    }
}

impl From<WakeIrq> for IrqLine {
    fn from(irq: WakeIrq) -> Self {
        IrqLine::Wake(irq)
    }
}

impl fmt::Display for IrqLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.index())
    }
}

/// Set of interrupt lines, bit `n` = global line `n`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IrqMask(u32);

impl IrqMask {
    pub const EMPTY: Self = Self(0);

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Mask with only valid line bits kept
    pub const fn from_bits(bits: u32) -> Self {
        let valid = if IRQ_NUM == 32 {
            u32::MAX
        } else {
            (1u32 << IRQ_NUM) - 1
        };
        Self(bits & valid)
    }

    pub fn insert(&mut self, line: IrqLine) {
        self.0 |= 1 << line.index();
    }

    pub fn remove(&mut self, line: IrqLine) {
        self.0 &= !(1 << line.index());
    }

    pub fn contains(self, line: IrqLine) -> bool {
        self.0 & (1 << line.index()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn intersect(self, other: IrqMask) -> IrqMask {
        Self(self.0 & other.0)
    }

    pub fn union(self, other: IrqMask) -> IrqMask {
        Self(self.0 | other.0)
    }

    /// Lines of one class only
    pub fn class_mask(class: IrqClass) -> IrqMask {
        let ones = (1u32 << class.count()) - 1;
        Self(ones << class.base())
    }

    /// Lines in ascending index order
    pub fn iter(self) -> impl Iterator<Item = IrqLine> {
        IrqLine::all().filter(move |line| self.contains(*line))
    }

    /// Encode the lines of `class` in the layout of its status/enable register
    /// (little-endian, bit `i` = local line `i`)
    pub fn to_register_bytes(self, class: IrqClass) -> Vec<u8> {
        let local = (self.intersect(Self::class_mask(class)).0 >> class.base()).to_le_bytes();
        local[..class.status_bytes()].to_vec()
    }

    /// Decode a status/enable register of `class`. Bits beyond the class
    /// count are ignored.
    pub fn from_register_bytes(class: IrqClass, bytes: &[u8]) -> IrqMask {
        let mut raw = [0u8; 4];
        let n = bytes.len().min(class.status_bytes());
        raw[..n].copy_from_slice(&bytes[..n]);
        let local = u32::from_le_bytes(raw) & ((1u32 << class.count()) - 1);
        Self(local << class.base())
    }
}

impl FromIterator<IrqLine> for IrqMask {
    fn from_iter<T: IntoIterator<Item = IrqLine>>(iter: T) -> Self {
        let mut mask = IrqMask::EMPTY;
        for line in iter {
            mask.insert(line);
        }
        mask
    }
}
