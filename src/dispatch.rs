//! Hub interrupt demultiplexing
//!
//! The hub raises one host interrupt for every source. Servicing it means
//! reading both class status registers, acknowledging the bits that were
//! seen, and running the handler of each pending line the host enabled.
//!
//! The dispatcher also owns the host's view of which lines are enabled and
//! mirrors it into the hub's enable registers.

use std::sync::Arc;
use std::time::Duration;

use m4sh_transport::{IrqClass, IrqLine, IrqMask, Register, RegisterBus, IRQ_NUM};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::HubError;
use crate::platform::HubPlatform;

/// Interrupt handler, run from the deferred worker with no hub lock held
pub type IrqHandler = Arc<dyn Fn(IrqLine) + Send + Sync>;

struct Slot {
    handler: IrqHandler,
    /// Ask the platform to keep the host awake while handling
    hold_wake: bool,
    enabled: bool,
    count: u64,
}

/// Per-line handler table and enable state
pub struct IrqDispatcher {
    slots: Mutex<Vec<Option<Slot>>>,
    wake_hold: Duration,
}

fn status_register(class: IrqClass) -> Register {
    match class {
        IrqClass::NoWake => Register::NoWakeIrqStatus,
        IrqClass::Wake => Register::WakeIrqStatus,
    }
}

fn enable_register(class: IrqClass) -> Register {
    match class {
        IrqClass::NoWake => Register::NoWakeIrqEnable,
        IrqClass::Wake => Register::WakeIrqEnable,
    }
}

impl IrqDispatcher {
    /// `wake_hold` is how long the host is held awake for wake lines
    /// registered with `hold_wake`
    pub fn new(wake_hold: Duration) -> Self {
        Self {
            slots: Mutex::new((0..IRQ_NUM).map(|_| None).collect()),
            wake_hold,
        }
    }

    /// Install a handler the owner keeps for itself. The dispatcher is not
    /// shared yet, so the line is always free; a later
    /// [`register`](Self::register) of it fails.
    pub fn with_handler(mut self, line: IrqLine, handler: IrqHandler, hold_wake: bool) -> Self {
        self.slots.get_mut()[line.index() as usize] = Some(Slot {
            handler,
            hold_wake,
            enabled: false,
            count: 0,
        });
        self
    }

    /// Attach a handler to a line. The line starts disabled.
    pub fn register(
        &self,
        line: IrqLine,
        handler: IrqHandler,
        hold_wake: bool,
    ) -> Result<(), HubError> {
        let mut slots = self.slots.lock();
        let slot = &mut slots[line.index() as usize];
        if slot.is_some() {
            return Err(HubError::IrqAlreadyRegistered(line));
        }
        *slot = Some(Slot {
            handler,
            hold_wake,
            enabled: false,
            count: 0,
        });
        debug!("IRQ {line} registered");
        Ok(())
    }

    /// Detach the handler, disabling the line on the hub first if needed
    pub fn unregister(&self, bus: &RegisterBus, line: IrqLine) -> Result<(), HubError> {
        let mut slots = self.slots.lock();
        let idx = line.index() as usize;
        let was_enabled = match &slots[idx] {
            Some(slot) => slot.enabled,
            None => return Err(HubError::IrqNotRegistered(line)),
        };
        if was_enabled {
            let mut mask = Self::mask_where(&slots, |s| s.enabled);
            mask.remove(line);
            Self::write_enables(bus, line.class(), mask)?;
        }
        slots[idx] = None;
        debug!("IRQ {line} unregistered");
        Ok(())
    }

    pub fn enable(&self, bus: &RegisterBus, line: IrqLine) -> Result<(), HubError> {
        self.set_enabled(bus, line, true)
    }

    pub fn disable(&self, bus: &RegisterBus, line: IrqLine) -> Result<(), HubError> {
        self.set_enabled(bus, line, false)
    }

    fn set_enabled(&self, bus: &RegisterBus, line: IrqLine, enabled: bool) -> Result<(), HubError> {
        let mut slots = self.slots.lock();
        let idx = line.index() as usize;
        match &slots[idx] {
            None => return Err(HubError::IrqNotRegistered(line)),
            Some(slot) if slot.enabled == enabled => return Ok(()),
            Some(_) => {}
        }

        let mut mask = Self::mask_where(&slots, |s| s.enabled);
        if enabled {
            mask.insert(line);
        } else {
            mask.remove(line);
        }
        // Hub register first; host view only changes once the hub agrees
        Self::write_enables(bus, line.class(), mask)?;
        if let Some(slot) = slots[idx].as_mut() {
            slot.enabled = enabled;
        }
        debug!("IRQ {line} {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn is_enabled(&self, line: IrqLine) -> bool {
        self.slots.lock()[line.index() as usize]
            .as_ref()
            .is_some_and(|s| s.enabled)
    }

    pub fn is_registered(&self, line: IrqLine) -> bool {
        self.slots.lock()[line.index() as usize].is_some()
    }

    /// Lines the host has enabled
    pub fn enabled_mask(&self) -> IrqMask {
        Self::mask_where(&self.slots.lock(), |s| s.enabled)
    }

    /// Times the handler of `line` has run
    pub fn count(&self, line: IrqLine) -> u64 {
        self.slots.lock()[line.index() as usize]
            .as_ref()
            .map_or(0, |s| s.count)
    }

    /// Rewrite both enable registers from the host view, e.g. after the hub
    /// was reset and lost them
    pub fn restore_enables(&self, bus: &RegisterBus) -> Result<(), HubError> {
        let slots = self.slots.lock();
        let mask = Self::mask_where(&slots, |s| s.enabled);
        Self::write_enables(bus, IrqClass::NoWake, mask)?;
        Self::write_enables(bus, IrqClass::Wake, mask)?;
        debug!("Restored IRQ enables: {:#010x}", mask.bits());
        Ok(())
    }

    /// Read, acknowledge and dispatch pending interrupts.
    ///
    /// Both status registers are read before anything is acknowledged, so a
    /// failed read leaves every event latched on the hub. Every pending bit
    /// is acknowledged, handled or not, and every acknowledged line is
    /// dispatched even if a later acknowledge fails. Returns the pending set
    /// as read from the hub.
    pub fn service(
        &self,
        bus: &RegisterBus,
        platform: Option<&dyn HubPlatform>,
    ) -> Result<IrqMask, HubError> {
        let mut seen = Vec::with_capacity(2);
        for class in [IrqClass::NoWake, IrqClass::Wake] {
            let status = bus.read_register(status_register(class))?;
            let class_pending = IrqMask::from_register_bytes(class, &status);
            if !class_pending.is_empty() {
                seen.push((class, class_pending));
            }
        }
        if seen.is_empty() {
            trace!("Spurious hub interrupt");
            return Ok(IrqMask::EMPTY);
        }

        let mut pending = IrqMask::EMPTY;
        let mut ack_error = None;
        for (class, class_pending) in seen {
            // Write-one-to-clear exactly what was seen; later events stay latched
            let ack = class_pending.to_register_bytes(class);
            match bus.write_register(status_register(class), &ack) {
                Ok(()) => pending = pending.union(class_pending),
                Err(e) => {
                    warn!("IRQ ack of {class:?} status failed: {e}");
                    ack_error = Some(e);
                    break;
                }
            }
        }

        self.dispatch(pending, platform);
        match ack_error {
            Some(e) => Err(e.into()),
            None => Ok(pending),
        }
    }

    fn dispatch(&self, pending: IrqMask, platform: Option<&dyn HubPlatform>) {
        let mut ready: Vec<(IrqLine, IrqHandler, bool)> = Vec::with_capacity(pending.len());
        {
            let mut slots = self.slots.lock();
            for line in pending.iter() {
                match slots[line.index() as usize].as_mut() {
                    Some(slot) if slot.enabled => {
                        slot.count += 1;
                        ready.push((line, Arc::clone(&slot.handler), slot.hold_wake));
                    }
                    Some(_) => debug!("IRQ {line} pending while disabled"),
                    None => warn!("IRQ {line} pending with no handler"),
                }
            }
        }

        for (line, handler, hold_wake) in ready {
            if line.is_wake() && hold_wake {
                if let Some(platform) = platform {
                    platform.hold_wake(line, self.wake_hold);
                }
            }
            trace!("Dispatching IRQ {line}");
            handler(line);
        }
    }

    fn mask_where(slots: &[Option<Slot>], pred: impl Fn(&Slot) -> bool) -> IrqMask {
        slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.as_ref().is_some_and(&pred))
            .filter_map(|(i, _)| IrqLine::from_index(i as u8))
            .collect()
    }

    fn write_enables(bus: &RegisterBus, class: IrqClass, mask: IrqMask) -> Result<(), HubError> {
        bus.write_register(enable_register(class), &mask.to_register_bytes(class))?;
        Ok(())
    }
}
