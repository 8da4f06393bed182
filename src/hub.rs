//! Sensor hub context
//!
//! `SensorHub` is the one object every participating driver shares. It owns
//! the register bus, the interrupt dispatcher, both notifier chains and the
//! peripheral lifecycle, so drivers receive it explicitly (usually as an
//! `Arc<SensorHub>`) instead of reaching for globals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use m4sh_transport::registers::hub_state;
use m4sh_transport::{
    Bank, BoxedTransport, IrqLine, IrqMask, Overlay, Register, RegisterBus, SensorRecord, WakeIrq,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::dispatch::{IrqDispatcher, IrqHandler};
use crate::error::HubError;
use crate::lifecycle::{Lifecycle, PeripheralEvent, PeripheralState, Transition};
use crate::notify::{Listener, NotifierChain, SubscriberId};
use crate::platform::HubPlatform;

/// Hub firmware status as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HubStatus {
    /// Reset, in the bootloader, or loading firmware
    Booting,
    /// Firmware running; records and interrupts are live
    Ready,
    /// Firmware crashed; the host is resetting it
    Recovering,
}

/// Shared hub state
pub struct SensorHub {
    bus: RegisterBus,
    irqs: IrqDispatcher,
    peripherals: NotifierChain<PeripheralEvent>,
    status_chain: NotifierChain<HubStatus>,
    lifecycle: Lifecycle,
    status: Mutex<HubStatus>,
    ready_seen: Arc<AtomicBool>,
    platform: Option<Arc<dyn HubPlatform>>,
    config: HubConfig,
}

impl SensorHub {
    /// Create a hub context on top of a transport. The hub starts `Booting`;
    /// call [`probe`](Self::probe) once the bus is up.
    pub fn new(transport: BoxedTransport, config: HubConfig) -> Self {
        let ready_seen = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ready_seen);
        let on_ready: IrqHandler = Arc::new(move |_line: IrqLine| flag.store(true, Ordering::SeqCst));
        let irqs = IrqDispatcher::new(config.wake_hold()).with_handler(
            WakeIrq::M4Ready.into(),
            on_ready,
            true,
        );

        Self {
            bus: RegisterBus::new(transport),
            irqs,
            peripherals: NotifierChain::new("peripherals"),
            status_chain: NotifierChain::new("hub-status"),
            lifecycle: Lifecycle::new(config.transition_policy),
            status: Mutex::new(HubStatus::Booting),
            ready_seen,
            platform: None,
            config,
        }
    }

    /// Attach board hooks
    pub fn with_platform(mut self, platform: Arc<dyn HubPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn bus(&self) -> &RegisterBus {
        &self.bus
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn platform(&self) -> Option<&dyn HubPlatform> {
        self.platform.as_deref()
    }

    // === Bring-up ===

    /// Read the firmware state register and sync the host status to it.
    /// Enables the ready interrupt so a later boot is noticed. A running hub
    /// also gets its peripherals enabled.
    pub fn probe(&self) -> Result<HubStatus, HubError> {
        self.irqs.enable(&self.bus, WakeIrq::M4Ready.into())?;
        let state = self.bus.read_register(Register::HubState)?[0];
        let status = match state {
            hub_state::RUNNING => HubStatus::Ready,
            hub_state::BOOTLOADER => HubStatus::Booting,
            hub_state::PANIC => {
                warn!("Hub firmware reports panic");
                return self.recover().map(|_| self.status());
            }
            other => {
                warn!("Unknown hub state 0x{other:02X}, treating as booting");
                HubStatus::Booting
            }
        };
        self.mark(status);
        Ok(status)
    }

    /// Move to `status`; becoming ready brings peripherals up
    fn mark(&self, status: HubStatus) {
        if status == HubStatus::Ready {
            self.settle_peripherals(PeripheralEvent::EnablePeripheral);
        }
        self.set_status(status);
    }

    /// Firmware version register
    pub fn firmware_version(&self) -> Result<u16, HubError> {
        let raw = self.bus.read_register(Register::FirmwareVersion)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    /// Reset a crashed hub and bring peripherals and interrupts back.
    ///
    /// Peripherals are disabled around the reset and re-enabled afterwards,
    /// also when the reset itself fails. Peripherals that are already down
    /// are fine under either transition policy.
    pub fn recover(&self) -> Result<(), HubError> {
        info!("Recovering sensor hub");
        self.settle_peripherals(PeripheralEvent::DisablePeripheral);
        self.set_status(HubStatus::Recovering);

        let reset = match &self.platform {
            Some(platform) => platform
                .set_boot_mode(false)
                .and_then(|_| platform.hw_reset()),
            None => {
                debug!("No platform reset hook, relying on hub watchdog");
                Ok(())
            }
        };

        self.settle_peripherals(PeripheralEvent::EnablePeripheral);
        reset?;
        self.irqs.restore_enables(&self.bus)?;
        self.set_status(HubStatus::Booting);
        Ok(())
    }

    pub fn status(&self) -> HubStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: HubStatus) {
        let changed = {
            let mut current = self.status.lock();
            let changed = *current != status;
            *current = status;
            changed
        };
        if changed {
            info!("Hub status: {status:?}");
            self.status_chain.notify(status);
        }
    }

    /// Subscribe to hub status changes
    pub fn register_status_notify(&self, listener: &Arc<dyn Listener<HubStatus>>) -> SubscriberId {
        self.status_chain.register(listener)
    }

    pub fn unregister_status_notify(&self, id: SubscriberId) -> bool {
        self.status_chain.unregister(id)
    }

    // === Peripheral lifecycle ===

    /// Subscribe to peripheral enable/disable events
    pub fn register_notify(&self, listener: &Arc<dyn Listener<PeripheralEvent>>) -> SubscriberId {
        self.peripherals.register(listener)
    }

    /// Unsubscribe; `false` if the subscriber was already gone
    pub fn unregister_notify(&self, id: SubscriberId) -> bool {
        self.peripherals.unregister(id)
    }

    /// Apply a lifecycle event and, if it changed the state, run every
    /// subscriber in registration order. Returns how many subscribers ran.
    pub fn notify_subscribers(&self, event: PeripheralEvent) -> Result<usize, HubError> {
        match self.lifecycle.apply(event)? {
            Transition::Changed(_) => Ok(self.peripherals.notify(event)),
            Transition::Redundant => Ok(0),
        }
    }

    /// Drive peripherals to the state `event` leads to on the hub's own
    /// behalf. The transition policy only governs callers, so a repeat is
    /// skipped here rather than rejected.
    pub(crate) fn settle_peripherals(&self, event: PeripheralEvent) -> usize {
        match self.lifecycle.settle(event) {
            Transition::Changed(_) => self.peripherals.notify(event),
            Transition::Redundant => 0,
        }
    }

    pub fn disable_peripherals(&self) -> Result<usize, HubError> {
        self.notify_subscribers(PeripheralEvent::DisablePeripheral)
    }

    pub fn enable_peripherals(&self) -> Result<usize, HubError> {
        self.notify_subscribers(PeripheralEvent::EnablePeripheral)
    }

    pub fn peripheral_state(&self) -> PeripheralState {
        self.lifecycle.state()
    }

    // === Records ===

    fn ensure_ready(&self) -> Result<(), HubError> {
        match self.status() {
            HubStatus::Ready => Ok(()),
            _ => Err(HubError::NotReady),
        }
    }

    /// Read and decode the record at (bank, offset), declared `size` bytes.
    /// Stale data comes back as an error for which `is_stale()` holds.
    pub fn read_sensor_record(
        &self,
        bank: Bank,
        offset: u16,
        size: usize,
    ) -> Result<SensorRecord, HubError> {
        self.ensure_ready()?;
        Ok(self.bus.read_sensor_record(bank, offset, size)?)
    }

    /// Read a record of a known type from its register
    pub fn read<T: Overlay>(&self) -> Result<T, HubError> {
        self.ensure_ready()?;
        Ok(self.bus.read::<T>()?)
    }

    // === Interrupts ===

    pub fn irq_register(
        &self,
        line: IrqLine,
        handler: IrqHandler,
        hold_wake: bool,
    ) -> Result<(), HubError> {
        self.irqs.register(line, handler, hold_wake)
    }

    pub fn irq_unregister(&self, line: IrqLine) -> Result<(), HubError> {
        self.irqs.unregister(&self.bus, line)
    }

    pub fn irq_enable(&self, line: IrqLine) -> Result<(), HubError> {
        self.irqs.enable(&self.bus, line)
    }

    pub fn irq_disable(&self, line: IrqLine) -> Result<(), HubError> {
        self.irqs.disable(&self.bus, line)
    }

    pub fn irq_is_enabled(&self, line: IrqLine) -> bool {
        self.irqs.is_enabled(line)
    }

    /// Times the handler of `line` has run
    pub fn irq_count(&self, line: IrqLine) -> u64 {
        self.irqs.count(line)
    }

    /// Service the hub interrupt: acknowledge and dispatch everything pending.
    /// Runs in process context (it blocks on the bus).
    pub fn service_irqs(&self) -> Result<IrqMask, HubError> {
        let pending = self.irqs.service(&self.bus, self.platform.as_deref())?;
        if self.ready_seen.swap(false, Ordering::SeqCst) {
            self.mark(HubStatus::Ready);
        }
        Ok(pending)
    }
}
