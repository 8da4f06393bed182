//! End-to-end hub behavior over the in-memory register file

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use m4sensorhub::{
    HubConfig, HubError, HubStatus, IrqWorker, Listener, PeripheralEvent, PeripheralState,
    SensorHub, TransitionPolicy,
};
use m4sh_transport::overlay::gesture;
use m4sh_transport::registers::hub_state;
use m4sh_transport::{
    AccelData, Bank, CompassData, GestureData, GestureSlot, IrqLine, MemoryTransport, NoWakeIrq,
    Overlay, OverlayError, PowerMode, PowerStateData, PressureData, Register, SensorRecord,
    TransportError, WakeIrq,
};
use parking_lot::Mutex;

fn running_hub(config: HubConfig) -> (Arc<MemoryTransport>, Arc<SensorHub>) {
    let mem = Arc::new(MemoryTransport::new());
    let state = Register::HubState.info();
    mem.load(state.bank, state.offset, &[hub_state::RUNNING]);
    let hub = Arc::new(SensorHub::new(mem.clone(), config));
    hub.probe().unwrap();
    (mem, hub)
}

fn recorder() -> (
    Arc<dyn Listener<PeripheralEvent>>,
    Arc<Mutex<Vec<PeripheralEvent>>>,
) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let listener: Arc<dyn Listener<PeripheralEvent>> = {
        let log = Arc::clone(&log);
        Arc::new(move |e: PeripheralEvent| log.lock().push(e))
    };
    (listener, log)
}

#[test]
fn test_enable_from_disabled_invokes_subscriber_once() {
    let (_mem, hub) = running_hub(HubConfig::default());
    hub.disable_peripherals().unwrap();

    let (a, log) = recorder();
    hub.register_notify(&a);
    assert_eq!(hub.notify_subscribers(PeripheralEvent::EnablePeripheral).unwrap(), 1);

    assert_eq!(*log.lock(), vec![PeripheralEvent::EnablePeripheral]);
    assert_eq!(hub.peripheral_state(), PeripheralState::Enabled);
}

#[test]
fn test_fresh_hub_enable_invokes_subscriber_once() {
    let hub = SensorHub::new(Arc::new(MemoryTransport::new()), HubConfig::default());
    assert_eq!(hub.peripheral_state(), PeripheralState::Disabled);

    let (a, log) = recorder();
    hub.register_notify(&a);
    assert_eq!(hub.notify_subscribers(PeripheralEvent::EnablePeripheral).unwrap(), 1);
    assert_eq!(*log.lock(), vec![PeripheralEvent::EnablePeripheral]);
}

#[test]
fn test_booting_hub_comes_up_on_ready_irq() {
    let mem = Arc::new(MemoryTransport::new());
    let hub = SensorHub::new(mem.clone(), HubConfig::default());
    let (a, log) = recorder();
    hub.register_notify(&a);
    // Zeroed state register reads as bootloader
    assert_eq!(hub.probe().unwrap(), HubStatus::Booting);
    assert!(log.lock().is_empty());
    assert!(matches!(hub.read::<AccelData>(), Err(HubError::NotReady)));

    mem.raise_irq(WakeIrq::M4Ready.into());
    hub.service_irqs().unwrap();
    assert_eq!(hub.status(), HubStatus::Ready);
    assert_eq!(*log.lock(), vec![PeripheralEvent::EnablePeripheral]);
}

#[test]
fn test_unregister_unknown_subscriber() {
    let (_mem, hub) = running_hub(HubConfig::default());
    let (a, log_a) = recorder();
    let (b, log_b) = recorder();
    let id_a = hub.register_notify(&a);
    hub.register_notify(&b);

    assert!(hub.unregister_notify(id_a));
    assert!(!hub.unregister_notify(id_a));

    hub.disable_peripherals().unwrap();
    assert!(log_a.lock().is_empty());
    assert_eq!(*log_b.lock(), vec![PeripheralEvent::DisablePeripheral]);
}

#[test]
fn test_subscribers_run_in_registration_order() {
    let (_mem, hub) = running_hub(HubConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));
    let listeners: Vec<Arc<dyn Listener<PeripheralEvent>>> = (0..4)
        .map(|i| {
            let order = Arc::clone(&order);
            Arc::new(move |_e: PeripheralEvent| order.lock().push(i)) as Arc<dyn Listener<PeripheralEvent>>
        })
        .collect();
    for l in &listeners {
        hub.register_notify(l);
    }
    hub.disable_peripherals().unwrap();
    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
}

#[test]
fn test_strict_and_tolerant_double_disable() {
    let strict = HubConfig {
        transition_policy: TransitionPolicy::Strict,
        ..Default::default()
    };
    let (_mem, hub) = running_hub(strict);
    let (a, log) = recorder();
    hub.register_notify(&a);
    hub.disable_peripherals().unwrap();
    assert!(matches!(
        hub.disable_peripherals(),
        Err(HubError::InvalidTransition { .. })
    ));
    assert_eq!(log.lock().len(), 1);

    let (_mem, hub) = running_hub(HubConfig::default());
    let (a, log) = recorder();
    hub.register_notify(&a);
    hub.disable_peripherals().unwrap();
    assert_eq!(hub.disable_peripherals().unwrap(), 0);
    assert_eq!(log.lock().len(), 1);
}

#[test]
fn test_size_mismatch_fails() {
    let (mem, hub) = running_hub(HubConfig::default());
    mem.load_record(&AccelData::new(1, 2, 3, 4));
    let info = Register::AccelRecord.info();

    let err = hub
        .read_sensor_record(info.bank, info.offset, AccelData::SIZE + 2)
        .unwrap_err();
    assert!(matches!(
        err,
        HubError::Transport(TransportError::Overlay(OverlayError::SizeMismatch {
            expected: 22,
            actual: 24,
            ..
        }))
    ));

    let err = hub
        .bus()
        .read_record::<AccelData>(info.bank, info.offset, AccelData::SIZE - 1)
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Overlay(OverlayError::SizeMismatch { .. })
    ));
}

#[test]
fn test_records_read_back_through_hub() {
    let (mem, hub) = running_hub(HubConfig::default());
    let accel = AccelData::new(-12, 34, -981, 1_000);
    let compass = CompassData::new([100, -200, 300], 3, 2_000);
    let pressure = PressureData::new(101_325, 1_234, -450, 3_000);
    let tap = GestureSlot {
        gesture: gesture::TAP,
        confidence: 80,
        value: -1,
    };
    let gestures = GestureData::new([tap, tap, tap], 4_000);
    let power = PowerStateData::new(PowerMode::Idle, 3_850, 17, 5_000);

    mem.load_record(&accel);
    mem.load_record(&compass);
    mem.load_record(&pressure);
    mem.load_record(&gestures);
    mem.load_record(&power);

    assert_eq!(hub.read::<AccelData>().unwrap(), accel);
    assert_eq!(hub.read::<CompassData>().unwrap(), compass);
    assert_eq!(hub.read::<PressureData>().unwrap(), pressure);
    assert_eq!(hub.read::<GestureData>().unwrap().primary(), Some(tap));
    assert_eq!(hub.read::<PowerStateData>().unwrap().mode().unwrap(), PowerMode::Idle);

    let info = Register::CompassRecord.info();
    let record = hub
        .read_sensor_record(info.bank, info.offset, info.size)
        .unwrap();
    assert_eq!(record, SensorRecord::Compass(compass));
    assert_eq!(record.timestamp(), Some(2_000));
}

#[test]
fn test_unknown_register_rejected() {
    let (_mem, hub) = running_hub(HubConfig::default());
    let err = hub.read_sensor_record(Bank::Accel, 0x40, 2).unwrap_err();
    assert!(matches!(
        err,
        HubError::Transport(TransportError::UnknownRegister { .. })
    ));
}

#[test]
fn test_service_dispatches_only_enabled_lines() {
    let (mem, hub) = running_hub(HubConfig::default());
    let hits = Arc::new(Mutex::new(Vec::new()));
    let handler = {
        let hits = Arc::clone(&hits);
        Arc::new(move |line: IrqLine| hits.lock().push(line))
    };

    let accel = IrqLine::from(NoWakeIrq::Accel);
    let tilt = IrqLine::from(WakeIrq::Tilt);
    let als = IrqLine::from(WakeIrq::Als);
    hub.irq_register(accel, handler.clone(), false).unwrap();
    hub.irq_register(tilt, handler.clone(), false).unwrap();
    hub.irq_register(als, handler, false).unwrap();
    hub.irq_enable(accel).unwrap();
    hub.irq_enable(tilt).unwrap();

    for line in [accel, tilt, als] {
        mem.raise_irq(line);
    }
    let pending = hub.service_irqs().unwrap();
    assert_eq!(pending.len(), 3);
    assert_eq!(*hits.lock(), vec![accel, tilt]);

    // Acknowledged lines do not fire again
    assert!(hub.service_irqs().unwrap().is_empty());
    assert_eq!(hits.lock().len(), 2);
}

#[test]
fn test_worker_handler_reads_record() {
    let (mem, hub) = running_hub(HubConfig::default());
    let seen = Arc::new(AtomicUsize::new(0));
    let line = IrqLine::from(NoWakeIrq::Pressure);
    {
        let seen = Arc::clone(&seen);
        let weak = Arc::downgrade(&hub);
        hub.irq_register(
            line,
            Arc::new(move |_l: IrqLine| {
                if let Some(hub) = weak.upgrade() {
                    if let Ok(p) = hub.read::<PressureData>() {
                        assert_eq!(p.pressure_pa(), 99_000);
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }),
            false,
        )
        .unwrap();
    }
    hub.irq_enable(line).unwrap();

    let worker = IrqWorker::spawn(Arc::clone(&hub)).unwrap();
    mem.load_record(&PressureData::new(99_000, 0, 0, 1));
    mem.raise_irq(line);
    worker.trigger();

    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_bus_failure_propagates() {
    let (mem, hub) = running_hub(HubConfig::default());
    mem.load_record(&AccelData::new(0, 0, 0, 0));
    mem.fail_next_read();
    let err = hub.read::<AccelData>().unwrap_err();
    assert!(matches!(err, HubError::Transport(TransportError::Bus(_))));
    assert!(!err.is_stale());
    assert!(hub.read::<AccelData>().is_ok());
}
