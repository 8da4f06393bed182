//! m4shctl - M4 sensor hub inspection tool

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use m4sensorhub::{HubConfig, IrqWorker, Listener, PeripheralEvent, SensorHub};
use m4sh_transport::overlay::gesture;
use m4sh_transport::registers::hub_state;
use m4sh_transport::{
    AccelData, GestureData, GestureSlot, IrqLine, MemoryTransport, NoWakeIrq, PressureData,
    Register, SensorRecord, WakeIrq,
};

mod cli;

use cli::{Cli, Commands, RecordKind};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            HubConfig::load(path)?
        }
        None => HubConfig::default(),
    };

    match cli.command {
        Commands::Irqs => list_irqs(),
        Commands::Registers => list_registers(),
        Commands::Decode { record, hex } => decode(record, &hex),
        Commands::Simulate { rounds } => simulate(config, rounds),
    }
}

fn list_irqs() -> Result<()> {
    println!("{:<5} {:<22} {:<8} {:<18} {:>4}", "IRQ", "NAME", "CLASS", "STATUS REGISTER", "BIT");
    for line in IrqLine::all() {
        let (class, reg) = if line.is_wake() {
            ("wake", Register::WakeIrqStatus)
        } else {
            ("no-wake", Register::NoWakeIrqStatus)
        };
        println!(
            "{:<5} {:<22} {:<8} {:<18} {:>4}",
            line.index(),
            line.name(),
            class,
            reg.name(),
            line.local_bit()
        );
    }
    Ok(())
}

fn list_registers() -> Result<()> {
    println!("{:<20} {:<10} {:>8} {:>6}", "REGISTER", "BANK", "OFFSET", "SIZE");
    for reg in Register::ALL {
        let info = reg.info();
        println!(
            "{:<20} {:<10} {:>#8x} {:>6}",
            reg.name(),
            info.bank.name(),
            info.offset,
            info.size
        );
    }
    Ok(())
}

/// Parse hex bytes given as one or more words ("0a 0b", "0x0a0b", "0a:0b")
fn parse_hex(words: &[String]) -> Result<Vec<u8>> {
    let digits: String = words
        .iter()
        .map(|w| w.trim_start_matches("0x").trim_start_matches("0X"))
        .flat_map(|w| w.chars())
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if let Some(bad) = digits.chars().find(|c| !c.is_ascii_hexdigit()) {
        bail!("invalid hex digit {bad:?}");
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    // ASCII only from here, so every index is a char boundary
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}

fn decode(kind: RecordKind, hex: &[String]) -> Result<()> {
    let bytes = parse_hex(hex)?;
    let reg = kind.register();
    match SensorRecord::decode(reg, &bytes) {
        Some(record) => {
            let record = record.with_context(|| format!("decoding {}", reg.name()))?;
            println!("{record:#?}");
            Ok(())
        }
        None => bail!("{} does not hold a record", reg.name()),
    }
}

fn record_register(line: IrqLine) -> Option<Register> {
    match line {
        IrqLine::NoWake(NoWakeIrq::Accel) => Some(Register::AccelRecord),
        IrqLine::NoWake(NoWakeIrq::Compass) => Some(Register::CompassRecord),
        IrqLine::NoWake(NoWakeIrq::Pressure) => Some(Register::PressureRecord),
        IrqLine::Wake(WakeIrq::Gesture) => Some(Register::GestureRecord),
        IrqLine::Wake(WakeIrq::Battery) => Some(Register::PowerStateRecord),
        _ => None,
    }
}

/// Print the record behind a line, the way a peripheral driver would read it
fn report(hub: &SensorHub, line: IrqLine) {
    let Some(reg) = record_register(line) else {
        println!("  {line}");
        return;
    };
    let info = reg.info();
    match hub.read_sensor_record(info.bank, info.offset, info.size) {
        Ok(record) => println!("  {line}: {record:?}"),
        Err(e) if e.is_stale() => info!("{line}: stale record, skipping"),
        Err(e) => warn!("{line}: {e}"),
    }
}

fn simulate(config: HubConfig, rounds: u32) -> Result<()> {
    let mem = Arc::new(MemoryTransport::new());
    let state = Register::HubState.info();
    mem.load(state.bank, state.offset, &[hub_state::RUNNING]);
    let version = Register::FirmwareVersion.info();
    mem.load(version.bank, version.offset, &0x0105u16.to_le_bytes());

    let hub = Arc::new(SensorHub::new(mem.clone(), config));
    let status = hub.probe()?;
    println!("Hub {status:?}, firmware 0x{:04X}", hub.firmware_version()?);

    let peripherals: Arc<dyn Listener<PeripheralEvent>> =
        Arc::new(|event: PeripheralEvent| println!("  peripherals: {event:?}"));
    let subscriber = hub.register_notify(&peripherals);

    let accel = IrqLine::from(NoWakeIrq::Accel);
    let pressure = IrqLine::from(NoWakeIrq::Pressure);
    let gesture_line = IrqLine::from(WakeIrq::Gesture);
    for (line, hold_wake) in [(accel, false), (pressure, false), (gesture_line, true)] {
        let weak = Arc::downgrade(&hub);
        hub.irq_register(
            line,
            Arc::new(move |line: IrqLine| {
                if let Some(hub) = weak.upgrade() {
                    report(&hub, line);
                }
            }),
            hold_wake,
        )?;
        hub.irq_enable(line)?;
    }

    let worker = IrqWorker::spawn(Arc::clone(&hub))?;
    for round in 0..rounds {
        println!("Round {round}");
        let ts = u64::from(round) * 10_000;
        let r = round as i32;
        mem.load_record(&AccelData::new(r * 12, -r * 7, 1000 - r, ts));
        mem.raise_irq(accel);
        mem.load_record(&PressureData::new(101_325 - r * 12, 1_200 + r, 2_150, ts));
        mem.raise_irq(pressure);
        if round % 2 == 1 {
            let tap = GestureSlot {
                gesture: gesture::TAP,
                confidence: 90,
                value: 1,
            };
            let none = GestureSlot {
                gesture: gesture::NONE,
                confidence: 0,
                value: 0,
            };
            mem.load_record(&GestureData::new([tap, none, none], ts));
            mem.raise_irq(gesture_line);
        }

        let before = worker.serviced();
        worker.trigger();
        let deadline = Instant::now() + Duration::from_secs(1);
        while worker.serviced() == before {
            if Instant::now() > deadline {
                bail!("IRQ worker did not run");
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    drop(worker);

    println!("Cycling peripherals");
    hub.disable_peripherals()?;
    hub.enable_peripherals()?;
    hub.unregister_notify(subscriber);

    for line in [accel, pressure, gesture_line] {
        println!("{line}: {} interrupts", hub.irq_count(line));
    }
    Ok(())
}
