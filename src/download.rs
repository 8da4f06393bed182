//! Firmware download into the hub bootloader
//!
//! The bootloader exposes a single mailbox register. The host writes a
//! [`DownloadPacket`] with status `PENDING`, the bootloader executes it and
//! rewrites the status to `OK` or `ERROR`. An image goes over as one `ERASE`,
//! a `WRITE` per payload-sized chunk and a final `BOOT`.
//!
//! Peripherals are disabled for the whole transfer and enabled again when it
//! ends, whether or not it succeeded. Peripherals a caller already took down
//! are left down until the end, under either transition policy.

use std::time::Duration;

use m4sh_transport::overlay::{download_cmd, download_status, DOWNLOAD_PAYLOAD_SIZE};
use m4sh_transport::DownloadPacket;
use tracing::{debug, error, info, warn};

use crate::config::DownloadConfig;
use crate::error::HubError;
use crate::hub::{HubStatus, SensorHub};
use crate::lifecycle::PeripheralEvent;

/// Sends firmware images through a hub's download mailbox
pub struct FirmwareDownloader<'a> {
    hub: &'a SensorHub,
    config: DownloadConfig,
}

impl<'a> FirmwareDownloader<'a> {
    /// Downloader using the hub's configured retry and poll limits
    pub fn new(hub: &'a SensorHub) -> Self {
        Self {
            config: hub.config().download.clone(),
            hub,
        }
    }

    pub fn with_config(mut self, config: DownloadConfig) -> Self {
        self.config = config;
        self
    }

    /// Download `image` to `base` and boot it. Returns the number of `WRITE`
    /// packets sent.
    pub fn download(&self, image: &[u8], base: u32) -> Result<usize, HubError> {
        if image.is_empty() {
            return Err(HubError::Download {
                address: base,
                reason: "empty image".into(),
            });
        }

        info!(
            "Downloading {} bytes to 0x{base:08X} in {} packets",
            image.len(),
            image.len().div_ceil(DOWNLOAD_PAYLOAD_SIZE)
        );
        self.hub.settle_peripherals(PeripheralEvent::DisablePeripheral);
        self.hub.set_status(HubStatus::Booting);

        let result = self.transfer(image, base);

        self.hub.settle_peripherals(PeripheralEvent::EnablePeripheral);
        match &result {
            Ok(packets) => info!("Download complete, {packets} packets"),
            Err(e) => error!("Download failed: {e}"),
        }
        result
    }

    fn transfer(&self, image: &[u8], base: u32) -> Result<usize, HubError> {
        self.enter_bootloader()?;

        let len = u32::try_from(image.len()).map_err(|_| HubError::Download {
            address: base,
            reason: format!("image of {} bytes too large", image.len()),
        })?;
        self.send(download_cmd::ERASE, base, &len.to_le_bytes())?;

        let mut packets = 0;
        for (i, chunk) in image.chunks(DOWNLOAD_PAYLOAD_SIZE).enumerate() {
            let address = base.wrapping_add((i * DOWNLOAD_PAYLOAD_SIZE) as u32);
            self.send(download_cmd::WRITE, address, chunk)?;
            packets += 1;
        }

        self.send(download_cmd::BOOT, base, &[])?;
        Ok(packets)
    }

    fn enter_bootloader(&self) -> Result<(), HubError> {
        match self.hub.platform() {
            Some(platform) => {
                platform.set_boot_mode(true)?;
                platform.hw_reset()?;
                // Next reset boots the application again
                platform.set_boot_mode(false)
            }
            None => {
                debug!("No platform hooks, assuming hub already in bootloader");
                Ok(())
            }
        }
    }

    /// Send one packet, resending it while the bootloader rejects it
    fn send(&self, command: u8, address: u32, data: &[u8]) -> Result<(), HubError> {
        let packet = DownloadPacket::new(command, address, data)
            .map_err(m4sh_transport::TransportError::from)?;

        for attempt in 0..=self.config.max_retries {
            self.hub.bus().write_record(&packet)?;
            match self.wait_status(address)? {
                download_status::OK => {
                    debug!("{} packet 0x{address:08X} accepted", command_name(command));
                    return Ok(());
                }
                status => warn!(
                    "{} packet 0x{address:08X} rejected (status {status}, attempt {})",
                    command_name(command),
                    attempt + 1
                ),
            }
        }

        Err(HubError::Download {
            address,
            reason: format!(
                "{} rejected after {} attempts",
                command_name(command),
                self.config.max_retries + 1
            ),
        })
    }

    fn wait_status(&self, address: u32) -> Result<u8, HubError> {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        for _ in 0..self.config.max_polls {
            let reply: DownloadPacket = self.hub.bus().read()?;
            if reply.status() != download_status::PENDING {
                return Ok(reply.status());
            }
            std::thread::sleep(interval);
        }
        Err(HubError::Download {
            address,
            reason: format!("no answer after {} polls", self.config.max_polls),
        })
    }
}

fn command_name(command: u8) -> &'static str {
    match command {
        download_cmd::IDLE => "IDLE",
        download_cmd::ERASE => "ERASE",
        download_cmd::WRITE => "WRITE",
        download_cmd::BOOT => "BOOT",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::lifecycle::{PeripheralState, TransitionPolicy};
    use crate::notify::Listener;
    use crate::platform::testing::{PlatformCall, RecordingPlatform};
    use m4sh_transport::{Bank, MemoryTransport, Overlay, Register, RegisterTransport, TransportError};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Bootloader stand-in: answers every mailbox write on the spot
    struct FakeBootloader {
        mem: MemoryTransport,
        /// Reject this many WRITE packets before accepting
        reject_writes: Mutex<u32>,
        /// Never answer
        silent: bool,
        flash: Mutex<Vec<(u32, Vec<u8>)>>,
        commands: Mutex<Vec<u8>>,
    }

    impl FakeBootloader {
        fn new(reject_writes: u32, silent: bool) -> Self {
            Self {
                mem: MemoryTransport::new(),
                reject_writes: Mutex::new(reject_writes),
                silent,
                flash: Mutex::new(Vec::new()),
                commands: Mutex::new(Vec::new()),
            }
        }

        fn image(&self) -> Vec<u8> {
            let mut flash = self.flash.lock().clone();
            flash.sort_by_key(|(addr, _)| *addr);
            flash.into_iter().flat_map(|(_, data)| data).collect()
        }
    }

    impl RegisterTransport for FakeBootloader {
        fn read(&self, bank: Bank, offset: u16, buf: &mut [u8]) -> Result<(), TransportError> {
            self.mem.read(bank, offset, buf)
        }

        fn write(&self, bank: Bank, offset: u16, data: &[u8]) -> Result<(), TransportError> {
            self.mem.write(bank, offset, data)?;
            if Register::at(bank, offset) != Some(Register::DownloadPacket) || self.silent {
                return Ok(());
            }

            let mut packet = DownloadPacket::decode(data)?;
            self.commands.lock().push(packet.command());
            let mut status = if packet.checksum_ok() {
                download_status::OK
            } else {
                download_status::ERROR
            };
            if packet.command() == download_cmd::WRITE {
                let mut reject = self.reject_writes.lock();
                if *reject > 0 {
                    *reject -= 1;
                    status = download_status::ERROR;
                } else if status == download_status::OK {
                    self.flash
                        .lock()
                        .push((packet.address(), packet.data().to_vec()));
                }
            }
            packet.set_status(status);
            self.mem.load_record(&packet);
            Ok(())
        }

        fn name(&self) -> &str {
            "fake-bootloader"
        }
    }

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn hub_with(boot: &Arc<FakeBootloader>, policy: TransitionPolicy) -> SensorHub {
        let config = HubConfig {
            transition_policy: policy,
            download: DownloadConfig {
                max_retries: 2,
                max_polls: 3,
                poll_interval_ms: 0,
            },
            ..Default::default()
        };
        SensorHub::new(boot.clone(), config)
    }

    /// Hub with its peripherals up, as a running system has them
    fn hub(boot: &Arc<FakeBootloader>) -> SensorHub {
        let hub = hub_with(boot, TransitionPolicy::Tolerant);
        hub.enable_peripherals().unwrap();
        hub
    }

    type EventLog = Arc<Mutex<Vec<PeripheralEvent>>>;

    fn event_log(hub: &SensorHub) -> (Arc<dyn Listener<PeripheralEvent>>, EventLog) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let listener: Arc<dyn Listener<PeripheralEvent>> = {
            let events = Arc::clone(&events);
            Arc::new(move |e: PeripheralEvent| events.lock().push(e))
        };
        hub.register_notify(&listener);
        (listener, events)
    }

    #[test]
    fn test_download_sends_every_chunk() {
        let boot = Arc::new(FakeBootloader::new(0, false));
        let platform = Arc::new(RecordingPlatform::default());
        let hub = hub(&boot).with_platform(platform.clone());
        let (_listener, events) = event_log(&hub);

        let fw = image(DOWNLOAD_PAYLOAD_SIZE * 2 + 100);
        let packets = FirmwareDownloader::new(&hub).download(&fw, 0x0800_0000).unwrap();

        assert_eq!(packets, 3);
        assert_eq!(boot.image(), fw);
        assert_eq!(
            *boot.commands.lock(),
            vec![
                download_cmd::ERASE,
                download_cmd::WRITE,
                download_cmd::WRITE,
                download_cmd::WRITE,
                download_cmd::BOOT
            ]
        );
        assert_eq!(
            *events.lock(),
            vec![
                PeripheralEvent::DisablePeripheral,
                PeripheralEvent::EnablePeripheral
            ]
        );
        assert_eq!(
            *platform.calls.lock(),
            vec![
                PlatformCall::BootMode(true),
                PlatformCall::Reset,
                PlatformCall::BootMode(false)
            ]
        );
        assert_eq!(hub.status(), HubStatus::Booting);
    }

    #[test]
    fn test_rejected_packet_is_resent() {
        let boot = Arc::new(FakeBootloader::new(2, false));
        let hub = hub(&boot);
        let fw = image(10);
        assert_eq!(FirmwareDownloader::new(&hub).download(&fw, 0).unwrap(), 1);
        assert_eq!(boot.image(), fw);
    }

    #[test]
    fn test_gives_up_after_retries_and_reenables() {
        let boot = Arc::new(FakeBootloader::new(10, false));
        let hub = hub(&boot);
        let (_listener, events) = event_log(&hub);

        let err = FirmwareDownloader::new(&hub)
            .download(&image(10), 0x100)
            .unwrap_err();
        assert!(matches!(err, HubError::Download { address: 0x100, .. }));
        // Initial send plus two retries
        let writes = boot
            .commands
            .lock()
            .iter()
            .filter(|&&c| c == download_cmd::WRITE)
            .count();
        assert_eq!(writes, 3);
        assert_eq!(events.lock().len(), 2);
        assert_eq!(hub.peripheral_state(), PeripheralState::Enabled);
    }

    #[test]
    fn test_silent_bootloader_times_out() {
        let boot = Arc::new(FakeBootloader::new(0, true));
        let hub = hub(&boot);
        let err = FirmwareDownloader::new(&hub)
            .download(&image(4), 0)
            .unwrap_err();
        match err {
            HubError::Download { reason, .. } => assert!(reason.contains("3 polls")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hub.peripheral_state(), PeripheralState::Enabled);
    }

    #[test]
    fn test_download_with_peripherals_down_under_strict_policy() {
        let boot = Arc::new(FakeBootloader::new(0, false));
        let hub = hub_with(&boot, TransitionPolicy::Strict);
        assert_eq!(hub.peripheral_state(), PeripheralState::Disabled);
        let (_listener, events) = event_log(&hub);

        let fw = image(40);
        assert_eq!(FirmwareDownloader::new(&hub).download(&fw, 0).unwrap(), 1);
        assert_eq!(boot.image(), fw);
        assert_eq!(*events.lock(), vec![PeripheralEvent::EnablePeripheral]);
        assert_eq!(hub.peripheral_state(), PeripheralState::Enabled);
        assert_eq!(hub.status(), HubStatus::Booting);
    }

    #[test]
    fn test_empty_image_rejected() {
        let boot = Arc::new(FakeBootloader::new(0, false));
        let hub = hub(&boot);
        assert!(FirmwareDownloader::new(&hub).download(&[], 0).is_err());
        assert!(boot.commands.lock().is_empty());
    }
}
