//! Host-side driver core for the M4 sensor hub
//!
//! The register protocol itself lives in `m4sh-transport`. This crate adds
//! the shared hub context that peripheral drivers hold on to:
//!
//! - [`hub::SensorHub`]: bus, interrupt dispatcher, notifier chains
//! - [`lifecycle`]: the enable/disable state of the hub's peripherals
//! - [`notify`]: subscriber chains for lifecycle and status events
//! - [`dispatch`]: demultiplexing the single hub interrupt into lines
//! - [`worker::IrqWorker`]: runs interrupt servicing off the interrupt path
//! - [`download::FirmwareDownloader`]: loads firmware through the bootloader
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use m4sensorhub::{HubConfig, PeripheralEvent, SensorHub};
//! use m4sensorhub::notify::Listener;
//! use m4sh_transport::MemoryTransport;
//!
//! let hub = SensorHub::new(Arc::new(MemoryTransport::new()), HubConfig::default());
//! let listener: Arc<dyn Listener<PeripheralEvent>> =
//!     Arc::new(|event: PeripheralEvent| println!("peripherals: {event:?}"));
//! let id = hub.register_notify(&listener);
//! // Peripherals start disabled
//! assert_eq!(hub.enable_peripherals().unwrap(), 1);
//! assert!(hub.unregister_notify(id));
//! ```

pub mod config;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod notify;
pub mod platform;
pub mod worker;

pub use config::{DownloadConfig, HubConfig};
pub use dispatch::{IrqDispatcher, IrqHandler};
pub use download::FirmwareDownloader;
pub use error::HubError;
pub use hub::{HubStatus, SensorHub};
pub use lifecycle::{Lifecycle, PeripheralEvent, PeripheralState, Transition, TransitionPolicy};
pub use notify::{Listener, NotifierChain, SubscriberId};
pub use platform::HubPlatform;
pub use worker::IrqWorker;
