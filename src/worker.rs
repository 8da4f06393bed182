//! Deferred interrupt servicing
//!
//! The hub interrupt arrives in a context that must not block, but servicing
//! it means bus transfers. [`IrqWorker::trigger`] only queues a wakeup; a
//! dedicated thread runs [`SensorHub::service_irqs`] for it. Triggers that
//! arrive while a service is already queued collapse into that one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::HubError;
use crate::hub::SensorHub;

/// Background IRQ servicing thread
pub struct IrqWorker {
    tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    serviced: Arc<AtomicU64>,
}

impl IrqWorker {
    /// Start the worker thread for `hub`
    pub fn spawn(hub: Arc<SensorHub>) -> Result<Self, HubError> {
        // One slot: a queued wakeup already covers every later trigger
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let serviced = Arc::new(AtomicU64::new(0));

        let handle = {
            let shutdown = Arc::clone(&shutdown);
            let serviced = Arc::clone(&serviced);
            std::thread::Builder::new()
                .name("m4sh-irq".into())
                .spawn(move || {
                    debug!("IRQ worker started");
                    while rx.blocking_recv().is_some() {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        match hub.service_irqs() {
                            Ok(pending) => trace!("Serviced IRQs {:#010x}", pending.bits()),
                            Err(e) => warn!("IRQ service failed: {e}"),
                        }
                        serviced.fetch_add(1, Ordering::SeqCst);
                    }
                    debug!("IRQ worker exiting");
                })?
        };

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            shutdown,
            serviced,
        })
    }

    /// Request a service pass. Never blocks.
    pub fn trigger(&self) {
        if let Some(tx) = &self.tx {
            match tx.try_send(()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(())) => trace!("IRQ service already queued"),
                Err(mpsc::error::TrySendError::Closed(())) => warn!("IRQ worker is gone"),
            }
        }
    }

    /// Completed service passes
    pub fn serviced(&self) -> u64 {
        self.serviced.load(Ordering::SeqCst)
    }
}

impl Drop for IrqWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Closing the channel wakes the thread if it is idle
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("IRQ worker panicked");
            }
        }
    }
}
