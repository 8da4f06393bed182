//! Peripheral lifecycle
//!
//! While the hub is brought up (reset, firmware download) the peripherals
//! hanging off it must be quiesced. The hub driver announces this with two
//! events that drive a two-state machine:
//!
//! ```text
//!              DisablePeripheral
//!   Enabled ----------------------> Disabled
//!      ^                               |
//!      +-------------------------------+
//!              EnablePeripheral
//! ```
//!
//! Peripherals start `Disabled`: nothing behind the hub is usable until the
//! hub has been brought up. Whether a repeated event (double disable) is an
//! error or a no-op is the [`TransitionPolicy`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HubError;

/// Lifecycle event broadcast to peripheral drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeripheralEvent {
    /// Peripherals are about to be disabled
    DisablePeripheral,
    /// Peripherals are about to be enabled
    EnablePeripheral,
}

impl PeripheralEvent {
    /// State the event leads to
    pub fn target(self) -> PeripheralState {
        match self {
            PeripheralEvent::DisablePeripheral => PeripheralState::Disabled,
            PeripheralEvent::EnablePeripheral => PeripheralState::Enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeripheralState {
    Enabled,
    #[default]
    Disabled,
}

/// Handling of an event that does not change the state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionPolicy {
    /// Reject with [`HubError::InvalidTransition`]
    Strict,
    /// Ignore; nobody is notified
    #[default]
    Tolerant,
}

/// Outcome of applying an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State changed; subscribers must be notified
    Changed(PeripheralState),
    /// Event repeated the current state and was ignored
    Redundant,
}

/// Peripheral state machine
pub struct Lifecycle {
    state: Mutex<PeripheralState>,
    policy: TransitionPolicy,
}

impl Lifecycle {
    pub fn new(policy: TransitionPolicy) -> Self {
        Self {
            state: Mutex::new(PeripheralState::default()),
            policy,
        }
    }

    pub fn state(&self) -> PeripheralState {
        *self.state.lock()
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Move to the state `event` leads to, treating a repeat as done.
    /// Used by hub bring-up paths, where "already there" is the goal.
    pub fn settle(&self, event: PeripheralEvent) -> Transition {
        let mut state = self.state.lock();
        let target = event.target();
        if *state == target {
            return Transition::Redundant;
        }
        debug!("Peripherals {:?} -> {:?}", *state, target);
        *state = target;
        Transition::Changed(target)
    }

    /// Apply an event
    pub fn apply(&self, event: PeripheralEvent) -> Result<Transition, HubError> {
        let mut state = self.state.lock();
        let target = event.target();
        if *state != target {
            debug!("Peripherals {:?} -> {:?}", *state, target);
            *state = target;
            return Ok(Transition::Changed(target));
        }

        match self.policy {
            TransitionPolicy::Strict => {
                warn!("Rejected {event:?}: peripherals already {:?}", *state);
                Err(HubError::InvalidTransition {
                    state: *state,
                    event,
                })
            }
            TransitionPolicy::Tolerant => {
                debug!("Ignoring repeated {event:?}");
                Ok(Transition::Redundant)
            }
        }
    }
}
