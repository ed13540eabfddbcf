//! Toys are the units of feedback logic. Each one binds to cabinet outputs
//! during `init` and drives them from table events or direct control calls.
//!
//! Every toy walks the same lifecycle:
//!
//! ```text
//! Unconfigured --init--> Initialized --reset--> Active --reset--> Active ...
//!        \                     \                   \
//!         `---------------------`-------finish------`--> Finished
//! ```
//!
//! `Finished` is terminal. Mutating calls on a toy that is not initialised or
//! already finished return [`ToyError::InvalidState`]; `finish` itself is
//! idempotent and never fails.

pub mod direct;
pub mod ledwiz_equivalent;
pub mod rgb;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use direct::DirectToy;
pub use ledwiz_equivalent::{LedWizEquivalent, LedWizEquivalentBinding, LegacyTrigger};
pub use rgb::RgbToy;

use crate::cabinet::{Cabinet, CabinetError, OutputHandle, IDLE_VALUE};
use crate::events::{TableElementEvent, TableElementType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ToyState {
    #[default]
    Unconfigured,
    Initialized,
    Active,
    Finished,
}

impl fmt::Display for ToyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToyState::Unconfigured => write!(f, "unconfigured"),
            ToyState::Initialized => write!(f, "initialized"),
            ToyState::Active => write!(f, "active"),
            ToyState::Finished => write!(f, "finished"),
        }
    }
}

/// Topology mistakes. Fatal to the toy (and the cabinet start-up) that hits them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("toy '{toy}' binds legacy address {address} more than once")]
    DuplicateAddress { toy: String, address: u32 },

    #[error("toy '{toy}' has a trigger for unbound legacy address {address}")]
    UnboundTriggerAddress { toy: String, address: u32 },

    #[error("LedWiz number {0} is used by more than one toy")]
    DuplicateLedWizNumber(u32),

    #[error("toy '{toy}' references unknown output '{output}'")]
    UnresolvedOutput { toy: String, output: String },

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("device '{device}' uses unknown profile '{profile}' or unit number {number}")]
    UnknownProfile {
        device: String,
        profile: String,
        number: u32,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToyError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("cannot {operation} toy '{toy}' while {state}")]
    InvalidState {
        toy: String,
        state: ToyState,
        operation: &'static str,
    },

    #[error(transparent)]
    Cabinet(#[from] CabinetError),
}

/// Table element that fires a toy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub element: TableElementType,
    pub number: i32,
}

impl Trigger {
    pub fn new(element: TableElementType, number: i32) -> Self {
        Self { element, number }
    }

    pub fn matches(&self, event: &TableElementEvent) -> bool {
        event.matches(self.element, self.number)
    }
}

/// Capability set shared by every toy variant. Toys are driven through a
/// `Box<dyn Toy>` list in declared order.
pub trait Toy: Send {
    fn name(&self) -> &str;

    fn state(&self) -> ToyState;

    /// Resolve every output binding. Any unresolved name fails the whole init.
    fn init(&mut self, cabinet: &Cabinet) -> Result<(), ToyError>;

    /// Drive every owned output to the idle value.
    fn reset(&mut self, cabinet: &Cabinet) -> Result<(), ToyError>;

    /// Leave every owned output idle and release the handles. Safe to call
    /// after a failed init and more than once.
    fn finish(&mut self, cabinet: &Cabinet);

    /// React to a table event. Toys filter for the elements they care about.
    fn handle_event(
        &mut self,
        _event: &TableElementEvent,
        _cabinet: &Cabinet,
    ) -> Result<(), ToyError> {
        Ok(())
    }

    /// Unit number of the emulated legacy controller, if this toy exposes one.
    fn legacy_number(&self) -> Option<u32> {
        None
    }

    /// Set a value through the legacy address space. No-op for toys without one.
    fn set_output_value(
        &mut self,
        _address: u32,
        _value: i32,
        _cabinet: &Cabinet,
    ) -> Result<(), ToyError> {
        Ok(())
    }
}

/// State machine shared by the toy variants.
#[derive(Debug, Default)]
pub struct ToyLifecycle {
    state: ToyState,
}

impl ToyLifecycle {
    pub fn state(&self) -> ToyState {
        self.state
    }

    pub fn begin_init(&self, toy: &str) -> Result<(), ToyError> {
        match self.state {
            ToyState::Unconfigured => Ok(()),
            state => Err(ToyError::InvalidState {
                toy: toy.to_string(),
                state,
                operation: "init",
            }),
        }
    }

    pub fn initialized(&mut self) {
        self.state = ToyState::Initialized;
    }

    pub fn ensure_live(&self, toy: &str, operation: &'static str) -> Result<(), ToyError> {
        match self.state {
            ToyState::Initialized | ToyState::Active => Ok(()),
            state => Err(ToyError::InvalidState {
                toy: toy.to_string(),
                state,
                operation,
            }),
        }
    }

    pub fn activate(&mut self) {
        self.state = ToyState::Active;
    }

    /// Returns false when the toy was already finished.
    pub fn finish(&mut self) -> bool {
        if self.state == ToyState::Finished {
            return false;
        }
        self.state = ToyState::Finished;
        true
    }
}

/// Resolve an output name for a toy, turning a miss into a configuration error.
pub(crate) fn resolve_output(
    cabinet: &Cabinet,
    toy: &str,
    output: &str,
) -> Result<OutputHandle, ConfigurationError> {
    cabinet
        .resolve(output)
        .map_err(|_| ConfigurationError::UnresolvedOutput {
            toy: toy.to_string(),
            output: output.to_string(),
        })
}

/// Teardown write. Bypasses tick combining so the output always ends idle.
/// A stale handle only means the cabinet was already released.
pub(crate) fn write_idle(cabinet: &Cabinet, handle: OutputHandle, toy: &str) {
    if let Err(e) = cabinet.force(handle, IDLE_VALUE) {
        log::debug!("Toy '{}' skipped idle write: {}", toy, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let mut lifecycle = ToyLifecycle::default();
        assert_eq!(lifecycle.state(), ToyState::Unconfigured);
        assert!(lifecycle.ensure_live("Beacon", "reset").is_err());

        lifecycle.begin_init("Beacon").unwrap();
        lifecycle.initialized();
        assert!(lifecycle.begin_init("Beacon").is_err());
        assert!(lifecycle.ensure_live("Beacon", "reset").is_ok());

        lifecycle.activate();
        assert_eq!(lifecycle.state(), ToyState::Active);

        assert!(lifecycle.finish());
        assert!(!lifecycle.finish());
        assert_eq!(
            lifecycle.ensure_live("Beacon", "reset"),
            Err(ToyError::InvalidState {
                toy: "Beacon".to_string(),
                state: ToyState::Finished,
                operation: "reset",
            })
        );
    }

    #[test]
    fn test_trigger_matches() {
        let trigger = Trigger::new(TableElementType::Solenoid, 7);
        assert!(trigger.matches(&TableElementEvent::new(TableElementType::Solenoid, 7, 1)));
        assert!(!trigger.matches(&TableElementEvent::new(TableElementType::Lamp, 7, 1)));
        assert!(!trigger.matches(&TableElementEvent::new(TableElementType::Solenoid, 8, 1)));
    }
}
