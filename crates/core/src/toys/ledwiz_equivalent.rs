//! LedWiz-style legacy addressing on top of an arbitrary cabinet.
//!
//! A [`LedWizEquivalent`] exposes a small numbered address space (historically
//! outputs 1..=32 of one LedWiz unit) and maps every address to a named
//! cabinet output. Control code and legacy configs written against the fixed
//! LedWiz layout keep working whatever hardware actually sits behind the
//! names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tilt_devices::Device;

use super::{
    resolve_output, write_idle, ConfigurationError, Toy, ToyError, ToyLifecycle, ToyState,
};
use crate::cabinet::{clamp_value, Cabinet, OutputHandle, IDLE_VALUE};
use crate::events::{TableElementEvent, TableElementType};

/// One legacy address bound to a cabinet output name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedWizEquivalentBinding {
    pub address: u32,
    pub output: String,
}

impl LedWizEquivalentBinding {
    pub fn new(address: u32, output: &str) -> Self {
        Self {
            address,
            output: output.to_string(),
        }
    }
}

/// LedControl-style rule: a table element drives one legacy address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyTrigger {
    pub element: TableElementType,
    pub number: i32,
    pub address: u32,
}

#[derive(Debug)]
struct EquivalentOutput {
    output_name: String,
    value: u8,
    handle: Option<OutputHandle>,
}

pub struct LedWizEquivalent {
    name: String,
    ledwiz_number: Option<u32>,
    outputs: BTreeMap<u32, EquivalentOutput>,
    triggers: Vec<LegacyTrigger>,
    lifecycle: ToyLifecycle,
}

impl LedWizEquivalent {
    /// Build from explicit bindings. A repeated address rejects the whole list.
    pub fn new(
        name: &str,
        bindings: impl IntoIterator<Item = LedWizEquivalentBinding>,
    ) -> Result<Self, ConfigurationError> {
        let mut outputs = BTreeMap::new();
        for binding in bindings {
            if outputs.contains_key(&binding.address) {
                return Err(ConfigurationError::DuplicateAddress {
                    toy: name.to_string(),
                    address: binding.address,
                });
            }
            outputs.insert(
                binding.address,
                EquivalentOutput {
                    output_name: binding.output,
                    value: IDLE_VALUE,
                    handle: None,
                },
            );
        }

        Ok(Self {
            name: name.to_string(),
            ledwiz_number: None,
            outputs,
            triggers: Vec::new(),
            lifecycle: ToyLifecycle::default(),
        })
    }

    /// Mirror a fixed-address device: one binding per device output, named
    /// `<device>\<output>` and keyed by the output's legacy number.
    pub fn from_device(device: &Device) -> Result<Self, ConfigurationError> {
        let bindings = device
            .outputs
            .iter()
            .map(|o| LedWizEquivalentBinding::new(o.number, &device.output_path(o)));
        let equivalent = Self::new(&format!("LedWizEquivalent {}", device.number), bindings)?;
        Ok(equivalent.with_ledwiz_number(device.number))
    }

    pub fn with_ledwiz_number(mut self, number: u32) -> Self {
        self.ledwiz_number = Some(number);
        self
    }

    /// Attach legacy triggers. Every trigger must target a bound address.
    pub fn with_triggers(mut self, triggers: Vec<LegacyTrigger>) -> Result<Self, ConfigurationError> {
        if let Some(trigger) = triggers.iter().find(|t| !self.outputs.contains_key(&t.address)) {
            return Err(ConfigurationError::UnboundTriggerAddress {
                toy: self.name,
                address: trigger.address,
            });
        }
        self.triggers = triggers;
        Ok(self)
    }

    pub fn ledwiz_number(&self) -> Option<u32> {
        self.ledwiz_number
    }

    /// Current bindings in address order.
    pub fn bindings(&self) -> Vec<LedWizEquivalentBinding> {
        self.outputs
            .iter()
            .map(|(&address, o)| LedWizEquivalentBinding::new(address, &o.output_name))
            .collect()
    }

    /// Value last set for an address.
    pub fn output_value(&self, address: u32) -> Option<u8> {
        self.outputs.get(&address).map(|o| o.value)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    fn write_address(&mut self, address: u32, value: u8, cabinet: &Cabinet) -> Result<(), ToyError> {
        // Legacy callers probe addresses the topology may not implement.
        let Some(entry) = self.outputs.get_mut(&address) else {
            return Ok(());
        };
        entry.value = value;
        if let Some(handle) = entry.handle {
            cabinet.write(handle, value as i32)?;
        }
        Ok(())
    }

    fn reset_all(&mut self, cabinet: &Cabinet) -> Result<(), ToyError> {
        for entry in self.outputs.values_mut() {
            entry.value = IDLE_VALUE;
            if let Some(handle) = entry.handle {
                cabinet.force(handle, IDLE_VALUE)?;
            }
        }
        Ok(())
    }
}

impl Toy for LedWizEquivalent {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ToyState {
        self.lifecycle.state()
    }

    fn init(&mut self, cabinet: &Cabinet) -> Result<(), ToyError> {
        self.lifecycle.begin_init(&self.name)?;

        // Resolve everything before committing any handle.
        let handles = self
            .outputs
            .values()
            .map(|o| resolve_output(cabinet, &self.name, &o.output_name))
            .collect::<Result<Vec<_>, _>>()?;
        for (entry, handle) in self.outputs.values_mut().zip(handles) {
            entry.handle = Some(handle);
        }

        log::debug!(
            "{} bound {} legacy outputs",
            self.name,
            self.outputs.len()
        );
        self.lifecycle.initialized();
        Ok(())
    }

    fn reset(&mut self, cabinet: &Cabinet) -> Result<(), ToyError> {
        self.lifecycle.ensure_live(&self.name, "reset")?;
        self.reset_all(cabinet)?;
        self.lifecycle.activate();
        Ok(())
    }

    fn finish(&mut self, cabinet: &Cabinet) {
        if !self.lifecycle.finish() {
            return;
        }
        for entry in self.outputs.values_mut() {
            entry.value = IDLE_VALUE;
            if let Some(handle) = entry.handle.take() {
                write_idle(cabinet, handle, &self.name);
            }
        }
    }

    fn handle_event(&mut self, event: &TableElementEvent, cabinet: &Cabinet) -> Result<(), ToyError> {
        if self.triggers.is_empty() {
            return Ok(());
        }
        let addresses: Vec<u32> = self
            .triggers
            .iter()
            .filter(|t| event.matches(t.element, t.number))
            .map(|t| t.address)
            .collect();
        if addresses.is_empty() {
            return Ok(());
        }

        self.lifecycle.ensure_live(&self.name, "fire")?;
        for address in addresses {
            self.write_address(address, event.intensity(), cabinet)?;
        }
        Ok(())
    }

    fn legacy_number(&self) -> Option<u32> {
        self.ledwiz_number
    }

    /// Set the value behind a legacy address. Unmapped addresses are ignored.
    fn set_output_value(
        &mut self,
        address: u32,
        value: i32,
        cabinet: &Cabinet,
    ) -> Result<(), ToyError> {
        self.lifecycle.ensure_live(&self.name, "set output value on")?;
        self.write_address(address, clamp_value(value), cabinet)
    }
}
