use super::{resolve_output, write_idle, Toy, ToyError, ToyLifecycle, ToyState, Trigger};
use crate::cabinet::{Cabinet, OutputHandle, IDLE_VALUE};
use crate::events::TableElementEvent;

/// A toy bound to a single output, such as a knocker, shaker motor or a
/// single lamp. Fires from an optional table element trigger.
pub struct DirectToy {
    name: String,
    output_name: String,
    trigger: Option<Trigger>,
    handle: Option<OutputHandle>,
    lifecycle: ToyLifecycle,
}

impl DirectToy {
    pub fn new(name: &str, output_name: &str, trigger: Option<Trigger>) -> Self {
        Self {
            name: name.to_string(),
            output_name: output_name.to_string(),
            trigger,
            handle: None,
            lifecycle: ToyLifecycle::default(),
        }
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn set_value(&mut self, value: i32, cabinet: &Cabinet) -> Result<(), ToyError> {
        self.lifecycle.ensure_live(&self.name, "set value on")?;
        if let Some(handle) = self.handle {
            cabinet.write(handle, value)?;
        }
        Ok(())
    }
}

impl Toy for DirectToy {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ToyState {
        self.lifecycle.state()
    }

    fn init(&mut self, cabinet: &Cabinet) -> Result<(), ToyError> {
        self.lifecycle.begin_init(&self.name)?;
        self.handle = Some(resolve_output(cabinet, &self.name, &self.output_name)?);
        self.lifecycle.initialized();
        Ok(())
    }

    fn reset(&mut self, cabinet: &Cabinet) -> Result<(), ToyError> {
        self.lifecycle.ensure_live(&self.name, "reset")?;
        if let Some(handle) = self.handle {
            cabinet.force(handle, IDLE_VALUE)?;
        }
        self.lifecycle.activate();
        Ok(())
    }

    fn finish(&mut self, cabinet: &Cabinet) {
        if !self.lifecycle.finish() {
            return;
        }
        if let Some(handle) = self.handle.take() {
            write_idle(cabinet, handle, &self.name);
        }
    }

    fn handle_event(&mut self, event: &TableElementEvent, cabinet: &Cabinet) -> Result<(), ToyError> {
        match self.trigger {
            Some(trigger) if trigger.matches(event) => {
                self.set_value(event.intensity() as i32, cabinet)
            }
            _ => Ok(()),
        }
    }
}
