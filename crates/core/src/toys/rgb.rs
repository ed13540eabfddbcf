use super::{resolve_output, write_idle, Toy, ToyError, ToyLifecycle, ToyState, Trigger};
use crate::cabinet::{Cabinet, OutputHandle, IDLE_VALUE};
use crate::events::TableElementEvent;

/// Composite toy driving a red/green/blue output triple, e.g. an RGB
/// undercab strip wired to three controller outputs.
pub struct RgbToy {
    name: String,
    output_names: [String; 3],
    color: [u8; 3],
    trigger: Option<Trigger>,
    handles: Option<[OutputHandle; 3]>,
    lifecycle: ToyLifecycle,
}

impl RgbToy {
    pub fn new(name: &str, red: &str, green: &str, blue: &str) -> Self {
        Self {
            name: name.to_string(),
            output_names: [red.to_string(), green.to_string(), blue.to_string()],
            color: [255, 255, 255],
            trigger: None,
            handles: None,
            lifecycle: ToyLifecycle::default(),
        }
    }

    /// Colour shown when the trigger fires, scaled by the event intensity.
    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    pub fn set_color(&mut self, color: [u8; 3], cabinet: &Cabinet) -> Result<(), ToyError> {
        self.lifecycle.ensure_live(&self.name, "set color on")?;
        self.write_rgb(color, cabinet)
    }

    fn write_rgb(&self, color: [u8; 3], cabinet: &Cabinet) -> Result<(), ToyError> {
        if let Some(handles) = self.handles {
            for (handle, value) in handles.into_iter().zip(color) {
                cabinet.write(handle, value as i32)?;
            }
        }
        Ok(())
    }
}

impl Toy for RgbToy {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> ToyState {
        self.lifecycle.state()
    }

    fn init(&mut self, cabinet: &Cabinet) -> Result<(), ToyError> {
        self.lifecycle.begin_init(&self.name)?;
        let [red, green, blue] = &self.output_names;
        let handles = [
            resolve_output(cabinet, &self.name, red)?,
            resolve_output(cabinet, &self.name, green)?,
            resolve_output(cabinet, &self.name, blue)?,
        ];
        self.handles = Some(handles);
        self.lifecycle.initialized();
        Ok(())
    }

    fn reset(&mut self, cabinet: &Cabinet) -> Result<(), ToyError> {
        self.lifecycle.ensure_live(&self.name, "reset")?;
        if let Some(handles) = self.handles {
            for handle in handles {
                cabinet.force(handle, IDLE_VALUE)?;
            }
        }
        self.lifecycle.activate();
        Ok(())
    }

    fn finish(&mut self, cabinet: &Cabinet) {
        if !self.lifecycle.finish() {
            return;
        }
        if let Some(handles) = self.handles.take() {
            for handle in handles {
                write_idle(cabinet, handle, &self.name);
            }
        }
    }

    fn handle_event(&mut self, event: &TableElementEvent, cabinet: &Cabinet) -> Result<(), ToyError> {
        let Some(trigger) = self.trigger else {
            return Ok(());
        };
        if !trigger.matches(event) {
            return Ok(());
        }

        self.lifecycle.ensure_live(&self.name, "fire")?;
        let intensity = event.intensity() as u16;
        let scaled = self.color.map(|c| (c as u16 * intensity / 255) as u8);
        self.write_rgb(scaled, cabinet)
    }
}
