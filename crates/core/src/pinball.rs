use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tilt_devices::DeviceLibrary;

use crate::cabinet::{Cabinet, FlushReport};
use crate::config::Settings;
use crate::events::{TableElementEvent, TableElementType};
use crate::modules::{FlushDriver, FlushModule};
use crate::sink::OutputSink;
use crate::topology::TopologySource;
use crate::toys::{ConfigurationError, Toy, ToyError};

#[derive(Debug, Error)]
pub enum PinballError {
    #[error("failed to load topology: {0}")]
    Topology(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Toy(#[from] ToyError),

    #[error("failed to start flush thread: {0}")]
    FlushStart(#[from] std::io::Error),
}

/// Table the current session was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIdentity {
    pub table_path: PathBuf,
    pub rom: String,
}

/// Session orchestrator. Owns the cabinet and the configured toys, feeds
/// table events to the toys and drives their lifecycle.
///
/// Toys are initialised, reset and fed events in declared topology order and
/// finished in reverse order.
pub struct Pinball {
    source: Box<dyn TopologySource>,
    sink: Arc<dyn OutputSink>,
    settings: Settings,
    device_library: DeviceLibrary,
    cabinet: Arc<Cabinet>,
    toys: Vec<Box<dyn Toy>>,
    flush_driver: Option<FlushDriver>,
    table: Option<TableIdentity>,
}

impl Pinball {
    pub fn new(
        source: Box<dyn TopologySource>,
        sink: Arc<dyn OutputSink>,
        settings: Settings,
    ) -> Self {
        let cabinet = Arc::new(Cabinet::new(settings.combine_policy));
        Self {
            source,
            sink,
            settings,
            device_library: DeviceLibrary::new(),
            cabinet,
            toys: Vec::new(),
            flush_driver: None,
            table: None,
        }
    }

    pub fn with_device_library(mut self, device_library: DeviceLibrary) -> Self {
        self.device_library = device_library;
        self
    }

    /// Load the topology for a table, bind every toy and reset them.
    /// A configuration error aborts start-up and leaves nothing bound.
    pub fn init(&mut self, table_path: &Path, rom: &str) -> Result<(), PinballError> {
        if self.is_initialized() {
            log::warn!("Pinball already initialized, finishing previous session first");
            self.finish();
        }

        log::info!(
            "Initializing cabinet for table {} (rom '{}')",
            table_path.display(),
            rom
        );

        let topology = self
            .source
            .load(table_path, rom)
            .map_err(|e| PinballError::Topology(format!("{:#}", e)))?;
        let devices = topology.patch_devices(&self.device_library)?;

        self.cabinet.clear();
        for name in topology.output_names(&devices) {
            self.cabinet.register(&name);
        }

        let mut toys = match topology.build_toys(&devices) {
            Ok(toys) => toys,
            Err(e) => {
                self.cabinet.clear();
                return Err(e.into());
            }
        };

        for index in 0..toys.len() {
            if let Err(e) = toys[index].init(&self.cabinet) {
                log::error!("Failed to initialize toy '{}': {}", toys[index].name(), e);
                for toy in toys[..=index].iter_mut().rev() {
                    toy.finish(&self.cabinet);
                }
                self.cabinet.clear();
                return Err(e.into());
            }
            log::debug!("Toy '{}' initialized", toys[index].name());
        }

        {
            let _tick = self.cabinet.begin_tick();
            for toy in toys.iter_mut() {
                if let Err(e) = toy.reset(&self.cabinet) {
                    log::warn!("Failed to reset toy '{}': {}", toy.name(), e);
                }
            }
        }

        self.toys = toys;
        self.table = Some(TableIdentity {
            table_path: table_path.to_path_buf(),
            rom: rom.to_string(),
        });

        if self.settings.auto_flush {
            let module = FlushModule::new(self.cabinet.clone(), self.sink.clone(), &self.settings);
            match FlushDriver::start(module) {
                Ok(driver) => self.flush_driver = Some(driver),
                Err(e) => {
                    self.finish();
                    return Err(e.into());
                }
            }
        }

        log::info!(
            "Cabinet ready: {} outputs, {} toys",
            self.cabinet.len(),
            self.toys.len()
        );
        Ok(())
    }

    /// Dispatch one table event to every toy in declared order. The whole
    /// dispatch is one cabinet tick.
    pub fn receive_event(&mut self, event: TableElementEvent) {
        if !self.is_initialized() {
            log::trace!("Ignoring {} before init", event);
            return;
        }

        let _tick = self.cabinet.begin_tick();
        for toy in self.toys.iter_mut() {
            match toy.handle_event(&event, &self.cabinet) {
                Ok(()) => {}
                Err(e @ ToyError::InvalidState { .. }) => log::debug!("{}", e),
                Err(e) => log::warn!("Toy '{}' failed to handle {}: {}", toy.name(), event, e),
            }
        }
    }

    /// Entry point for the engine bridge. Unknown element tags are ignored.
    pub fn receive_pinmame_data(&mut self, tag: char, number: i32, value: i32) {
        match TableElementType::from_char(tag) {
            Some(element_type) => {
                self.receive_event(TableElementEvent::new(element_type, number, value))
            }
            None => log::trace!("Ignoring unknown element tag '{}'", tag),
        }
    }

    /// Set an output through the address space of an emulated LedWiz unit.
    /// Unknown unit numbers and unmapped addresses are ignored.
    pub fn set_legacy_output(&mut self, ledwiz_number: u32, address: u32, value: i32) {
        let Some(toy) = self
            .toys
            .iter_mut()
            .find(|t| t.legacy_number() == Some(ledwiz_number))
        else {
            log::trace!("No LedWiz equivalent with number {}", ledwiz_number);
            return;
        };

        let _tick = self.cabinet.begin_tick();
        if let Err(e) = toy.set_output_value(address, value, &self.cabinet) {
            log::debug!("{}", e);
        }
    }

    /// Flush the cabinet from the caller's context, for hosts running
    /// without the flush thread. With the flush thread running this only
    /// asks it for an early frame and returns an empty report.
    pub async fn flush(&self) -> FlushReport {
        if let Some(driver) = &self.flush_driver {
            driver.request_flush();
            return FlushReport::default();
        }
        self.cabinet
            .flush(self.sink.as_ref(), self.settings.sink_timeout())
            .await
    }

    /// Tear the session down: finish every toy in reverse order, push the
    /// resulting idle values and release the cabinet. Safe to call at any
    /// time and more than once.
    pub fn finish(&mut self) {
        if self.table.is_none() && self.toys.is_empty() && self.flush_driver.is_none() {
            return;
        }
        log::info!("Finishing cabinet session");

        {
            let _tick = self.cabinet.begin_tick();
            for toy in self.toys.iter_mut().rev() {
                toy.finish(&self.cabinet);
            }
        }
        self.toys.clear();

        match self.flush_driver.take() {
            Some(mut driver) => driver.stop(),
            None => {
                let report = FlushModule::flush_blocking(
                    &self.cabinet,
                    self.sink.as_ref(),
                    self.settings.sink_timeout(),
                );
                if !report.is_clean() {
                    log::warn!("{} idle writes failed during finish", report.failed);
                }
            }
        }

        self.cabinet.clear();
        self.table = None;
    }

    pub fn pause(&self) {
        log::debug!("Engine paused");
    }

    pub fn resume(&self) {
        log::debug!("Engine continued");
    }

    pub fn run(&self) {
        log::debug!("Engine running");
    }

    pub fn stop(&self) {
        log::debug!("Engine stopped");
    }

    pub fn is_initialized(&self) -> bool {
        self.table.is_some()
    }

    pub fn table(&self) -> Option<&TableIdentity> {
        self.table.as_ref()
    }

    /// File stem of the current table, e.g. `afm` for `tables/afm.vpx`.
    pub fn table_name(&self) -> Option<String> {
        self.table
            .as_ref()
            .and_then(|t| t.table_path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
    }

    pub fn rom_name(&self) -> Option<&str> {
        self.table.as_ref().map(|t| t.rom.as_str())
    }

    pub fn cabinet(&self) -> &Arc<Cabinet> {
        &self.cabinet
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn toy_names(&self) -> Vec<&str> {
        self.toys.iter().map(|t| t.name()).collect()
    }
}

impl Drop for Pinball {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::topology::{StaticTopology, Topology, ToyDefinition};
    use crate::toys::{LedWizEquivalentBinding, Trigger};

    fn manual_settings() -> Settings {
        Settings {
            auto_flush: false,
            ..Settings::default()
        }
    }

    fn topology() -> Topology {
        Topology {
            outputs: vec!["GI\\Playfield".to_string(), "Knocker".to_string()],
            devices: vec![],
            toys: vec![
                ToyDefinition::LedWizEquivalent {
                    name: "LedWizEquivalent 1".to_string(),
                    ledwiz_number: Some(1),
                    outputs: vec![LedWizEquivalentBinding::new(5, "GI\\Playfield")],
                    triggers: vec![],
                },
                ToyDefinition::Direct {
                    name: "Knocker".to_string(),
                    output: "Knocker".to_string(),
                    trigger: Some(Trigger::new(TableElementType::Solenoid, 7)),
                },
            ],
        }
    }

    fn pinball(topology: Topology, sink: Arc<MemorySink>) -> Pinball {
        Pinball::new(Box::new(StaticTopology(topology)), sink, manual_settings())
    }

    #[test]
    fn test_init_and_dispatch() {
        let sink = Arc::new(MemorySink::new());
        let mut pinball = pinball(topology(), sink.clone());
        pinball.init(Path::new("tables/afm.vpx"), "afm_113b").unwrap();

        assert!(pinball.is_initialized());
        assert_eq!(pinball.rom_name(), Some("afm_113b"));
        assert_eq!(pinball.table_name().as_deref(), Some("afm"));
        assert_eq!(pinball.toy_names(), vec!["LedWizEquivalent 1", "Knocker"]);

        pinball.receive_pinmame_data('S', 7, 1);
        assert_eq!(pinball.cabinet().value_by_name("Knocker"), Some(255));

        // Unknown tags are silently dropped
        pinball.receive_pinmame_data('Z', 7, 0);
        assert_eq!(pinball.cabinet().value_by_name("Knocker"), Some(255));

        pinball.set_legacy_output(1, 5, 128);
        assert_eq!(pinball.cabinet().value_by_name("GI\\Playfield"), Some(128));
        pinball.set_legacy_output(2, 5, 10);
        assert_eq!(pinball.cabinet().value_by_name("GI\\Playfield"), Some(128));
    }

    #[test]
    fn test_configuration_error_aborts_init() {
        let sink = Arc::new(MemorySink::new());
        let mut topology = topology();
        topology.outputs.retain(|o| o != "Knocker");
        let mut pinball = pinball(topology, sink);

        let err = pinball.init(Path::new("afm.vpx"), "afm_113b").unwrap_err();
        assert!(matches!(
            err,
            PinballError::Toy(ToyError::Configuration(
                ConfigurationError::UnresolvedOutput { .. }
            ))
        ));
        assert!(!pinball.is_initialized());
        assert!(pinball.cabinet().is_empty());
        assert!(pinball.toy_names().is_empty());
    }

    #[test]
    fn test_finish_is_idempotent_and_pushes_idle() {
        let sink = Arc::new(MemorySink::new());
        let mut pinball = pinball(topology(), sink.clone());
        pinball.init(Path::new("afm.vpx"), "afm_113b").unwrap();
        pinball.receive_pinmame_data('S', 7, 1);

        pinball.finish();
        assert_eq!(sink.value("Knocker"), Some(0));
        assert_eq!(sink.value("GI\\Playfield"), Some(0));
        assert!(!pinball.is_initialized());

        let writes = sink.write_count();
        pinball.finish();
        assert_eq!(sink.write_count(), writes);

        // Events after finish are ignored
        pinball.receive_pinmame_data('S', 7, 1);
        assert!(pinball.cabinet().is_empty());
    }

    #[test]
    fn test_reinit_rebuilds_session() {
        let sink = Arc::new(MemorySink::new());
        let mut pinball = pinball(topology(), sink);
        pinball.init(Path::new("afm.vpx"), "afm_113b").unwrap();
        pinball.receive_pinmame_data('S', 7, 1);

        pinball.init(Path::new("mm.vpx"), "mm_109c").unwrap();
        assert_eq!(pinball.rom_name(), Some("mm_109c"));
        assert_eq!(pinball.cabinet().value_by_name("Knocker"), Some(0));
        assert_eq!(pinball.toy_names().len(), 2);
    }
}
