//! Parsed cabinet topology: which outputs exist and which toys bind to them.
//!
//! The config collaborator hands us a [`Topology`]; [`TopologySource`] is the
//! seam it plugs into. JSON is the on-disk form used by [`FileTopology`].

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::from_reader;
use tilt_devices::{Device, DeviceLibrary};

use crate::toys::{
    ConfigurationError, DirectToy, LedWizEquivalent, LedWizEquivalentBinding, LegacyTrigger,
    RgbToy, Toy, Trigger,
};

/// Global topology file looked up in the config directory.
pub const GLOBAL_TOPOLOGY_FILE: &str = "cabinet.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    /// Free-standing outputs not provided by a patched device.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
    /// Toys in dispatch order.
    #[serde(default)]
    pub toys: Vec<ToyDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    pub name: String,
    pub profile: String,
    pub number: u32,
}

fn white() -> [u8; 3] {
    [255, 255, 255]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToyDefinition {
    Direct {
        name: String,
        output: String,
        #[serde(default)]
        trigger: Option<Trigger>,
    },
    Rgb {
        name: String,
        red: String,
        green: String,
        blue: String,
        #[serde(default = "white")]
        color: [u8; 3],
        #[serde(default)]
        trigger: Option<Trigger>,
    },
    #[serde(rename = "ledwiz_equivalent")]
    LedWizEquivalent {
        name: String,
        #[serde(default)]
        ledwiz_number: Option<u32>,
        #[serde(default)]
        outputs: Vec<LedWizEquivalentBinding>,
        #[serde(default)]
        triggers: Vec<LegacyTrigger>,
    },
    /// Equivalent generated from the outputs of a patched device.
    #[serde(rename = "ledwiz_equivalent_device")]
    LedWizEquivalentDevice {
        device: String,
        #[serde(default)]
        triggers: Vec<LegacyTrigger>,
    },
}

impl Topology {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse topology")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open topology {}", path.display()))?;
        from_reader(file).with_context(|| format!("Failed to parse topology {}", path.display()))
    }

    /// Instantiate every declared device from the library.
    pub fn patch_devices(&self, library: &DeviceLibrary) -> Result<Vec<Device>, ConfigurationError> {
        self.devices
            .iter()
            .map(|d| {
                library
                    .patch(&d.name, &d.profile, d.number)
                    .ok_or_else(|| ConfigurationError::UnknownProfile {
                        device: d.name.clone(),
                        profile: d.profile.clone(),
                        number: d.number,
                    })
            })
            .collect()
    }

    /// Every output the cabinet must register: declared outputs first, then
    /// device outputs as `<device>\<output>`.
    pub fn output_names(&self, devices: &[Device]) -> Vec<String> {
        let mut names = self.outputs.clone();
        for device in devices {
            names.extend(device.output_paths());
        }
        names
    }

    /// Build the toys in declared order. LedWiz numbers must be unique so
    /// every equivalent stays reachable through legacy addressing.
    pub fn build_toys(&self, devices: &[Device]) -> Result<Vec<Box<dyn Toy>>, ConfigurationError> {
        let toys = self
            .toys
            .iter()
            .map(|definition| build_toy(definition, devices))
            .collect::<Result<Vec<_>, _>>()?;

        let mut numbers = HashSet::new();
        for number in toys.iter().filter_map(|t| t.legacy_number()) {
            if !numbers.insert(number) {
                return Err(ConfigurationError::DuplicateLedWizNumber(number));
            }
        }
        Ok(toys)
    }
}

fn build_toy(definition: &ToyDefinition, devices: &[Device]) -> Result<Box<dyn Toy>, ConfigurationError> {
    let toy: Box<dyn Toy> = match definition {
        ToyDefinition::Direct {
            name,
            output,
            trigger,
        } => Box::new(DirectToy::new(name, output, *trigger)),
        ToyDefinition::Rgb {
            name,
            red,
            green,
            blue,
            color,
            trigger,
        } => {
            let mut toy = RgbToy::new(name, red, green, blue).with_color(*color);
            if let Some(trigger) = trigger {
                toy = toy.with_trigger(*trigger);
            }
            Box::new(toy)
        }
        ToyDefinition::LedWizEquivalent {
            name,
            ledwiz_number,
            outputs,
            triggers,
        } => {
            let mut toy =
                LedWizEquivalent::new(name, outputs.iter().cloned())?.with_triggers(triggers.clone())?;
            if let Some(number) = ledwiz_number {
                toy = toy.with_ledwiz_number(*number);
            }
            Box::new(toy)
        }
        ToyDefinition::LedWizEquivalentDevice { device, triggers } => {
            let device = devices
                .iter()
                .find(|d| &d.name == device)
                .ok_or_else(|| ConfigurationError::UnknownDevice(device.clone()))?;
            Box::new(LedWizEquivalent::from_device(device)?.with_triggers(triggers.clone())?)
        }
    };
    Ok(toy)
}

/// Supplies the topology for a table session.
pub trait TopologySource: Send {
    fn load(&self, table: &Path, rom: &str) -> Result<Topology>;
}

/// Fixed in-memory topology, independent of the table.
pub struct StaticTopology(pub Topology);

impl TopologySource for StaticTopology {
    fn load(&self, _table: &Path, _rom: &str) -> Result<Topology> {
        Ok(self.0.clone())
    }
}

/// Looks for a table specific file next to the table (`<table>.json`), then
/// a ROM specific file (`<rom>.json`) and finally the global `cabinet.json`
/// in the config directory.
pub struct FileTopology {
    config_dir: PathBuf,
}

impl FileTopology {
    pub fn new(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    pub fn candidates(&self, table: &Path, rom: &str) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if table.file_stem().is_some() {
            candidates.push(table.with_extension("json"));
        }
        if !rom.is_empty() {
            candidates.push(self.config_dir.join(format!("{}.json", rom)));
        }
        candidates.push(self.config_dir.join(GLOBAL_TOPOLOGY_FILE));
        candidates
    }
}

impl TopologySource for FileTopology {
    fn load(&self, table: &Path, rom: &str) -> Result<Topology> {
        let candidates = self.candidates(table, rom);
        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| anyhow::anyhow!("No topology found, tried {:?}", candidates))?;
        log::info!("Loading topology from {}", path.display());
        Topology::load(path)
    }
}
