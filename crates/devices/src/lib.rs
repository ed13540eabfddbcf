use serde::{Deserialize, Serialize};

mod device_library;

pub use device_library::DeviceLibrary;

/// A patched output controller with a fixed, numbered output space.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    /// Unit number of the controller (e.g. LedWiz 1..16).
    pub number: u32,
    pub profile: DeviceProfile,
    pub outputs: Vec<DeviceOutput>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    LedWiz,
    PacLed64,
    PacDrive,
    Ultimate,
    Other(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub id: String,
    pub device_type: DeviceType,
    pub manufacturer: String,
    pub model: String,
    pub output_layout: Vec<DeviceOutput>,
    /// Highest unit number the controller family supports.
    pub max_units: u32,
}

/// One numbered output of a fixed-address controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOutput {
    pub name: String,
    /// Legacy address of the output, 1-based.
    pub number: u32,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DeviceType::LedWiz => write!(f, "LedWiz"),
            DeviceType::PacLed64 => write!(f, "PacLed64"),
            DeviceType::PacDrive => write!(f, "PacDrive"),
            DeviceType::Ultimate => write!(f, "Ultimate"),
            DeviceType::Other(s) => write!(f, "Other({})", s),
        }
    }
}

impl std::fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.manufacturer, self.model)
    }
}

impl Device {
    pub fn new(name: &str, number: u32, profile: DeviceProfile) -> Self {
        Device {
            name: name.to_string(),
            number,
            outputs: profile.output_layout.clone(),
            profile,
        }
    }

    /// Full registry name of an output: `<device>\<output>`.
    pub fn output_path(&self, output: &DeviceOutput) -> String {
        format!("{}\\{}", self.name, output.name)
    }

    /// Registry names of every output, in address order.
    pub fn output_paths(&self) -> Vec<String> {
        self.outputs.iter().map(|o| self.output_path(o)).collect()
    }

    pub fn output_by_number(&self, number: u32) -> Option<&DeviceOutput> {
        self.outputs.iter().find(|o| o.number == number)
    }
}

/// Builds `count` outputs named `01`, `02`, ... with matching 1-based numbers.
#[macro_export]
macro_rules! output_layout {
    ($count:expr) => {
        (1..=$count)
            .map(|number: u32| $crate::DeviceOutput {
                name: format!("{:02}", number),
                number,
            })
            .collect::<Vec<$crate::DeviceOutput>>()
    };
}
