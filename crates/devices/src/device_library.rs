use std::collections::HashMap;

use crate::{output_layout, Device, DeviceOutput, DeviceProfile, DeviceType};

#[derive(Default)]
pub struct DeviceLibrary {
    pub profiles: HashMap<String, DeviceProfile>,
}

impl DeviceLibrary {
    pub fn new() -> Self {
        let mut profiles = HashMap::new();

        // Built-in controller profiles. Note in the future we'll load these from disk.
        profiles.insert(
            "ledwiz".to_string(),
            DeviceProfile {
                id: "ledwiz".to_string(),
                device_type: DeviceType::LedWiz,
                manufacturer: "GroovyGameGear".to_string(),
                model: "LED-Wiz".to_string(),
                output_layout: output_layout!(32),
                max_units: 16,
            },
        );

        profiles.insert(
            "pacled64".to_string(),
            DeviceProfile {
                id: "pacled64".to_string(),
                device_type: DeviceType::PacLed64,
                manufacturer: "Ultimarc".to_string(),
                model: "PacLed64".to_string(),
                output_layout: output_layout!(64),
                max_units: 4,
            },
        );

        profiles.insert(
            "pacdrive".to_string(),
            DeviceProfile {
                id: "pacdrive".to_string(),
                device_type: DeviceType::PacDrive,
                manufacturer: "Ultimarc".to_string(),
                model: "PacDrive".to_string(),
                output_layout: output_layout!(16),
                max_units: 1,
            },
        );

        // Ultimate I/O shares the PacLed64 protocol but is usually wired as a single unit.
        profiles.insert(
            "ultimate-io".to_string(),
            DeviceProfile {
                id: "ultimate-io".to_string(),
                device_type: DeviceType::Ultimate,
                manufacturer: "Ultimarc".to_string(),
                model: "Ultimate I/O".to_string(),
                output_layout: output_layout!(96),
                max_units: 1,
            },
        );

        DeviceLibrary { profiles }
    }

    pub fn add_profile(&mut self, profile: DeviceProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn get_profile(&self, id: &str) -> Option<&DeviceProfile> {
        self.profiles.get(id)
    }

    /// Create a device instance from a profile. Returns `None` for an unknown
    /// profile or a unit number outside `1..=max_units`.
    pub fn patch(&self, name: &str, profile_id: &str, number: u32) -> Option<Device> {
        let profile = self.profiles.get(profile_id)?;
        if number == 0 || number > profile.max_units {
            return None;
        }
        Some(Device::new(name, number, profile.clone()))
    }

    /// Create a device with a custom output layout, for controllers without a profile.
    pub fn patch_custom(name: &str, number: u32, outputs: Vec<DeviceOutput>) -> Device {
        let profile = DeviceProfile {
            id: "custom".to_string(),
            device_type: DeviceType::Other("Custom".to_string()),
            manufacturer: String::new(),
            model: name.to_string(),
            output_layout: outputs,
            max_units: u32::MAX,
        };
        Device::new(name, number, profile)
    }
}
