//! Sensor and device definitions
//!
//! Sensors are read from a YAML list; each entry names a physical quantity,
//! its Home Assistant metadata, and the register window it is decoded from:
//!
//! ```yaml
//! - object_id: pv_power
//!   name: PV Power
//!   device_class: power
//!   state_class: measurement
//!   unit_of_measurement: W
//!   register: 0x9ca4
//!   size: 2
//!   scale: 0.1
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use mbsniff_common::{Quantity, QuantitySize};
use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

fn default_component() -> String {
    "sensor".to_string()
}

/// Device the sensors belong to, attached to every discovery payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Device {
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    #[serde(default, rename = "sw_version", skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
    /// Pairs such as `["mac", "02:42:ac:11:00:02"]`.
    #[serde(default)]
    pub connections: Vec<Vec<String>>,
}

/// One configured measurement.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Sensor {
    pub object_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,

    /// Home Assistant component, part of the topic path.
    #[serde(default = "default_component", skip_serializing)]
    pub component: String,

    #[serde(skip_serializing)]
    pub register: u16,
    #[serde(skip_serializing)]
    pub size: QuantitySize,
    #[serde(skip_serializing)]
    pub scale: f64,
    #[serde(default, skip_serializing)]
    pub offset: f64,
}

impl Sensor {
    #[must_use]
    pub fn quantity(&self) -> Quantity {
        Quantity::new(self.register, self.size, self.scale, self.offset)
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })
}

/// Load the sensor list from a YAML file.
///
/// # Errors
/// Returns an error if the file cannot be read or does not parse.
pub fn load_sensors(path: &Path) -> Result<Vec<Sensor>, ConfigError> {
    let text = read(path)?;
    serde_yml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

/// Load the device description from a YAML file.
///
/// # Errors
/// Returns an error if the file cannot be read or does not parse.
pub fn load_device(path: &Path) -> Result<Device, ConfigError> {
    let text = read(path)?;
    serde_yml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

/// Build the register-keyed quantity map a decoder owns.
///
/// # Errors
/// Returns [`ConfigError::DuplicateRegister`] if two sensors share a register.
pub fn quantity_map(sensors: &[Sensor]) -> Result<BTreeMap<u16, Quantity>, ConfigError> {
    let mut owners: BTreeMap<u16, &str> = BTreeMap::new();
    let mut quantities = BTreeMap::new();

    for sensor in sensors {
        if let Some(first) = owners.insert(sensor.register, &sensor.object_id) {
            return Err(ConfigError::DuplicateRegister {
                register: sensor.register,
                first: first.to_string(),
                second: sensor.object_id.clone(),
            });
        }
        quantities.insert(sensor.register, sensor.quantity());
    }

    Ok(quantities)
}

/// Index sensors by register for sinks that need their metadata.
#[must_use]
pub fn sensors_by_register(sensors: &[Sensor]) -> BTreeMap<u16, Sensor> {
    sensors.iter().map(|s| (s.register, s.clone())).collect()
}
