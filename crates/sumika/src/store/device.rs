use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::value::DeviceState;

/// Prefix of addresses assigned to devices seen before the roster
pub const PROVISIONAL_PREFIX: &str = "unknown_";

#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceCategory {
    Light,
    Switch,
    Sensor,
    Button,
    DoorWindow,
    Motion,
    Thermostat,
    #[default]
    Unknown,
}

/// Where the cache first learned about a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSource {
    Roster,
    StateMessage,
}

/// Static description announced by the bridge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub vendor: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub exposes: Vec<serde_json::Value>,
}

/// One entry of the `<ns>/bridge/devices` snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct RosterEntry {
    pub ieee_address: String,

    pub friendly_name: String,

    #[serde(rename = "type", default)]
    pub device_type: Option<String>,

    #[serde(default)]
    pub definition: Option<DeviceDefinition>,
}

/// Cached view of a physical device
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub ieee_address: String,
    pub friendly_name: String,
    pub state: DeviceState,
    pub zones: Vec<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub category: Option<DeviceCategory>,
    pub device_type: Option<String>,
    pub definition: Option<DeviceDefinition>,
    pub source: DeviceSource,
}

impl Device {
    /// Entry for a device that published state before the roster listed it
    pub fn provisional(name: &str) -> Self {
        Self {
            ieee_address: format!("{}{}", PROVISIONAL_PREFIX, name),
            friendly_name: name.to_string(),
            state: DeviceState::new(),
            zones: Vec::new(),
            last_seen: None,
            category: None,
            device_type: None,
            definition: None,
            source: DeviceSource::StateMessage,
        }
    }

    pub fn from_roster(entry: &RosterEntry) -> Self {
        Self {
            ieee_address: entry.ieee_address.clone(),
            friendly_name: entry.friendly_name.clone(),
            state: DeviceState::new(),
            zones: Vec::new(),
            last_seen: None,
            category: None,
            device_type: entry.device_type.clone(),
            definition: entry.definition.clone(),
            source: DeviceSource::Roster,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.ieee_address.starts_with(PROVISIONAL_PREFIX)
    }

    /// Whether the device accepts light commands
    pub fn is_light(&self) -> bool {
        ["brightness", "color", "color_temp"]
            .iter()
            .any(|key| self.state.contains_key(*key))
    }
}
