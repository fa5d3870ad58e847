use super::device::Device;
use super::device::DeviceCategory;

/// Assigns a category to a device the first time it is cached
pub trait CategoryGuesser: Send + Sync {
    fn guess(&self, device: &Device) -> DeviceCategory;
}

/// Keyword and property based guesser
///
/// Looks at the bridge description first, then the exposed features, then
/// the properties the device reports, and finally the zigbee node type.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicGuesser;

const DESCRIPTION_KEYWORDS: &[(&[&str], DeviceCategory)] = &[
    (&["light", "bulb", "lamp"], DeviceCategory::Light),
    (&["switch", "plug"], DeviceCategory::Switch),
    (&["sensor"], DeviceCategory::Sensor),
    (&["button", "remote"], DeviceCategory::Button),
    (&["door", "window", "contact"], DeviceCategory::DoorWindow),
    (&["motion", "occupancy"], DeviceCategory::Motion),
    (&["thermostat", "temperature control"], DeviceCategory::Thermostat),
];

impl HeuristicGuesser {
    fn from_description(description: &str) -> Option<DeviceCategory> {
        let description = description.to_lowercase();
        DESCRIPTION_KEYWORDS
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| description.contains(k)))
            .map(|(_, category)| *category)
    }

    fn from_exposes(exposes: &[serde_json::Value]) -> Option<DeviceCategory> {
        for expose in exposes {
            match expose.get("type").and_then(|t| t.as_str()) {
                Some("light") => return Some(DeviceCategory::Light),
                Some("switch") => return Some(DeviceCategory::Switch),
                Some("binary") => {
                    let property = expose
                        .get("property")
                        .and_then(|p| p.as_str())
                        .map(str::to_lowercase)
                        .unwrap_or_default();
                    match property.as_str() {
                        "contact" => return Some(DeviceCategory::DoorWindow),
                        "occupancy" | "motion" => return Some(DeviceCategory::Motion),
                        p if p.contains("state") => return Some(DeviceCategory::Switch),
                        _ => {}
                    }
                }
                _ => {}
            }

            let has_action = expose
                .get("features")
                .and_then(|f| f.as_array())
                .is_some_and(|features| {
                    features
                        .iter()
                        .any(|f| f.get("property").and_then(|p| p.as_str()) == Some("action"))
                });
            if has_action {
                return Some(DeviceCategory::Button);
            }
        }
        None
    }

    fn from_state(device: &Device) -> Option<DeviceCategory> {
        let has = |key: &str| device.state.contains_key(key);

        if has("state") && (has("brightness") || has("color")) {
            Some(DeviceCategory::Light)
        } else if has("temperature") || has("humidity") {
            Some(DeviceCategory::Sensor)
        } else if has("contact") {
            Some(DeviceCategory::DoorWindow)
        } else if has("motion") || has("occupancy") {
            Some(DeviceCategory::Motion)
        } else if has("action") {
            Some(DeviceCategory::Button)
        } else if has("power") {
            Some(DeviceCategory::Switch)
        } else {
            None
        }
    }

    fn from_node_type(device_type: &str) -> Option<DeviceCategory> {
        match device_type {
            "EndDevice" => Some(DeviceCategory::Sensor),
            "Router" => Some(DeviceCategory::Light),
            _ => None,
        }
    }
}

impl CategoryGuesser for HeuristicGuesser {
    fn guess(&self, device: &Device) -> DeviceCategory {
        let definition = device.definition.as_ref();

        definition
            .and_then(|d| d.description.as_deref())
            .and_then(Self::from_description)
            .or_else(|| definition.and_then(|d| Self::from_exposes(&d.exposes)))
            .or_else(|| Self::from_state(device))
            .or_else(|| device.device_type.as_deref().and_then(Self::from_node_type))
            .unwrap_or(DeviceCategory::Unknown)
    }
}
