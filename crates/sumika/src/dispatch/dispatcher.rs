use std::sync::Arc;

use tracing::debug;
use tracing::info;

use super::scenes::Scene;
use super::scenes::SceneLibrary;
use super::zones::ZoneRegistry;
use crate::automation::Action;
use crate::store::DeviceCategory;
use crate::store::DeviceStore;
use crate::value::Value;

/// Resolves device and zone targets
pub trait ZoneDirectory: Send + Sync {
    fn device_exists(&self, device: &str) -> bool;

    /// Members of `zone`, optionally restricted to one category; None for an
    /// unknown zone
    fn devices_in_zone(&self, zone: &str, category: Option<DeviceCategory>)
        -> Option<Vec<String>>;

    /// Light-capable members of `zone` in zone order
    fn light_devices(&self, zone: &str) -> Option<Vec<String>>;
}

pub trait SceneCatalog: Send + Sync {
    fn scene_by_name(&self, name: &str) -> Option<Scene>;
}

/// Outbound device commands
pub trait CommandSink: Send + Sync {
    /// Fire-and-forget `payload` to `device`
    fn send_command(&self, device: &str, payload: &serde_json::Value);
}

impl SceneCatalog for SceneLibrary {
    fn scene_by_name(&self, name: &str) -> Option<Scene> {
        self.by_name(name)
    }
}

/// [`ZoneDirectory`] over the zone registry and the device cache
pub struct Directory {
    zones: Arc<ZoneRegistry>,
    devices: Arc<DeviceStore>,
}

impl Directory {
    pub fn new(zones: Arc<ZoneRegistry>, devices: Arc<DeviceStore>) -> Self {
        Self { zones, devices }
    }
}

impl ZoneDirectory for Directory {
    fn device_exists(&self, device: &str) -> bool {
        self.devices.contains(device)
    }

    fn devices_in_zone(
        &self,
        zone: &str,
        category: Option<DeviceCategory>,
    ) -> Option<Vec<String>> {
        let members = self.zones.devices_in(zone)?;
        Some(match category {
            None => members,
            Some(category) => members
                .into_iter()
                .filter(|name| {
                    self.devices
                        .get(name)
                        .is_some_and(|d| d.category == Some(category))
                })
                .collect(),
        })
    }

    fn light_devices(&self, zone: &str) -> Option<Vec<String>> {
        let members = self.zones.devices_in(zone)?;
        Some(
            members
                .into_iter()
                .filter(|name| self.devices.get(name).is_some_and(|d| d.is_light()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Unknown zone: {0}")]
    UnknownZone(String),

    #[error("Unknown scene: {0}")]
    UnknownScene(String),

    #[error("Scene {0} has no lights")]
    EmptyScene(String),

    #[error("No matching devices in zone {0}")]
    NoTargets(String),
}

/// Turns actions into device commands
pub struct Dispatcher {
    directory: Arc<dyn ZoneDirectory>,
    scenes: Arc<dyn SceneCatalog>,
    sink: Arc<dyn CommandSink>,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<dyn ZoneDirectory>,
        scenes: Arc<dyn SceneCatalog>,
        sink: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            directory,
            scenes,
            sink,
        }
    }

    /// Send the commands for `action`, returning how many went out
    pub fn execute(&self, action: &Action) -> Result<usize, DispatchError> {
        match action {
            Action::Device {
                device,
                property,
                value,
            } => {
                if !self.directory.device_exists(device) {
                    return Err(DispatchError::UnknownDevice(device.clone()));
                }
                self.sink.send_command(device, &property_command(property, value));
                Ok(1)
            }
            Action::Zone {
                zone,
                category,
                property,
                value,
            } => {
                let devices = self
                    .directory
                    .devices_in_zone(zone, *category)
                    .ok_or_else(|| DispatchError::UnknownZone(zone.clone()))?;
                if devices.is_empty() {
                    return Err(DispatchError::NoTargets(zone.clone()));
                }

                let payload = property_command(property, value);
                for device in &devices {
                    self.sink.send_command(device, &payload);
                }
                info!("Sent {} to {} devices in {}", property, devices.len(), zone);
                Ok(devices.len())
            }
            Action::Scene { zone, scene } => self.apply_scene(zone, scene),
        }
    }

    /// Apply scene entries to the zone's lights in order, cycling the entries
    /// when the zone has more lights than the scene
    fn apply_scene(&self, zone: &str, name: &str) -> Result<usize, DispatchError> {
        let scene = self
            .scenes
            .scene_by_name(name)
            .ok_or_else(|| DispatchError::UnknownScene(name.to_string()))?;
        if scene.lights.is_empty() {
            return Err(DispatchError::EmptyScene(name.to_string()));
        }

        let lights = self
            .directory
            .light_devices(zone)
            .ok_or_else(|| DispatchError::UnknownZone(zone.to_string()))?;
        if lights.is_empty() {
            return Err(DispatchError::NoTargets(zone.to_string()));
        }

        for (i, device) in lights.iter().enumerate() {
            let entry = &scene.lights[i % scene.lights.len()];
            debug!("Scene {} light {} -> {}", name, i, device);
            self.sink.send_command(device, &entry.command());
        }
        info!("Applied scene {} to {} lights in {}", name, lights.len(), zone);
        Ok(lights.len())
    }
}

fn property_command(property: &str, value: &Value) -> serde_json::Value {
    let mut payload = serde_json::Map::new();
    payload.insert(property.to_string(), value.to_json());
    serde_json::Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::dispatch::SceneLight;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl CommandSink for RecordingSink {
        fn send_command(&self, device: &str, payload: &serde_json::Value) {
            self.sent
                .lock()
                .unwrap()
                .push((device.to_string(), payload.clone()));
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        sink: Arc<RecordingSink>,
        scenes: Arc<SceneLibrary>,
    }

    fn fixture() -> Fixture {
        let devices = Arc::new(DeviceStore::default());
        devices
            .apply_update("lamp_1", br#"{"state": "ON", "brightness": 10}"#)
            .unwrap();
        devices
            .apply_update("lamp_2", br#"{"state": "ON", "brightness": 80, "color_temp": 300}"#)
            .unwrap();
        devices
            .apply_update("lamp_3", br#"{"state": "OFF", "color": {"hue": 1}}"#)
            .unwrap();
        devices
            .apply_update("plug", br#"{"state": "ON", "power": 12}"#)
            .unwrap();

        let zones = Arc::new(ZoneRegistry::new());
        for device in ["lamp_1", "plug", "lamp_2", "lamp_3"] {
            zones.set_device_zones(device, &["living".to_string()]);
        }
        zones.create_zone("empty").unwrap();

        let scenes = Arc::new(SceneLibrary::new());
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = Dispatcher::new(
            Arc::new(Directory::new(zones, devices)),
            scenes.clone(),
            sink.clone(),
        );
        Fixture {
            dispatcher,
            sink,
            scenes,
        }
    }

    impl Fixture {
        fn sent(&self) -> Vec<(String, serde_json::Value)> {
            self.sink.sent.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_device_action() {
        let f = fixture();
        let action = Action::Device {
            device: "plug".to_string(),
            property: "state".to_string(),
            value: Value::from("OFF"),
        };

        assert_eq!(f.dispatcher.execute(&action), Ok(1));
        assert_eq!(
            f.sent(),
            vec![("plug".to_string(), serde_json::json!({"state": "OFF"}))]
        );
    }

    #[test]
    fn test_unknown_device_is_skipped() {
        let f = fixture();
        let action = Action::Device {
            device: "ghost".to_string(),
            property: "state".to_string(),
            value: Value::from("OFF"),
        };

        assert_eq!(
            f.dispatcher.execute(&action),
            Err(DispatchError::UnknownDevice("ghost".to_string()))
        );
        assert!(f.sent().is_empty());
    }

    #[test]
    fn test_zone_action_with_category() {
        let f = fixture();
        let action = Action::Zone {
            zone: "living".to_string(),
            category: Some(DeviceCategory::Light),
            property: "brightness".to_string(),
            value: Value::from(50.0),
        };

        assert_eq!(f.dispatcher.execute(&action), Ok(3));
        let devices: Vec<String> = f.sent().into_iter().map(|(d, _)| d).collect();
        assert_eq!(devices, vec!["lamp_1", "lamp_2", "lamp_3"]);
        assert_eq!(f.sent()[0].1, serde_json::json!({"brightness": 50}));
    }

    #[test]
    fn test_zone_action_without_category() {
        let f = fixture();
        let action = Action::Zone {
            zone: "living".to_string(),
            category: None,
            property: "state".to_string(),
            value: Value::from("OFF"),
        };
        assert_eq!(f.dispatcher.execute(&action), Ok(4));

        let missing = Action::Zone {
            zone: "attic".to_string(),
            category: None,
            property: "state".to_string(),
            value: Value::from("OFF"),
        };
        assert_eq!(
            f.dispatcher.execute(&missing),
            Err(DispatchError::UnknownZone("attic".to_string()))
        );
    }

    #[test]
    fn test_scene_entries_follow_zone_order() {
        let f = fixture();
        let entries = vec![
            SceneLight {
                hue: 10.0,
                saturation: 1.0,
                brightness: 100,
            },
            SceneLight {
                hue: 200.0,
                saturation: 0.25,
                brightness: 50,
            },
        ];
        f.scenes.add("Sunset", entries.clone(), 0);

        let action = Action::Scene {
            zone: "living".to_string(),
            scene: "Sunset".to_string(),
        };
        assert_eq!(f.dispatcher.execute(&action), Ok(3));

        assert_eq!(
            f.sent(),
            vec![
                ("lamp_1".to_string(), entries[0].command()),
                ("lamp_2".to_string(), entries[1].command()),
                ("lamp_3".to_string(), entries[0].command()),
            ]
        );
    }

    #[test]
    fn test_scene_application_is_repeatable() {
        let f = fixture();
        let entries = vec![
            SceneLight {
                hue: 30.0,
                saturation: 0.5,
                brightness: 200,
            },
            SceneLight {
                hue: 120.0,
                saturation: 1.0,
                brightness: 80,
            },
            SceneLight {
                hue: 240.0,
                saturation: 0.1,
                brightness: 10,
            },
        ];
        f.scenes.add("Movie", entries.clone(), 0);
        let action = Action::Scene {
            zone: "living".to_string(),
            scene: "Movie".to_string(),
        };

        for _ in 0..3 {
            assert_eq!(f.dispatcher.execute(&action), Ok(3));
        }

        let expected = vec![
            ("lamp_1".to_string(), entries[0].command()),
            ("lamp_2".to_string(), entries[1].command()),
            ("lamp_3".to_string(), entries[2].command()),
        ];
        let sent = f.sent();
        assert_eq!(sent.len(), 9);
        for run in sent.chunks(3) {
            assert_eq!(run, expected.as_slice());
        }
        assert_eq!(
            sent[0].1,
            serde_json::json!({
                "state": "ON",
                "brightness": 200,
                "color": {"hue": 30.0, "saturation": 50.0},
                "transition": 0.5
            })
        );
    }

    #[test]
    fn test_scene_errors() {
        let f = fixture();
        let unknown = Action::Scene {
            zone: "living".to_string(),
            scene: "Disco".to_string(),
        };
        assert_eq!(
            f.dispatcher.execute(&unknown),
            Err(DispatchError::UnknownScene("Disco".to_string()))
        );

        f.scenes.add(
            "Dim",
            vec![SceneLight {
                hue: 0.0,
                saturation: 0.0,
                brightness: 10,
            }],
            0,
        );
        let empty_zone = Action::Scene {
            zone: "empty".to_string(),
            scene: "Dim".to_string(),
        };
        assert_eq!(
            f.dispatcher.execute(&empty_zone),
            Err(DispatchError::NoTargets("empty".to_string()))
        );
        assert!(f.sent().is_empty());
    }
}
