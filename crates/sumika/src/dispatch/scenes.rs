use std::sync::PoisonError;
use std::sync::RwLock;

use serde::Deserialize;
use serde::Serialize;

/// Colour and level for one light of a scene
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneLight {
    /// 0-360
    pub hue: f64,
    /// 0-1
    pub saturation: f64,
    /// 0-254
    pub brightness: u8,
}

impl SceneLight {
    /// Command payload setting a light to this entry
    pub fn command(&self) -> serde_json::Value {
        serde_json::json!({
            "state": "ON",
            "brightness": self.brightness,
            "color": {
                "hue": self.hue,
                "saturation": self.saturation * 100.0,
            },
            "transition": 0.5,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub name: String,
    pub lights: Vec<SceneLight>,
    pub order: i64,
}

/// In-memory scene catalog, kept sorted by display order
#[derive(Debug, Default)]
pub struct SceneLibrary {
    scenes: RwLock<Vec<Scene>>,
}

impl SceneLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, name: &str, lights: Vec<SceneLight>, order: i64) -> Scene {
        let scene = Scene {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            lights,
            order,
        };
        let mut scenes = self.scenes.write().unwrap_or_else(PoisonError::into_inner);
        scenes.push(scene.clone());
        scenes.sort_by_key(|s| s.order);
        scene
    }

    pub fn remove(&self, id: &str) -> Option<Scene> {
        let mut scenes = self.scenes.write().unwrap_or_else(PoisonError::into_inner);
        let index = scenes.iter().position(|s| s.id == id)?;
        Some(scenes.remove(index))
    }

    pub fn list(&self) -> Vec<Scene> {
        self.scenes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn by_name(&self, name: &str) -> Option<Scene> {
        self.scenes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }
}
