use std::collections::BTreeMap;
use std::sync::PoisonError;
use std::sync::RwLock;

use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ZoneError {
    #[error("Zone not found: {0}")]
    NotFound(String),

    #[error("Zone already exists: {0}")]
    AlreadyExists(String),
}

/// Zone membership, device order within a zone is insertion order
#[derive(Debug, Default)]
pub struct ZoneRegistry {
    zones: RwLock<BTreeMap<String, Vec<String>>>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(zones: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            zones: RwLock::new(zones),
        }
    }

    pub fn create_zone(&self, zone: &str) -> Result<(), ZoneError> {
        let mut zones = self.zones.write().unwrap_or_else(PoisonError::into_inner);
        if zones.contains_key(zone) {
            return Err(ZoneError::AlreadyExists(zone.to_string()));
        }
        zones.insert(zone.to_string(), Vec::new());
        info!("Created zone {}", zone);
        Ok(())
    }

    pub fn delete_zone(&self, zone: &str) -> Result<(), ZoneError> {
        self.zones
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(zone)
            .map(|_| ())
            .ok_or_else(|| ZoneError::NotFound(zone.to_string()))
    }

    pub fn rename_zone(&self, from: &str, to: &str) -> Result<(), ZoneError> {
        let mut zones = self.zones.write().unwrap_or_else(PoisonError::into_inner);
        if zones.contains_key(to) {
            return Err(ZoneError::AlreadyExists(to.to_string()));
        }
        let devices = zones
            .remove(from)
            .ok_or_else(|| ZoneError::NotFound(from.to_string()))?;
        zones.insert(to.to_string(), devices);
        Ok(())
    }

    /// Replace the zones `device` belongs to, creating missing zones
    pub fn set_device_zones(&self, device: &str, zones: &[String]) {
        let mut all = self.zones.write().unwrap_or_else(PoisonError::into_inner);
        for (name, members) in all.iter_mut() {
            if !zones.contains(name) {
                members.retain(|d| d != device);
            }
        }
        for zone in zones {
            let members = all.entry(zone.clone()).or_default();
            if !members.iter().any(|d| d == device) {
                members.push(device.to_string());
            }
        }
    }

    /// Drop `device` from every zone
    pub fn remove_device(&self, device: &str) {
        self.set_device_zones(device, &[]);
    }

    pub fn zones_of(&self, device: &str) -> Vec<String> {
        self.zones
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, members)| members.iter().any(|d| d == device))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Members of `zone`, None if the zone does not exist
    pub fn devices_in(&self, zone: &str) -> Option<Vec<String>> {
        self.zones
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(zone)
            .cloned()
    }

    pub fn zone_names(&self) -> Vec<String> {
        self.zones
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}
