use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;
use tracing::info;

use super::category::CategoryGuesser;
use super::category::HeuristicGuesser;
use super::device::Device;
use super::device::DeviceCategory;
use super::device::DeviceSource;
use super::device::RosterEntry;
use super::diff::diff_states;
use super::diff::StateDiff;
use crate::value::parse_state;
use crate::value::DeviceState;

/// Result of applying one state message
#[derive(Debug, Clone)]
pub struct StateUpdate {
    pub device: String,
    pub old: DeviceState,
    pub new: DeviceState,
    pub diff: StateDiff,
    /// The device was not cached before this message
    pub created: bool,
}

/// Counts of what a roster snapshot changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RosterSummary {
    pub added: usize,
    pub renamed: usize,
    /// Provisional entries that received their real address
    pub adopted: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Malformed state payload for {device}: {source}")]
    MalformedPayload {
        device: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed device roster: {0}")]
    MalformedRoster(#[source] serde_json::Error),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

/// Last known state of every device
///
/// Devices are keyed by address; a second map resolves display names.
/// Both maps are sharded, so updates to unrelated devices do not contend.
pub struct DeviceStore {
    devices: DashMap<String, Device>,
    names: DashMap<String, String>,
    guesser: Box<dyn CategoryGuesser>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new(HeuristicGuesser)
    }
}

impl DeviceStore {
    pub fn new(guesser: impl CategoryGuesser + 'static) -> Self {
        Self {
            devices: DashMap::new(),
            names: DashMap::new(),
            guesser: Box::new(guesser),
        }
    }

    fn address_of(&self, name: &str) -> Option<String> {
        self.names.get(name).map(|address| address.value().clone())
    }

    /// Replace the cached state of `name` with `raw` and report what changed
    ///
    /// A payload that is not a JSON object leaves the cache untouched.
    pub fn apply_update(&self, name: &str, raw: &[u8]) -> Result<StateUpdate, StoreError> {
        let new = parse_state(raw).map_err(|source| StoreError::MalformedPayload {
            device: name.to_string(),
            source,
        })?;

        let address = self
            .names
            .entry(name.to_string())
            .or_insert_with(|| Device::provisional(name).ieee_address)
            .value()
            .clone();

        let mut created = false;
        let mut device = self.devices.entry(address).or_insert_with(|| {
            created = true;
            Device::provisional(name)
        });

        let old = std::mem::replace(&mut device.state, new.clone());
        device.last_seen = Some(Utc::now());

        if created {
            let category = self.guesser.guess(&device);
            debug!("New device {} guessed as {}", name, category);
            device.category = Some(category);
        }

        let diff = diff_states(&old, &new);

        Ok(StateUpdate {
            device: name.to_string(),
            old,
            new,
            diff,
            created,
        })
    }

    /// Merge a `bridge/devices` snapshot into the cache
    ///
    /// State, category and zone bookkeeping of known devices survive; devices
    /// missing from the snapshot are kept.
    pub fn apply_roster(&self, raw: &[u8]) -> Result<RosterSummary, StoreError> {
        let entries: Vec<RosterEntry> =
            serde_json::from_slice(raw).map_err(StoreError::MalformedRoster)?;

        let mut summary = RosterSummary::default();
        for entry in &entries {
            self.merge_entry(entry, &mut summary);
        }

        info!(
            "Merged roster of {} devices ({} added, {} renamed, {} adopted)",
            entries.len(),
            summary.added,
            summary.renamed,
            summary.adopted
        );
        Ok(summary)
    }

    fn merge_entry(&self, entry: &RosterEntry, summary: &mut RosterSummary) {
        let previous_name = self.devices.get_mut(&entry.ieee_address).map(|mut device| {
            device.device_type = entry.device_type.clone();
            device.definition = entry.definition.clone();
            std::mem::replace(&mut device.friendly_name, entry.friendly_name.clone())
        });

        if let Some(previous_name) = previous_name {
            if previous_name != entry.friendly_name {
                info!(
                    "Device {} renamed from {} to {}",
                    entry.ieee_address, previous_name, entry.friendly_name
                );
                self.names.remove(&previous_name);
                self.names
                    .insert(entry.friendly_name.clone(), entry.ieee_address.clone());
                summary.renamed += 1;
            }
            return;
        }

        let existing = self
            .address_of(&entry.friendly_name)
            .and_then(|address| self.devices.remove(&address))
            .map(|(_, device)| device);

        let device = match existing {
            Some(mut device) if device.is_provisional() => {
                debug!(
                    "Adopting {} as {}",
                    entry.friendly_name, entry.ieee_address
                );
                device.ieee_address = entry.ieee_address.clone();
                device.device_type = entry.device_type.clone();
                device.definition = entry.definition.clone();
                device.source = DeviceSource::Roster;
                summary.adopted += 1;
                device
            }
            _ => {
                let mut device = Device::from_roster(entry);
                device.category = Some(self.guesser.guess(&device));
                summary.added += 1;
                device
            }
        };

        self.names
            .insert(entry.friendly_name.clone(), entry.ieee_address.clone());
        self.devices.insert(entry.ieee_address.clone(), device);
    }

    pub fn get(&self, name: &str) -> Option<Device> {
        let address = self.address_of(name)?;
        self.devices.get(&address).map(|device| device.clone())
    }

    /// All cached devices, ordered by name
    pub fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .map(|device| device.value().clone())
            .collect();
        devices.sort_by(|a, b| a.friendly_name.cmp(&b.friendly_name));
        devices
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn remove(&self, name: &str) -> Option<Device> {
        let (_, address) = self.names.remove(name)?;
        self.devices.remove(&address).map(|(_, device)| device)
    }

    pub fn set_category(&self, name: &str, category: DeviceCategory) -> Result<(), StoreError> {
        let address = self
            .address_of(name)
            .ok_or_else(|| StoreError::UnknownDevice(name.to_string()))?;
        let mut device = self
            .devices
            .get_mut(&address)
            .ok_or_else(|| StoreError::UnknownDevice(name.to_string()))?;
        device.category = Some(category);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::value::Value;

    struct CountingGuesser(Arc<AtomicUsize>);

    impl CategoryGuesser for CountingGuesser {
        fn guess(&self, _device: &Device) -> DeviceCategory {
            self.0.fetch_add(1, Ordering::SeqCst);
            DeviceCategory::Sensor
        }
    }

    #[test]
    fn test_first_update_creates_provisional_device() {
        let store = DeviceStore::default();
        let update = store
            .apply_update("kitchen_sensor", br#"{"temperature": 21.5}"#)
            .unwrap();

        assert!(update.created);
        assert!(update.old.is_empty());
        assert_eq!(update.diff["temperature"], Some(Value::from(21.5)));

        let device = store.get("kitchen_sensor").unwrap();
        assert_eq!(device.ieee_address, "unknown_kitchen_sensor");
        assert_eq!(device.category, Some(DeviceCategory::Sensor));
        assert!(device.last_seen.is_some());
    }

    #[test]
    fn test_category_guessed_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = DeviceStore::new(CountingGuesser(calls.clone()));

        store.apply_update("a", br#"{"x": 1}"#).unwrap();
        store.apply_update("a", br#"{"x": 2}"#).unwrap();
        store.apply_update("a", br#"{"x": 3}"#).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_repeated_payload_is_idempotent() {
        let store = DeviceStore::default();
        let payload = br#"{"state": "ON", "brightness": 200}"#;

        assert!(!store.apply_update("lamp", payload).unwrap().diff.is_empty());
        let second = store.apply_update("lamp", payload).unwrap();
        assert!(second.diff.is_empty());
        assert!(!second.created);
        assert_eq!(second.old, second.new);
    }

    #[test]
    fn test_update_replaces_whole_state() {
        let store = DeviceStore::default();
        store
            .apply_update("lamp", br#"{"state": "ON", "brightness": 200}"#)
            .unwrap();
        let update = store.apply_update("lamp", br#"{"state": "ON"}"#).unwrap();

        assert_eq!(update.diff.len(), 1);
        assert_eq!(update.diff["brightness"], None);
        assert!(!store.get("lamp").unwrap().state.contains_key("brightness"));
    }

    #[test]
    fn test_malformed_payload_leaves_cache_untouched() {
        let store = DeviceStore::default();
        store.apply_update("lamp", br#"{"state": "ON"}"#).unwrap();

        let err = store.apply_update("lamp", b"not json").unwrap_err();
        assert!(matches!(err, StoreError::MalformedPayload { .. }));
        assert!(store.apply_update("ghost", b"[1]").is_err());

        assert_eq!(
            store.get("lamp").unwrap().state["state"],
            Value::from("ON")
        );
        assert!(!store.contains("ghost"));
    }

    #[test]
    fn test_roster_adopts_provisional_device() {
        let store = DeviceStore::default();
        store
            .apply_update("hall_light", br#"{"state": "ON", "brightness": 100}"#)
            .unwrap();
        store
            .set_category("hall_light", DeviceCategory::Switch)
            .unwrap();

        let summary = store
            .apply_roster(
                br#"[
                    {"ieee_address": "0x01", "friendly_name": "hall_light", "type": "Router"},
                    {"ieee_address": "0x02", "friendly_name": "door", "type": "EndDevice",
                     "definition": {"description": "Door sensor"}}
                ]"#,
            )
            .unwrap();

        assert_eq!(
            summary,
            RosterSummary {
                added: 1,
                renamed: 0,
                adopted: 1
            }
        );
        assert_eq!(store.len(), 2);

        let hall = store.get("hall_light").unwrap();
        assert_eq!(hall.ieee_address, "0x01");
        assert_eq!(hall.state["brightness"], Value::from(100.0));
        assert_eq!(hall.category, Some(DeviceCategory::Switch));
        assert_eq!(hall.source, DeviceSource::Roster);

        assert_eq!(
            store.get("door").unwrap().category,
            Some(DeviceCategory::Sensor)
        );
    }

    #[test]
    fn test_roster_rename_keeps_state() {
        let store = DeviceStore::default();
        store
            .apply_roster(br#"[{"ieee_address": "0x01", "friendly_name": "bulb"}]"#)
            .unwrap();
        store.apply_update("bulb", br#"{"state": "OFF"}"#).unwrap();

        let summary = store
            .apply_roster(br#"[{"ieee_address": "0x01", "friendly_name": "desk_lamp"}]"#)
            .unwrap();

        assert_eq!(summary.renamed, 1);
        assert!(store.get("bulb").is_none());
        assert_eq!(
            store.get("desk_lamp").unwrap().state["state"],
            Value::from("OFF")
        );
    }

    #[test]
    fn test_malformed_roster() {
        let store = DeviceStore::default();
        assert!(matches!(
            store.apply_roster(b"{}"),
            Err(StoreError::MalformedRoster(_))
        ));
    }

    #[test]
    fn test_remove() {
        let store = DeviceStore::default();
        store.apply_update("plug", br#"{"power": 3}"#).unwrap();

        let removed = store.remove("plug").unwrap();
        assert_eq!(removed.friendly_name, "plug");
        assert!(store.is_empty());
        assert!(store.remove("plug").is_none());
        assert!(matches!(
            store.set_category("plug", DeviceCategory::Switch),
            Err(StoreError::UnknownDevice(_))
        ));
    }
}
