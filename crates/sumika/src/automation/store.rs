use std::sync::PoisonError;
use std::sync::RwLock;

use chrono::Utc;
use tracing::info;

use super::model::Automation;
use super::model::AutomationError;
use super::model::AutomationSpec;

/// Registered automations
pub trait AutomationStore: Send + Sync {
    fn list(&self) -> Vec<Automation>;

    fn get(&self, id: &str) -> Option<Automation>;

    fn create(&self, spec: AutomationSpec) -> Result<Automation, AutomationError>;

    fn update(&self, id: &str, spec: AutomationSpec) -> Result<Automation, AutomationError>;

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<Automation, AutomationError>;

    fn delete(&self, id: &str) -> Result<(), AutomationError>;

    /// Enabled automations triggered by `device`
    fn enabled_for_device(&self, device: &str) -> Vec<Automation> {
        self.list()
            .into_iter()
            .filter(|a| a.enabled && a.trigger.device_name == device)
            .collect()
    }
}

/// In-memory automation store, in creation order
#[derive(Default)]
pub struct MemoryAutomationStore {
    automations: RwLock<Vec<Automation>>,
}

impl MemoryAutomationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, rejecting the first invalid automation
    pub fn with_automations(specs: Vec<AutomationSpec>) -> Result<Self, AutomationError> {
        let store = Self::new();
        for spec in specs {
            store.create(spec)?;
        }
        Ok(store)
    }

    fn modify<F>(&self, id: &str, f: F) -> Result<Automation, AutomationError>
    where
        F: FnOnce(&mut Automation),
    {
        let mut automations = self
            .automations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let automation = automations
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))?;
        f(automation);
        automation.updated_at = Utc::now();
        Ok(automation.clone())
    }
}

impl AutomationStore for MemoryAutomationStore {
    fn list(&self) -> Vec<Automation> {
        self.automations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn get(&self, id: &str) -> Option<Automation> {
        self.automations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    fn create(&self, spec: AutomationSpec) -> Result<Automation, AutomationError> {
        spec.validate()?;
        let automation = Automation::from_spec(spec, Utc::now());
        info!("Created automation '{}' ({})", automation.name, automation.id);
        self.automations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(automation.clone());
        Ok(automation)
    }

    fn update(&self, id: &str, spec: AutomationSpec) -> Result<Automation, AutomationError> {
        spec.validate()?;
        self.modify(id, |automation| {
            automation.name = spec.name;
            automation.description = spec.description;
            automation.enabled = spec.enabled;
            automation.trigger = spec.trigger;
            automation.action = spec.action;
        })
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<Automation, AutomationError> {
        self.modify(id, |automation| automation.enabled = enabled)
    }

    fn delete(&self, id: &str) -> Result<(), AutomationError> {
        let mut automations = self
            .automations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = automations.len();
        automations.retain(|a| a.id != id);
        if automations.len() == before {
            return Err(AutomationError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn enabled_for_device(&self, device: &str) -> Vec<Automation> {
        self.automations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|a| a.enabled && a.trigger.device_name == device)
            .cloned()
            .collect()
    }
}
