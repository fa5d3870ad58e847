use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::buttons::PressKind;
use crate::store::DeviceCategory;
use crate::value::Value;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConditionKind {
    Equals,
    GreaterThan,
    LessThan,
    Changed,
    Pressed,
    DoublePressed,
    TriplePressed,
    LongPressed,
}

impl ConditionKind {
    /// Press classification this condition waits for, if it is a press condition
    pub fn press_kind(self) -> Option<PressKind> {
        match self {
            ConditionKind::Pressed => Some(PressKind::Pressed),
            ConditionKind::DoublePressed => Some(PressKind::DoublePressed),
            ConditionKind::TriplePressed => Some(PressKind::TriplePressed),
            ConditionKind::LongPressed => Some(PressKind::LongPressed),
            _ => None,
        }
    }

    pub fn needs_value(self) -> bool {
        matches!(
            self,
            ConditionKind::Equals | ConditionKind::GreaterThan | ConditionKind::LessThan
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub device_name: String,

    pub property: String,

    pub condition: ConditionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// For `changed`: only fire when the old value was this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<Value>,
}

/// What a satisfied automation does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ActionSpec", into = "ActionSpec")]
pub enum Action {
    Device {
        device: String,
        property: String,
        value: Value,
    },
    Zone {
        zone: String,
        category: Option<DeviceCategory>,
        property: String,
        value: Value,
    },
    Scene {
        zone: String,
        scene: String,
    },
}

/// Flat wire form of an [`Action`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scene_zone: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scene_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub property: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl TryFrom<ActionSpec> for Action {
    type Error = AutomationError;

    fn try_from(spec: ActionSpec) -> Result<Self, Self::Error> {
        let targets = [&spec.device_name, &spec.zone, &spec.scene_zone]
            .iter()
            .filter(|target| !target.is_empty())
            .count();
        match targets {
            0 => return Err(AutomationError::NoTarget),
            1 => {}
            _ => return Err(AutomationError::MultipleTargets),
        }

        if !spec.scene_zone.is_empty() {
            if spec.scene_name.is_empty() {
                return Err(AutomationError::MissingActionField("scene_name"));
            }
            return Ok(Action::Scene {
                zone: spec.scene_zone,
                scene: spec.scene_name,
            });
        }

        if spec.property.is_empty() {
            return Err(AutomationError::MissingActionField("property"));
        }
        let value = spec
            .value
            .ok_or(AutomationError::MissingActionField("value"))?;

        if !spec.device_name.is_empty() {
            return Ok(Action::Device {
                device: spec.device_name,
                property: spec.property,
                value,
            });
        }

        let category = match spec.category.as_str() {
            "" => None,
            name => Some(
                DeviceCategory::from_str(name)
                    .map_err(|_| AutomationError::InvalidCategory(name.to_string()))?,
            ),
        };

        Ok(Action::Zone {
            zone: spec.zone,
            category,
            property: spec.property,
            value,
        })
    }
}

impl From<Action> for ActionSpec {
    fn from(action: Action) -> Self {
        match action {
            Action::Device {
                device,
                property,
                value,
            } => ActionSpec {
                device_name: device,
                property,
                value: Some(value),
                ..Default::default()
            },
            Action::Zone {
                zone,
                category,
                property,
                value,
            } => ActionSpec {
                zone,
                category: category.map(|c| c.to_string()).unwrap_or_default(),
                property,
                value: Some(value),
                ..Default::default()
            },
            Action::Scene { zone, scene } => ActionSpec {
                scene_zone: zone,
                scene_name: scene,
                ..Default::default()
            },
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// User-supplied part of an automation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub trigger: Trigger,

    pub action: Action,
}

impl AutomationSpec {
    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.name.trim().is_empty() {
            return Err(AutomationError::MissingName);
        }
        if self.trigger.device_name.is_empty() {
            return Err(AutomationError::MissingTriggerField("device_name"));
        }
        if self.trigger.property.is_empty() {
            return Err(AutomationError::MissingTriggerField("property"));
        }
        if self.trigger.condition.needs_value() && self.trigger.value.is_none() {
            return Err(AutomationError::MissingTriggerValue(self.trigger.condition));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automation {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub trigger: Trigger,
    pub action: Action,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Automation {
    pub fn from_spec(spec: AutomationSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: spec.name,
            description: spec.description,
            enabled: spec.enabled,
            trigger: spec.trigger,
            action: spec.action,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this automation reacts to `property` of `device`
    pub fn watches(&self, device: &str, property: &str) -> bool {
        self.trigger.device_name == device && self.trigger.property == property
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AutomationError {
    #[error("Automation name is required")]
    MissingName,

    #[error("Trigger {0} is required")]
    MissingTriggerField(&'static str),

    #[error("Condition {0} requires a comparison value")]
    MissingTriggerValue(ConditionKind),

    #[error("Action has no target")]
    NoTarget,

    #[error("Action must have exactly one target")]
    MultipleTargets,

    #[error("Action {0} is required")]
    MissingActionField(&'static str),

    #[error("Unknown device category: {0}")]
    InvalidCategory(String),

    #[error("Automation not found: {0}")]
    NotFound(String),
}
