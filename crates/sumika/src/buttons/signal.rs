use serde::Serialize;

use crate::value::Value;

/// Raw button activity reported in a device property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressSignal {
    /// Button went down and is expected to come back up
    Down,
    /// Complete click reported by the device
    Click,
    /// Button released
    Up,
    /// Device detected a long press itself
    Hold,
}

impl PressSignal {
    /// Interpret a property value as button activity
    ///
    /// Anything that is not recognisable button activity (including the
    /// empty `action` reset some bridges send) yields None.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(true) => Some(PressSignal::Down),
            Value::Bool(false) => Some(PressSignal::Up),
            Value::String(s) => match s.to_lowercase().as_str() {
                "press" => Some(PressSignal::Down),
                "on" | "single" | "click" => Some(PressSignal::Click),
                "off" | "release" => Some(PressSignal::Up),
                "hold" | "long" => Some(PressSignal::Hold),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PressKind {
    Pressed,
    DoublePressed,
    TriplePressed,
    LongPressed,
}

impl PressKind {
    /// Classification of a finished click sequence
    pub fn from_count(count: u32) -> Self {
        match count {
            0 | 1 => PressKind::Pressed,
            2 => PressKind::DoublePressed,
            _ => PressKind::TriplePressed,
        }
    }
}

/// One classified physical interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PressEvent {
    pub device: String,
    pub property: String,
    pub kind: PressKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals() {
        assert_eq!(
            PressSignal::from_value(&Value::Bool(true)),
            Some(PressSignal::Down)
        );
        assert_eq!(
            PressSignal::from_value(&Value::from("single")),
            Some(PressSignal::Click)
        );
        assert_eq!(
            PressSignal::from_value(&Value::from("ON")),
            Some(PressSignal::Click)
        );
        assert_eq!(
            PressSignal::from_value(&Value::from("release")),
            Some(PressSignal::Up)
        );
        assert_eq!(
            PressSignal::from_value(&Value::from("hold")),
            Some(PressSignal::Hold)
        );
        assert_eq!(PressSignal::from_value(&Value::from("")), None);
        assert_eq!(PressSignal::from_value(&Value::from("brightness_up")), None);
        assert_eq!(PressSignal::from_value(&Value::from(1.0)), None);
    }

    #[test]
    fn test_classification() {
        assert_eq!(PressKind::from_count(1), PressKind::Pressed);
        assert_eq!(PressKind::from_count(2), PressKind::DoublePressed);
        assert_eq!(PressKind::from_count(5), PressKind::TriplePressed);
        assert_eq!(PressKind::DoublePressed.to_string(), "double_pressed");
    }
}
