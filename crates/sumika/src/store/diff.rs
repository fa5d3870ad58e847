use std::collections::BTreeMap;

use crate::value::DeviceState;
use crate::value::Value;

/// Field-level change set between two device states
///
/// `Some(value)` is a new or changed property, `None` a removed one (sent to
/// clients as `null`).
pub type StateDiff = BTreeMap<String, Option<Value>>;

/// Compute the properties that differ between `old` and `new`
pub fn diff_states(old: &DeviceState, new: &DeviceState) -> StateDiff {
    let mut diff = StateDiff::new();

    for (key, value) in new {
        if old.get(key) != Some(value) {
            diff.insert(key.clone(), Some(value.clone()));
        }
    }

    for key in old.keys() {
        if !new.contains_key(key) {
            diff.insert(key.clone(), None);
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::parse_state;

    fn state(json: &str) -> DeviceState {
        parse_state(json.as_bytes()).unwrap()
    }

    #[test]
    fn test_identical_states_have_empty_diff() {
        let s = state(r#"{"state": "ON", "brightness": 120, "color": {"x": 0.3}}"#);
        assert!(diff_states(&s, &s.clone()).is_empty());
    }

    #[test]
    fn test_changed_added_and_removed() {
        let old = state(r#"{"state": "ON", "brightness": 120, "linkquality": 40}"#);
        let new = state(r#"{"state": "OFF", "brightness": 120, "color_temp": 300}"#);

        let diff = diff_states(&old, &new);
        assert_eq!(diff.len(), 3);
        assert_eq!(diff["state"], Some(Value::from("OFF")));
        assert_eq!(diff["color_temp"], Some(Value::from(300.0)));
        assert_eq!(diff["linkquality"], None);
        assert!(!diff.contains_key("brightness"));
    }

    #[test]
    fn test_nested_objects_compare_deeply() {
        let old = state(r#"{"color": {"hue": 10, "saturation": 50}}"#);
        let same = state(r#"{"color": {"saturation": 50, "hue": 10.0}}"#);
        let moved = state(r#"{"color": {"hue": 11, "saturation": 50}}"#);

        assert!(diff_states(&old, &same).is_empty());
        assert_eq!(diff_states(&old, &moved).len(), 1);
    }

    #[test]
    fn test_removed_key_serializes_as_null() {
        let old = state(r#"{"battery": 90}"#);
        let new = state("{}");
        let json = serde_json::to_string(&diff_states(&old, &new)).unwrap();
        assert_eq!(json, r#"{"battery":null}"#);
    }
}
