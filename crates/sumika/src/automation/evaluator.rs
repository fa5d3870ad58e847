use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use tracing::warn;

use super::model::Automation;
use super::model::AutomationError;
use super::model::ConditionKind;
use super::model::Trigger;
use super::store::AutomationStore;
use crate::buttons::PressDetector;
use crate::buttons::PressEvent;
use crate::buttons::PressSignal;
use crate::dispatch::Dispatcher;
use crate::value::DeviceState;
use crate::value::Value;

/// Whether a value condition holds for a transition of one property
///
/// `equals` and `changed` compare typed values, so `"20"` and `20` differ.
/// `greater_than` and `less_than` accept numeric strings. Press conditions
/// never hold here; they are decided by the press detector.
pub fn condition_met(trigger: &Trigger, old: Option<&Value>, new: &Value) -> bool {
    match trigger.condition {
        ConditionKind::Equals => trigger
            .value
            .as_ref()
            .is_some_and(|expected| new == expected),
        ConditionKind::GreaterThan => compare(trigger, new, |a, b| a > b),
        ConditionKind::LessThan => compare(trigger, new, |a, b| a < b),
        ConditionKind::Changed => match old {
            Some(old) => {
                old != new
                    && trigger
                        .previous_value
                        .as_ref()
                        .map_or(true, |previous| old == previous)
            }
            None => false,
        },
        ConditionKind::Pressed
        | ConditionKind::DoublePressed
        | ConditionKind::TriplePressed
        | ConditionKind::LongPressed => false,
    }
}

fn compare(trigger: &Trigger, new: &Value, op: impl Fn(f64, f64) -> bool) -> bool {
    match (new.as_f64(), trigger.value.as_ref().and_then(Value::as_f64)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

/// Matches device transitions and press events against enabled automations
pub struct Evaluator {
    automations: Arc<dyn AutomationStore>,
    presses: PressDetector,
    dispatcher: Arc<Dispatcher>,
}

impl Evaluator {
    pub fn new(
        automations: Arc<dyn AutomationStore>,
        presses: PressDetector,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            automations,
            presses,
            dispatcher,
        }
    }

    pub fn automations(&self) -> &Arc<dyn AutomationStore> {
        &self.automations
    }

    pub fn presses(&self) -> &PressDetector {
        &self.presses
    }

    /// Evaluate one state transition of `device`
    ///
    /// Value conditions are dispatched right away. Each watched button
    /// property is fed to the press detector once, however many automations
    /// watch it. Returns the number of automations dispatched.
    pub fn evaluate(&self, device: &str, old: &DeviceState, new: &DeviceState) -> usize {
        let automations = self.automations.enabled_for_device(device);
        let mut fed: HashSet<&str> = HashSet::new();
        let mut fired = 0;

        for automation in &automations {
            let trigger = &automation.trigger;
            let Some(current) = new.get(&trigger.property) else {
                continue;
            };

            if trigger.condition.press_kind().is_some() {
                if fed.insert(trigger.property.as_str()) {
                    if let Some(signal) = PressSignal::from_value(current) {
                        self.presses.signal(device, &trigger.property, signal);
                    }
                }
                continue;
            }

            if condition_met(trigger, old.get(&trigger.property), current) {
                info!(
                    "Automation '{}' triggered by {}.{} ({})",
                    automation.name, device, trigger.property, trigger.condition
                );
                self.run_action(automation);
                fired += 1;
            }
        }

        fired
    }

    /// Dispatch automations waiting for a classified press
    pub fn on_press(&self, event: &PressEvent) -> usize {
        let mut fired = 0;
        for automation in self.automations.enabled_for_device(&event.device) {
            if automation.watches(&event.device, &event.property)
                && automation.trigger.condition.press_kind() == Some(event.kind)
            {
                info!(
                    "Automation '{}' triggered by {} on {}.{}",
                    automation.name, event.kind, event.device, event.property
                );
                self.run_action(&automation);
                fired += 1;
            }
        }
        fired
    }

    /// Run an automation's action on demand, enabled or not
    pub fn run(&self, id: &str) -> Result<(), AutomationError> {
        let automation = self
            .automations
            .get(id)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))?;
        info!("Running automation '{}' on demand", automation.name);
        self.run_action(&automation);
        Ok(())
    }

    fn run_action(&self, automation: &Automation) {
        if let Err(e) = self.dispatcher.execute(&automation.action) {
            warn!("Automation '{}' action skipped: {}", automation.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::automation::Action;
    use crate::automation::AutomationSpec;
    use crate::automation::MemoryAutomationStore;
    use crate::config::ButtonsConfig;
    use crate::dispatch::CommandSink;
    use crate::dispatch::Directory;
    use crate::dispatch::SceneLibrary;
    use crate::dispatch::ZoneRegistry;
    use crate::store::DeviceStore;
    use crate::value::parse_state;

    fn trigger(condition: ConditionKind, value: Option<Value>) -> Trigger {
        Trigger {
            device_name: "sensor".to_string(),
            property: "temperature".to_string(),
            condition,
            value,
            previous_value: None,
        }
    }

    #[test]
    fn test_equals() {
        let t = trigger(ConditionKind::Equals, Some(Value::from(20.0)));
        assert!(condition_met(&t, None, &Value::from(20.0)));
        assert!(condition_met(&t, None, &Value::from(serde_json::json!(20))));
        assert!(!condition_met(&t, None, &Value::from("20")));
        assert!(!condition_met(&t, None, &Value::from(21.0)));

        let t = trigger(ConditionKind::Equals, Some(Value::from("20")));
        assert!(!condition_met(&t, None, &Value::from(20.0)));
        assert!(condition_met(&t, None, &Value::from("20")));

        let t = trigger(ConditionKind::Equals, Some(Value::from("ON")));
        assert!(condition_met(&t, None, &Value::from("ON")));
        assert!(!condition_met(&t, None, &Value::from("OFF")));
    }

    #[test]
    fn test_numeric_comparisons() {
        let gt = trigger(ConditionKind::GreaterThan, Some(Value::from(25.0)));
        assert!(condition_met(&gt, None, &Value::from(25.5)));
        assert!(condition_met(&gt, None, &Value::from("26")));
        assert!(!condition_met(&gt, None, &Value::from(25.0)));
        assert!(!condition_met(&gt, None, &Value::from("hot")));

        let lt = trigger(ConditionKind::LessThan, Some(Value::from("10")));
        assert!(condition_met(&lt, None, &Value::from(9.0)));
        assert!(!condition_met(&lt, None, &Value::Bool(false)));
    }

    #[test]
    fn test_changed() {
        let t = trigger(ConditionKind::Changed, None);
        assert!(!condition_met(&t, None, &Value::from(20.0)));
        assert!(!condition_met(&t, Some(&Value::from(20.0)), &Value::from(20.0)));
        assert!(condition_met(&t, Some(&Value::from(20.0)), &Value::from(21.0)));
        // A type change is a change even when the text reads the same
        assert!(condition_met(&t, Some(&Value::from("20")), &Value::from(20.0)));
        assert!(condition_met(&t, Some(&Value::from(20.0)), &Value::from("20")));

        let mut t = trigger(ConditionKind::Changed, None);
        t.previous_value = Some(Value::from("OFF"));
        assert!(condition_met(&t, Some(&Value::from("OFF")), &Value::from("ON")));
        assert!(!condition_met(&t, Some(&Value::from("DIM")), &Value::from("ON")));

        t.previous_value = Some(Value::from("1"));
        assert!(!condition_met(&t, Some(&Value::from(1.0)), &Value::from(0.0)));
    }

    #[test]
    fn test_press_conditions_never_hold_directly() {
        let t = trigger(ConditionKind::Pressed, None);
        assert!(!condition_met(&t, None, &Value::from("single")));
    }

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
        evaluator: Evaluator,
        sink: Arc<RecordingSink>,
        events: mpsc::UnboundedReceiver<PressEvent>,
    }

    fn fixture(specs: &[&str]) -> Fixture {
        let devices = Arc::new(DeviceStore::default());
        devices.apply_update("fan", br#"{"state": "OFF"}"#).unwrap();
        devices.apply_update("lamp", br#"{"state": "OFF"}"#).unwrap();

        let automations = MemoryAutomationStore::new();
        for spec in specs {
            let spec: AutomationSpec = serde_json::from_str(spec).unwrap();
            automations.create(spec).unwrap();
        }

        let sink = Arc::new(RecordingSink::default());
        let dispatcher = Dispatcher::new(
            Arc::new(Directory::new(Arc::new(ZoneRegistry::new()), devices)),
            Arc::new(SceneLibrary::new()),
            sink.clone(),
        );
        let (presses, events) = PressDetector::new(&ButtonsConfig::default());

        Fixture {
            evaluator: Evaluator::new(Arc::new(automations), presses, Arc::new(dispatcher)),
            sink,
            events,
        }
    }

    fn state(json: &str) -> DeviceState {
        parse_state(json.as_bytes()).unwrap()
    }

    const FAN_ON_HEAT: &str = r#"{
        "name": "Fan on heat",
        "trigger": {"device_name": "sensor", "property": "temperature", "condition": "greater_than", "value": 25},
        "action": {"device_name": "fan", "property": "state", "value": "ON"}
    }"#;

    #[test]
    fn test_value_trigger_dispatches() {
        let f = fixture(&[FAN_ON_HEAT]);

        let fired = f.evaluator.evaluate(
            "sensor",
            &state(r#"{"temperature": 24}"#),
            &state(r#"{"temperature": 26}"#),
        );
        assert_eq!(fired, 1);
        assert_eq!(
            *f.sink.sent.lock().unwrap(),
            vec![("fan".to_string(), serde_json::json!({"state": "ON"}))]
        );

        // Missing property or another device does nothing
        assert_eq!(
            f.evaluator
                .evaluate("sensor", &state("{}"), &state(r#"{"humidity": 50}"#)),
            0
        );
        assert_eq!(
            f.evaluator
                .evaluate("other", &state("{}"), &state(r#"{"temperature": 30}"#)),
            0
        );
    }

    #[test]
    fn test_disabled_automation_is_ignored() {
        let f = fixture(&[FAN_ON_HEAT]);
        let id = f.evaluator.automations().list()[0].id.clone();
        f.evaluator.automations().set_enabled(&id, false).unwrap();

        assert_eq!(
            f.evaluator
                .evaluate("sensor", &state("{}"), &state(r#"{"temperature": 30}"#)),
            0
        );

        f.evaluator.run(&id).unwrap();
        assert_eq!(f.sink.sent.lock().unwrap().len(), 1);
        assert!(matches!(
            f.evaluator.run("missing"),
            Err(AutomationError::NotFound(_))
        ));
    }

    #[test]
    fn test_failing_action_does_not_block_others() {
        let broken = r#"{
            "name": "Broken",
            "trigger": {"device_name": "sensor", "property": "temperature", "condition": "changed"},
            "action": {"device_name": "ghost", "property": "state", "value": "ON"}
        }"#;
        let f = fixture(&[broken, FAN_ON_HEAT]);

        let fired = f.evaluator.evaluate(
            "sensor",
            &state(r#"{"temperature": 20}"#),
            &state(r#"{"temperature": 30}"#),
        );
        assert_eq!(fired, 2);
        assert_eq!(f.sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_fed_once_per_property() {
        let single = r#"{
            "name": "Lamp on press",
            "trigger": {"device_name": "remote", "property": "action", "condition": "pressed"},
            "action": {"device_name": "lamp", "property": "state", "value": "ON"}
        }"#;
        let double = r#"{
            "name": "Fan on double press",
            "trigger": {"device_name": "remote", "property": "action", "condition": "double_pressed"},
            "action": {"device_name": "fan", "property": "state", "value": "ON"}
        }"#;
        let mut f = fixture(&[single, double]);

        let pressed = state(r#"{"action": "single"}"#);
        assert_eq!(f.evaluator.evaluate("remote", &pressed, &pressed), 0);
        assert_eq!(
            f.evaluator.presses().press_count("remote", "action"),
            Some(1)
        );
        assert!(f.sink.sent.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(700)).await;
        let event = f.events.try_recv().unwrap();
        assert_eq!(event.kind, crate::buttons::PressKind::Pressed);

        assert_eq!(f.evaluator.on_press(&event), 1);
        assert_eq!(
            *f.sink.sent.lock().unwrap(),
            vec![("lamp".to_string(), serde_json::json!({"state": "ON"}))]
        );
    }

    #[test]
    fn test_zone_action_shape_survives_store() {
        let f = fixture(&[r#"{
            "name": "All off",
            "trigger": {"device_name": "door", "property": "contact", "condition": "equals", "value": false},
            "action": {"zone": "hall", "property": "state", "value": "OFF"}
        }"#]);
        let automation = &f.evaluator.automations().list()[0];
        assert!(matches!(automation.action, Action::Zone { .. }));
    }
}
