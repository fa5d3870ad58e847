use std::sync::Arc;

use tracing::info;
use tracing::warn;

use super::router::TopicRouter;
use crate::dispatch::CommandSink;

/// Topic layout and requests of the zigbee bridge under one namespace
#[derive(Clone)]
pub struct Bridge {
    router: Arc<TopicRouter>,
    namespace: String,
}

impl Bridge {
    pub fn new(router: Arc<TopicRouter>, namespace: &str) -> Self {
        Self {
            router,
            namespace: namespace.to_string(),
        }
    }

    pub fn router(&self) -> &Arc<TopicRouter> {
        &self.router
    }

    /// Topic carrying the device roster snapshot
    pub fn devices_topic(&self) -> String {
        format!("{}/bridge/devices", self.namespace)
    }

    /// Filter covering every device state topic
    pub fn state_filter(&self) -> String {
        format!("{}/+", self.namespace)
    }

    /// Device name of a state topic, if `topic` is one
    pub fn device_of<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let name = topic
            .strip_prefix(self.namespace.as_str())?
            .strip_prefix('/')?;
        if name.is_empty() || name.contains('/') || name == "bridge" {
            return None;
        }
        Some(name)
    }

    fn publish_json(&self, topic: &str, payload: &serde_json::Value) {
        match serde_json::to_vec(payload) {
            Ok(bytes) => self.router.publish(topic, bytes),
            Err(e) => warn!("Failed to encode payload for {}: {}", topic, e),
        }
    }

    /// Send a `set` command to a device
    pub fn set_state(&self, device: &str, payload: &serde_json::Value) {
        self.publish_json(&format!("{}/{}/set", self.namespace, device), payload);
    }

    /// Ask the bridge to re-read a device's state
    pub fn refresh(&self, device: &str) {
        info!("Requesting state refresh for {}", device);
        self.router
            .publish(&format!("{}/{}/get", self.namespace, device), "{}");
    }

    /// Allow new devices to join for a while
    pub fn permit_join(&self) {
        info!("Opening network for joining");
        self.publish_json(
            &format!("{}/bridge/request/permit_join", self.namespace),
            &serde_json::json!({ "value": true, "time": 250 }),
        );
    }

    pub fn remove_device(&self, device: &str) {
        info!("Requesting removal of {}", device);
        self.publish_json(
            &format!("{}/bridge/request/device/remove", self.namespace),
            &serde_json::json!({ "id": device }),
        );
    }

    pub fn restart(&self) {
        info!("Requesting bridge restart");
        self.router
            .publish(&format!("{}/bridge/request/restart", self.namespace), "{}");
    }
}

impl CommandSink for Bridge {
    fn send_command(&self, device: &str, payload: &serde_json::Value) {
        self.set_state(device, payload);
    }
}
