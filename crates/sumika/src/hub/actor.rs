use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::store::StateDiff;

pub type ClientId = u64;

/// Encoded envelope shared by every client queue
pub type Frame = Arc<str>;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Broadcast hub stopped")]
    Stopped,

    #[error("Write timed out")]
    WriteTimeout,

    #[error("Write failed: {0}")]
    Write(String),

    #[error("No frame received within {0:?}")]
    ReadTimeout(std::time::Duration),

    #[error("Read failed: {0}")]
    Read(String),
}

/// Wire form of one device update
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub device_name: &'a str,
    pub state: &'a StateDiff,
    pub timestamp: String,
}

impl<'a> Envelope<'a> {
    pub fn device_update(device_name: &'a str, state: &'a StateDiff) -> Self {
        Self {
            kind: "device_update",
            device_name,
            state,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

enum Command {
    Register {
        capacity: usize,
        reply: oneshot::Sender<(ClientId, mpsc::Receiver<Frame>)>,
    },
    Unregister(ClientId),
    Broadcast {
        device: String,
        diff: StateDiff,
    },
    ClientCount(oneshot::Sender<usize>),
}

/// Cheap handle to the hub actor
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<Command>,
}

/// Owns the client registry; only reachable through [`HubHandle`]
struct Hub {
    clients: HashMap<ClientId, mpsc::Sender<Frame>>,
    next_id: ClientId,
}

/// Spawn the hub actor
///
/// The actor exits once every [`HubHandle`] is dropped.
pub fn spawn() -> (HubHandle, JoinHandle<()>) {
    let (commands, rx) = mpsc::unbounded_channel();
    let hub = Hub {
        clients: HashMap::new(),
        next_id: 1,
    };
    let task = tokio::spawn(hub.run(rx));
    (HubHandle { commands }, task)
}

impl Hub {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Register { capacity, reply } => {
                    let id = self.next_id;
                    self.next_id += 1;
                    let (tx, queue) = mpsc::channel(capacity.max(1));
                    if reply.send((id, queue)).is_ok() {
                        self.clients.insert(id, tx);
                        info!("Client {} registered ({} connected)", id, self.clients.len());
                    }
                }
                Command::Unregister(id) => {
                    if self.clients.remove(&id).is_some() {
                        info!("Client {} unregistered ({} connected)", id, self.clients.len());
                    }
                }
                Command::Broadcast { device, diff } => self.broadcast(&device, &diff),
                Command::ClientCount(reply) => {
                    let _ = reply.send(self.clients.len());
                }
            }
        }
        debug!("Broadcast hub exiting");
    }

    fn broadcast(&mut self, device: &str, diff: &StateDiff) {
        let frame: Frame = match serde_json::to_string(&Envelope::device_update(device, diff)) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!("Failed to encode update for {}: {}", device, e);
                return;
            }
        };

        self.clients
            .retain(|id, tx| match tx.try_send(frame.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Client {} is not keeping up, disconnecting", id);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Client {} queue closed", id);
                    false
                }
            });
    }
}

impl HubHandle {
    /// Add a client whose queue holds at most `capacity` envelopes
    pub async fn register(
        &self,
        capacity: usize,
    ) -> Result<(ClientId, mpsc::Receiver<Frame>), HubError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Register { capacity, reply })
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }

    pub fn unregister(&self, id: ClientId) {
        let _ = self.commands.send(Command::Unregister(id));
    }

    /// Queue a diff for every connected client
    pub fn broadcast(&self, device: &str, diff: &StateDiff) {
        let command = Command::Broadcast {
            device: device.to_string(),
            diff: diff.clone(),
        };
        if self.commands.send(command).is_err() {
            warn!("Broadcast hub stopped, dropping update for {}", device);
        }
    }

    pub async fn client_count(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ClientCount(reply))
            .map_err(|_| HubError::Stopped)?;
        rx.await.map_err(|_| HubError::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn diff(brightness: f64) -> StateDiff {
        StateDiff::from([
            ("brightness".to_string(), Some(Value::from(brightness))),
            ("color".to_string(), None),
        ])
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let (hub, _task) = spawn();
        let (_id, mut queue) = hub.register(4).await.unwrap();

        hub.broadcast("lamp", &diff(120.0));
        let frame = queue.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(json["type"], "device_update");
        assert_eq!(json["device_name"], "lamp");
        assert_eq!(
            json["state"],
            serde_json::json!({"brightness": 120, "color": null})
        );
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_slow_client_is_dropped_alone() {
        let (hub, _task) = spawn();
        let (_fast_id, mut fast) = hub.register(2).await.unwrap();
        let (_slow_id, mut slow) = hub.register(2).await.unwrap();
        assert_eq!(hub.client_count().await.unwrap(), 2);

        for i in 0..5 {
            hub.broadcast("lamp", &diff(i as f64));
            // The fast client keeps draining
            if i > 0 {
                assert!(fast.recv().await.is_some());
            }
        }
        assert!(fast.recv().await.is_some());
        assert_eq!(hub.client_count().await.unwrap(), 1);

        // The slow client got what fit, then its queue was closed
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());

        hub.broadcast("lamp", &diff(99.0));
        let frame = fast.recv().await.unwrap();
        assert!(frame.contains("99"));
    }

    #[tokio::test]
    async fn test_unregister_and_closed_queue() {
        let (hub, _task) = spawn();
        let (first, _queue) = hub.register(4).await.unwrap();
        let (second, queue) = hub.register(4).await.unwrap();
        assert_ne!(first, second);

        hub.unregister(first);
        assert_eq!(hub.client_count().await.unwrap(), 1);

        drop(queue);
        hub.broadcast("lamp", &diff(1.0));
        assert_eq!(hub.client_count().await.unwrap(), 0);
    }
}
