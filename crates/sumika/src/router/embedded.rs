use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;

use super::client::BrokerClient;
use super::client::BrokerMessage;
use super::client::TransportError;
use super::topic::is_valid_filter;
use super::topic::topic_matches;

struct Session {
    client_id: String,
    filters: Vec<String>,
    tx: mpsc::UnboundedSender<BrokerMessage>,
}

#[derive(Default)]
struct BrokerState {
    sessions: Mutex<HashMap<u64, Session>>,
    retained: Mutex<BTreeMap<String, Vec<u8>>>,
    next_session: AtomicU64,
}

/// In-process broker
///
/// Delivers each published message once to every session with a matching
/// filter and keeps the last retained message per topic. The hub talks to it
/// through in-process [`InlineClient`]s; other processes reach it over TCP
/// through [`MqttListener`](super::MqttListener).
#[derive(Clone, Default)]
pub struct EmbeddedBroker {
    state: Arc<BrokerState>,
}

impl EmbeddedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client bound to this broker; it attaches on `connect()`
    pub fn client(&self, client_id: &str) -> InlineClient {
        InlineClient {
            broker: self.clone(),
            client_id: client_id.to_string(),
            session: None,
            rx: None,
        }
    }

    /// Route a message to every matching session
    pub fn publish(&self, topic: &str, payload: &[u8], retain: bool) {
        if retain {
            let mut retained = self
                .state
                .retained
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if payload.is_empty() {
                retained.remove(topic);
            } else {
                retained.insert(topic.to_string(), payload.to_vec());
            }
        }

        let mut sessions = self
            .state
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut closed = Vec::new();
        for (id, session) in sessions.iter() {
            if !session.filters.iter().any(|f| topic_matches(f, topic)) {
                continue;
            }
            let msg = BrokerMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                retain: false,
            };
            if session.tx.send(msg).is_err() {
                closed.push(*id);
            }
        }

        for id in closed {
            if let Some(session) = sessions.remove(&id) {
                debug!("Dropping closed session of {}", session.client_id);
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.state
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(super) fn attach(&self, client_id: &str) -> (u64, mpsc::UnboundedReceiver<BrokerMessage>) {
        let id = self.state.next_session.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Session {
                    client_id: client_id.to_string(),
                    filters: Vec::new(),
                    tx,
                },
            );
        info!("Client {} attached to embedded broker", client_id);
        (id, rx)
    }

    pub(super) fn add_filter(&self, session: u64, filter: &str) -> Result<(), TransportError> {
        let mut sessions = self
            .state
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let session = sessions
            .get_mut(&session)
            .ok_or(TransportError::NotConnected)?;

        if !session.filters.iter().any(|f| f == filter) {
            session.filters.push(filter.to_string());
        }

        let retained = self
            .state
            .retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (topic, payload) in retained.iter() {
            if topic_matches(filter, topic) {
                let msg = BrokerMessage {
                    topic: topic.clone(),
                    payload: payload.clone(),
                    retain: true,
                };
                if session.tx.send(msg).is_err() {
                    break;
                }
            }
        }
        Ok(())
    }

    pub(super) fn remove_filter(&self, session: u64, filter: &str) {
        if let Some(session) = self
            .state
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&session)
        {
            session.filters.retain(|f| f != filter);
        }
    }

    pub(super) fn detach(&self, session: u64) {
        self.state
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session);
    }
}

/// In-process connection to an [`EmbeddedBroker`]
pub struct InlineClient {
    broker: EmbeddedBroker,
    client_id: String,
    session: Option<u64>,
    rx: Option<mpsc::UnboundedReceiver<BrokerMessage>>,
}

#[async_trait]
impl BrokerClient for InlineClient {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if let Some(session) = self.session.take() {
            self.broker.detach(session);
        }
        let (session, rx) = self.broker.attach(&self.client_id);
        self.session = Some(session);
        self.rx = Some(rx);
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        if !is_valid_filter(filter) {
            return Err(TransportError::InvalidFilter(filter.to_string()));
        }
        let session = self.session.ok_or(TransportError::NotConnected)?;
        self.broker.add_filter(session, filter)
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.session.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.broker.publish(topic, payload, retain);
        Ok(())
    }

    async fn poll_message(&mut self) -> Option<BrokerMessage> {
        match &mut self.rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for InlineClient {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.broker.detach(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivers_to_matching_sessions_once() {
        let broker = EmbeddedBroker::new();
        let mut hub = broker.client("hub");
        let mut other = broker.client("other");
        hub.connect().await.unwrap();
        other.connect().await.unwrap();

        hub.subscribe("zb2m/+").await.unwrap();
        hub.subscribe("zb2m/#").await.unwrap();
        other.subscribe("unrelated/#").await.unwrap();

        other.publish("zb2m/lamp", b"{}", false).await.unwrap();

        let msg = hub.poll_message().await.unwrap();
        assert_eq!(msg.topic, "zb2m/lamp");
        assert!(hub.rx.as_mut().unwrap().try_recv().is_err());
        assert!(other.rx.as_mut().unwrap().try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publisher_receives_own_message() {
        let broker = EmbeddedBroker::new();
        let mut hub = broker.client("hub");
        hub.connect().await.unwrap();
        hub.subscribe("zb2m/+/set").await.unwrap();

        hub.publish("zb2m/lamp/set", br#"{"state":"ON"}"#, false)
            .await
            .unwrap();

        assert_eq!(hub.poll_message().await.unwrap().topic, "zb2m/lamp/set");
    }

    #[tokio::test]
    async fn test_retained_messages() {
        let broker = EmbeddedBroker::new();
        broker.publish("zb2m/bridge/devices", b"[]", true);
        broker.publish("zb2m/bridge/state", b"online", true);
        broker.publish("zb2m/bridge/state", b"", true);

        let mut hub = broker.client("hub");
        hub.connect().await.unwrap();
        hub.subscribe("zb2m/bridge/#").await.unwrap();

        let msg = hub.poll_message().await.unwrap();
        assert_eq!(msg.topic, "zb2m/bridge/devices");
        assert!(msg.retain);
        assert!(hub.rx.as_mut().unwrap().try_recv().is_err());
    }

    #[tokio::test]
    async fn test_requires_connect() {
        let broker = EmbeddedBroker::new();
        let mut hub = broker.client("hub");
        assert!(matches!(
            hub.subscribe("a/b").await,
            Err(TransportError::NotConnected)
        ));
        assert!(hub.poll_message().await.is_none());
    }

    #[tokio::test]
    async fn test_rejects_invalid_filter() {
        let broker = EmbeddedBroker::new();
        let mut hub = broker.client("hub");
        hub.connect().await.unwrap();
        assert!(matches!(
            hub.subscribe("a/#/b").await,
            Err(TransportError::InvalidFilter(_))
        ));
    }

    #[tokio::test]
    async fn test_drop_detaches() {
        let broker = EmbeddedBroker::new();
        let mut hub = broker.client("hub");
        hub.connect().await.unwrap();
        assert_eq!(broker.session_count(), 1);
        drop(hub);
        assert_eq!(broker.session_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_filter_stops_delivery() {
        let broker = EmbeddedBroker::new();
        let mut hub = broker.client("hub");
        hub.connect().await.unwrap();
        hub.subscribe("zb2m/+").await.unwrap();

        let session = hub.session.unwrap();
        broker.remove_filter(session, "zb2m/+");
        broker.publish("zb2m/lamp", b"{}", false);

        assert!(hub.rx.as_mut().unwrap().try_recv().is_err());
    }
}
