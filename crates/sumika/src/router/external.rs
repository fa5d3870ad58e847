use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::EventLoop;
use rumqttc::MqttOptions;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use super::client::BrokerClient;
use super::client::BrokerMessage;
use super::client::TransportError;
use crate::config::BrokerConfig;

/// How long the first connection attempt may take
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<Mutex<Vec<String>>>;

/// Remote broker client using rumqttc
///
/// rumqttc reconnects on its own when the event loop is polled after an
/// error; every filter subscribed so far is re-requested on each ConnAck.
pub struct RumqttcClient {
    /// MQTT connection options (stored for lazy initialization)
    mqtt_options: MqttOptions,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Message receiver (created in connect())
    message_rx: Option<mpsc::UnboundedReceiver<BrokerMessage>>,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,

    subscriptions: Subscriptions,
}

impl RumqttcClient {
    pub fn new(config: &BrokerConfig) -> Self {
        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);

        mqtt_options.set_keep_alive(Duration::from_secs(30));

        // Roster snapshots of large networks get big
        mqtt_options.set_max_packet_size(2 * 1024 * 1024, 2 * 1024 * 1024);

        if let Some(username) = &config.username {
            let password = config.password.clone().unwrap_or_default();
            mqtt_options.set_credentials(username, password);
        }

        Self {
            mqtt_options,
            client: None,
            message_rx: None,
            event_loop_task: None,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client.as_ref().ok_or(TransportError::NotConnected)
    }

    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), TransportError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(TransportError::Connect(e.to_string())),
            }
        }
    }

    async fn run_event_loop(
        mut event_loop: EventLoop,
        client: AsyncClient,
        subscriptions: Subscriptions,
        message_tx: mpsc::UnboundedSender<BrokerMessage>,
    ) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let msg = BrokerMessage {
                        topic: publish.topic.to_string(),
                        payload: publish.payload.to_vec(),
                        retain: publish.retain,
                    };

                    if message_tx.send(msg).is_err() {
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    let filters = subscriptions
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    info!("Reconnected to broker, resubscribing {} filters", filters.len());
                    for filter in filters {
                        if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                            warn!("Failed to resubscribe to {}: {}", filter, e);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Broker event loop error: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!("Broker event loop task exiting");
    }
}

#[async_trait]
impl BrokerClient for RumqttcClient {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let (client, mut event_loop) = AsyncClient::new(self.mqtt_options.clone(), 10);

        tokio::time::timeout(CONNECT_TIMEOUT, Self::wait_for_connack(&mut event_loop))
            .await
            .map_err(|_| TransportError::Connect("timed out waiting for ConnAck".to_string()))??;

        info!(
            "Connected to broker {}:{}",
            self.mqtt_options.broker_address().0,
            self.mqtt_options.broker_address().1
        );

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Self::run_event_loop(
            event_loop,
            client.clone(),
            self.subscriptions.clone(),
            message_tx,
        ));

        if let Some(previous) = self.event_loop_task.replace(task) {
            previous.abort();
        }
        self.client = Some(client);
        self.message_rx = Some(message_rx);

        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), TransportError> {
        {
            let mut subscriptions = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !subscriptions.iter().any(|f| f == filter) {
                subscriptions.push(filter.to_string());
            }
        }

        self.client()?
            .subscribe(filter, QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client()?
            .publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn poll_message(&mut self) -> Option<BrokerMessage> {
        match &mut self.message_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}
