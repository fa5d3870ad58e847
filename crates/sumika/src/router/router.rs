use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::Weak;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::BrokerClient;
use super::client::BrokerMessage;
use super::client::TransportError;
use super::topic::topic_matches;

/// Callback invoked with the topic and raw payload of a matching message
pub type Handler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

enum Outbound {
    Subscribe(String),
    Publish(BrokerMessage),
}

/// Single publish/subscribe surface over whichever broker client is in use
///
/// One handler per literal pattern; every handler whose pattern matches an
/// inbound topic is invoked once. Publishing is fire-and-forget: requests
/// are queued to the transport task and failures are only logged.
pub struct TopicRouter {
    handlers: RwLock<Vec<(String, Handler)>>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TopicRouter {
    /// Connect `client` and spawn the transport task
    ///
    /// A failed first connection is returned to the caller.
    pub async fn start(
        mut client: Box<dyn BrokerClient>,
    ) -> Result<(Arc<Self>, JoinHandle<()>), TransportError> {
        client.connect().await?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let router = Arc::new(Self {
            handlers: RwLock::new(Vec::new()),
            outbound,
        });

        let task = tokio::spawn(Self::run(Arc::downgrade(&router), client, outbound_rx));
        Ok((router, task))
    }

    async fn run(
        router: Weak<Self>,
        mut client: Box<dyn BrokerClient>,
        mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    ) {
        let mut inbound_open = true;

        loop {
            tokio::select! {
                request = outbound_rx.recv() => match request {
                    Some(Outbound::Subscribe(filter)) => {
                        if let Err(e) = client.subscribe(&filter).await {
                            warn!("Failed to subscribe to {}: {}", filter, e);
                        }
                    }
                    Some(Outbound::Publish(msg)) => {
                        if let Err(e) = client.publish(&msg.topic, &msg.payload, msg.retain).await {
                            warn!("Failed to publish to {}: {}", msg.topic, e);
                        }
                    }
                    None => break,
                },
                msg = client.poll_message(), if inbound_open => match msg {
                    Some(msg) => {
                        let Some(router) = router.upgrade() else {
                            break;
                        };
                        router.dispatch(&msg.topic, &msg.payload);
                    }
                    None => {
                        warn!("Broker client stopped delivering messages");
                        inbound_open = false;
                    }
                },
            }
        }

        info!("Topic router task exiting");
    }

    /// Register `handler` for `pattern`, replacing any previous handler
    pub fn subscribe<F>(&self, pattern: &str, handler: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let is_new = {
            let mut handlers = self
                .handlers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match handlers.iter_mut().find(|(p, _)| p == pattern) {
                Some(entry) => {
                    entry.1 = handler;
                    false
                }
                None => {
                    handlers.push((pattern.to_string(), handler));
                    true
                }
            }
        };

        if is_new {
            info!("Subscribing to {}", pattern);
            if self
                .outbound
                .send(Outbound::Subscribe(pattern.to_string()))
                .is_err()
            {
                warn!("Transport task gone, {} only routed locally", pattern);
            }
        } else {
            debug!("Replaced handler for {}", pattern);
        }
    }

    /// Queue a message for the broker
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let msg = BrokerMessage {
            topic: topic.to_string(),
            payload: payload.into(),
            retain: false,
        };
        debug!("Publishing to {}", topic);
        if self.outbound.send(Outbound::Publish(msg)).is_err() {
            warn!("Transport task gone, dropping message for {}", topic);
        }
    }

    /// Invoke every handler whose pattern matches `topic`
    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        let matched: Vec<Handler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(pattern, _)| topic_matches(pattern, topic))
            .map(|(_, handler)| handler.clone())
            .collect();

        if matched.is_empty() {
            debug!("No handler for {}", topic);
        }
        for handler in matched {
            handler(topic, payload);
        }
    }

    pub fn patterns(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(pattern, _)| pattern.clone())
            .collect()
    }
}
