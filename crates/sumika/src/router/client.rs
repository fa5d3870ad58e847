use async_trait::async_trait;

/// Message received from a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Broker client not connected. Call connect() first.")]
    NotConnected,

    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    #[error("Broker request failed: {0}")]
    Request(String),

    #[error("Invalid topic filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to listen on {0}")]
    Listen(String),
}

/// Connection to a message broker
///
/// Implemented by the embedded broker's inline client and by the rumqttc
/// client for remote brokers.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Connect to the broker
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Subscribe to a topic filter
    async fn subscribe(&mut self, filter: &str) -> Result<(), TransportError>;

    /// Publish a message to a topic
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Wait for the next message from subscribed filters
    ///
    /// Returns None once the client will not deliver any more messages.
    async fn poll_message(&mut self) -> Option<BrokerMessage>;
}

#[cfg(test)]
pub use mock::MockBrokerClient;
#[cfg(test)]
pub use mock::MockHandle;
