//! Publish/subscribe routing over the embedded or an external broker.

mod bridge;
mod client;
mod embedded;
mod external;
mod listener;
mod router;
mod topic;

pub use bridge::Bridge;
pub use client::BrokerClient;
pub use client::BrokerMessage;
pub use client::TransportError;
pub use embedded::EmbeddedBroker;
pub use embedded::InlineClient;
pub use external::RumqttcClient;
pub use listener::MqttListener;
pub use router::Handler;
pub use router::TopicRouter;
pub use topic::is_valid_filter;
pub use topic::topic_matches;
