//! Real-time fan-out of device diffs to websocket clients.

mod actor;
mod socket;

pub use actor::spawn;
pub use actor::ClientId;
pub use actor::Envelope;
pub use actor::Frame;
pub use actor::HubError;
pub use actor::HubHandle;
pub use socket::run_session;
