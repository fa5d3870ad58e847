pub mod api;
pub mod automation;
pub mod buttons;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod hub;
pub mod router;
pub mod store;
pub mod value;

pub use config::Config;
pub use config::LogLevel;
pub use engine::Catalog;
pub use engine::Engine;
pub use value::DeviceState;
pub use value::Value;
