//! Device state cache and differ.

mod category;
mod device;
mod diff;
mod store;

pub use category::CategoryGuesser;
pub use category::HeuristicGuesser;
pub use device::Device;
pub use device::DeviceCategory;
pub use device::DeviceDefinition;
pub use device::DeviceSource;
pub use device::RosterEntry;
pub use diff::diff_states;
pub use diff::StateDiff;
pub use store::DeviceStore;
pub use store::RosterSummary;
pub use store::StateUpdate;
pub use store::StoreError;
