//! Trigger/action automations.

mod evaluator;
mod model;
mod store;

pub use evaluator::condition_met;
pub use evaluator::Evaluator;
pub use model::Action;
pub use model::ActionSpec;
pub use model::Automation;
pub use model::AutomationError;
pub use model::AutomationSpec;
pub use model::ConditionKind;
pub use model::Trigger;
pub use store::AutomationStore;
pub use store::MemoryAutomationStore;
