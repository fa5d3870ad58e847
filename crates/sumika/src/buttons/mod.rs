//! Button press classification.

mod detector;
mod scheduler;
mod signal;

pub use detector::PressDetector;
pub use scheduler::ScheduledTask;
pub use scheduler::Scheduler;
pub use signal::PressEvent;
pub use signal::PressKind;
pub use signal::PressSignal;
