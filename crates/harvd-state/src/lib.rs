pub mod machine;
pub mod progress;

pub use machine::{CommandOutcome, ServiceState, StateMachine};
pub use progress::ProgressReport;
