pub mod context;
pub mod eventlog;
pub mod logging;
pub mod paths;
pub mod timekeeper;


pub use context::{ContextHandle, ServiceContext, ServiceSpec};
pub use eventlog::EventLog;
pub use paths::ServicePaths;
pub use timekeeper::TimeKeeper;
