pub mod error;
pub mod history;
pub mod time_fmt;
pub mod types;

mod tests;

pub use error::DomainError;
pub use history::{HistoryEntry, TimestampedHistory};
pub use types::{DeploymentType, Document, EtlHealth, EtlName, EtlStatus, StateTag};
