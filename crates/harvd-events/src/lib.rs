pub mod bus;
pub mod event;
pub mod query;

pub use bus::{EventBus, ListenerId};
pub use event::{Event, EventKind};
pub use query::{Answer, Query, QueryKind};
