mod event;
mod record;

pub use event::{log_event, OperationEvent};
pub use record::{EventLog, EventRecord};
