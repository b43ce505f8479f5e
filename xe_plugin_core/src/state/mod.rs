mod document;
mod lenient;
mod reason;
mod store;

pub use document::{
    ChangedPlugins, FailedPlugins, FailureMap, OperationMode, OperationState, OperationStatus,
    ToolReport, VersionMap,
};
pub use reason::ReasonCode;
pub use store::{StateStore, OPERATION_KEY};
pub(crate) use store::write_atomic;
