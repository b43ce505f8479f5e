pub mod config;
pub mod error;
pub mod event_log;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod state;
pub mod tool;

pub use config::Config;
pub use error::{Error, Result};
pub use event_log::{EventLog, OperationEvent};
pub use orchestrator::{OperationOutcome, OperationRequest, Orchestrator};
pub use registry::{PluginCatalog, PluginHost, PluginTarget};
pub use report::Report;
pub use state::{OperationMode, OperationState, OperationStatus, ReasonCode, StateStore};
pub use tool::{CacheInvalidator, ToolRunner};
