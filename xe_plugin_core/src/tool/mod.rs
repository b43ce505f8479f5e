mod invocation;
mod log;
mod process;
mod runner;

pub use invocation::ToolInvocation;
pub use log::OperationLog;
pub use process::{ignore_client_abort, CommandCacheInvalidator, ProcessRunner, REPORT_ENV};
pub use runner::{CacheInvalidator, RunOptions, ToolExit, ToolOutcome, ToolRunner};
