use super::{invocation::ToolInvocation, log::OperationLog};
use crate::error::Result;
use crate::state::ToolReport;
use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, Instant};

/// How the tool process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolExit {
    Exited(i32),
    /// Terminated by a signal we did not send.
    Signaled,
    /// Killed by the deadline watcher.
    TimedOut(Duration),
}

impl ToolExit {
    pub fn success(&self) -> bool {
        matches!(self, ToolExit::Exited(0))
    }
}

impl fmt::Display for ToolExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolExit::Exited(code) => write!(f, "exit code {}", code),
            ToolExit::Signaled => write!(f, "terminated by signal"),
            ToolExit::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub exit: ToolExit,
    pub report: ToolReport,
}

impl ToolOutcome {
    pub fn new(exit: ToolExit, report: ToolReport) -> Self {
        Self { exit, report }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Echo tool output to stdout as well as the log.
    pub foreground: bool,
    /// Hard deadline; `None` lets the tool run to completion.
    pub time_limit: Option<Duration>,
}

impl RunOptions {
    pub fn interactive() -> Self {
        Self {
            foreground: true,
            time_limit: None,
        }
    }

    pub fn detached(time_limit: Duration) -> Self {
        Self {
            foreground: false,
            time_limit: Some(time_limit),
        }
    }

    /// The same options with the time already spent since `started` taken
    /// off the limit, so consecutive steps share one deadline.
    pub fn remaining(self, started: Instant) -> Self {
        Self {
            time_limit: self
                .time_limit
                .map(|limit| limit.saturating_sub(started.elapsed())),
            ..self
        }
    }
}

/// Drives the external dependency tool.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        options: RunOptions,
        log: &OperationLog,
    ) -> Result<ToolOutcome>;
}

/// Clears the application caches ahead of a tool run. Returns the exit code.
///
/// The run options are the tool's, so a hung clear is bound by the same
/// deadline and process group rules.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn clear(&self, options: RunOptions, log: &OperationLog) -> Result<i32>;
}
