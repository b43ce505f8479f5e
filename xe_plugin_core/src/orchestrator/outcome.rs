use crate::state::{ChangedPlugins, FailedPlugins, OperationState, OperationStatus};

/// Terminal result of an operation. A failed tool run is an outcome, not an
/// error.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    state: OperationState,
}

impl OperationOutcome {
    pub fn new(state: OperationState) -> Self {
        Self { state }
    }

    pub fn succeeded(&self) -> bool {
        self.state.status == OperationStatus::Succeeded
    }

    pub fn status(&self) -> OperationStatus {
        self.state.status
    }

    pub fn changed(&self) -> &ChangedPlugins {
        &self.state.changed
    }

    pub fn failed(&self) -> &FailedPlugins {
        &self.state.failed
    }

    pub fn state(&self) -> &OperationState {
        &self.state
    }

    pub fn into_state(self) -> OperationState {
        self.state
    }

    /// Process exit code for a command layer.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }
}
