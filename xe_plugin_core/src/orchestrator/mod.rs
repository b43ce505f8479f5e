mod outcome;
mod processor;
mod request;

pub use outcome::OperationOutcome;
pub use processor::Orchestrator;
pub use request::OperationRequest;
