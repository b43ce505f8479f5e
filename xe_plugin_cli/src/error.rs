//! Error types for the xe-plugin command line.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] xe_plugin_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
