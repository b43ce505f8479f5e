use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cache clear fail.. check your system (exit code {0})")]
    CacheClearFailed(i32),

    #[error("Can not find the plugin({0}) that should be installed from the Market-place.")]
    PluginNotFound(String),

    #[error("Can not find version({version}) of the plugin({id}) that should be installed from the Market-place.")]
    VersionNotFound { id: String, version: String },

    #[error("Plugin {0} has no published release")]
    NoRelease(String),

    #[error("Invalid plugin target: {0:?}")]
    InvalidTarget(String),

    #[error("Plugin is not installed: {0}")]
    NotInstalled(String),

    #[error("Plugin is not activated: {0}")]
    NotActivated(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Empty command configured for {0}")]
    EmptyCommand(&'static str),

    #[error("Malformed state document {path}: {source}")]
    MalformedState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid key path: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
