use crate::error::Result;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TIME_LIMIT_SECS: u64 = 900;

/// Runtime configuration for the orchestrator.
///
/// Relative paths are resolved against `project_root` by [`Config::resolve`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project_root: PathBuf,
    /// The state document shared with pollers.
    pub state_file: PathBuf,
    /// Directory receiving one `plugin-<timestamp>.log` per operation.
    pub log_dir: PathBuf,
    pub plugins_dir: PathBuf,
    /// Activation records for locally installed plugins.
    pub activation_file: PathBuf,
    /// Marketplace catalog snapshot (JSON).
    pub catalog: PathBuf,
    /// Console invocations run in the foreground without a deadline.
    pub interactive: bool,
    pub tool: ToolConfig,
    pub cache: CacheConfig,
    pub operation: OperationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Program followed by any leading arguments.
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    /// Wall-clock budget in seconds for non-interactive runs.
    pub time_limit: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            state_file: PathBuf::from("storage/app/plugins.operation.json"),
            log_dir: PathBuf::from("storage/logs"),
            plugins_dir: PathBuf::from("plugins"),
            activation_file: PathBuf::from("storage/app/plugins.activated.json"),
            catalog: PathBuf::from("storage/app/catalog.json"),
            interactive: true,
            tool: ToolConfig::default(),
            cache: CacheConfig::default(),
            operation: OperationConfig::default(),
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            command: vec!["composer".to_string()],
            env: BTreeMap::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "php".to_string(),
                "artisan".to_string(),
                "cache:clear".to_string(),
            ],
        }
    }
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            time_limit: DEFAULT_TIME_LIMIT_SECS,
        }
    }
}

impl Config {
    /// Load a TOML configuration file; `None` yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                debug!("Loading configuration from {:?}", path);
                let raw = std::fs::read_to_string(path)?;
                toml::from_str::<Config>(&raw)?
            }
            None => Config::default(),
        };
        Ok(config.resolve())
    }

    /// Anchor every relative path at `project_root`.
    pub fn resolve(mut self) -> Self {
        let root = self.project_root.clone();
        for path in [
            &mut self.state_file,
            &mut self.log_dir,
            &mut self.plugins_dir,
            &mut self.activation_file,
            &mut self.catalog,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
        self
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.operation.time_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::load(None).unwrap();
        assert!(config.interactive);
        assert_eq!(config.tool.command, vec!["composer"]);
        assert_eq!(config.time_limit(), Duration::from_secs(900));
        assert_eq!(
            config.state_file,
            PathBuf::from("./storage/app/plugins.operation.json")
        );
    }

    #[test]
    fn test_partial_file_resolves_against_root() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
project_root = "/srv/xe"
log_dir = "/var/log/xe"
interactive = false

[tool]
command = ["php", "composer.phar"]
env = {{ COMPOSER_HOME = "/srv/xe/.composer" }}

[operation]
time_limit = 30
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert!(!config.interactive);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/xe"));
        assert_eq!(config.plugins_dir, PathBuf::from("/srv/xe/plugins"));
        assert_eq!(config.tool.command, vec!["php", "composer.phar"]);
        assert_eq!(config.tool.env["COMPOSER_HOME"], "/srv/xe/.composer");
        assert_eq!(config.cache.command[2], "cache:clear");
        assert_eq!(config.time_limit(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "interactive = \"maybe").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }
}
