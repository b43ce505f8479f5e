use serde::{Deserialize, Serialize};

/// `plugin.toml` shipped inside every installed plugin directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// The plugin id; defaults to the directory name when omitted
    #[serde(default)]
    pub id: String,

    /// Package name known to the dependency tool
    pub name: String,

    /// The installed version
    pub version: String,

    /// Human readable title
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,
}

impl PluginManifest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            title: String::new(),
            description: String::new(),
        }
    }

    /// Validate the manifest
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("Plugin id cannot be empty".to_string());
        }
        if self.name.is_empty() {
            return Err("Plugin name cannot be empty".to_string());
        }
        if self.version.is_empty() {
            return Err("Plugin version cannot be empty".to_string());
        }
        Ok(())
    }
}
