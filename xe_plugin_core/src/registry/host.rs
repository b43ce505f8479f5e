use super::manifest::PluginManifest;
use crate::error::{Error, Result};
use crate::state::write_atomic;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::fs;
use tracing::{debug, info, warn};

pub const MANIFEST_FILE: &str = "plugin.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPlugin {
    pub manifest: PluginManifest,
    pub path: PathBuf,
}

impl InstalledPlugin {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRecord {
    /// Version the plugin was activated or last updated at
    pub version: String,
    pub activated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Locally installed plugins and their activation state.
#[async_trait]
pub trait PluginHost: Send + Sync {
    /// Re-read installed plugins and activation state from disk.
    async fn refresh(&self) -> Result<()>;

    /// Installed plugins keyed by id, as of the last refresh.
    fn installed(&self) -> BTreeMap<String, InstalledPlugin>;

    fn is_activated(&self, id: &str) -> bool;

    async fn activate(&self, id: &str) -> Result<()>;

    /// Run the post-install update step of an activated plugin.
    async fn update(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct HostState {
    installed: BTreeMap<String, InstalledPlugin>,
    activated: BTreeMap<String, ActivationRecord>,
}

/// Plugin host backed by `<plugins_dir>/*/plugin.toml` and a JSON file of
/// activation records.
#[derive(Debug, Clone)]
pub struct LocalPluginHost {
    plugins_dir: PathBuf,
    activation_file: PathBuf,
    state: Arc<RwLock<HostState>>,
}

impl LocalPluginHost {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(plugins_dir: P, activation_file: Q) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            activation_file: activation_file.into(),
            state: Arc::new(RwLock::new(HostState::default())),
        }
    }

    pub fn activation(&self, id: &str) -> Option<ActivationRecord> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.activated.get(id).cloned())
    }

    async fn scan(&self) -> Result<BTreeMap<String, InstalledPlugin>> {
        let mut installed = BTreeMap::new();
        let mut entries = match fs::read_dir(&self.plugins_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Plugin directory {:?} does not exist", self.plugins_dir);
                return Ok(installed);
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let manifest_path = path.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                continue;
            }
            match read_manifest(&path, &manifest_path).await {
                Ok(manifest) => {
                    installed.insert(manifest.id.clone(), InstalledPlugin { manifest, path });
                }
                Err(e) => warn!(manifest = %manifest_path.display(), "Skipping plugin: {}", e),
            }
        }
        Ok(installed)
    }

    async fn read_activations(&self) -> Result<BTreeMap<String, ActivationRecord>> {
        match fs::read_to_string(&self.activation_file).await {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, activated: &BTreeMap<String, ActivationRecord>) -> Result<()> {
        let json = serde_json::to_string_pretty(activated)?;
        write_atomic(&self.activation_file, json.as_bytes()).await
    }

    fn installed_version(&self, id: &str) -> Result<String> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.installed.get(id).map(|p| p.version().to_string()))
            .ok_or_else(|| Error::NotInstalled(id.to_string()))
    }

    /// Apply `change` to a copy of the activation records, persist it, then
    /// publish it. No lock is held across the write.
    async fn modify_activations<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, ActivationRecord>) -> Result<()>,
    {
        let mut activated = self
            .state
            .read()
            .map(|state| state.activated.clone())
            .unwrap_or_default();
        change(&mut activated)?;
        self.persist(&activated).await?;
        if let Ok(mut state) = self.state.write() {
            state.activated = activated;
        }
        Ok(())
    }
}

async fn read_manifest(dir: &Path, manifest_path: &Path) -> std::result::Result<PluginManifest, String> {
    let raw = fs::read_to_string(manifest_path)
        .await
        .map_err(|e| format!("Failed to read manifest: {}", e))?;
    let mut manifest: PluginManifest =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse manifest: {}", e))?;
    if manifest.id.is_empty() {
        manifest.id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    manifest.validate()?;
    Ok(manifest)
}

#[async_trait]
impl PluginHost for LocalPluginHost {
    async fn refresh(&self) -> Result<()> {
        let installed = self.scan().await?;
        let activated = self.read_activations().await?;
        debug!(
            installed = installed.len(),
            activated = activated.len(),
            "Refreshed local plugins"
        );
        if let Ok(mut state) = self.state.write() {
            state.installed = installed;
            state.activated = activated;
        }
        Ok(())
    }

    fn installed(&self) -> BTreeMap<String, InstalledPlugin> {
        self.state
            .read()
            .map(|state| state.installed.clone())
            .unwrap_or_default()
    }

    fn is_activated(&self, id: &str) -> bool {
        self.state
            .read()
            .map(|state| state.activated.contains_key(id))
            .unwrap_or(false)
    }

    async fn activate(&self, id: &str) -> Result<()> {
        let version = self.installed_version(id)?;
        info!(plugin_id = %id, version = %version, "Activating plugin");
        self.modify_activations(|activated| {
            activated.insert(
                id.to_string(),
                ActivationRecord {
                    version,
                    activated_at: Utc::now(),
                    updated_at: None,
                },
            );
            Ok(())
        })
        .await
    }

    async fn update(&self, id: &str) -> Result<()> {
        let version = self.installed_version(id)?;
        info!(plugin_id = %id, version = %version, "Updating plugin");
        self.modify_activations(|activated| {
            let record = activated
                .get_mut(id)
                .ok_or_else(|| Error::NotActivated(id.to_string()))?;
            record.version = version;
            record.updated_at = Some(Utc::now());
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn install(dir: &Path, id: &str, version: &str) {
        let plugin_dir = dir.join(id);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join(MANIFEST_FILE),
            format!(
                "name = \"xpressengine-plugin/{}\"\nversion = \"{}\"\ntitle = \"{}\"\n",
                id, version, id
            ),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_scans_manifests() {
        let dir = tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        install(&plugins, "board", "1.0.0");
        install(&plugins, "page", "0.9.1");
        std::fs::create_dir_all(plugins.join("not-a-plugin")).unwrap();
        std::fs::create_dir_all(plugins.join("broken")).unwrap();
        std::fs::write(plugins.join("broken").join(MANIFEST_FILE), "name = ").unwrap();

        let host = LocalPluginHost::new(&plugins, dir.path().join("activated.json"));
        assert!(host.installed().is_empty());

        host.refresh().await.unwrap();
        let installed = host.installed();
        assert_eq!(installed.len(), 2);
        assert_eq!(installed["board"].version(), "1.0.0");
        assert_eq!(installed["page"].manifest.name, "xpressengine-plugin/page");
    }

    #[tokio::test]
    async fn test_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let host = LocalPluginHost::new(dir.path().join("none"), dir.path().join("a.json"));
        host.refresh().await.unwrap();
        assert!(host.installed().is_empty());
    }

    #[tokio::test]
    async fn test_activation_persists() {
        let dir = tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        let activation_file = dir.path().join("activated.json");
        install(&plugins, "board", "1.0.0");

        let host = LocalPluginHost::new(&plugins, &activation_file);
        host.refresh().await.unwrap();
        assert!(!host.is_activated("board"));

        host.activate("board").await.unwrap();
        assert!(host.is_activated("board"));

        let other = LocalPluginHost::new(&plugins, &activation_file);
        other.refresh().await.unwrap();
        assert!(other.is_activated("board"));
        assert_eq!(other.activation("board").unwrap().version, "1.0.0");
    }

    #[tokio::test]
    async fn test_activate_unknown_plugin() {
        let dir = tempdir().unwrap();
        let host = LocalPluginHost::new(dir.path().join("plugins"), dir.path().join("a.json"));
        host.refresh().await.unwrap();
        assert!(matches!(
            host.activate("ghost").await,
            Err(Error::NotInstalled(_))
        ));
    }

    #[tokio::test]
    async fn test_update_records_new_version() {
        let dir = tempdir().unwrap();
        let plugins = dir.path().join("plugins");
        install(&plugins, "board", "1.0.0");

        let host = LocalPluginHost::new(&plugins, dir.path().join("activated.json"));
        host.refresh().await.unwrap();
        assert!(matches!(
            host.update("board").await,
            Err(Error::NotActivated(_))
        ));

        host.activate("board").await.unwrap();
        install(&plugins, "board", "1.1.0");
        host.refresh().await.unwrap();
        host.update("board").await.unwrap();

        let record = host.activation("board").unwrap();
        assert_eq!(record.version, "1.1.0");
        assert!(record.updated_at.is_some());
    }
}
