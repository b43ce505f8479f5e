use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl Release {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            published_at: None,
        }
    }
}

/// A plugin as the marketplace describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPlugin {
    pub id: String,
    /// Package name handed to the dependency tool.
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub latest_release: Option<Release>,
    #[serde(default)]
    pub releases: Vec<Release>,
}

/// Read-only query contract of the marketplace.
#[async_trait]
pub trait PluginCatalog: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<CatalogPlugin>>;

    async fn find_release(&self, id: &str, version: &str) -> Result<Option<Release>>;
}

/// Catalog snapshot held in memory, optionally loaded from a JSON file.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    plugins: BTreeMap<String, CatalogPlugin>,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    plugins: Vec<CatalogPlugin>,
}

impl StaticCatalog {
    pub fn new(plugins: impl IntoIterator<Item = CatalogPlugin>) -> Self {
        Self {
            plugins: plugins
                .into_iter()
                .map(|plugin| (plugin.id.clone(), plugin))
                .collect(),
        }
    }

    /// A missing file is an empty catalog.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str::<CatalogFile>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Catalog {:?} not found, starting empty", path);
                CatalogFile::default()
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Loaded {} catalog entries", file.plugins.len());
        Ok(Self::new(file.plugins))
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[async_trait]
impl PluginCatalog for StaticCatalog {
    async fn find(&self, id: &str) -> Result<Option<CatalogPlugin>> {
        Ok(self.plugins.get(id).cloned())
    }

    async fn find_release(&self, id: &str, version: &str) -> Result<Option<Release>> {
        let Some(plugin) = self.plugins.get(id) else {
            return Ok(None);
        };
        Ok(plugin
            .releases
            .iter()
            .chain(plugin.latest_release.iter())
            .find(|release| release.version == version)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn board() -> CatalogPlugin {
        CatalogPlugin {
            id: "board".into(),
            name: "xpressengine-plugin/board".into(),
            title: "Board".into(),
            latest_release: Some(Release::new("1.1.0")),
            releases: vec![Release::new("1.0.0")],
        }
    }

    #[tokio::test]
    async fn test_find_and_release() {
        let catalog = StaticCatalog::new([board()]);
        assert_eq!(catalog.find("board").await.unwrap().unwrap().title, "Board");
        assert!(catalog.find("page").await.unwrap().is_none());

        assert!(catalog.find_release("board", "1.0.0").await.unwrap().is_some());
        assert!(catalog.find_release("board", "1.1.0").await.unwrap().is_some());
        assert!(catalog.find_release("board", "9.9.9").await.unwrap().is_none());
        assert!(catalog.find_release("page", "1.0.0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"plugins":[{"id":"board","name":"xpressengine-plugin/board","title":"Board",
                "latest_release":{"version":"1.1.0","published_at":"2024-02-01T00:00:00Z"}}]}"#,
        )
        .unwrap();

        let catalog = StaticCatalog::load(&path).await.unwrap();
        assert_eq!(catalog.len(), 1);
        let plugin = catalog.find("board").await.unwrap().unwrap();
        assert!(plugin.latest_release.unwrap().published_at.is_some());

        let empty = StaticCatalog::load(dir.path().join("missing.json")).await.unwrap();
        assert!(empty.is_empty());
    }
}
