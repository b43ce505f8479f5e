use super::catalog::PluginCatalog;
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// `id` or `id:version` as typed on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginTarget {
    pub id: String,
    pub version: Option<String>,
}

impl PluginTarget {
    /// Split on the first `:`; an empty version counts as absent.
    pub fn parse(input: &str) -> Result<Self> {
        let (id, version) = match input.split_once(':') {
            Some((id, version)) => (id.trim(), Some(version.trim())),
            None => (input.trim(), None),
        };
        if id.is_empty() {
            return Err(Error::InvalidTarget(input.to_string()));
        }
        Ok(Self {
            id: id.to_string(),
            version: version.filter(|v| !v.is_empty()).map(str::to_string),
        })
    }
}

impl FromStr for PluginTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PluginTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}:{}", self.id, version),
            None => f.write_str(&self.id),
        }
    }
}

/// A target resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub title: String,
    pub requested_version: Option<String>,
    pub resolved_version: String,
}

/// Resolve a target; without a requested version the catalog's latest release
/// is used.
pub async fn resolve(catalog: &dyn PluginCatalog, target: &PluginTarget) -> Result<PluginDescriptor> {
    let info = catalog
        .find(&target.id)
        .await?
        .ok_or_else(|| Error::PluginNotFound(target.id.clone()))?;

    let resolved_version = match &target.version {
        Some(version) => {
            catalog
                .find_release(&target.id, version)
                .await?
                .ok_or_else(|| Error::VersionNotFound {
                    id: target.id.clone(),
                    version: version.clone(),
                })?
                .version
        }
        None => {
            info.latest_release
                .as_ref()
                .ok_or_else(|| Error::NoRelease(target.id.clone()))?
                .version
                .clone()
        }
    };

    debug!(plugin_id = %target.id, version = %resolved_version, "Resolved plugin");
    Ok(PluginDescriptor {
        id: info.id,
        name: info.name,
        title: info.title,
        requested_version: target.version.clone(),
        resolved_version,
    })
}

/// Resolve every target or none: the first failure aborts the batch.
pub async fn resolve_all(
    catalog: &dyn PluginCatalog,
    targets: &[PluginTarget],
) -> Result<Vec<PluginDescriptor>> {
    let mut descriptors = Vec::with_capacity(targets.len());
    for target in targets {
        descriptors.push(resolve(catalog, target).await?);
    }
    Ok(descriptors)
}
