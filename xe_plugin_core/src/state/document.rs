use super::lenient;
use super::reason::ReasonCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub type VersionMap = BTreeMap<String, String>;
pub type FailureMap = BTreeMap<String, ReasonCode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Succeeded | OperationStatus::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Succeeded => "succeeded",
            OperationStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    Install,
    Update,
    InstallOrUpdate,
    Remove,
}

/// Plugins the dependency tool actually changed, keyed by plugin id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangedPlugins {
    #[serde(deserialize_with = "lenient::version_map")]
    pub installed: VersionMap,
    #[serde(deserialize_with = "lenient::version_map")]
    pub updated: VersionMap,
    #[serde(deserialize_with = "lenient::version_map")]
    pub uninstalled: VersionMap,
}

impl ChangedPlugins {
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty() && self.updated.is_empty() && self.uninstalled.is_empty()
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.installed.contains_key(plugin_id)
            || self.updated.contains_key(plugin_id)
            || self.uninstalled.contains_key(plugin_id)
    }

    /// Field-level merge; entries from `other` win.
    pub fn merge(&mut self, other: &ChangedPlugins) {
        self.installed.extend(other.installed.clone());
        self.updated.extend(other.updated.clone());
        self.uninstalled.extend(other.uninstalled.clone());
    }
}

/// Plugins that could not be processed, keyed by plugin id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailedPlugins {
    #[serde(deserialize_with = "lenient::failure_map")]
    pub install: FailureMap,
    #[serde(deserialize_with = "lenient::failure_map")]
    pub update: FailureMap,
    #[serde(deserialize_with = "lenient::failure_map")]
    pub uninstall: FailureMap,
}

impl FailedPlugins {
    pub fn is_empty(&self) -> bool {
        self.install.is_empty() && self.update.is_empty() && self.uninstall.is_empty()
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.install.contains_key(plugin_id)
            || self.update.contains_key(plugin_id)
            || self.uninstall.contains_key(plugin_id)
    }

    pub fn merge(&mut self, other: &FailedPlugins) {
        self.install.extend(other.install.clone());
        self.update.extend(other.update.clone());
        self.uninstall.extend(other.uninstall.clone());
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.install.retain(|id, _| keep(id));
        self.update.retain(|id, _| keep(id));
        self.uninstall.retain(|id, _| keep(id));
    }

    pub fn plugin_ids(&self) -> impl Iterator<Item = &String> {
        self.install
            .keys()
            .chain(self.update.keys())
            .chain(self.uninstall.keys())
    }
}

/// What the dependency tool integration reports back after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolReport {
    pub changed: ChangedPlugins,
    pub failed: FailedPlugins,
}

impl ToolReport {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.failed.is_empty()
    }
}

/// The `operation` section of the state document. Fields are decoded one by
/// one, so a malformed field costs only that field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationState {
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::or_default")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::or_default")]
    pub mode: Option<OperationMode>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::or_default")]
    pub log: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::or_default")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::or_default")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::or_default")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::version_map")]
    pub requested: VersionMap,
    #[serde(deserialize_with = "lenient::or_default")]
    pub changed: ChangedPlugins,
    #[serde(deserialize_with = "lenient::or_default")]
    pub failed: FailedPlugins,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient::or_default")]
    pub reason: Option<String>,
}

impl OperationState {
    pub fn start(
        mode: OperationMode,
        log: PathBuf,
        started_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        requested: VersionMap,
    ) -> Self {
        Self {
            id: Some(Uuid::new_v4()),
            mode: Some(mode),
            status: OperationStatus::Running,
            log: Some(log),
            started_at: Some(started_at),
            expires_at,
            requested,
            ..Self::default()
        }
    }

    pub fn merge_report(&mut self, report: &ToolReport) {
        self.changed.merge(&report.changed);
        self.failed.merge(&report.failed);
    }

    pub fn finish(&mut self, status: OperationStatus, at: DateTime<Utc>) {
        self.status = status;
        self.finished_at = Some(at);
    }

    /// A running operation past its deadline was abandoned by its process.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Running
            && self.expires_at.map(|deadline| now > deadline).unwrap_or(false)
    }
}
