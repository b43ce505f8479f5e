use crate::state::{FailureMap, OperationState, OperationStatus, VersionMap};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Installed,
    Updated,
    Uninstalled,
    InstallFailed,
    UpdateFailed,
    UninstallFailed,
}

impl SectionKind {
    pub fn heading(self) -> &'static str {
        match self {
            SectionKind::Installed => "Added plugins:",
            SectionKind::Updated => "Updated plugins:",
            SectionKind::Uninstalled => "Deleted plugins:",
            SectionKind::InstallFailed => "Install failed plugins:",
            SectionKind::UpdateFailed => "Update failed plugins:",
            SectionKind::UninstallFailed => "Uninstall failed plugins:",
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            SectionKind::InstallFailed | SectionKind::UpdateFailed | SectionKind::UninstallFailed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Entry {
    Changed {
        plugin_id: String,
        version: String,
    },
    Failed {
        plugin_id: String,
        code: String,
        message: String,
    },
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Changed { plugin_id, version } => write!(f, "  {}:{}", plugin_id, version),
            Entry::Failed {
                plugin_id, message, ..
            } => write!(f, "  {}: {}", plugin_id, message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub kind: SectionKind,
    pub entries: Vec<Entry>,
}

impl Section {
    fn changed(kind: SectionKind, plugins: &VersionMap) -> Option<Self> {
        let entries: Vec<Entry> = plugins
            .iter()
            .map(|(plugin_id, version)| Entry::Changed {
                plugin_id: plugin_id.clone(),
                version: version.clone(),
            })
            .collect();
        Self::non_empty(kind, entries)
    }

    fn failed(kind: SectionKind, plugins: &FailureMap) -> Option<Self> {
        let entries: Vec<Entry> = plugins
            .iter()
            .map(|(plugin_id, reason)| Entry::Failed {
                plugin_id: plugin_id.clone(),
                code: reason.code().to_string(),
                message: reason.message(),
            })
            .collect();
        Self::non_empty(kind, entries)
    }

    fn non_empty(kind: SectionKind, entries: Vec<Entry>) -> Option<Self> {
        (!entries.is_empty()).then_some(Self { kind, entries })
    }

    pub fn heading(&self) -> &'static str {
        self.kind.heading()
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.heading())?;
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

/// What an operation changed and what failed, ready for a console or a
/// poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub sections: Vec<Section>,
}

impl Report {
    pub fn from_state(state: &OperationState) -> Self {
        let sections = [
            Section::changed(SectionKind::Installed, &state.changed.installed),
            Section::changed(SectionKind::Updated, &state.changed.updated),
            Section::changed(SectionKind::Uninstalled, &state.changed.uninstalled),
            Section::failed(SectionKind::InstallFailed, &state.failed.install),
            Section::failed(SectionKind::UpdateFailed, &state.failed.update),
            Section::failed(SectionKind::UninstallFailed, &state.failed.uninstall),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self {
            status: state.status,
            log: state.log.clone(),
            reason: state.reason.clone(),
            sections,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl From<&OperationState> for Report {
    fn from(state: &OperationState) -> Self {
        Self::from_state(state)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.sections {
            write!(f, "{}", section)?;
        }
        Ok(())
    }
}
