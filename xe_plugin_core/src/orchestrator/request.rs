use crate::error::Result;
use crate::registry::PluginTarget;
use crate::state::OperationMode;

/// One batch of plugins to process together. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub mode: OperationMode,
    pub targets: Vec<PluginTarget>,
}

impl OperationRequest {
    pub fn new(mode: OperationMode, targets: Vec<PluginTarget>) -> Self {
        Self { mode, targets }
    }

    /// Parse `id` / `id:version` strings; the first malformed one fails.
    pub fn parse<I, S>(mode: OperationMode, targets: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = targets
            .into_iter()
            .map(|target| PluginTarget::parse(target.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(mode, targets))
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.id.clone()).collect()
    }
}

/// A plugin scheduled for the dependency tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannedPlugin {
    pub id: String,
    pub package: String,
    pub version: String,
}
