use super::document::OperationState;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub const OPERATION_KEY: &str = "operation";

/// File-backed JSON document holding the current operation.
///
/// There is no locking: one operation at a time is assumed and the last
/// writer wins. Keys outside `operation` are carried through untouched.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    document: Value,
}

impl StateStore {
    /// Open the store and read the document from disk.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut store = Self {
            path: path.as_ref().to_path_buf(),
            document: Value::Object(Map::new()),
        };
        store.load().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the document, discarding unsaved edits. A missing file is an
    /// empty document.
    pub async fn load(&mut self) -> Result<()> {
        debug!("Loading state document {:?}", self.path);
        self.document = match fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Value::Object(Map::new()),
            Ok(raw) => {
                let value: Value =
                    serde_json::from_str(&raw).map_err(|source| Error::MalformedState {
                        path: self.path.clone(),
                        source,
                    })?;
                if value.is_object() {
                    value
                } else {
                    Value::Object(Map::new())
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("State document does not exist yet");
                Value::Object(Map::new())
            }
            Err(e) => return Err(e.into()),
        };
        Ok(())
    }

    /// Read a dotted key such as `operation.changed.installed`, falling back to
    /// `default` when it is absent or has another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.lookup(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Set a dotted key, creating intermediate objects. Non-object values on
    /// the way are replaced.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        let segments = split_key(key)?;
        let value = serde_json::to_value(value)?;

        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| Error::InvalidKey(key.to_string()))?;

        let mut node = &mut self.document;
        for segment in parents {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node = &mut node[*segment];
        }

        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node[*last] = value;
        Ok(())
    }

    /// Persist the whole document: write a sibling temp file, then rename it
    /// over the target.
    pub async fn write(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.document)?;
        write_atomic(&self.path, json.as_bytes()).await?;
        debug!("Wrote state document {:?}", self.path);
        Ok(())
    }

    pub fn operation(&self) -> OperationState {
        self.get(OPERATION_KEY, OperationState::default())
    }

    pub fn set_operation(&mut self, state: &OperationState) -> Result<()> {
        self.set(OPERATION_KEY, state)
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        let mut node = &self.document;
        for segment in key.split('.') {
            node = node.as_object()?.get(segment)?;
        }
        Some(node)
    }
}

/// Write `contents` to a sibling temp file and rename it over `path`.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    let tmp = path.with_file_name(name);

    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

fn split_key(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(segments)
}
