//! Field decoders for the operation section.
//!
//! Plugin hooks write into the same document while the tool runs, so a single
//! field may come back in a shape we never wrote. Each field is decoded on its
//! own and only the offending field (or map entry) falls back.

use super::document::{FailureMap, VersionMap};
use super::reason::ReasonCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

/// Decode the field, or use its default when the stored value has another
/// shape.
pub(super) fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_else(|e| {
        warn!("Ignoring malformed operation field: {}", e);
        T::default()
    }))
}

/// `{plugin_id: version}`; numeric versions are kept as text, other entries
/// are dropped.
pub(super) fn version_map<'de, D>(deserializer: D) -> Result<VersionMap, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(entries) = Value::deserialize(deserializer)? else {
        warn!("Ignoring version map that is not an object");
        return Ok(VersionMap::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|(plugin_id, version)| match version {
            Value::String(version) => Some((plugin_id, version)),
            Value::Number(version) => Some((plugin_id, version.to_string())),
            other => {
                warn!(plugin_id = %plugin_id, "Ignoring version {}", other);
                None
            }
        })
        .collect())
}

/// `{plugin_id: reason_code}`; entries without a usable code are dropped.
pub(super) fn failure_map<'de, D>(deserializer: D) -> Result<FailureMap, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(entries) = Value::deserialize(deserializer)? else {
        warn!("Ignoring failure map that is not an object");
        return Ok(FailureMap::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(
            |(plugin_id, code)| match serde_json::from_value::<ReasonCode>(code) {
                Ok(code) => Some((plugin_id, code)),
                Err(e) => {
                    warn!(plugin_id = %plugin_id, "Ignoring failure reason: {}", e);
                    None
                }
            },
        )
        .collect())
}
