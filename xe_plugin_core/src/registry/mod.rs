mod catalog;
mod host;
mod manifest;
mod target;

pub use catalog::{CatalogPlugin, PluginCatalog, Release, StaticCatalog};
pub use host::{ActivationRecord, InstalledPlugin, LocalPluginHost, PluginHost, MANIFEST_FILE};
pub use manifest::PluginManifest;
pub use target::{resolve, resolve_all, PluginDescriptor, PluginTarget};
