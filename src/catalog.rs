//! Static catalog of installable packages.
//!
//! The catalog is a JSON document `{"packages": [...]}` shipped next to the
//! configuration. It is read fresh on every call; malformed entries are
//! skipped with a warning.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::package::{InstallMode, PackageSource, PackageType};
use crate::runtime::Runtime;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path:?}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Catalog {path:?} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Descriptor of one installable package.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CatalogEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub repo: String,
    #[serde(rename = "type", default)]
    pub package_type: PackageType,
    #[serde(default)]
    pub mode: Option<InstallMode>,
    #[serde(default)]
    pub asset_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source: Option<PackageSource>,
    /// Integration domain, when it differs from the repository name.
    #[serde(default)]
    pub domain: Option<String>,
}

impl CatalogEntry {
    /// Key used by the pending-install queue: `"{owner}_{repo}"` as declared.
    pub fn key(&self) -> String {
        format!("{}_{}", self.owner.as_deref().unwrap_or(""), self.repo)
    }

    /// The declared owner, or `default_owner` when the entry has none.
    pub fn resolve_owner(&self, default_owner: Option<&str>) -> Option<String> {
        self.owner
            .as_deref()
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .or_else(|| default_owner.map(str::trim).filter(|o| !o.is_empty()))
            .map(String::from)
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait CatalogLoader: Send + Sync {
    /// Fresh read of the catalog. Failures are logged and yield an empty list.
    fn load(&self) -> Vec<CatalogEntry>;
}

/// Catalog read from a JSON file.
pub struct JsonCatalog<R: Runtime> {
    runtime: R,
    path: PathBuf,
}

impl<R: Runtime> JsonCatalog<R> {
    pub fn new(runtime: R, path: PathBuf) -> Self {
        Self { runtime, path }
    }

    /// Reads the catalog, reporting file-level failures. Entry-level problems
    /// are skipped.
    #[tracing::instrument(skip(self))]
    pub fn read(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        if !self.runtime.exists(&self.path) {
            warn!("Catalog file not found: {:?}", self.path);
            return Ok(Vec::new());
        }

        let content =
            self.runtime
                .read_to_string(&self.path)
                .map_err(|e| CatalogError::Read {
                    path: self.path.clone(),
                    message: format!("{:#}", e),
                })?;

        let doc: serde_json::Value =
            serde_json::from_str(&content).map_err(|source| CatalogError::Parse {
                path: self.path.clone(),
                source,
            })?;

        Ok(parse_entries(&doc))
    }
}

impl<R: Runtime> CatalogLoader for JsonCatalog<R> {
    fn load(&self) -> Vec<CatalogEntry> {
        match self.read() {
            Ok(entries) => {
                info!("Loaded {} packages from catalog", entries.len());
                entries
            }
            Err(e) => {
                error!("{}", e);
                Vec::new()
            }
        }
    }
}

fn parse_entries(doc: &serde_json::Value) -> Vec<CatalogEntry> {
    let Some(items) = doc.get("packages").and_then(|p| p.as_array()) else {
        warn!("Catalog has no \"packages\" list");
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            match serde_json::from_value::<CatalogEntry>(item.clone()) {
                Ok(entry) if !entry.repo.trim().is_empty() => Some(entry),
                Ok(_) => {
                    warn!("Skipping catalog entry {}: empty repo", index);
                    None
                }
                Err(e) => {
                    warn!("Skipping malformed catalog entry {}: {}", index, e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RealRuntime;
    use tempfile::tempdir;

    #[test]
    fn test_parse_entries_skips_malformed() {
        let doc = serde_json::json!({
            "packages": [
                {"name": "Widget", "owner": "acme", "repo": "widget", "type": "dashboard"},
                {"name": "No repo"},
                "not an object",
                {"repo": "  "},
                {"repo": "bare"}
            ]
        });

        let entries = parse_entries(&doc);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].package_type, PackageType::Dashboard);
        assert_eq!(entries[1].repo, "bare");
        assert_eq!(entries[1].package_type, PackageType::Integration);
    }

    #[test]
    fn test_parse_entries_without_list() {
        assert!(parse_entries(&serde_json::json!({"other": []})).is_empty());
    }

    #[test]
    fn test_key_and_owner_resolution() {
        let entry = CatalogEntry {
            repo: "widget".into(),
            ..Default::default()
        };
        assert_eq!(entry.key(), "_widget");
        assert_eq!(entry.resolve_owner(None), None);
        assert_eq!(entry.resolve_owner(Some(" acme ")), Some("acme".into()));

        let entry = CatalogEntry {
            owner: Some("other".into()),
            repo: "widget".into(),
            ..Default::default()
        };
        assert_eq!(entry.key(), "other_widget");
        assert_eq!(entry.resolve_owner(Some("acme")), Some("other".into()));
    }

    #[test]
    fn test_json_catalog_reads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"packages": [{"repo": "widget", "mode": "zipball", "source": "gitea"}]}"#,
        )
        .unwrap();

        let entries = JsonCatalog::new(RealRuntime, path).load();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mode, Some(InstallMode::Archive));
        assert_eq!(entries[0].source, Some(PackageSource::SelfHostedForge));
    }

    #[test]
    fn test_json_catalog_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "packages:\n  - repo: x").unwrap();

        let catalog = JsonCatalog::new(RealRuntime, path);
        assert!(matches!(catalog.read(), Err(CatalogError::Parse { .. })));
        assert!(catalog.load().is_empty());
    }

    #[test]
    fn test_json_catalog_missing_file() {
        let dir = tempdir().unwrap();
        let catalog = JsonCatalog::new(RealRuntime, dir.path().join("missing.json"));
        assert!(catalog.read().unwrap().is_empty());
    }
}
