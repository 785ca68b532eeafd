//! Scan of package directories already present on disk.

use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::runtime::Runtime;

use super::InstalledVersions;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const UNKNOWN_VERSION: &str = "unknown";

#[derive(Deserialize, Debug, Default, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

/// Result of reading one directory's manifest.
#[derive(Debug, PartialEq)]
pub enum ManifestOutcome {
    Missing,
    Parsed(Manifest),
    Invalid(String),
}

impl ManifestOutcome {
    fn version(&self) -> &str {
        match self {
            ManifestOutcome::Parsed(Manifest {
                version: Some(v), ..
            }) if !v.is_empty() => v.as_str(),
            _ => UNKNOWN_VERSION,
        }
    }

    fn domain(&self) -> Option<&str> {
        match self {
            ManifestOutcome::Parsed(Manifest {
                domain: Some(d), ..
            }) => Some(d.trim()).filter(|d| !d.is_empty()),
            _ => None,
        }
    }
}

pub fn read_manifest<R: Runtime>(runtime: &R, dir: &Path) -> ManifestOutcome {
    let path = dir.join(MANIFEST_FILE);
    if !runtime.exists(&path) {
        return ManifestOutcome::Missing;
    }

    let content = match runtime.read_to_string(&path) {
        Ok(c) => c,
        Err(e) => return ManifestOutcome::Invalid(format!("{:#}", e)),
    };

    match serde_json::from_str::<Manifest>(&content) {
        Ok(manifest) => ManifestOutcome::Parsed(manifest),
        Err(e) => ManifestOutcome::Invalid(e.to_string()),
    }
}

/// Maps each installed directory (lowercased) to its manifest version.
///
/// A manifest declaring a different domain also registers that domain as an
/// alias. Directory names always win over aliases; among aliases the first
/// one seen wins.
#[tracing::instrument(skip(runtime))]
pub fn scan_installed<R: Runtime>(runtime: &R, root: &Path) -> InstalledVersions {
    let mut primary = BTreeMap::new();
    let mut aliases: Vec<(String, String)> = Vec::new();

    if !runtime.exists(root) {
        debug!("Packages root {:?} does not exist", root);
        return primary;
    }

    let entries = match runtime.read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to scan {:?}: {:#}", root, e);
            return primary;
        }
    };

    for dir in entries {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') || !runtime.is_dir(&dir) {
            continue;
        }

        let outcome = read_manifest(runtime, &dir);
        if let ManifestOutcome::Invalid(reason) = &outcome {
            debug!("Failed to read manifest for {}: {}", name, reason);
        }

        let key = name.to_lowercase();
        let version = outcome.version().to_string();

        if let Some(domain) = outcome.domain() {
            let alias = domain.to_lowercase();
            if alias != key {
                aliases.push((alias, version.clone()));
            }
        }
        primary.insert(key, version);
    }

    for (alias, version) in aliases {
        primary.entry(alias).or_insert(version);
    }

    primary
}
