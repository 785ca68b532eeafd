//! Persisted package ledger.
//!
//! The ledger is a single JSON document, `{"version": 1, "packages": {...}}`,
//! always written whole. Reads never fail: an absent or unreadable document
//! is an empty ledger, and a malformed record is skipped on its own.

use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::package::PackageRecord;
use crate::runtime::Runtime;

pub const LEDGER_VERSION: u32 = 1;

/// Tracked packages keyed by package id.
pub type PackageMap = BTreeMap<String, PackageRecord>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to serialize package ledger: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write package ledger {path:?}: {message}")]
    Write { path: PathBuf, message: String },
}

/// Records stay raw until decoded one by one.
#[derive(Deserialize, Debug, Default)]
struct LedgerDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    packages: BTreeMap<String, serde_json::Value>,
}

fn decode_records(path: &Path, raw: BTreeMap<String, serde_json::Value>) -> PackageMap {
    raw.into_iter()
        .filter_map(|(id, value)| match serde_json::from_value::<PackageRecord>(value) {
            Ok(record) => Some((id, record)),
            Err(e) => {
                warn!("Skipping malformed ledger record {} in {:?}: {}", id, path, e);
                None
            }
        })
        .collect()
}

/// Load/save of the whole ledger. There are no per-record operations.
#[cfg_attr(test, mockall::automock)]
pub trait LedgerStore: Send + Sync {
    fn load(&self) -> PackageMap;
    fn save(&self, packages: &PackageMap) -> Result<(), LedgerError>;
}

/// File-backed ledger.
pub struct PackageLedger<R: Runtime> {
    runtime: R,
    path: PathBuf,
}

impl<R: Runtime> PackageLedger<R> {
    pub fn new(runtime: R, path: PathBuf) -> Self {
        Self { runtime, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_error(&self, e: anyhow::Error) -> LedgerError {
        LedgerError::Write {
            path: self.path.clone(),
            message: format!("{:#}", e),
        }
    }
}

impl<R: Runtime> LedgerStore for PackageLedger<R> {
    #[tracing::instrument(skip(self))]
    fn load(&self) -> PackageMap {
        if !self.runtime.exists(&self.path) {
            debug!("No package ledger at {:?}", self.path);
            return PackageMap::new();
        }

        let content = match self.runtime.read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read package ledger {:?}: {:#}", self.path, e);
                return PackageMap::new();
            }
        };

        match serde_json::from_str::<LedgerDocument>(&content) {
            Ok(doc) => {
                if doc.version > LEDGER_VERSION {
                    warn!(
                        "Package ledger {:?} has version {}, newer than {}",
                        self.path, doc.version, LEDGER_VERSION
                    );
                }
                let packages = decode_records(&self.path, doc.packages);
                info!("Loaded {} tracked packages", packages.len());
                packages
            }
            Err(e) => {
                warn!("Ignoring unreadable package ledger {:?}: {}", self.path, e);
                PackageMap::new()
            }
        }
    }

    /// Writes to a sibling temp file, then renames it over the ledger.
    #[tracing::instrument(skip(self, packages))]
    fn save(&self, packages: &PackageMap) -> Result<(), LedgerError> {
        let doc = serde_json::json!({
            "version": LEDGER_VERSION,
            "packages": packages,
        });
        let content = serde_json::to_string_pretty(&doc)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !self.runtime.exists(parent)
        {
            self.runtime
                .create_dir_all(parent)
                .map_err(|e| self.write_error(e))?;
        }

        let temp_path = self.temp_path();
        self.runtime
            .write(&temp_path, content.as_bytes())
            .map_err(|e| self.write_error(e))?;
        self.runtime
            .rename(&temp_path, &self.path)
            .map_err(|e| self.write_error(e))?;

        info!("Saved {} tracked packages", packages.len());
        Ok(())
    }
}
