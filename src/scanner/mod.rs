//! Discovery of packages installed outside of the ledger.
//!
//! Two read-only sources are scanned: the packages directory on disk and the
//! storage of a co-resident package manager. Their results are matched
//! against the catalog to decide which installations should start being
//! tracked.

mod filesystem;
mod foreign;
mod reconcile;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::runtime::Runtime;

pub use filesystem::{
    MANIFEST_FILE, Manifest, ManifestOutcome, UNKNOWN_VERSION, read_manifest, scan_installed,
};
pub use foreign::{load_foreign_domains, parse_foreign_domains};
pub use reconcile::{match_installed_domain, plan_reconciliation};

/// Lowercased installed domain -> manifest version.
pub type InstalledVersions = BTreeMap<String, String>;

/// Source of the installed-state snapshot used by reconciliation.
#[cfg_attr(test, mockall::automock)]
pub trait InstalledState: Send + Sync {
    fn installed_versions(&self) -> InstalledVersions;

    /// Lowercased domains of integrations installed by the foreign manager.
    fn foreign_domains(&self) -> BTreeSet<String>;
}

pub struct InstalledStateScanner<R: Runtime> {
    runtime: R,
    packages_root: PathBuf,
    foreign_storage: Option<PathBuf>,
}

impl<R: Runtime> InstalledStateScanner<R> {
    pub fn new(runtime: R, packages_root: PathBuf, foreign_storage: Option<PathBuf>) -> Self {
        Self {
            runtime,
            packages_root,
            foreign_storage,
        }
    }
}

impl<R: Runtime> InstalledState for InstalledStateScanner<R> {
    fn installed_versions(&self) -> InstalledVersions {
        scan_installed(&self.runtime, &self.packages_root)
    }

    fn foreign_domains(&self) -> BTreeSet<String> {
        match &self.foreign_storage {
            Some(path) => load_foreign_domains(&self.runtime, path),
            None => BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;

    #[test]
    fn test_scanner_without_foreign_storage_reads_nothing() {
        // No expectations: any runtime call would panic.
        let runtime = MockRuntime::new();
        let scanner = InstalledStateScanner::new(runtime, PathBuf::from("/cc"), None);
        assert!(scanner.foreign_domains().is_empty());
    }

    #[test]
    fn test_scanner_with_mock_filesystem() {
        let root = PathBuf::from("/config/custom_components");
        let pkg = root.join("widget");
        let manifest = pkg.join(MANIFEST_FILE);

        let mut runtime = MockRuntime::new();
        runtime
            .expect_exists()
            .with(eq(root.clone()))
            .returning(|_| true);
        runtime
            .expect_read_dir()
            .with(eq(root.clone()))
            .returning(|p| Ok(vec![p.join("widget")]));
        runtime
            .expect_is_dir()
            .with(eq(pkg.clone()))
            .returning(|_| true);
        runtime
            .expect_exists()
            .with(eq(manifest.clone()))
            .returning(|_| true);
        runtime
            .expect_read_to_string()
            .with(eq(manifest))
            .returning(|_| Ok(r#"{"version": "4.2"}"#.to_string()));

        let scanner = InstalledStateScanner::new(runtime, root, None);
        let versions = scanner.installed_versions();
        assert_eq!(versions.get("widget").map(String::as_str), Some("4.2"));
        assert_eq!(versions.len(), 1);
    }
}
