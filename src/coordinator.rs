//! The package tracking state machine.
//!
//! The coordinator owns the in-memory copy of the ledger. Every operation
//! takes the same async lock for its whole read-check-mutate-persist-notify
//! sequence, so operations never interleave. Changes are persisted from a
//! copy and only become visible once the save succeeded.

use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::catalog::CatalogEntry;
use crate::forge::{ForgeClient, RepoId};
use crate::ledger::{LedgerError, LedgerStore, PackageMap};
use crate::observer::ObserverSink;
use crate::package::{NewPackage, PackageRecord, package_id};
use crate::scanner::{InstalledState, UNKNOWN_VERSION, plan_reconciliation};

/// Outcome of one update check pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckSummary {
    /// Packages queried on the forge.
    pub checked: usize,
    /// Packages whose source is not update-checked.
    pub skipped: usize,
    /// Checked packages whose latest version differs from the installed one.
    pub updates_available: usize,
    /// Checked packages whose query failed.
    pub failed: usize,
}

#[derive(Default)]
struct State {
    packages: PackageMap,
    /// Package ids that went through the "new package" notification.
    announced: HashSet<String>,
}

pub struct UpdateCoordinator {
    client: Arc<dyn ForgeClient>,
    ledger: Box<dyn LedgerStore>,
    observer: Arc<dyn ObserverSink>,
    state: Mutex<State>,
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

impl UpdateCoordinator {
    pub fn new(
        client: Arc<dyn ForgeClient>,
        ledger: Box<dyn LedgerStore>,
        observer: Arc<dyn ObserverSink>,
    ) -> Self {
        Self {
            client,
            ledger,
            observer,
            state: Mutex::new(State::default()),
        }
    }

    /// Replaces the in-memory state with the persisted ledger and announces
    /// every record that was not announced before. Returns the record count.
    #[tracing::instrument(skip(self))]
    pub async fn load(&self) -> usize {
        let mut state = self.state.lock().await;
        state.packages = self.ledger.load();

        let State {
            packages,
            announced,
        } = &mut *state;
        for (id, record) in packages.iter() {
            if announced.insert(id.clone()) {
                self.observer.on_new_package(id, record);
            }
        }

        if packages.is_empty() {
            info!("No tracked packages found");
        }
        packages.len()
    }

    /// Tracks a fresh install or update of a package.
    ///
    /// The latest version is reset to the installed one and any pending
    /// update flag cleared. `install_date` and `last_check` survive from an
    /// existing record.
    #[tracing::instrument(skip(self, package), fields(id = %package.package_id()))]
    pub async fn add_or_update_package(
        &self,
        package: NewPackage,
    ) -> Result<PackageRecord, LedgerError> {
        let mut state = self.state.lock().await;
        self.upsert(&mut state, package)
    }

    fn upsert(&self, state: &mut State, package: NewPackage) -> Result<PackageRecord, LedgerError> {
        let id = package.package_id();
        let now = timestamp();
        let existing = state.packages.get(&id);
        info!("Adding/updating package {} (new: {})", id, existing.is_none());

        let record = PackageRecord {
            repo_name: package.repo_name,
            owner: package.owner,
            package_type: package.package_type,
            latest_version: package.installed_version.clone(),
            installed_version: package.installed_version,
            update_available: false,
            install_date: existing
                .map(|r| r.install_date.clone())
                .unwrap_or_else(|| now.clone()),
            last_update: now,
            last_check: existing.and_then(|r| r.last_check.clone()),
            mode: package.mode,
            asset_name: package.asset_name,
            source: package
                .source
                .or_else(|| existing.map(|r| r.source))
                .unwrap_or_default(),
            release_summary: None,
            release_notes: None,
        };

        let mut packages = state.packages.clone();
        packages.insert(id.clone(), record.clone());
        self.ledger.save(&packages)?;
        state.packages = packages;

        if state.announced.insert(id.clone()) {
            self.observer.on_new_package(&id, &record);
        } else {
            self.observer.on_package_changed(&id, &record);
            self.observer.on_listeners_updated();
        }
        Ok(record)
    }

    /// Queries the latest release of every update-checked package.
    ///
    /// A failed query only refreshes `last_check`. The ledger is saved and
    /// listeners are notified once per pass, and not at all when nothing is
    /// tracked.
    #[tracing::instrument(skip(self))]
    pub async fn check_updates(&self) -> Result<CheckSummary, LedgerError> {
        let mut state = self.state.lock().await;
        let mut summary = CheckSummary::default();

        if state.packages.is_empty() {
            info!("No packages tracked yet, skipping update check");
            return Ok(summary);
        }

        info!("Checking for updates for {} packages...", state.packages.len());
        let mut packages = state.packages.clone();

        for (id, record) in packages.iter_mut() {
            if !record.source.is_update_checked() {
                debug!("Skipping update check for {} package {}", record.source, id);
                summary.skipped += 1;
                continue;
            }

            summary.checked += 1;
            let repo = RepoId::new(&record.owner, &record.repo_name);
            match self.client.get_latest_release(&repo).await {
                Ok(Some(release)) => {
                    let latest = release.version_label().unwrap_or(UNKNOWN_VERSION);
                    record.update_available = latest != record.installed_version;
                    record.latest_version = latest.to_string();
                    record.release_summary = release.name.clone();
                    record.release_notes = release.body.clone();

                    if record.update_available {
                        summary.updates_available += 1;
                        info!(
                            "Update available for {}: {} -> {}",
                            repo, record.installed_version, record.latest_version
                        );
                    } else {
                        debug!("No update available for {}", repo);
                    }
                }
                Ok(None) => debug!("No releases found for {}", repo),
                Err(e) => {
                    summary.failed += 1;
                    if e.is_not_found() {
                        debug!("Repo {} not found on server", repo);
                    } else {
                        warn!("Error checking updates for {} ({}): {}", id, e.kind(), e);
                    }
                }
            }
            record.last_check = Some(timestamp());
        }

        self.ledger.save(&packages)?;
        state.packages = packages;
        self.observer.on_listeners_updated();

        info!("Update check complete: {:?}", summary);
        Ok(summary)
    }

    /// Stops tracking a package. Returns whether it was tracked.
    #[tracing::instrument(skip(self))]
    pub async fn remove_package(&self, owner: &str, repo_name: &str) -> Result<bool, LedgerError> {
        let id = package_id(owner, repo_name);
        let mut state = self.state.lock().await;

        if !state.packages.contains_key(&id) {
            debug!("{} is not tracked", id);
            return Ok(false);
        }

        let mut packages = state.packages.clone();
        packages.remove(&id);
        self.ledger.save(&packages)?;
        state.packages = packages;
        state.announced.remove(&id);

        self.observer.on_package_removed(&id);
        self.observer.on_listeners_updated();
        info!("Package {} removed", id);
        Ok(true)
    }

    pub async fn get_package(&self, owner: &str, repo_name: &str) -> Option<PackageRecord> {
        self.get_package_info(&package_id(owner, repo_name)).await
    }

    pub async fn get_package_info(&self, package_id: &str) -> Option<PackageRecord> {
        self.state.lock().await.packages.get(package_id).cloned()
    }

    /// Snapshot of every tracked package.
    pub async fn packages(&self) -> PackageMap {
        self.state.lock().await.packages.clone()
    }

    /// Starts tracking catalog packages that are installed but not in the
    /// ledger. Returns the number of packages added.
    #[tracing::instrument(skip(self, catalog, installed))]
    pub async fn sync_preinstalled(
        &self,
        catalog: &[CatalogEntry],
        installed: &dyn InstalledState,
        default_owner: Option<&str>,
    ) -> Result<usize, LedgerError> {
        let versions = installed.installed_versions();
        if versions.is_empty() {
            debug!("No installed packages found");
            return Ok(0);
        }
        let foreign = installed.foreign_domains();

        let mut state = self.state.lock().await;
        let planned = plan_reconciliation(
            catalog,
            &versions,
            &foreign,
            default_owner,
            |owner, repo| state.packages.contains_key(&package_id(owner, repo)),
        );

        let count = planned.len();
        for package in planned {
            info!(
                "Tracking pre-installed {}/{} at {}",
                package.owner, package.repo_name, package.installed_version
            );
            self.upsert(&mut state, package)?;
        }
        Ok(count)
    }
}
