//! Install, uninstall and pending-queue use cases.

use anyhow::{Context, Result};
use log::{error, info, warn};

use crate::catalog::{CatalogEntry, CatalogLoader};
use crate::config::SettingsStore;
use crate::coordinator::UpdateCoordinator;
use crate::forge::RepoId;
use crate::install::InstallExecutor;
use crate::package::{NewPackage, PackageRecord, PackageType};
use crate::resolver::{ResolveRequest, VersionResolver};
use crate::runtime::Runtime;

/// A package to install or update.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallRequest {
    pub target: ResolveRequest,
    pub package_type: PackageType,
}

impl InstallRequest {
    pub fn new(repo: RepoId, package_type: PackageType) -> Self {
        Self {
            target: ResolveRequest::new(repo),
            package_type,
        }
    }

    /// Request for a catalog entry. `None` when no owner can be determined.
    pub fn from_catalog(entry: &CatalogEntry, default_owner: Option<&str>) -> Option<Self> {
        let owner = entry.resolve_owner(default_owner)?;
        let repo = entry.repo.trim();
        if repo.is_empty() {
            return None;
        }

        let mut request = Self::new(RepoId::new(owner, repo), entry.package_type);
        request.target.mode = Some(entry.mode.unwrap_or_default());
        request.target.asset_name = entry.asset_name.clone();
        request.target.source = entry.source;
        Some(request)
    }
}

/// Resolves, installs and tracks a package.
///
/// Nothing is tracked when the download or extraction fails.
#[tracing::instrument(skip(resolver, executor, coordinator), fields(repo = %request.target.repo))]
pub async fn install_package(
    resolver: &VersionResolver,
    executor: &dyn InstallExecutor,
    coordinator: &UpdateCoordinator,
    request: &InstallRequest,
) -> Result<PackageRecord> {
    let target = &request.target;
    let resolved = resolver
        .resolve(target)
        .await
        .with_context(|| format!("Failed to resolve a download for {}", target.repo))?;

    info!(
        "Installing {} {} from {}",
        target.repo, resolved.resolved_version, resolved.download_url
    );
    executor
        .install(&resolved.download_url, request.package_type, &target.repo.repo)
        .await
        .with_context(|| format!("Failed to install {}", target.repo))?;

    let record = coordinator
        .add_or_update_package(NewPackage {
            repo_name: target.repo.repo.clone(),
            owner: target.repo.owner.clone(),
            package_type: request.package_type,
            installed_version: resolved.resolved_version,
            mode: Some(target.mode.unwrap_or_default()),
            asset_name: target.asset_name.clone(),
            source: Some(target.source.unwrap_or_default()),
        })
        .await?;

    if request.package_type == PackageType::Integration {
        warn!("Restart the host to load {}", target.repo.repo);
    }
    info!(
        "Package {} installed/updated to {}",
        target.repo, record.installed_version
    );
    Ok(record)
}

/// Removes a package's files and stops tracking it.
///
/// The package type of the tracked record wins over `package_type`.
/// Returns whether the package was tracked.
#[tracing::instrument(skip(executor, coordinator))]
pub async fn uninstall_package(
    executor: &dyn InstallExecutor,
    coordinator: &UpdateCoordinator,
    repo: &RepoId,
    package_type: Option<PackageType>,
) -> Result<bool> {
    let tracked = coordinator.get_package(&repo.owner, &repo.repo).await;
    let package_type = tracked
        .as_ref()
        .map(|r| r.package_type)
        .or(package_type)
        .unwrap_or_default();

    executor
        .uninstall(package_type, &repo.repo)
        .await
        .with_context(|| format!("Failed to remove files of {}", repo))?;

    Ok(coordinator.remove_package(&repo.owner, &repo.repo).await?)
}

/// Installs every queued catalog key, then clears the queue.
///
/// Unknown keys and failed installs are logged and skipped. Returns the repo
/// names of the integrations that were installed.
#[tracing::instrument(skip_all)]
pub async fn process_pending_installs<R: Runtime>(
    resolver: &VersionResolver,
    executor: &dyn InstallExecutor,
    coordinator: &UpdateCoordinator,
    catalog: &dyn CatalogLoader,
    settings: &SettingsStore<R>,
    default_owner: Option<&str>,
) -> Result<Vec<String>> {
    let mut current = settings.load()?;
    if current.pending_installs.is_empty() {
        return Ok(Vec::new());
    }

    info!(
        "Found {} pending packages to install",
        current.pending_installs.len()
    );
    let entries = catalog.load();
    let mut installed_integrations = Vec::new();

    for key in &current.pending_installs {
        let Some(entry) = entries.iter().find(|e| e.key() == *key) else {
            error!("Package not found for key: {}", key);
            continue;
        };
        let Some(request) = InstallRequest::from_catalog(entry, default_owner) else {
            error!("Invalid package data for key {}: no owner or repo", key);
            continue;
        };

        match install_package(resolver, executor, coordinator, &request).await {
            Ok(_) => {
                if request.package_type == PackageType::Integration {
                    installed_integrations.push(request.target.repo.repo.clone());
                }
            }
            Err(e) => error!("Failed to install {}: {:#}", request.target.repo, e),
        }
    }

    current.pending_installs.clear();
    settings.save(&current)?;
    info!("Cleared pending installations");

    Ok(installed_integrations)
}
