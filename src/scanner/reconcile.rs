//! Matching of catalog entries against installed state.

use log::debug;
use std::collections::BTreeSet;

use crate::catalog::CatalogEntry;
use crate::package::{NewPackage, PackageSource, PackageType};

use super::InstalledVersions;

/// First of `[declared domain, repo, repo with - -> _]` present in `installed`.
pub fn match_installed_domain(
    installed: &InstalledVersions,
    repo: &str,
    declared_domain: Option<&str>,
) -> Option<String> {
    let underscored = repo.replace('-', "_");
    declared_domain
        .into_iter()
        .chain([repo, underscored.as_str()])
        .map(|candidate| candidate.trim().to_lowercase())
        .find(|key| !key.is_empty() && installed.contains_key(key))
}

/// Packages that are installed but not yet tracked, in catalog order.
///
/// Only integrations with a resolvable owner are considered. A match whose
/// domain is known to the foreign manager is attributed to it; otherwise
/// the catalog's declared source applies.
pub fn plan_reconciliation<F>(
    catalog: &[CatalogEntry],
    installed: &InstalledVersions,
    foreign_domains: &BTreeSet<String>,
    default_owner: Option<&str>,
    is_tracked: F,
) -> Vec<NewPackage>
where
    F: Fn(&str, &str) -> bool,
{
    let mut planned = Vec::new();

    for entry in catalog {
        let repo = entry.repo.trim();
        if repo.is_empty() || entry.package_type != PackageType::Integration {
            continue;
        }

        let Some(domain) = match_installed_domain(installed, repo, entry.domain.as_deref())
        else {
            continue;
        };

        let Some(owner) = entry.resolve_owner(default_owner) else {
            debug!("No owner for installed package {}, not tracking", repo);
            continue;
        };

        if is_tracked(&owner, repo) {
            continue;
        }

        let source = if foreign_domains.contains(&domain) {
            PackageSource::ForeignManager
        } else {
            entry.source.unwrap_or_default()
        };

        planned.push(NewPackage {
            repo_name: repo.to_string(),
            owner,
            package_type: PackageType::Integration,
            installed_version: installed
                .get(&domain)
                .cloned()
                .unwrap_or_else(|| super::UNKNOWN_VERSION.to_string()),
            mode: entry.mode,
            asset_name: entry.asset_name.clone(),
            source: Some(source),
        });
    }

    planned
}
