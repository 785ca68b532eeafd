use anyhow::{Context, Result};
use log::info;

use crate::coordinator::CheckSummary;
use crate::runtime::Runtime;

use super::{Services, process_pending_installs};

/// What a startup did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StartupReport {
    /// Records read from the ledger.
    pub loaded: usize,
    /// Pre-installed packages that started being tracked.
    pub synced: usize,
    pub check: CheckSummary,
    /// Integrations installed from the pending queue.
    pub installed: Vec<String>,
}

/// Loads the ledger, tracks pre-installed packages, checks for updates and
/// drains the pending-install queue, in that order.
#[tracing::instrument(skip_all)]
pub async fn startup<R: Runtime>(services: &Services<R>) -> Result<StartupReport> {
    let coordinator = &services.coordinator;
    let default_owner = services.default_owner.as_deref();

    let loaded = coordinator.load().await;

    let catalog = services.catalog.load();
    let synced = coordinator
        .sync_preinstalled(&catalog, services.installed.as_ref(), default_owner)
        .await
        .context("Failed to track pre-installed packages")?;

    let check = coordinator
        .check_updates()
        .await
        .context("Failed to record update check")?;

    let installed = process_pending_installs(
        &services.resolver,
        services.executor.as_ref(),
        coordinator,
        services.catalog.as_ref(),
        &services.settings,
        default_owner,
    )
    .await?;

    if !installed.is_empty() {
        info!(
            "Restart required to load newly installed integrations: {}",
            installed.join(", ")
        );
    }

    Ok(StartupReport {
        loaded,
        synced,
        check,
        installed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, MockCatalogLoader};
    use crate::config::{Settings, SettingsStore};
    use crate::coordinator::UpdateCoordinator;
    use crate::forge::{MockForgeClient, Release};
    use crate::install::MockInstallExecutor;
    use crate::ledger::MockLedgerStore;
    use crate::observer::MockObserverSink;
    use crate::resolver::VersionResolver;
    use crate::runtime::RealRuntime;
    use crate::scanner::MockInstalledState;
    use mockall::Sequence;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test_log::test(tokio::test)]
    async fn test_startup_runs_every_phase_in_order() {
        let dir = tempdir().unwrap();
        let settings = SettingsStore::new(RealRuntime, dir.path());
        let mut pending = Settings::default();
        pending.queue(["acme_fresh"]);
        settings.save(&pending).unwrap();

        let catalog_entries = vec![
            CatalogEntry {
                repo: "existing".into(),
                ..Default::default()
            },
            CatalogEntry {
                owner: Some("acme".into()),
                repo: "fresh".into(),
                ..Default::default()
            },
        ];
        let mut catalog = MockCatalogLoader::new();
        catalog
            .expect_load()
            .returning(move || catalog_entries.clone());

        let mut installed = MockInstalledState::new();
        installed.expect_installed_versions().returning(|| {
            [("existing".to_string(), "0.5".to_string())].into_iter().collect()
        });
        installed.expect_foreign_domains().returning(BTreeSet::new);

        let mut client = MockForgeClient::new();
        client.expect_get_latest_release().returning(|_| {
            Ok(Some(Release {
                tag_name: "1.0".into(),
                ..Default::default()
            }))
        });
        client
            .expect_archive_zip_url()
            .returning(|r, git_ref| format!("https://forge/{}/archive/{}.zip", r, git_ref));
        let client = Arc::new(client);

        // load, then save for: sync, check, pending install.
        let mut seq = Sequence::new();
        let mut ledger = MockLedgerStore::new();
        ledger
            .expect_load()
            .times(1)
            .in_sequence(&mut seq)
            .returning(Default::default);
        ledger
            .expect_save()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|p| p.len() == 1 && p["acme_existing"].installed_version == "0.5")
            .returning(|_| Ok(()));
        ledger
            .expect_save()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|p| p["acme_existing"].update_available)
            .returning(|_| Ok(()));
        ledger
            .expect_save()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|p| p.len() == 2)
            .returning(|_| Ok(()));

        let mut observer = MockObserverSink::new();
        observer.expect_on_new_package().times(2).returning(|_, _| ());
        observer.expect_on_listeners_updated().returning(|| ());

        let mut executor = MockInstallExecutor::new();
        executor
            .expect_install()
            .times(1)
            .returning(|_, _, _| Ok(PathBuf::from("/cc/fresh")));

        let services = Services {
            forge: client.clone(),
            coordinator: Arc::new(UpdateCoordinator::new(
                client.clone(),
                Box::new(ledger),
                Arc::new(observer),
            )),
            resolver: VersionResolver::new(client),
            executor: Arc::new(executor),
            catalog: Arc::new(catalog),
            installed: Arc::new(installed),
            settings,
            default_owner: Some("acme".into()),
        };

        let report = startup(&services).await.unwrap();

        assert_eq!(report.loaded, 0);
        assert_eq!(report.synced, 1);
        assert_eq!(report.check.checked, 1);
        assert_eq!(report.check.updates_available, 1);
        assert_eq!(report.installed, vec!["fresh".to_string()]);
        assert!(services.settings.load().unwrap().pending_installs.is_empty());
    }
}
