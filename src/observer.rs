//! Notifications delivered to the host.

use log::info;

use crate::package::PackageRecord;

/// Receives lifecycle events from the coordinator.
///
/// Calls are made after the ledger has been persisted, while the coordinator
/// still holds its lock, so implementations must not call back into it.
#[cfg_attr(test, mockall::automock)]
pub trait ObserverSink: Send + Sync {
    /// First time `package_id` is tracked in this process.
    fn on_new_package(&self, package_id: &str, record: &PackageRecord);

    /// An already-announced package was reinstalled or updated. Metadata kept
    /// by the host (such as the displayed software version) should follow.
    fn on_package_changed(&self, package_id: &str, record: &PackageRecord);

    /// Tracked state changed; listeners should refresh.
    fn on_listeners_updated(&self);

    /// Any metadata registered for `package_id` should be dropped.
    fn on_package_removed(&self, package_id: &str);
}

/// Observer that reports events through the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ObserverSink for LogObserver {
    fn on_new_package(&self, package_id: &str, record: &PackageRecord) {
        info!(
            "Tracking {} ({}/{} {}, {})",
            package_id, record.owner, record.repo_name, record.installed_version, record.source
        );
    }

    fn on_package_changed(&self, package_id: &str, record: &PackageRecord) {
        info!("{} is now at {}", package_id, record.installed_version);
    }

    fn on_listeners_updated(&self) {
        info!("Package state updated");
    }

    fn on_package_removed(&self, package_id: &str) {
        info!("Stopped tracking {}", package_id);
    }
}
