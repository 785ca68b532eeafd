//! Application layer - use cases composing the forge, coordinator, resolver and executor.

pub mod browse;
mod install;
mod startup;
mod watch;

use std::sync::Arc;

use crate::catalog::CatalogLoader;
use crate::config::SettingsStore;
use crate::coordinator::UpdateCoordinator;
use crate::forge::ForgeClient;
use crate::install::InstallExecutor;
use crate::resolver::VersionResolver;
use crate::runtime::Runtime;
use crate::scanner::InstalledState;

pub use install::{InstallRequest, install_package, process_pending_installs, uninstall_package};
pub use startup::{StartupReport, startup};
pub use watch::watch;

/// Collaborators wired together for one configuration.
pub struct Services<R: Runtime> {
    pub forge: Arc<dyn ForgeClient>,
    pub coordinator: Arc<UpdateCoordinator>,
    pub resolver: VersionResolver,
    pub executor: Arc<dyn InstallExecutor>,
    pub catalog: Arc<dyn CatalogLoader>,
    pub installed: Arc<dyn InstalledState>,
    pub settings: SettingsStore<R>,
    pub default_owner: Option<String>,
}
