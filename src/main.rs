use anyhow::{Context, Result, bail};
use clap::Parser;
use forgetrack::application::{self, InstallRequest, Services};
use forgetrack::catalog::JsonCatalog;
use forgetrack::config::{Config, Overrides, SettingsStore, build_client, default_root};
use forgetrack::coordinator::UpdateCoordinator;
use forgetrack::application::browse;
use forgetrack::forge::{Account, ForgeClient, GiteaClient, RepoId};
use forgetrack::http::HttpClient;
use forgetrack::install::{ArchiveInstaller, InstallLayout};
use forgetrack::ledger::PackageLedger;
use forgetrack::observer::LogObserver;
use forgetrack::package::{InstallMode, PackageRecord, PackageSource, PackageType};
use forgetrack::resolver::{DEFAULT_REF, ResolveRequest, VersionResolver};
use forgetrack::runtime::RealRuntime;
use forgetrack::scanner::InstalledStateScanner;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// forgetrack - track packages installed from a self-hosted git forge
///
/// Keeps a ledger of installed integrations, dashboards and blueprint packs,
/// detects packages that were installed by other means and checks the forge
/// for newer releases.
///
/// If the FORGE_TOKEN environment variable is set, it is sent as an
/// `Authorization: token ...` header with every request.
///
/// Examples:
///   forgetrack --base-url https://git.example.com startup
///   forgetrack install acme/widget --tag v1.2.0
#[derive(Parser, Debug)]
#[command(author, version = env!("FORGETRACK_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration root holding config.json, the ledger and the catalog
    #[arg(
        long = "root",
        short = 'r',
        env = "FORGETRACK_ROOT",
        value_name = "PATH",
        global = true
    )]
    root: Option<PathBuf>,

    /// Forge base URL (e.g. https://git.example.com)
    #[arg(long, env = "FORGETRACK_BASE_URL", value_name = "URL", global = true)]
    base_url: Option<String>,

    /// Owner used for catalog entries that do not name one
    #[arg(long, env = "FORGETRACK_OWNER", value_name = "OWNER", global = true)]
    owner: Option<String>,

    /// Directory integrations are installed into
    #[arg(long, value_name = "PATH", global = true)]
    packages_dir: Option<PathBuf>,

    /// Catalog of installable packages
    #[arg(long, value_name = "PATH", global = true)]
    catalog: Option<PathBuf>,

    /// Storage file of a co-resident package manager (read only)
    #[arg(long, value_name = "PATH", global = true)]
    foreign_storage: Option<PathBuf>,

    /// Log progress at info level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Load the ledger, track pre-installed packages, check for updates and
    /// install queued packages
    Startup,

    /// Check every tracked package for a newer release
    Check,

    /// List tracked packages
    List,

    /// Show one tracked package
    Show(RepoArgs),

    /// Resolve the download URL and version of a package without installing it
    Resolve(ResolveArgs),

    /// Install or update a package
    Install(InstallArgs),

    /// Remove a package's files and stop tracking it
    Remove(RemoveArgs),

    /// Queue catalog packages ("{owner}_{repo}") for the next startup
    Queue(QueueArgs),

    /// Check for updates periodically until interrupted
    Watch(WatchArgs),

    /// Browse the forge without changing anything locally
    #[command(subcommand)]
    Forge(ForgeCommands),
}

#[derive(clap::Subcommand, Debug)]
enum ForgeCommands {
    /// Show the authenticated account, its organizations and followed users
    Whoami,

    /// Show an organization or user and its repositories
    Owner {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Search repositories
    Search {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },

    /// List releases, or show the one with the given tag
    Releases {
        #[arg(value_name = "OWNER/REPO")]
        repo: RepoId,

        #[arg(long)]
        tag: Option<String>,
    },

    /// Print the README of a repository
    Readme(RepoArgs),

    /// List a directory of a repository
    Ls {
        #[arg(value_name = "OWNER/REPO")]
        repo: RepoId,

        #[arg(value_name = "PATH", default_value = "")]
        path: String,

        #[arg(long = "ref", default_value = DEFAULT_REF)]
        git_ref: String,
    },

    /// List the integration domains a repository provides
    Domains {
        #[arg(value_name = "OWNER/REPO")]
        repo: RepoId,

        #[arg(long = "ref", default_value = DEFAULT_REF)]
        git_ref: String,
    },
}

#[derive(clap::Args, Debug)]
struct RepoArgs {
    /// The repository in the format "owner/repo"
    #[arg(value_name = "OWNER/REPO")]
    repo: RepoId,
}

#[derive(clap::Args, Debug)]
struct ResolveArgs {
    #[arg(value_name = "OWNER/REPO")]
    repo: RepoId,

    /// Tag or branch to resolve instead of the latest release
    #[arg(long)]
    tag: Option<String>,

    /// Release asset to download when falling back to release assets
    #[arg(long = "asset", value_name = "NAME")]
    asset_name: Option<String>,

    /// Where the package is hosted (self_hosted_forge, external_forge)
    #[arg(long)]
    source: Option<PackageSource>,

    /// Download strategy recorded for the package (archive, release_asset)
    #[arg(long)]
    mode: Option<InstallMode>,
}

impl ResolveArgs {
    fn request(&self) -> ResolveRequest {
        ResolveRequest {
            repo: self.repo.clone(),
            mode: self.mode,
            tag: self.tag.clone(),
            asset_name: self.asset_name.clone(),
            source: self.source,
        }
    }
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    #[command(flatten)]
    target: ResolveArgs,

    /// Package type (integration, dashboard, blueprint_pack)
    #[arg(long = "type", default_value = "integration")]
    package_type: PackageType,
}

#[derive(clap::Args, Debug)]
struct RemoveArgs {
    #[arg(value_name = "OWNER/REPO")]
    repo: RepoId,

    /// Package type, for packages that are not tracked
    #[arg(long = "type")]
    package_type: Option<PackageType>,
}

#[derive(clap::Args, Debug)]
struct QueueArgs {
    /// Catalog keys in the format "{owner}_{repo}"
    #[arg(value_name = "KEY", required = true)]
    keys: Vec<String>,
}

#[derive(clap::Args, Debug)]
struct WatchArgs {
    /// Seconds between update checks
    #[arg(long, default_value_t = 3600)]
    interval: u64,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            base_url: self.base_url.clone(),
            owner: self.owner.clone(),
            packages_dir: self.packages_dir.clone(),
            catalog: self.catalog.clone(),
            foreign_storage: self.foreign_storage.clone(),
        }
    }
}

fn build_services(config: &Config) -> Result<Services<RealRuntime>> {
    let http = HttpClient::new(build_client(&RealRuntime)?);
    let forge: Arc<dyn ForgeClient> = Arc::new(GiteaClient::new(http.clone(), &config.base_url));

    let ledger = PackageLedger::new(RealRuntime, config.ledger_path.clone());
    let coordinator = UpdateCoordinator::new(forge.clone(), Box::new(ledger), Arc::new(LogObserver));
    let layout = InstallLayout::new(&config.root, config.packages_dir.clone());

    Ok(Services {
        forge: forge.clone(),
        coordinator: Arc::new(coordinator),
        resolver: VersionResolver::new(forge),
        executor: Arc::new(ArchiveInstaller::new(RealRuntime, http, layout)),
        catalog: Arc::new(JsonCatalog::new(RealRuntime, config.catalog_path.clone())),
        installed: Arc::new(InstalledStateScanner::new(
            RealRuntime,
            config.packages_dir.clone(),
            config.foreign_storage.clone(),
        )),
        settings: SettingsStore::new(RealRuntime, &config.root),
        default_owner: config.default_owner.clone(),
    })
}

fn print_record(id: &str, record: &PackageRecord) {
    let status = if record.update_available {
        format!("{} -> {}", record.installed_version, record.latest_version)
    } else {
        record.installed_version.clone()
    };
    println!(
        "{}  {}/{}  {}  {}  {}",
        id, record.owner, record.repo_name, record.package_type, record.source, status
    );
}

fn account_label(account: &Account) -> String {
    match (account.name(), account.display_name()) {
        (Some(name), Some(display)) if name != display => format!("{} ({})", name, display),
        (Some(name), _) => name.to_string(),
        (None, Some(display)) => display.to_string(),
        (None, None) => "?".to_string(),
    }
}

async fn run_forge_command(forge: &dyn ForgeClient, command: ForgeCommands) -> Result<()> {
    match command {
        ForgeCommands::Whoami => {
            let profile = browse::profile(forge).await;
            let Some(user) = profile.user else {
                bail!("Not authenticated with {}. Set FORGE_TOKEN.", profile.base_url);
            };
            println!("{} on {}", account_label(&user), profile.base_url);
            for org in &profile.orgs {
                println!("  org  {}", account_label(org));
            }
            for followed in &profile.following {
                println!("  follows  {}", account_label(followed));
            }
        }
        ForgeCommands::Owner { name } => {
            let Some(overview) = browse::owner_overview(forge, &name).await else {
                bail!("No organization or user named {}", name);
            };
            println!("{}", account_label(&overview.account));
            for member in &overview.members {
                println!("  member  {}", account_label(member));
            }
            for repo in &overview.repos {
                println!("  {}", repo.full_name.as_deref().unwrap_or(&repo.name));
            }
        }
        ForgeCommands::Search { limit } => {
            for repo in browse::search(forge, limit).await {
                println!(
                    "{}  {}",
                    repo.full_name.as_deref().unwrap_or(&repo.name),
                    repo.description.as_deref().unwrap_or_default()
                );
            }
        }
        ForgeCommands::Releases { repo, tag } => {
            let releases = browse::releases(forge, &repo, tag.as_deref())
                .await
                .with_context(|| format!("Failed to fetch releases of {}", repo))?;
            if releases.is_empty() {
                println!("No releases found for {}", repo);
            }
            for release in &releases {
                println!(
                    "{}  {}  {} assets{}",
                    release.version_label().unwrap_or("?"),
                    release.published_at.as_deref().unwrap_or("-"),
                    release.assets.len(),
                    if release.prerelease { "  (prerelease)" } else { "" }
                );
            }
        }
        ForgeCommands::Readme(args) => {
            let Some(readme) = browse::readme(forge, &args.repo).await else {
                bail!("No README found for {}", args.repo);
            };
            println!("{}", readme);
        }
        ForgeCommands::Ls {
            repo,
            path,
            git_ref,
        } => {
            for entry in browse::list_dir(forge, &repo, &path, &git_ref).await {
                let suffix = if entry.is_dir() { "/" } else { "" };
                println!("{}{}", entry.name, suffix);
            }
        }
        ForgeCommands::Domains { repo, git_ref } => {
            let domains = browse::integration_domains(forge, &repo, &git_ref).await;
            if domains.is_empty() {
                println!("{} provides no integrations at {}", repo, git_ref);
            }
            for domain in domains {
                println!("{}", domain);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => default_root(&RealRuntime)?,
    };
    let settings_store = SettingsStore::new(RealRuntime, &root);

    if let Commands::Queue(args) = &cli.command {
        let mut settings = settings_store.load()?;
        let added = settings.queue(args.keys.iter().cloned());
        settings_store.save(&settings)?;
        println!(
            "Queued {} packages ({} pending)",
            added,
            settings.pending_installs.len()
        );
        return Ok(());
    }

    let settings = settings_store.load()?;
    let config = Config::resolve(root, &settings, cli.overrides())?;
    let services = build_services(&config)?;
    let coordinator = &services.coordinator;

    match cli.command {
        Commands::Startup => {
            let report = application::startup(&services).await?;
            println!(
                "Tracked {} packages ({} newly detected), {} updates available, {} installed from queue",
                report.loaded + report.synced,
                report.synced,
                report.check.updates_available,
                report.installed.len()
            );
        }
        Commands::Check => {
            coordinator.load().await;
            let summary = coordinator.check_updates().await?;
            for (id, record) in coordinator.packages().await {
                if record.update_available {
                    print_record(&id, &record);
                }
            }
            println!(
                "Checked {}, skipped {}, failed {}, {} updates available",
                summary.checked, summary.skipped, summary.failed, summary.updates_available
            );
        }
        Commands::List => {
            coordinator.load().await;
            let packages = coordinator.packages().await;
            if packages.is_empty() {
                println!("No packages tracked.");
            }
            for (id, record) in &packages {
                print_record(id, record);
            }
        }
        Commands::Show(args) => {
            coordinator.load().await;
            let Some(record) = coordinator.get_package(&args.repo.owner, &args.repo.repo).await
            else {
                bail!("Package {} is not tracked", args.repo);
            };
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Resolve(args) => {
            let resolved = services
                .resolver
                .resolve(&args.request())
                .await
                .with_context(|| format!("Failed to resolve {}", args.repo))?;
            println!("{} {}", resolved.resolved_version, resolved.download_url);
        }
        Commands::Install(args) => {
            coordinator.load().await;
            let request = InstallRequest {
                target: args.target.request(),
                package_type: args.package_type,
            };
            let record = application::install_package(
                &services.resolver,
                services.executor.as_ref(),
                coordinator,
                &request,
            )
            .await?;
            println!(
                "Installed {}/{} {}",
                record.owner, record.repo_name, record.installed_version
            );
        }
        Commands::Remove(args) => {
            coordinator.load().await;
            let tracked = application::uninstall_package(
                services.executor.as_ref(),
                coordinator,
                &args.repo,
                args.package_type,
            )
            .await?;
            if tracked {
                println!("Removed {}", args.repo);
            } else {
                println!("{} was not tracked", args.repo);
            }
        }
        Commands::Watch(args) => {
            coordinator.load().await;
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Failed to listen for Ctrl-C: {}", e);
                }
            };
            application::watch(coordinator, Duration::from_secs(args.interval.max(1)), shutdown)
                .await;
        }
        Commands::Forge(command) => run_forge_command(services.forge.as_ref(), command).await?,
        // Handled before the configuration is resolved.
        Commands::Queue(_) => {}
    }
    Ok(())
}
