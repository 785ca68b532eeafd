use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What kind of content a package installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageType {
    #[default]
    Integration,
    #[serde(alias = "lovelace")]
    Dashboard,
    #[serde(alias = "blueprints")]
    BlueprintPack,
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageType::Integration => write!(f, "integration"),
            PackageType::Dashboard => write!(f, "dashboard"),
            PackageType::BlueprintPack => write!(f, "blueprint_pack"),
        }
    }
}

impl FromStr for PackageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "integration" => Ok(PackageType::Integration),
            "dashboard" | "lovelace" => Ok(PackageType::Dashboard),
            "blueprint_pack" | "blueprints" => Ok(PackageType::BlueprintPack),
            _ => anyhow::bail!(
                "Unknown package type: {}. Expected integration, dashboard, or blueprint_pack.",
                s
            ),
        }
    }
}

/// Download strategy recorded for a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstallMode {
    /// Full repository zip at a ref.
    #[default]
    #[serde(alias = "zipball")]
    Archive,
    /// A curated binary attached to a release.
    #[serde(alias = "asset")]
    ReleaseAsset,
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::Archive => write!(f, "archive"),
            InstallMode::ReleaseAsset => write!(f, "release_asset"),
        }
    }
}

impl FromStr for InstallMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "archive" | "zipball" => Ok(InstallMode::Archive),
            "release_asset" | "asset" => Ok(InstallMode::ReleaseAsset),
            _ => anyhow::bail!("Unknown install mode: {}. Expected archive or release_asset.", s),
        }
    }
}

/// Where a package comes from, which decides whether it is checked for updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageSource {
    #[default]
    #[serde(alias = "gitea")]
    SelfHostedForge,
    #[serde(alias = "github")]
    ExternalForge,
    #[serde(alias = "hacs")]
    ForeignManager,
}

impl PackageSource {
    /// External-forge and foreign-manager packages are never checked by us.
    pub fn is_update_checked(&self) -> bool {
        matches!(self, PackageSource::SelfHostedForge)
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSource::SelfHostedForge => write!(f, "self_hosted_forge"),
            PackageSource::ExternalForge => write!(f, "external_forge"),
            PackageSource::ForeignManager => write!(f, "foreign_manager"),
        }
    }
}

impl FromStr for PackageSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "self_hosted_forge" | "gitea" => Ok(PackageSource::SelfHostedForge),
            "external_forge" | "github" => Ok(PackageSource::ExternalForge),
            "foreign_manager" | "hacs" => Ok(PackageSource::ForeignManager),
            _ => anyhow::bail!(
                "Unknown package source: {}. Expected self_hosted_forge, external_forge, or foreign_manager.",
                s
            ),
        }
    }
}

/// One tracked package, as persisted in the ledger.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PackageRecord {
    pub repo_name: String,
    pub owner: String,
    pub package_type: PackageType,
    pub installed_version: String,
    pub latest_version: String,
    #[serde(default)]
    pub update_available: bool,
    pub install_date: String,
    pub last_update: String,
    #[serde(default)]
    pub last_check: Option<String>,
    #[serde(default)]
    pub mode: Option<InstallMode>,
    #[serde(default)]
    pub asset_name: Option<String>,
    #[serde(default)]
    pub source: PackageSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

impl PackageRecord {
    pub fn package_id(&self) -> String {
        super::package_id(&self.owner, &self.repo_name)
    }
}

/// The caller-supplied fields of an install or update.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPackage {
    pub repo_name: String,
    pub owner: String,
    pub package_type: PackageType,
    pub installed_version: String,
    pub mode: Option<InstallMode>,
    pub asset_name: Option<String>,
    /// `None` keeps the source of an existing record (self-hosted for new ones).
    pub source: Option<PackageSource>,
}

impl NewPackage {
    pub fn package_id(&self) -> String {
        super::package_id(&self.owner, &self.repo_name)
    }
}
