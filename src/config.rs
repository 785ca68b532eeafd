//! Host configuration: persisted settings, resolved paths and the HTTP client.

use anyhow::{Context, Result, anyhow, bail};
use log::debug;
use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runtime::Runtime;

pub const APP_DIR: &str = "forgetrack";
pub const SETTINGS_FILE: &str = "config.json";
pub const LEDGER_FILE: &str = "packages.json";
pub const CATALOG_FILE: &str = "catalog.json";
pub const PACKAGES_DIR: &str = "custom_components";
pub const TOKEN_ENV: &str = "FORGE_TOKEN";
pub const USER_AGENT: &str = "forgetrack";
/// Applies to every request; per-request timeouts bound the rest.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Settings persisted in `config.json` under the root.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_owner: Option<String>,
    /// Catalog keys (`"{owner}_{repo}"`) to install on the next startup.
    #[serde(default)]
    pub pending_installs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_storage: Option<PathBuf>,
}

impl Settings {
    /// Appends keys to the pending queue, skipping ones already queued.
    /// Returns how many were added.
    pub fn queue<I, S>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        for key in keys {
            let key = key.into();
            if !key.is_empty() && !self.pending_installs.contains(&key) {
                self.pending_installs.push(key);
                added += 1;
            }
        }
        added
    }
}

/// Reads and writes [`Settings`].
pub struct SettingsStore<R: Runtime> {
    runtime: R,
    path: PathBuf,
}

impl<R: Runtime> SettingsStore<R> {
    pub fn new(runtime: R, root: &Path) -> Self {
        Self {
            runtime,
            path: root.join(SETTINGS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing settings are the defaults. A file that exists but cannot be
    /// parsed is an error, so a typo never silently drops the queue.
    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> Result<Settings> {
        if !self.runtime.exists(&self.path) {
            debug!("No settings at {:?}, using defaults", self.path);
            return Ok(Settings::default());
        }
        let content = self.runtime.read_to_string(&self.path)?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings {:?}", self.path))
    }

    #[tracing::instrument(skip(self, settings))]
    pub fn save(&self, settings: &Settings) -> Result<()> {
        let content = serde_json::to_string_pretty(settings)?;
        if let Some(parent) = self.path.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        self.runtime.write(&tmp, content.as_bytes())?;
        self.runtime.rename(&tmp, &self.path)?;
        debug!("Saved settings to {:?}", self.path);
        Ok(())
    }
}

/// Values given on the command line; they take precedence over [`Settings`].
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub owner: Option<String>,
    pub packages_dir: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub foreign_storage: Option<PathBuf>,
}

/// Effective configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub root: PathBuf,
    pub base_url: String,
    pub default_owner: Option<String>,
    pub packages_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub ledger_path: PathBuf,
    pub foreign_storage: Option<PathBuf>,
}

impl Config {
    pub fn resolve(root: PathBuf, settings: &Settings, overrides: Overrides) -> Result<Self> {
        let base_url = overrides
            .base_url
            .or_else(|| settings.base_url.clone())
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                anyhow!("No forge base URL configured. Use --base-url or FORGETRACK_BASE_URL.")
            })?;

        let default_owner = overrides
            .owner
            .or_else(|| settings.default_owner.clone())
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty());

        Ok(Self {
            packages_dir: overrides
                .packages_dir
                .or_else(|| settings.packages_dir.clone())
                .unwrap_or_else(|| root.join(PACKAGES_DIR)),
            catalog_path: overrides
                .catalog
                .or_else(|| settings.catalog.clone())
                .unwrap_or_else(|| root.join(CATALOG_FILE)),
            ledger_path: root.join(LEDGER_FILE),
            foreign_storage: overrides
                .foreign_storage
                .or_else(|| settings.foreign_storage.clone()),
            base_url,
            default_owner,
            root,
        })
    }
}

/// `<config dir>/forgetrack`
pub fn default_root<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    match runtime.config_dir() {
        Some(dir) => Ok(dir.join(APP_DIR)),
        None => bail!("Could not determine a configuration directory. Use --root."),
    }
}

/// HTTP client used for every forge request and download.
///
/// When `FORGE_TOKEN` is set it is sent as `Authorization: token <value>`.
pub fn build_client<R: Runtime>(runtime: &R) -> Result<Client> {
    let mut headers = HeaderMap::new();
    if let Ok(token) = runtime.env_var(TOKEN_ENV)
        && !token.is_empty()
    {
        let mut auth_value = HeaderValue::from_str(&format!("token {}", token))
            .with_context(|| format!("{} contains invalid characters", TOKEN_ENV))?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);
        debug!("Using {} for authentication", TOKEN_ENV);
    }

    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .default_headers(headers)
        .build()
        .context("Failed to build HTTP client")
}
