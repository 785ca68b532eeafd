//! Resolution of a package reference into a download URL and version.
//!
//! The archive of a ref is tried first; when that cannot be resolved the
//! resolver falls back to a release asset. Packages hosted on the external
//! forge are never looked up.

mod asset;

use log::{debug, error};
use std::sync::Arc;
use thiserror::Error;

use crate::forge::{ForgeClient, RepoId};
use crate::http::ForgeError;
use crate::package::{InstallMode, PackageSource};

pub use asset::pick_asset;

pub const EXTERNAL_FORGE_API: &str = "https://api.github.com";
pub const DEFAULT_REF: &str = "main";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error("{0}")]
    Resolution(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionResult {
    pub download_url: String,
    pub resolved_version: String,
}

/// What to resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveRequest {
    pub repo: RepoId,
    /// Kept for bookkeeping; the cascade is the same for every mode.
    pub mode: Option<InstallMode>,
    pub tag: Option<String>,
    pub asset_name: Option<String>,
    pub source: Option<PackageSource>,
}

impl ResolveRequest {
    pub fn new(repo: RepoId) -> Self {
        Self {
            repo,
            mode: None,
            tag: None,
            asset_name: None,
            source: None,
        }
    }

    fn tag(&self) -> Option<&str> {
        self.tag.as_deref().filter(|t| !t.is_empty())
    }
}

pub struct VersionResolver {
    client: Arc<dyn ForgeClient>,
}

impl VersionResolver {
    pub fn new(client: Arc<dyn ForgeClient>) -> Self {
        Self { client }
    }

    #[tracing::instrument(skip(self), fields(repo = %request.repo))]
    pub async fn resolve(&self, request: &ResolveRequest) -> Result<ResolutionResult, ResolveError> {
        if request.source == Some(PackageSource::ExternalForge) {
            return Ok(external_forge_zipball(&request.repo, request.tag()));
        }

        debug!("Resolving {} (mode {:?})", request.repo, request.mode);

        match self.archive_ref(&request.repo, request.tag()).await {
            Ok(git_ref) => {
                return Ok(ResolutionResult {
                    download_url: self.client.archive_zip_url(&request.repo, &git_ref),
                    resolved_version: git_ref,
                });
            }
            Err(e) => debug!(
                "Archive resolution failed for {}, trying release asset: {}",
                request.repo, e
            ),
        }

        match self.release_asset(request).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("Both download methods failed for {}", request.repo);
                Err(e)
            }
        }
    }

    /// Explicit tag, else latest release, else default branch.
    async fn archive_ref(&self, repo: &RepoId, tag: Option<&str>) -> Result<String, ResolveError> {
        if let Some(tag) = tag {
            return Ok(tag.to_string());
        }

        if let Some(release) = self.client.get_latest_release(repo).await?
            && let Some(label) = release.version_label()
        {
            return Ok(label.to_string());
        }

        let info = self.client.get_repo(repo).await?;
        Ok(info
            .default_branch
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_REF.to_string()))
    }

    async fn asset_tag(&self, repo: &RepoId, tag: Option<&str>) -> Result<String, ResolveError> {
        if let Some(tag) = tag {
            return Ok(tag.to_string());
        }

        let release = self
            .client
            .get_latest_release(repo)
            .await?
            .ok_or_else(|| ResolveError::Resolution("no releases found".into()))?;

        release
            .version_label()
            .map(str::to_string)
            .ok_or_else(|| ResolveError::Resolution("could not determine latest release tag".into()))
    }

    async fn release_asset(&self, request: &ResolveRequest) -> Result<ResolutionResult, ResolveError> {
        let tag = self.asset_tag(&request.repo, request.tag()).await?;
        let release = self.client.get_release_by_tag(&request.repo, &tag).await?;
        let asset = pick_asset(&release, request.asset_name.as_deref())?;

        Ok(ResolutionResult {
            download_url: asset.browser_download_url.clone(),
            resolved_version: tag,
        })
    }
}

fn external_forge_zipball(repo: &RepoId, tag: Option<&str>) -> ResolutionResult {
    let base = format!(
        "{}/repos/{}/{}/zipball",
        EXTERNAL_FORGE_API, repo.owner, repo.repo
    );
    match tag {
        Some(tag) => ResolutionResult {
            download_url: format!("{}/{}", base, tag),
            resolved_version: tag.to_string(),
        },
        None => ResolutionResult {
            download_url: base,
            resolved_version: DEFAULT_REF.to_string(),
        },
    }
}
