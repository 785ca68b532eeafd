//! Forge abstraction.
//!
//! The self-hosted forge speaks the Gitea-style `/api/v1` REST surface. All
//! consumers go through the [`ForgeClient`] trait so they can be tested
//! against a mock.

mod gitea;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::http::ForgeError;

pub use gitea::GiteaClient;

/// Timeout for single-object lookups (user, org, file content).
pub const INFO_TIMEOUT: Duration = Duration::from_secs(20);
/// Timeout for repositories, releases and listings.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for repository search.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for directory listings.
pub const DIR_TIMEOUT: Duration = Duration::from_secs(15);

/// Repository identifier (owner/repo format).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            anyhow::bail!("Invalid repository format. Expected 'owner/repo'.")
        }
        if parts
            .iter()
            .any(|p| matches!(*p, "." | "..") || p.contains('\\'))
        {
            anyhow::bail!("Invalid repository name: {}", s)
        }
        Ok(RepoId::new(parts[0], parts[1]))
    }
}

/// Repository metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Repository {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// A user or organization.
///
/// Users carry `login`, organizations carry `username`; some server
/// versions send both.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Account {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Account {
    pub fn name(&self) -> Option<&str> {
        self.login
            .as_deref()
            .or(self.username.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Full name when set, login otherwise.
    pub fn display_name(&self) -> Option<&str> {
        self.full_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.name())
    }
}

/// A downloadable asset attached to a release.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ReleaseAsset {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub browser_download_url: String,
}

/// A release as returned by the forge.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Release {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// The tag when present, the release name otherwise.
    pub fn version_label(&self) -> Option<&str> {
        Some(self.tag_name.as_str())
            .filter(|t| !t.is_empty())
            .or_else(|| self.name.as_deref().filter(|n| !n.is_empty()))
    }
}

/// An entry of the contents API: a file (with base64 content) or a directory listing item.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ContentEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ContentEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == "dir"
    }
}

/// Client for the forge's REST API.
///
/// Methods returning `Result` fail on any non-2xx response. The listing and
/// lookup methods returning `Vec`/`Option` are tolerant: a failed request
/// yields an empty list or `None` and is only logged.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForgeClient: Send + Sync {
    /// Base URL of the forge, without trailing slash.
    fn base_url(&self) -> &str;

    async fn get_repo(&self, repo: &RepoId) -> Result<Repository, ForgeError>;

    async fn get_org_repos(&self, org: &str) -> Vec<Repository>;

    async fn get_user_repos(&self, user: &str) -> Vec<Repository>;

    /// Organizations of the authenticated user.
    async fn get_user_orgs(&self) -> Vec<Account>;

    async fn get_current_user(&self) -> Option<Account>;

    /// Users the authenticated user follows.
    async fn get_user_following(&self) -> Vec<Account>;

    async fn get_org_info(&self, org: &str) -> Option<Account>;

    async fn get_org_members(&self, org: &str) -> Vec<Account>;

    async fn get_user_info(&self, user: &str) -> Option<Account>;

    async fn get_releases(&self, repo: &RepoId) -> Vec<Release>;

    /// The latest release, or `None` when the forge answers 404.
    async fn get_latest_release(&self, repo: &RepoId) -> Result<Option<Release>, ForgeError>;

    async fn get_release_by_tag(&self, repo: &RepoId, tag: &str) -> Result<Release, ForgeError>;

    /// Decoded content of a file at `git_ref`.
    async fn get_file_content(&self, repo: &RepoId, path: &str, git_ref: &str) -> Option<String>;

    /// README at the default branch, trying the usual spellings.
    async fn get_readme(&self, repo: &RepoId) -> Option<String>;

    async fn list_dir(&self, repo: &RepoId, path: &str, git_ref: &str) -> Vec<ContentEntry>;

    async fn search_repos(&self, limit: u32) -> Vec<Repository>;

    /// URL of the zip archive of the repository at `git_ref`. No request is made.
    fn archive_zip_url(&self, repo: &RepoId, git_ref: &str) -> String;
}
