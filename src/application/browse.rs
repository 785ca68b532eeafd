//! Read-only views of the forge: accounts, repositories, releases and content.

use crate::forge::{Account, ContentEntry, ForgeClient, Release, RepoId, Repository};
use crate::http::ForgeError;

/// Directory of integration domains inside a repository.
const INTEGRATIONS_DIR: &str = "custom_components";

/// The authenticated account as the forge sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub base_url: String,
    pub user: Option<Account>,
    pub orgs: Vec<Account>,
    pub following: Vec<Account>,
}

pub async fn profile(client: &dyn ForgeClient) -> Profile {
    Profile {
        base_url: client.base_url().to_string(),
        user: client.get_current_user().await,
        orgs: client.get_user_orgs().await,
        following: client.get_user_following().await,
    }
}

/// An organization or user together with its repositories.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerOverview {
    pub account: Account,
    pub members: Vec<Account>,
    pub repos: Vec<Repository>,
}

/// Looks `name` up as an organization first, then as a user.
pub async fn owner_overview(client: &dyn ForgeClient, name: &str) -> Option<OwnerOverview> {
    if let Some(account) = client.get_org_info(name).await {
        return Some(OwnerOverview {
            account,
            members: client.get_org_members(name).await,
            repos: client.get_org_repos(name).await,
        });
    }

    let account = client.get_user_info(name).await?;
    Some(OwnerOverview {
        account,
        members: Vec::new(),
        repos: client.get_user_repos(name).await,
    })
}

/// All releases, or just the one tagged `tag`.
pub async fn releases(
    client: &dyn ForgeClient,
    repo: &RepoId,
    tag: Option<&str>,
) -> Result<Vec<Release>, ForgeError> {
    match tag {
        Some(tag) => Ok(vec![client.get_release_by_tag(repo, tag).await?]),
        None => Ok(client.get_releases(repo).await),
    }
}

pub async fn search(client: &dyn ForgeClient, limit: u32) -> Vec<Repository> {
    client.search_repos(limit).await
}

pub async fn readme(client: &dyn ForgeClient, repo: &RepoId) -> Option<String> {
    client.get_readme(repo).await
}

pub async fn list_dir(
    client: &dyn ForgeClient,
    repo: &RepoId,
    path: &str,
    git_ref: &str,
) -> Vec<ContentEntry> {
    client.list_dir(repo, path.trim_matches('/'), git_ref).await
}

/// Integration domain folders of a repository at `git_ref`.
pub async fn integration_domains(
    client: &dyn ForgeClient,
    repo: &RepoId,
    git_ref: &str,
) -> Vec<String> {
    client
        .list_dir(repo, INTEGRATIONS_DIR, git_ref)
        .await
        .into_iter()
        .filter(|entry| entry.is_dir())
        .map(|entry| entry.name.trim().to_string())
        .filter(|name| !name.is_empty() && !name.starts_with('.'))
        .collect()
}
