//! Self-hosted forge client (Gitea `/api/v1`).

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::http::{ForgeError, HttpClient};

use super::{
    Account, ContentEntry, DIR_TIMEOUT, ForgeClient, INFO_TIMEOUT, LIST_TIMEOUT, Release, RepoId,
    Repository, SEARCH_TIMEOUT,
};

const README_NAMES: [&str; 3] = ["README.md", "readme.md", "README"];

/// Search results come either wrapped as `{"ok": true, "data": [...]}` or as a bare list.
#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Wrapped { data: Vec<Repository> },
    Bare(Vec<Repository>),
}

pub struct GiteaClient {
    http_client: HttpClient,
    base_url: String,
}

impl GiteaClient {
    pub fn new(http_client: HttpClient, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    /// GET that degrades any failure to `T::default()`.
    async fn get_or_default<T>(&self, path: &str, timeout: Duration) -> T
    where
        T: DeserializeOwned + Default,
    {
        let url = self.api(path);
        match self.http_client.get_json(&url, timeout).await {
            Ok(value) => value,
            Err(e) => {
                debug!("Tolerated failure for {}: {}", url, e);
                T::default()
            }
        }
    }

    fn decode_content(entry: ContentEntry) -> Option<String> {
        let encoded: String = entry
            .content?
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| debug!("Invalid base64 content for {}: {}", entry.path, e))
            .ok()?;
        String::from_utf8(bytes).ok()
    }
}

#[async_trait]
impl ForgeClient for GiteaClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    #[tracing::instrument(skip(self))]
    async fn get_repo(&self, repo: &RepoId) -> Result<Repository, ForgeError> {
        let url = self.api(&format!("repos/{}/{}", repo.owner, repo.repo));
        debug!("Fetching repo info from {}...", url);
        self.http_client.get_json(&url, LIST_TIMEOUT).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_org_repos(&self, org: &str) -> Vec<Repository> {
        self.get_or_default(&format!("orgs/{}/repos", org), LIST_TIMEOUT)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_user_repos(&self, user: &str) -> Vec<Repository> {
        self.get_or_default(&format!("users/{}/repos", user), LIST_TIMEOUT)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_user_orgs(&self) -> Vec<Account> {
        self.get_or_default("user/orgs", LIST_TIMEOUT).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_current_user(&self) -> Option<Account> {
        self.get_or_default("user", INFO_TIMEOUT).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_user_following(&self) -> Vec<Account> {
        self.get_or_default("user/following", LIST_TIMEOUT).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_org_info(&self, org: &str) -> Option<Account> {
        self.get_or_default(&format!("orgs/{}", org), INFO_TIMEOUT)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_org_members(&self, org: &str) -> Vec<Account> {
        self.get_or_default(&format!("orgs/{}/members", org), LIST_TIMEOUT)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_user_info(&self, user: &str) -> Option<Account> {
        self.get_or_default(&format!("users/{}", user), INFO_TIMEOUT)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_releases(&self, repo: &RepoId) -> Vec<Release> {
        self.get_or_default(
            &format!("repos/{}/{}/releases", repo.owner, repo.repo),
            LIST_TIMEOUT,
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn get_latest_release(&self, repo: &RepoId) -> Result<Option<Release>, ForgeError> {
        let url = self.api(&format!("repos/{}/{}/releases/latest", repo.owner, repo.repo));
        debug!("Fetching latest release from {}...", url);
        self.http_client.get_optional_json(&url, LIST_TIMEOUT).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_release_by_tag(&self, repo: &RepoId, tag: &str) -> Result<Release, ForgeError> {
        let url = self.api(&format!(
            "repos/{}/{}/releases/tags/{}",
            repo.owner, repo.repo, tag
        ));
        debug!("Fetching release {} from {}...", tag, url);
        self.http_client.get_json(&url, LIST_TIMEOUT).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_file_content(&self, repo: &RepoId, path: &str, git_ref: &str) -> Option<String> {
        let url = self.api(&format!("repos/{}/{}/contents/{}", repo.owner, repo.repo, path));
        let entry: ContentEntry = self
            .http_client
            .get_json_with_query(&url, &[("ref", git_ref)], INFO_TIMEOUT)
            .await
            .map_err(|e| debug!("Failed to fetch {}: {}", url, e))
            .ok()?;
        Self::decode_content(entry)
    }

    #[tracing::instrument(skip(self))]
    async fn get_readme(&self, repo: &RepoId) -> Option<String> {
        for name in README_NAMES {
            let url = self.api(&format!("repos/{}/{}/contents/{}", repo.owner, repo.repo, name));
            if let Ok(entry) = self
                .http_client
                .get_json::<ContentEntry>(&url, INFO_TIMEOUT)
                .await
                && let Some(content) = Self::decode_content(entry)
            {
                return Some(content);
            }
        }
        None
    }

    #[tracing::instrument(skip(self))]
    async fn list_dir(&self, repo: &RepoId, path: &str, git_ref: &str) -> Vec<ContentEntry> {
        let url = self.api(&format!(
            "repos/{}/{}/contents/{}",
            repo.owner,
            repo.repo,
            path.trim_matches('/')
        ));
        // A file path answers with a single object, which is not a listing.
        match self
            .http_client
            .get_json_with_query::<serde_json::Value>(&url, &[("ref", git_ref)], DIR_TIMEOUT)
            .await
        {
            Ok(value @ serde_json::Value::Array(_)) => {
                serde_json::from_value(value).unwrap_or_default()
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                debug!("Failed to list {}: {}", url, e);
                Vec::new()
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn search_repos(&self, limit: u32) -> Vec<Repository> {
        let url = self.api("repos/search");
        let limit = limit.to_string();
        match self
            .http_client
            .get_json_with_query::<SearchResponse>(&url, &[("limit", &limit)], SEARCH_TIMEOUT)
            .await
        {
            Ok(SearchResponse::Wrapped { data }) => data,
            Ok(SearchResponse::Bare(repos)) => repos,
            Err(e) => {
                debug!("Failed to search repos: {}", e);
                Vec::new()
            }
        }
    }

    fn archive_zip_url(&self, repo: &RepoId, git_ref: &str) -> String {
        self.api(&format!(
            "repos/{}/{}/archive/{}.zip",
            repo.owner, repo.repo, git_ref
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;

    fn client_for(url: &str) -> GiteaClient {
        GiteaClient::new(HttpClient::new(Client::new()), url)
    }

    fn repo() -> RepoId {
        RepoId::new("test-owner", "test-repo")
    }

    #[test]
    fn test_archive_zip_url() {
        let client = client_for("https://forge.example.com/");
        assert_eq!(
            client.archive_zip_url(&repo(), "v1.0.0"),
            "https://forge.example.com/api/v1/repos/test-owner/test-repo/archive/v1.0.0.zip"
        );
        assert_eq!(client.base_url(), "https://forge.example.com");
    }

    #[tokio::test]
    async fn test_get_repo() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/repos/test-owner/test-repo")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name": "test-repo", "default_branch": "develop"}"#)
            .create_async()
            .await;

        let info = client_for(&server.url()).get_repo(&repo()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(info.default_branch.as_deref(), Some("develop"));
    }

    #[tokio::test]
    async fn test_get_repo_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/repos/test-owner/test-repo")
            .with_status(404)
            .create_async()
            .await;

        let result = client_for(&server.url()).get_repo(&repo()).await;
        assert!(result.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_get_latest_release_not_found_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/repos/test-owner/test-repo/releases/latest")
            .with_status(404)
            .create_async()
            .await;

        let result = client_for(&server.url())
            .get_latest_release(&repo())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_get_latest_release_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/repos/test-owner/test-repo/releases/latest")
            .with_status(502)
            .create_async()
            .await;

        let result = client_for(&server.url()).get_latest_release(&repo()).await;
        assert!(matches!(result, Err(ForgeError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_get_release_by_tag() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/repos/test-owner/test-repo/releases/tags/v2.0.0")
            .with_status(200)
            .with_body(
                r#"{"tag_name": "v2.0.0", "assets": [
                    {"name": "pkg.zip", "size": 10, "browser_download_url": "https://dl/pkg.zip"}
                ]}"#,
            )
            .create_async()
            .await;

        let release = client_for(&server.url())
            .get_release_by_tag(&repo(), "v2.0.0")
            .await
            .unwrap();
        assert_eq!(release.assets.len(), 1);
        assert_eq!(release.assets[0].browser_download_url, "https://dl/pkg.zip");
    }

    #[tokio::test]
    async fn test_tolerant_listing_returns_empty_on_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/orgs/acme/repos")
            .with_status(500)
            .create_async()
            .await;

        let repos = client_for(&server.url()).get_org_repos("acme").await;
        assert!(repos.is_empty());
    }

    #[tokio::test]
    async fn test_get_user_info_missing_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/users/ghost")
            .with_status(404)
            .create_async()
            .await;

        assert!(client_for(&server.url()).get_user_info("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_get_file_content_decodes_base64() {
        let mut server = mockito::Server::new_async().await;
        let encoded = STANDARD.encode(r#"{"version": "1.0.0"}"#);
        let _mock = server
            .mock(
                "GET",
                "/api/v1/repos/test-owner/test-repo/contents/manifest.json?ref=main",
            )
            .with_status(200)
            .with_body(format!(
                r#"{{"name": "manifest.json", "path": "manifest.json", "type": "file", "content": "{}"}}"#,
                encoded
            ))
            .create_async()
            .await;

        let content = client_for(&server.url())
            .get_file_content(&repo(), "manifest.json", "main")
            .await;
        assert_eq!(content.as_deref(), Some(r#"{"version": "1.0.0"}"#));
    }

    #[tokio::test]
    async fn test_get_readme_falls_back_to_lowercase() {
        let mut server = mockito::Server::new_async().await;
        let _upper = server
            .mock("GET", "/api/v1/repos/test-owner/test-repo/contents/README.md")
            .with_status(404)
            .create_async()
            .await;
        let _lower = server
            .mock("GET", "/api/v1/repos/test-owner/test-repo/contents/readme.md")
            .with_status(200)
            .with_body(format!(
                r#"{{"name": "readme.md", "type": "file", "content": "{}"}}"#,
                STANDARD.encode("# Hello")
            ))
            .create_async()
            .await;

        let readme = client_for(&server.url()).get_readme(&repo()).await;
        assert_eq!(readme.as_deref(), Some("# Hello"));
    }

    #[tokio::test]
    async fn test_list_dir_of_file_is_empty() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock(
                "GET",
                "/api/v1/repos/test-owner/test-repo/contents/custom_components?ref=main",
            )
            .with_status(200)
            .with_body(r#"{"name": "custom_components", "type": "file"}"#)
            .create_async()
            .await;

        let entries = client_for(&server.url())
            .list_dir(&repo(), "/custom_components/", "main")
            .await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_search_repos_wrapped_and_bare() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/repos/search?limit=100")
            .with_status(200)
            .with_body(r#"{"ok": true, "data": [{"name": "a"}, {"name": "b"}]}"#)
            .create_async()
            .await;

        let repos = client_for(&server.url()).search_repos(100).await;
        assert_eq!(repos.len(), 2);

        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/repos/search?limit=5")
            .with_status(200)
            .with_body(r#"[{"name": "c"}]"#)
            .create_async()
            .await;

        let repos = client_for(&server.url()).search_repos(5).await;
        assert_eq!(repos[0].name, "c");
    }
}
