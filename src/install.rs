//! Download, extraction and removal of package files.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use log::{debug, info};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use zip::ZipArchive;

use crate::http::HttpClient;
use crate::package::PackageType;
use crate::runtime::Runtime;

/// Directory inside a repository archive that holds integrations.
const INTEGRATIONS_DIR: &str = "custom_components";

/// Upper bound for one archive download, body included.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("Failed to extract {path:?}: {message}")]
    Extract { path: PathBuf, message: String },

    #[error("Failed to remove {path:?}: {message}")]
    Remove { path: PathBuf, message: String },

    #[error("Invalid package directory name: {0:?}")]
    InvalidName(String),
}

/// Puts package files in place and takes them away again.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstallExecutor: Send + Sync {
    /// Installs the archive at `url`, returning the directory it landed in.
    async fn install(
        &self,
        url: &str,
        package_type: PackageType,
        repo_name: &str,
    ) -> Result<PathBuf, InstallError>;

    async fn uninstall(&self, package_type: PackageType, repo_name: &str)
    -> Result<(), InstallError>;
}

/// Where each package type is installed.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallLayout {
    pub packages_root: PathBuf,
    pub dashboards_root: PathBuf,
    pub blueprints_root: PathBuf,
    pub staging_dir: PathBuf,
}

impl InstallLayout {
    /// Dashboards, blueprints and staging live under `root`.
    pub fn new(root: &Path, packages_root: PathBuf) -> Self {
        Self {
            packages_root,
            dashboards_root: root.join("dashboards"),
            blueprints_root: root.join("blueprints"),
            staging_dir: root.join("staging"),
        }
    }

    /// Fails for names that would resolve outside the install roots.
    pub fn target_dir(
        &self,
        package_type: PackageType,
        repo_name: &str,
    ) -> Result<PathBuf, InstallError> {
        check_dir_name(repo_name)?;
        Ok(match package_type {
            PackageType::Integration => self.packages_root.join(integration_dir_name(repo_name)),
            PackageType::Dashboard => self.dashboards_root.join(repo_name),
            PackageType::BlueprintPack => self.blueprints_root.join(repo_name),
        })
    }
}

/// A repository name must be a single plain path component.
fn check_dir_name(name: &str) -> Result<(), InstallError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || name.contains(['/', '\\'])
        || Path::new(name).is_absolute()
    {
        return Err(InstallError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn integration_dir_name(repo_name: &str) -> String {
    repo_name.to_lowercase().replace('-', "_")
}

/// Installs zip archives fetched over HTTP.
pub struct ArchiveInstaller<R: Runtime> {
    runtime: R,
    http: HttpClient,
    layout: InstallLayout,
}

impl<R: Runtime> ArchiveInstaller<R> {
    pub fn new(runtime: R, http: HttpClient, layout: InstallLayout) -> Self {
        Self {
            runtime,
            http,
            layout,
        }
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    /// Unpacks `archive_path` into `extract_dir`, returning the directory that
    /// holds the package content (the single top-level directory if there is one).
    fn extract(&self, archive_path: &Path, extract_dir: &Path) -> Result<PathBuf> {
        debug!("Extracting zip archive to {:?}...", extract_dir);
        let mut reader = self
            .runtime
            .open(archive_path)
            .with_context(|| format!("Failed to open archive at {:?}", archive_path))?;

        // ZipArchive needs Seek; the runtime hands out plain readers.
        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read archive {:?}", archive_path))?;
        let mut archive =
            ZipArchive::new(Cursor::new(buffer)).context("Failed to parse ZIP archive")?;

        if self.runtime.exists(extract_dir) {
            self.runtime.remove_dir_all(extract_dir)?;
        }
        self.runtime.create_dir_all(extract_dir)?;

        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .with_context(|| format!("Failed to read ZIP entry {}", i))?;

            let Some(entry_path) = entry.enclosed_name() else {
                debug!("Skipping entry with invalid path");
                continue;
            };
            let full_path = extract_dir.join(entry_path);

            if entry.is_dir() {
                self.runtime.create_dir_all(&full_path)?;
            } else {
                if let Some(parent) = full_path.parent() {
                    self.runtime.create_dir_all(parent)?;
                }
                let mut dest = self.runtime.create_file(&full_path)?;
                std::io::copy(&mut entry, &mut dest)
                    .with_context(|| format!("Failed to extract file {:?}", full_path))?;
            }
        }

        let entries = self
            .runtime
            .read_dir(extract_dir)
            .context("Failed to read extraction directory")?;
        match entries.as_slice() {
            [] => Err(anyhow!("Archive appears to be empty.")),
            [only] if self.runtime.is_dir(only) => Ok(only.clone()),
            _ => Ok(extract_dir.to_path_buf()),
        }
    }

    /// Replaces `target` with `source`.
    fn replace_dir(&self, source: &Path, target: &Path) -> Result<()> {
        if self.runtime.exists(target) {
            self.runtime.remove_dir_all(target)?;
        }
        if let Some(parent) = target.parent() {
            self.runtime.create_dir_all(parent)?;
        }
        debug!("Installing {:?}", target);
        self.runtime.rename(source, target)
    }

    /// Moves extracted content into place.
    ///
    /// An integration archive laid out as a repository (`custom_components/<domain>/`)
    /// installs each domain it contains; otherwise the content is the package itself.
    fn place(
        &self,
        content: &Path,
        package_type: PackageType,
        repo_name: &str,
    ) -> Result<PathBuf> {
        let nested = content.join(INTEGRATIONS_DIR);
        if package_type == PackageType::Integration && self.runtime.is_dir(&nested) {
            let domains: Vec<PathBuf> = self
                .runtime
                .read_dir(&nested)?
                .into_iter()
                .filter(|p| self.runtime.is_dir(p))
                .collect();
            let mut installed = None;
            for domain_dir in &domains {
                let Some(name) = domain_dir.file_name() else {
                    continue;
                };
                let target = self.layout.packages_root.join(name);
                self.replace_dir(domain_dir, &target)?;
                installed.get_or_insert(target);
            }
            return installed.ok_or_else(|| anyhow!("{} contains no integration", INTEGRATIONS_DIR));
        }

        let target = self.layout.target_dir(package_type, repo_name)?;
        self.replace_dir(content, &target)?;
        Ok(target)
    }

    fn cleanup_staging(&self, paths: &[&Path]) {
        for path in paths {
            let result = if self.runtime.is_dir(path) {
                self.runtime.remove_dir_all(path)
            } else if self.runtime.exists(path) {
                self.runtime.remove_file(path)
            } else {
                Ok(())
            };
            if let Err(e) = result {
                debug!("Failed to clean up {:?}: {:#}", path, e);
            }
        }
    }
}

#[async_trait]
impl<R: Runtime> InstallExecutor for ArchiveInstaller<R> {
    #[tracing::instrument(skip(self))]
    async fn install(
        &self,
        url: &str,
        package_type: PackageType,
        repo_name: &str,
    ) -> Result<PathBuf, InstallError> {
        check_dir_name(repo_name)?;
        let staging = &self.layout.staging_dir;
        let archive_path = staging.join(format!("{}.zip", repo_name));
        let extract_dir = staging.join(format!("{}_extract", repo_name));

        let download_error = |e: anyhow::Error| InstallError::Download {
            url: url.to_string(),
            message: format!("{:#}", e),
        };
        self.runtime
            .create_dir_all(staging)
            .map_err(download_error)?;
        let bytes = self
            .http
            .download_file(url, DOWNLOAD_TIMEOUT, || {
                self.runtime.create_file(&archive_path)
            })
            .await
            .map_err(download_error)?;
        debug!("Downloaded {} bytes for {}", bytes, repo_name);

        let result = self
            .extract(&archive_path, &extract_dir)
            .and_then(|content| self.place(&content, package_type, repo_name))
            .map_err(|e| InstallError::Extract {
                path: archive_path.clone(),
                message: format!("{:#}", e),
            });
        self.cleanup_staging(&[&archive_path, &extract_dir]);

        let target = result?;
        info!("Installed {} into {:?}", repo_name, target);
        Ok(target)
    }

    #[tracing::instrument(skip(self))]
    async fn uninstall(
        &self,
        package_type: PackageType,
        repo_name: &str,
    ) -> Result<(), InstallError> {
        let target = self.layout.target_dir(package_type, repo_name)?;
        if !self.runtime.exists(&target) {
            debug!("{:?} does not exist, nothing to remove", target);
            return Ok(());
        }

        self.runtime
            .remove_dir_all(&target)
            .map_err(|e| InstallError::Remove {
                path: target.clone(),
                message: format!("{:#}", e),
            })?;
        info!("Removed {:?}", target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;
    use zip::CompressionMethod;
    use zip::ZipWriter;
    use zip::write::FileOptions;

    fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options: FileOptions<()> =
            FileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, content) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn installer(root: &Path, http: HttpClient) -> ArchiveInstaller<RealRuntime> {
        let layout = InstallLayout::new(root, root.join("custom_components"));
        ArchiveInstaller::new(RealRuntime, http, layout)
    }

    fn http() -> HttpClient {
        HttpClient::new(reqwest::Client::new())
    }

    #[test]
    fn test_layout_target_dirs() {
        let layout = InstallLayout::new(Path::new("/root"), PathBuf::from("/cc"));
        assert_eq!(
            layout.target_dir(PackageType::Integration, "My-Widget").unwrap(),
            PathBuf::from("/cc/my_widget")
        );
        assert_eq!(
            layout.target_dir(PackageType::Dashboard, "card").unwrap(),
            PathBuf::from("/root/dashboards/card")
        );
        assert_eq!(
            layout.target_dir(PackageType::BlueprintPack, "bp").unwrap(),
            PathBuf::from("/root/blueprints/bp")
        );
    }

    #[test]
    fn test_layout_rejects_names_outside_roots() {
        let layout = InstallLayout::new(Path::new("/root"), PathBuf::from("/cc"));
        for name in ["", " ", ".", "..", "a/b", "..\\x", "/etc"] {
            let err = layout
                .target_dir(PackageType::Integration, name)
                .unwrap_err();
            assert!(matches!(err, InstallError::InvalidName(_)), "{name:?}");
        }
    }

    #[tokio::test]
    async fn test_uninstall_parent_dir_keeps_root_contents() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("custom_components/widget")).unwrap();
        fs::write(dir.path().join("packages.json"), "{}").unwrap();
        fs::write(dir.path().join("config.json"), "{}").unwrap();

        let installer = installer(dir.path(), http());
        let err = installer
            .uninstall(PackageType::Integration, "..")
            .await
            .unwrap_err();

        assert!(matches!(err, InstallError::InvalidName(_)));
        assert!(dir.path().join("packages.json").exists());
        assert!(dir.path().join("config.json").exists());
        assert!(dir.path().join("custom_components/widget").exists());
    }

    #[tokio::test]
    async fn test_install_rejects_parent_dir_before_download() {
        let dir = tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/up.zip")
            .expect(0)
            .create_async()
            .await;

        let installer = installer(dir.path(), http());
        let err = installer
            .install(&format!("{}/up.zip", server.url()), PackageType::Dashboard, "..")
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, InstallError::InvalidName(_)));
        assert!(!dir.path().join("staging").exists());
    }

    #[tokio::test]
    async fn test_install_repository_archive_with_integrations_dir() {
        let dir = tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/widget.zip")
            .with_status(200)
            .with_body(zip_bytes(&[
                ("widget-main/README.md", "readme"),
                ("widget-main/custom_components/widget/manifest.json", r#"{"version": "1.0"}"#),
            ]))
            .create_async()
            .await;

        let installer = installer(dir.path(), http());
        let target = installer
            .install(
                &format!("{}/widget.zip", server.url()),
                PackageType::Integration,
                "widget",
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(target, dir.path().join("custom_components/widget"));
        assert!(target.join("manifest.json").exists());
        assert!(!dir.path().join("custom_components/README.md").exists());
        assert!(!dir.path().join("staging/widget.zip").exists());
        assert!(!dir.path().join("staging/widget_extract").exists());
    }

    #[tokio::test]
    async fn test_install_plain_archive_replaces_existing() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("dashboards/card");
        fs::create_dir_all(&existing).unwrap();
        fs::write(existing.join("old.js"), "old").unwrap();

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/card.zip")
            .with_body(zip_bytes(&[("card.js", "new")]))
            .create_async()
            .await;

        let installer = installer(dir.path(), http());
        let target = installer
            .install(&format!("{}/card.zip", server.url()), PackageType::Dashboard, "card")
            .await
            .unwrap();

        assert_eq!(target, existing);
        assert_eq!(fs::read_to_string(existing.join("card.js")).unwrap(), "new");
        assert!(!existing.join("old.js").exists());
    }

    #[tokio::test]
    async fn test_install_download_failure_leaves_nothing() {
        let dir = tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing.zip")
            .with_status(404)
            .create_async()
            .await;

        let installer = installer(dir.path(), http());
        let err = installer
            .install(
                &format!("{}/missing.zip", server.url()),
                PackageType::Integration,
                "missing",
            )
            .await
            .unwrap_err();

        assert!(matches!(err, InstallError::Download { .. }));
        assert!(!dir.path().join("staging/missing.zip").exists());
        assert!(!dir.path().join("custom_components").exists());
    }

    #[tokio::test]
    async fn test_install_corrupted_archive() {
        let dir = tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/bad.zip")
            .with_body("corrupted data")
            .create_async()
            .await;

        let installer = installer(dir.path(), http());
        let err = installer
            .install(&format!("{}/bad.zip", server.url()), PackageType::Dashboard, "bad")
            .await
            .unwrap_err();

        assert!(matches!(err, InstallError::Extract { .. }));
        assert!(!dir.path().join("staging/bad.zip").exists());
    }

    #[tokio::test]
    async fn test_uninstall_removes_target_and_tolerates_absence() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("custom_components/my_widget");
        fs::create_dir_all(&target).unwrap();
        File::create(target.join("manifest.json")).unwrap();

        let installer = installer(dir.path(), http());
        installer
            .uninstall(PackageType::Integration, "my-widget")
            .await
            .unwrap();
        assert!(!target.exists());

        installer
            .uninstall(PackageType::Integration, "my-widget")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_uninstall_failure_is_reported() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_remove_dir_all()
            .returning(|_| Err(anyhow!("permission denied")));

        let layout = InstallLayout::new(Path::new("/root"), PathBuf::from("/cc"));
        let installer = ArchiveInstaller::new(runtime, http(), layout);
        let err = installer
            .uninstall(PackageType::Integration, "widget")
            .await
            .unwrap_err();

        assert!(
            matches!(err, InstallError::Remove { ref path, ref message } if path == Path::new("/cc/widget") && message.contains("permission denied"))
        );
    }
}
