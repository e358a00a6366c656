//! etcd release archive download and unpacking.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::{Error, Result};

const BINARIES: [&str; 2] = ["etcd", "etcdctl"];
const BINARY_MODE: u32 = 0o755;

/// One etcd release for this machine's architecture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EtcdRelease {
    /// Release version without the leading `v`.
    pub version: String,

    /// Base URL the `v<version>/` directories live under.
    pub repo_url: String,

    /// Release architecture name, e.g. `amd64`.
    pub arch: String,
}

impl EtcdRelease {
    /// A release for the architecture this agent runs on.
    #[must_use]
    pub fn for_host(version: impl Into<String>, repo_url: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            repo_url: repo_url.into(),
            arch: release_arch(std::env::consts::ARCH).to_string(),
        }
    }

    /// Archive file name without extension, also its top-level directory.
    #[must_use]
    pub fn archive_stem(&self) -> String {
        format!("etcd-v{}-linux-{}", self.version, self.arch)
    }

    /// Download URL of the archive.
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "{}/v{}/{}.tar.gz",
            self.repo_url.trim_end_matches('/'),
            self.version,
            self.archive_stem()
        )
    }

    /// Downloads the archive into `tmp_dir`, then places `etcd` and `etcdctl` in
    /// `bin_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails or times out, or the archive lacks a
    /// binary.
    pub async fn install(
        &self,
        client: &Client,
        tmp_dir: &Path,
        bin_dir: &Path,
        timeout: Duration,
    ) -> Result<()> {
        let url = self.url();
        let archive = tmp_dir.join(format!("{}.tar.gz", self.archive_stem()));

        info!(target: "install", "downloading etcd {} from {url}", self.version);
        tokio::time::timeout(timeout, download(client, &url, &archive))
            .await
            .map_err(|_| Error::DownloadTimeout(url.clone()))??;

        let bin_dir = bin_dir.to_path_buf();
        let installed = tokio::task::spawn_blocking({
            let archive = archive.clone();
            let bin_dir = bin_dir.clone();
            move || unpack_binaries(&archive, &bin_dir)
        })
        .await??;

        info!(
            target: "install",
            "etcd binaries installed to {}: {:?}",
            bin_dir.display(),
            installed
        );

        Ok(())
    }
}

/// Maps a Rust target architecture to etcd's release naming.
#[must_use]
pub fn release_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        other => other,
    }
}

async fn download(client: &Client, url: &str, target: &Path) -> Result<()> {
    let mut response = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| Error::Download(url.to_string(), e))?;

    let mut file = tokio::fs::File::create(target)
        .await
        .map_err(|e| Error::Io("failed to create archive file", e))?;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| Error::Download(url.to_string(), e))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::Io("failed to write archive file", e))?;
    }

    file.flush()
        .await
        .map_err(|e| Error::Io("failed to flush archive file", e))
}

/// Extracts `etcd` and `etcdctl` from a release archive into `bin_dir` with mode
/// 0755, replacing existing files atomically. Returns the installed paths.
///
/// # Errors
///
/// Returns an error if the archive is unreadable or lacks either binary.
pub fn unpack_binaries(archive_path: &Path, bin_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(bin_dir).map_err(|e| Error::Io("failed to create bin directory", e))?;

    let file = File::open(archive_path).map_err(|e| Error::Io("failed to open archive", e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut installed = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| Error::Io("failed to read archive", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| Error::Io("failed to read archive entry", e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry
            .path()
            .map_err(|e| Error::Io("invalid archive entry path", e))?
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string);
        let Some(name) = name.filter(|n| BINARIES.contains(&n.as_str())) else {
            continue;
        };

        let target = bin_dir.join(&name);
        let staging = bin_dir.join(format!(".{name}.partial"));

        let mut out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(BINARY_MODE)
            .open(&staging)
            .map_err(|e| Error::Io("failed to create binary", e))?;
        io::copy(&mut entry, &mut out).map_err(|e| Error::Io("failed to extract binary", e))?;
        drop(out);

        fs::set_permissions(&staging, fs::Permissions::from_mode(BINARY_MODE))
            .map_err(|e| Error::Io("failed to chmod binary", e))?;
        fs::rename(&staging, &target).map_err(|e| Error::Io("failed to move binary", e))?;

        installed.push(target);
    }

    for binary in BINARIES {
        if !installed.iter().any(|p| p.ends_with(binary)) {
            return Err(Error::BinaryNotInArchive {
                archive: archive_path.to_path_buf(),
                binary,
            });
        }
    }

    Ok(installed)
}
