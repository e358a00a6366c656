//! Operating system identification from `/etc/os-release`.

use std::path::Path;

use crate::error::{Error, Result};

const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Basic operating system information.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OsInfo {
    /// `ID`, e.g. `ubuntu`.
    pub id: String,

    /// `VERSION_ID`, e.g. `9.4`.
    pub version_id: String,

    /// `NAME`.
    pub name: String,

    /// `PRETTY_NAME`.
    pub pretty_name: String,

    /// Normalised family: `debian`, `rhel`, `fedora`, or the raw id.
    pub family: String,
}

impl OsInfo {
    /// Reads `/etc/os-release`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn detect() -> Result<Self> {
        Self::from_file(OS_RELEASE_PATH)
    }

    /// Reads an os-release formatted file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::OsRelease(path.to_path_buf(), e))?;

        Ok(Self::from_os_release(&contents))
    }

    /// Parses os-release contents.
    #[must_use]
    pub fn from_os_release(contents: &str) -> Self {
        let mut info = Self::default();

        for line in contents.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').to_string();

            match key.trim() {
                "ID" => info.id = value,
                "VERSION_ID" => info.version_id = value,
                "NAME" => info.name = value,
                "PRETTY_NAME" => info.pretty_name = value,
                _ => {}
            }
        }

        info.family = match info.id.as_str() {
            "debian" | "ubuntu" => "debian",
            "centos" | "rhel" | "rocky" | "almalinux" | "ol" | "oracle" => "rhel",
            "fedora" => "fedora",
            other => other,
        }
        .to_string();

        info
    }

    /// Whether packages come from apt.
    #[must_use]
    pub fn is_debian_family(&self) -> bool {
        self.family == "debian"
    }

    /// Whether packages come from dnf.
    #[must_use]
    pub fn is_rhel_family(&self) -> bool {
        self.family == "rhel" || self.family == "fedora"
    }

    /// Major part of `VERSION_ID`.
    #[must_use]
    pub fn major_version(&self) -> &str {
        self.version_id
            .split('.')
            .next()
            .unwrap_or(&self.version_id)
    }
}
