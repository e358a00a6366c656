use std::time::Duration;

use serde::Deserialize;

/// Upper bounds for external calls, in seconds.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    /// One peer health probe.
    #[serde(default = "default_health_probe")]
    pub health_probe: u64,

    /// The etcd membership-registration call.
    #[serde(default = "default_member_add")]
    pub member_add: u64,

    /// One `--version` probe.
    #[serde(default = "default_version_probe")]
    pub version_probe: u64,

    /// One package-manager or service-manager command.
    #[serde(default = "default_install_command")]
    pub install_command: u64,

    /// One release archive download.
    #[serde(default = "default_download")]
    pub download: u64,
}

impl Timeouts {
    /// Name of the first bound set to zero, which no call could ever meet.
    #[must_use]
    pub fn first_zero(&self) -> Option<&'static str> {
        [
            ("health_probe", self.health_probe),
            ("member_add", self.member_add),
            ("version_probe", self.version_probe),
            ("install_command", self.install_command),
            ("download", self.download),
        ]
        .into_iter()
        .find(|(_, secs)| *secs == 0)
        .map(|(name, _)| name)
    }

    /// Health probe bound.
    #[must_use]
    pub const fn health_probe(&self) -> Duration {
        Duration::from_secs(self.health_probe)
    }

    /// Membership registration bound.
    #[must_use]
    pub const fn member_add(&self) -> Duration {
        Duration::from_secs(self.member_add)
    }

    /// Version probe bound.
    #[must_use]
    pub const fn version_probe(&self) -> Duration {
        Duration::from_secs(self.version_probe)
    }

    /// Install command bound.
    #[must_use]
    pub const fn install_command(&self) -> Duration {
        Duration::from_secs(self.install_command)
    }

    /// Download bound.
    #[must_use]
    pub const fn download(&self) -> Duration {
        Duration::from_secs(self.download)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            health_probe: default_health_probe(),
            member_add: default_member_add(),
            version_probe: default_version_probe(),
            install_command: default_install_command(),
            download: default_download(),
        }
    }
}

const fn default_health_probe() -> u64 {
    5
}

const fn default_member_add() -> u64 {
    30
}

const fn default_version_probe() -> u64 {
    10
}

const fn default_install_command() -> u64 {
    900
}

const fn default_download() -> u64 {
    600
}
