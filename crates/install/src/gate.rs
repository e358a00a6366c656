//! Decides whether a managed service needs installing.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use dbcp_config::AgentConfig;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::ManagedService;

/// What "installed" means for one service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSpec {
    /// The service.
    pub service: ManagedService,

    /// Substring the version report must contain.
    pub expected_version: String,

    /// Binaries that must all exist. The first one is asked for its version. A bare
    /// file name is looked up on `PATH` at probe time.
    pub binaries: Vec<PathBuf>,
}

impl ServiceSpec {
    /// PostgreSQL: `postgres` and `initdb` under `postgresql.bin_path`.
    #[must_use]
    pub fn postgres(config: &AgentConfig) -> Self {
        let pg = &config.node.postgresql;
        Self {
            service: ManagedService::Postgres,
            expected_version: pg.version.clone(),
            binaries: vec![pg.bin_path.join("postgres"), pg.bin_path.join("initdb")],
        }
    }

    /// etcd: `etcd` and `etcdctl` under `etcd.bin_path`.
    #[must_use]
    pub fn etcd(config: &AgentConfig) -> Self {
        let etcd = &config.node.etcd;
        Self {
            service: ManagedService::Etcd,
            expected_version: etcd.version.clone(),
            binaries: vec![etcd.bin_path.join("etcd"), etcd.bin_path.join("etcdctl")],
        }
    }

    /// Patroni: `patroni` under `patroni.bin_path`, or on `PATH`.
    #[must_use]
    pub fn patroni(config: &AgentConfig) -> Self {
        let patroni = &config.node.patroni;
        let binary = patroni
            .bin_path
            .as_ref()
            .map_or_else(|| PathBuf::from("patroni"), |dir| dir.join("patroni"));

        Self {
            service: ManagedService::Patroni,
            expected_version: patroni.version.clone(),
            binaries: vec![binary],
        }
    }

    /// All managed services in install order.
    #[must_use]
    pub fn all(config: &AgentConfig) -> Vec<Self> {
        ManagedService::ALL
            .iter()
            .map(|service| match service {
                ManagedService::Postgres => Self::postgres(config),
                ManagedService::Etcd => Self::etcd(config),
                ManagedService::Patroni => Self::patroni(config),
            })
            .collect()
    }
}

/// Answers whether a compatible version of a service is already present.
#[async_trait]
pub trait InstallGate: Send + Sync {
    /// `true` when the service must be installed. Never has side effects.
    async fn should_install(&self, spec: &ServiceSpec) -> bool;
}

/// Probes the filesystem and the binary's own `--version` report.
///
/// Any failure along the way counts as "not installed".
#[derive(Clone, Copy, Debug)]
pub struct VersionGate {
    timeout: Duration,
}

impl VersionGate {
    /// Creates a gate whose version probes are bounded by `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn is_installed(&self, spec: &ServiceSpec) -> Result<(), String> {
        let binaries = spec
            .binaries
            .iter()
            .map(|binary| resolve(binary))
            .collect::<Result<Vec<_>, _>>()?;

        let probe = binaries
            .first()
            .ok_or_else(|| "no binaries to probe".to_string())?;

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(probe)
                .arg("--version")
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| format!("{} --version timed out", probe.display()))?
        .map_err(|e| format!("{} --version failed to run: {e}", probe.display()))?;

        if !output.status.success() {
            return Err(format!(
                "{} --version exited with {}",
                probe.display(),
                output.status
            ));
        }

        let report = String::from_utf8_lossy(&output.stdout);
        debug!(target: "install", "{} reports: {}", probe.display(), report.trim());

        if report.contains(&spec.expected_version) {
            Ok(())
        } else {
            Err(format!(
                "version mismatch: expected '{}' in '{}'",
                spec.expected_version,
                report.trim()
            ))
        }
    }
}

#[async_trait]
impl InstallGate for VersionGate {
    async fn should_install(&self, spec: &ServiceSpec) -> bool {
        match self.is_installed(spec).await {
            Ok(()) => {
                info!(
                    target: "install",
                    "{} {} already installed, skipping installation",
                    spec.service, spec.expected_version
                );
                false
            }
            Err(reason) => {
                warn!(
                    target: "install",
                    "{} {} needs installing: {reason}",
                    spec.service, spec.expected_version
                );
                true
            }
        }
    }
}

fn resolve(binary: &Path) -> Result<PathBuf, String> {
    let bare = binary.parent().is_none_or(|p| p.as_os_str().is_empty());

    if bare {
        return which::which(binary).map_err(|e| format!("{} not on PATH: {e}", binary.display()));
    }

    if binary.is_file() {
        Ok(binary.to_path_buf())
    } else {
        Err(format!("{} not found", binary.display()))
    }
}
