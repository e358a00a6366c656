//! Installs managed services on this machine.

use std::time::Duration;

use async_trait::async_trait;
use dbcp_config::AgentConfig;
use reqwest::Client;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::ManagedService;
use crate::error::{Error, Result};
use crate::etcd::EtcdRelease;
use crate::gate::ServiceSpec;
use crate::os::OsInfo;
use crate::packages::{
    CommandRunner, patroni_apt_commands, patroni_pip_commands, postgres_apt_commands,
    postgres_rpm_commands, postgres_stop_commands,
};

const DEFAULT_PATRONI_DEBIAN_PACKAGE: &str = "patroni";
const DEFAULT_PATRONI_PIP_PACKAGE: &str = "patroni[etcd]";

/// Installs a specific version of one managed service.
#[async_trait]
pub trait ServiceInstaller: Send + Sync {
    /// Installs the service described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if any download or package-manager step fails.
    async fn install(&self, spec: &ServiceSpec) -> Result<()>;
}

/// Options for [`SystemInstaller`].
#[derive(Clone, Debug)]
pub struct SystemInstallerOptions {
    /// Validated agent configuration.
    pub config: AgentConfig,

    /// The operating system to install on.
    pub os: OsInfo,
}

/// Installs through the distribution's package manager and upstream archives.
#[derive(Clone, Debug)]
pub struct SystemInstaller {
    client: Client,
    config: AgentConfig,
    download_timeout: Duration,
    os: OsInfo,
    runner: CommandRunner,
}

impl SystemInstaller {
    /// Creates a new `SystemInstaller`.
    #[must_use]
    pub fn new(SystemInstallerOptions { config, os }: SystemInstallerOptions) -> Self {
        let runner = CommandRunner::new(config.timeouts.install_command());
        let download_timeout = config.timeouts.download();

        Self {
            client: Client::new(),
            config,
            download_timeout,
            os,
            runner,
        }
    }

    async fn install_postgres(&self) -> Result<()> {
        let pg = &self.config.node.postgresql;
        info!(target: "install", "installing PostgreSQL {}", pg.version);

        let repo_url = self
            .config
            .repositories
            .postgresql
            .get(&self.os.family)
            .ok_or_else(|| Error::MissingRepository {
                service: "postgresql",
                key: self.os.family.clone(),
            })?;

        let commands = if self.os.is_debian_family() {
            postgres_apt_commands(&pg.version, repo_url)
        } else if self.os.is_rhel_family() {
            postgres_rpm_commands(
                &pg.version,
                self.os.major_version(),
                std::env::consts::ARCH,
                repo_url,
                &self.config.node.tmp_path,
            )
        } else {
            return Err(Error::UnsupportedOs(self.os.id.clone(), "postgresql"));
        };

        self.runner.run_all(&commands).await?;
        self.release_postgres_port().await?;

        info!(target: "install", "PostgreSQL {} installed", pg.version);
        Ok(())
    }

    /// Patroni owns the postmaster, so nothing else may hold the port.
    async fn release_postgres_port(&self) -> Result<()> {
        let pg = &self.config.node.postgresql;
        let port = pg.parameters.port;

        if !is_port_in_use(port).await {
            return Ok(());
        }

        if !self.config.node.allow_restart_services {
            warn!(target: "install", "PostgreSQL appears to be running on port {port}, aborting");
            return Err(Error::PortInUse(port));
        }

        warn!(target: "install", "PostgreSQL appears to be running on port {port}, stopping it");
        self.runner
            .run_all(&postgres_stop_commands(&pg.version, &pg.bin_path, &pg.data_dir))
            .await
    }

    async fn install_etcd(&self) -> Result<()> {
        let etcd = &self.config.node.etcd;
        let repo_url = self
            .config
            .repositories
            .etcd
            .get("url")
            .ok_or_else(|| Error::MissingRepository {
                service: "etcd",
                key: "url".to_string(),
            })?;

        EtcdRelease::for_host(&etcd.version, repo_url)
            .install(
                &self.client,
                &self.config.node.tmp_path,
                &etcd.bin_path,
                self.download_timeout,
            )
            .await
    }

    async fn install_patroni(&self) -> Result<()> {
        let packages = &self.config.repositories.patroni;
        info!(target: "install", "installing Patroni {}", self.config.node.patroni.version);

        let commands = if self.os.is_debian_family() {
            patroni_apt_commands(
                packages
                    .get("debian_package")
                    .unwrap_or(DEFAULT_PATRONI_DEBIAN_PACKAGE),
            )
        } else if self.os.is_rhel_family() {
            patroni_pip_commands(packages.get("rhel_pip").unwrap_or(DEFAULT_PATRONI_PIP_PACKAGE))
        } else {
            return Err(Error::UnsupportedOs(self.os.family.clone(), "patroni"));
        };

        self.runner.run_all(&commands).await
    }
}

#[async_trait]
impl ServiceInstaller for SystemInstaller {
    async fn install(&self, spec: &ServiceSpec) -> Result<()> {
        match spec.service {
            ManagedService::Postgres => self.install_postgres().await,
            ManagedService::Etcd => self.install_etcd().await,
            ManagedService::Patroni => self.install_patroni().await,
        }
    }
}

async fn is_port_in_use(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).await.is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bound_port_is_in_use() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(is_port_in_use(port).await);

        drop(listener);
        assert!(!is_port_in_use(port).await);
    }

    #[tokio::test]
    async fn test_busy_port_without_restart_permission_fails() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let mut config = AgentConfig::default();
        config.node.postgresql.parameters.port = listener.local_addr().unwrap().port();
        config.node.allow_restart_services = false;

        let installer = SystemInstaller::new(SystemInstallerOptions {
            config,
            os: OsInfo::from_os_release("ID=debian\n"),
        });

        let err = installer.release_postgres_port().await.unwrap_err();
        assert!(matches!(err, Error::PortInUse(_)));
    }

    #[tokio::test]
    async fn test_unsupported_os_for_patroni() {
        let installer = SystemInstaller::new(SystemInstallerOptions {
            config: AgentConfig::default(),
            os: OsInfo::from_os_release("ID=arch\n"),
        });

        let err = installer
            .install(&ServiceSpec::patroni(&AgentConfig::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOs(..)));
    }

    #[tokio::test]
    async fn test_postgres_requires_repository_for_family() {
        let installer = SystemInstaller::new(SystemInstallerOptions {
            config: AgentConfig::default(),
            os: OsInfo::from_os_release("ID=debian\n"),
        });

        let err = installer
            .install(&ServiceSpec::postgres(&AgentConfig::default()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MissingRepository { service: "postgresql", .. }
        ));
    }
}
