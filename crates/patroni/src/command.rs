use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dbcp_config::AgentConfig;
use dbcp_launcher::LaunchSpec;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{Error, Result};

const DATA_DIR_MODE: u32 = 0o700;

/// How Patroni is started on this node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatroniCommand {
    bin_dir: Option<PathBuf>,
    config_path: PathBuf,
    log_file: PathBuf,
    rest_port: u16,
    run_as: Option<String>,
}

impl PatroniCommand {
    /// `patroni <config_path>` as `node.os_user`, logging to `<tmp_path>/patroni.log`.
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        let node = &config.node;

        Self {
            bin_dir: node.patroni.bin_path.clone(),
            config_path: node.patroni.config_path.clone(),
            log_file: node.tmp_path.join("patroni.log"),
            rest_port: node.patroni.port,
            run_as: Some(node.os_user.clone()).filter(|u| !u.is_empty()),
        }
    }

    /// Rendered configuration path.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Log file receiving Patroni's output.
    #[must_use]
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// REST API port.
    #[must_use]
    pub const fn rest_port(&self) -> u16 {
        self.rest_port
    }

    /// Resolves the executable, looking at `PATH` when no `bin_path` is configured.
    ///
    /// Resolution happens here rather than at construction because the install stage
    /// may only just have put Patroni on the machine.
    ///
    /// # Errors
    ///
    /// Returns an error if `patroni` is not on `PATH`.
    pub fn binary(&self) -> Result<PathBuf> {
        match &self.bin_dir {
            Some(dir) => Ok(dir.join("patroni")),
            None => which::which("patroni").map_err(Error::BinaryNotFound),
        }
    }

    /// Launch description for the detached launcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the executable cannot be resolved.
    pub fn launch_spec(&self) -> Result<LaunchSpec> {
        let spec = LaunchSpec::new(self.binary()?, [&self.config_path], &self.log_file);

        Ok(match &self.run_as {
            Some(user) => spec.with_run_as(user.clone()),
            None => spec,
        })
    }

    /// Whether something already accepts connections on the local REST port.
    pub async fn is_running(&self, timeout: Duration) -> bool {
        let addr = format!("127.0.0.1:{}", self.rest_port);

        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(target: "launch", "nothing listening on {addr}: {e}");
                false
            }
            Err(_) => {
                debug!(target: "launch", "connecting to {addr} timed out");
                false
            }
        }
    }
}

/// Restricts the PostgreSQL data directory to its owner.
///
/// # Errors
///
/// Returns an error if the permissions cannot be changed.
pub async fn tighten_data_dir(data_dir: &Path) -> Result<()> {
    tokio::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(DATA_DIR_MODE))
        .await
        .map_err(|e| Error::Io("failed to restrict data directory permissions", e))
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    fn command(bin_dir: Option<&str>, os_user: &str, rest_port: u16) -> PatroniCommand {
        PatroniCommand {
            bin_dir: bin_dir.map(PathBuf::from),
            config_path: PathBuf::from("/etc/patroni/patroni.yml"),
            log_file: PathBuf::from("/tmp/dbcp/patroni.log"),
            rest_port,
            run_as: Some(os_user.to_string()).filter(|u| !u.is_empty()),
        }
    }

    #[test]
    fn test_launch_spec_runs_config_as_user() {
        let spec = command(Some("/opt/patroni/bin"), "postgres", 8008)
            .launch_spec()
            .unwrap();

        assert_eq!(spec.executable, PathBuf::from("/opt/patroni/bin/patroni"));
        assert_eq!(spec.args, vec!["/etc/patroni/patroni.yml"]);
        assert_eq!(spec.log_file, PathBuf::from("/tmp/dbcp/patroni.log"));
        assert_eq!(spec.run_as.as_deref(), Some("postgres"));
    }

    #[test]
    fn test_launch_spec_without_user() {
        let spec = command(Some("/opt/patroni/bin"), "", 8008).launch_spec().unwrap();

        assert_eq!(spec.run_as, None);
    }

    #[tokio::test]
    async fn test_is_running_detects_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(command(None, "", port).is_running(Duration::from_secs(1)).await);

        drop(listener);
        assert!(!command(None, "", port).is_running(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_tighten_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

        tighten_data_dir(dir.path()).await.unwrap();

        let mode = std::fs::metadata(dir.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_tighten_missing_data_dir_fails() {
        let dir = tempfile::tempdir().unwrap();

        assert!(tighten_data_dir(&dir.path().join("missing")).await.is_err());
    }
}
