//! Package-manager and service-manager command lines, and the runner for them.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error};

use crate::error::{Error, Result};

const PGDG_KEY_URL: &str = "https://www.postgresql.org/media/keys/ACCC4CF8.asc";
const PGDG_KEY_PATH: &str = "/usr/share/postgresql-common/pgdg/apt.postgresql.org.asc";

/// Runs shell command lines through `bash -c`, each under a time limit.
#[derive(Clone, Copy, Debug)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    /// Creates a runner with a per-command time limit.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runs one command line, returning its combined output.
    ///
    /// # Errors
    ///
    /// Returns an error carrying the combined output if the command fails, or a
    /// timeout error if it runs too long.
    pub async fn run(&self, command: &str) -> Result<String> {
        debug!(target: "install", "executing: {command}");

        let child = Command::new("bash")
            .args(["-c", command])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| Error::CommandTimeout(command.to_string()))?
            .map_err(|e| Error::Io("failed to run bash", e))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            error!(target: "install", "command failed: {command}\noutput: {combined}");
            return Err(Error::CommandFailed {
                command: command.to_string(),
                status: output.status.to_string(),
                output: combined.trim().to_string(),
            });
        }

        Ok(combined)
    }

    /// Runs command lines in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failing command's error.
    pub async fn run_all(&self, commands: &[String]) -> Result<()> {
        for command in commands {
            self.run(command).await?;
        }

        Ok(())
    }
}

/// PGDG apt repository setup and server install, leaving the distribution
/// service stopped and disabled.
#[must_use]
pub fn postgres_apt_commands(version: &str, repo_url: &str) -> Vec<String> {
    vec![
        "apt-get update".to_string(),
        "apt-get install -y curl ca-certificates gnupg lsb-release".to_string(),
        "mkdir -p /usr/share/postgresql-common/pgdg".to_string(),
        format!("curl -sSL {PGDG_KEY_URL} -o {PGDG_KEY_PATH}"),
        format!(
            "echo \"deb [signed-by={PGDG_KEY_PATH}] {repo_url} $(lsb_release -cs)-pgdg main\" > /etc/apt/sources.list.d/pgdg.list"
        ),
        "apt-get update".to_string(),
        format!("apt-get install -y postgresql-{version}"),
        "systemctl stop postgresql || true".to_string(),
        "systemctl disable postgresql || true".to_string(),
    ]
}

/// PGDG rpm repository setup and server install.
#[must_use]
pub fn postgres_rpm_commands(
    version: &str,
    os_major: &str,
    arch: &str,
    repo_url: &str,
    tmp_path: &Path,
) -> Vec<String> {
    let repo_url = repo_url.trim_end_matches('/');
    let rpm = tmp_path.join("pgdg-redhat-repo-latest.noarch.rpm");
    let rpm = rpm.display();

    vec![
        format!(
            "curl -sSL -o {rpm} {repo_url}/reporpms/EL-{os_major}-{arch}/pgdg-redhat-repo-latest.noarch.rpm"
        ),
        format!("dnf install -y {rpm}"),
        "dnf -qy module disable postgresql".to_string(),
        format!("dnf install -y postgresql{version}-server postgresql{version}"),
        format!("systemctl disable --now postgresql-{version} || true"),
    ]
}

/// Stops whatever PostgreSQL is running on this node.
#[must_use]
pub fn postgres_stop_commands(version: &str, bin_path: &Path, data_dir: &Path) -> Vec<String> {
    vec![
        format!(
            "systemctl stop postgresql postgresql-{version} 2>/dev/null || {} -D {} stop -m fast",
            bin_path.join("pg_ctl").display(),
            data_dir.display()
        ),
    ]
}

/// Patroni from the distribution archive.
#[must_use]
pub fn patroni_apt_commands(package: &str) -> Vec<String> {
    vec![
        "apt-get update".to_string(),
        format!("apt-get -y install {package}"),
    ]
}

/// Patroni from PyPI.
#[must_use]
pub fn patroni_pip_commands(package: &str) -> Vec<String> {
    vec![format!("python3 -m pip install '{package}'")]
}
