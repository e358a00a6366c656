//! Launches long-running children detached from the agent's lifetime.
//!
//! A launched child writes both output streams into one append-mode log file and
//! runs in its own process group. The agent never signals it; the returned
//! [`ProcessHandle`] only reports its pid and lets callers wait for it.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod spawn;

pub use error::{Error, Result};
pub use spawn::{DetachedLauncher, DetachedProcess};

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use async_trait::async_trait;

/// Everything needed to start one child process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    /// The arguments to pass to the executable.
    pub args: Vec<String>,

    /// Environment variables to set on top of the agent's own.
    pub env: HashMap<String, String>,

    /// The executable to run.
    pub executable: PathBuf,

    /// Append-mode file receiving stdout and stderr.
    pub log_file: PathBuf,

    /// Account to run as. The agent's own account when unset.
    pub run_as: Option<String>,

    /// The working directory for the process.
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Creates a new `LaunchSpec`.
    #[must_use]
    pub fn new<P: AsRef<Path>, A: AsRef<OsStr>, L: AsRef<Path>>(
        executable: P,
        args: impl IntoIterator<Item = A>,
        log_file: L,
    ) -> Self {
        Self {
            args: args
                .into_iter()
                .map(|a| a.as_ref().to_string_lossy().to_string())
                .collect(),
            env: HashMap::new(),
            executable: executable.as_ref().to_path_buf(),
            log_file: log_file.as_ref().to_path_buf(),
            run_as: None,
            working_dir: None,
        }
    }

    /// Sets an environment variable for the process.
    #[must_use]
    pub fn with_env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Runs the process as another account. Empty names are ignored.
    #[must_use]
    pub fn with_run_as(mut self, user: impl Into<String>) -> Self {
        let user = user.into();
        self.run_as = (!user.is_empty()).then_some(user);
        self
    }

    /// Sets the working directory for the process.
    #[must_use]
    pub fn with_working_dir<P: AsRef<Path>>(mut self, working_dir: P) -> Self {
        self.working_dir = Some(working_dir.as_ref().to_path_buf());
        self
    }
}

/// Handle to a launched process.
#[async_trait]
pub trait ProcessHandle: Send + Sync + std::fmt::Debug {
    /// The process identifier.
    fn pid(&self) -> u32;

    /// Waits for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the exit status cannot be collected.
    async fn wait(&self) -> Result<ExitStatus>;
}

/// Starts processes without waiting for them.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Starts the process described by `spec` and returns as soon as it is running.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be opened, the account does not
    /// exist, or the executable cannot be started.
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_spec_builder() {
        let spec = LaunchSpec::new("/usr/bin/etcd", ["--name", "node1"], "/tmp/etcd.log")
            .with_env("ETCD_UNSUPPORTED_ARCH", "arm64")
            .with_run_as("")
            .with_working_dir("/var/lib/etcd");

        assert_eq!(spec.args, vec!["--name", "node1"]);
        assert_eq!(spec.run_as, None);
        assert_eq!(spec.env.get("ETCD_UNSUPPORTED_ARCH").map(String::as_str), Some("arm64"));
        assert_eq!(spec.working_dir, Some(PathBuf::from("/var/lib/etcd")));
    }

    #[test]
    fn test_run_as_keeps_named_user() {
        let spec = LaunchSpec::new("/usr/bin/patroni", ["/etc/patroni.yml"], "/tmp/p.log")
            .with_run_as("postgres");

        assert_eq!(spec.run_as.as_deref(), Some("postgres"));
    }
}
