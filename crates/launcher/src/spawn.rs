//! Process spawning with output redirected to a log file.

use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use nix::unistd::User;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::{LaunchSpec, ProcessHandle, ProcessLauncher};

const LOG_FILE_MODE: u32 = 0o644;

/// A process started by [`DetachedLauncher`].
#[derive(Debug)]
pub struct DetachedProcess {
    exit: watch::Receiver<Option<ExitStatus>>,
    pid: u32,
}

#[async_trait]
impl ProcessHandle for DetachedProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait(&self) -> Result<ExitStatus> {
        let mut exit = self.exit.clone();
        let status = exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Wait(self.pid))?;

        (*status).ok_or(Error::Wait(self.pid))
    }
}

/// Launches processes that keep running after the agent exits.
#[derive(Clone, Copy, Debug, Default)]
pub struct DetachedLauncher;

impl DetachedLauncher {
    /// Creates a new `DetachedLauncher`.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn build_command(spec: &LaunchSpec) -> Result<Command> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(LOG_FILE_MODE)
            .open(&spec.log_file)
            .map_err(|e| Error::LogFile(spec.log_file.clone(), e))?;
        let log_err = log
            .try_clone()
            .map_err(|e| Error::Io("failed to duplicate log file handle", e))?;

        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0)
            .kill_on_drop(false);

        if let Some(ref working_dir) = spec.working_dir {
            cmd.current_dir(working_dir);
        }

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        if let Some(ref name) = spec.run_as {
            let user = User::from_name(name)
                .map_err(|e| Error::UserLookup(name.clone(), e))?
                .ok_or_else(|| Error::UnknownUser(name.clone()))?;

            cmd.uid(user.uid.as_raw()).gid(user.gid.as_raw());
            cmd.env("HOME", &user.dir).env("USER", name);
        }

        Ok(cmd)
    }
}

#[async_trait]
impl ProcessLauncher for DetachedLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<Box<dyn ProcessHandle>> {
        let mut cmd = Self::build_command(&spec)?;

        debug!(target: "launcher", "spawning process: {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(spec.executable.clone(), e))?;

        let pid = child
            .id()
            .ok_or_else(|| Error::MissingPid(spec.executable.clone()))?;

        info!(
            target: "launcher",
            "started {} with pid {pid}, logging to {}",
            spec.executable.display(),
            spec.log_file.display()
        );

        let (exit_tx, exit_rx) = watch::channel(None);
        let executable = spec.executable.display().to_string();

        tokio::spawn(
            async move {
                match child.wait().await {
                    Ok(status) => {
                        if status.success() {
                            info!(target: "launcher", "{executable} (pid {pid}) exited with status: {status}");
                        } else {
                            warn!(target: "launcher", "{executable} (pid {pid}) exited with non-zero status: {status}");
                        }
                        let _ = exit_tx.send(Some(status));
                    }
                    Err(err) => {
                        error!(target: "launcher", "failed to wait for {executable} (pid {pid}): {err}");
                    }
                }
            }
            .with_current_subscriber(),
        );

        Ok(Box::new(DetachedProcess { exit: exit_rx, pid }))
    }
}
