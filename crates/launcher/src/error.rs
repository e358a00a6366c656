//! Error types for process launches.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for process launches.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while launching or waiting on a process.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// The log file could not be opened.
    #[error("failed to open log file {0}: {1}")]
    LogFile(PathBuf, #[source] io::Error),

    /// The spawned process has no pid, which means it already exited.
    #[error("no pid available for {0}")]
    MissingPid(PathBuf),

    /// The executable could not be started.
    #[error("failed to spawn {0}: {1}")]
    Spawn(PathBuf, #[source] io::Error),

    /// The account to run as does not exist.
    #[error("user '{0}' does not exist")]
    UnknownUser(String),

    /// The account database could not be queried.
    #[error("failed to look up user '{0}': {1}")]
    UserLookup(String, #[source] nix::Error),

    /// The exit status of the process could not be collected.
    #[error("failed to collect exit status of pid {0}")]
    Wait(u32),
}
