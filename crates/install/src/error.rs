use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for installation.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preparing or installing services.
#[derive(Debug, Error)]
pub enum Error {
    /// The release archive did not contain a required binary.
    #[error("archive {archive} has no {binary}")]
    BinaryNotInArchive {
        /// Archive path.
        archive: PathBuf,

        /// Missing binary name.
        binary: &'static str,
    },

    /// A shell command exited unsuccessfully.
    #[error("command `{command}` failed ({status}): {output}")]
    CommandFailed {
        /// The command line.
        command: String,

        /// Exit status description.
        status: String,

        /// Combined stdout and stderr.
        output: String,
    },

    /// A shell command ran past its time limit.
    #[error("command `{0}` timed out")]
    CommandTimeout(String),

    /// The release archive could not be fetched.
    #[error("failed to download {0}: {1}")]
    Download(String, #[source] reqwest::Error),

    /// The release archive download ran past its time limit.
    #[error("download of {0} timed out")]
    DownloadTimeout(String),

    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// The selected repository source has no entry for this key.
    #[error("no '{key}' entry in the selected {service} repository")]
    MissingRepository {
        /// Service name.
        service: &'static str,

        /// Missing key, an OS family or `url`.
        key: String,
    },

    /// The operating system could not be identified.
    #[error("failed to read {0}: {1}")]
    OsRelease(PathBuf, #[source] io::Error),

    /// Ownership could not be changed.
    #[error("failed to chown {0}: {1}")]
    Ownership(PathBuf, #[source] nix::Error),

    /// PostgreSQL is already listening and restarting services is not allowed.
    #[error("port {0} is already in use and allow_restart_services is false")]
    PortInUse(u16),

    /// A blocking task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The account that should own files does not exist.
    #[error("user '{0}' does not exist")]
    UnknownUser(String),

    /// The operating system family has no install procedure.
    #[error("unsupported OS '{0}' for {1}")]
    UnsupportedOs(String, &'static str),

    /// The account database could not be queried.
    #[error("failed to look up user '{0}': {1}")]
    UserLookup(String, #[source] nix::Error),
}
