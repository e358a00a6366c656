use thiserror::Error;

/// Result type for logger construction.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or installing a logger.
#[derive(Debug, Error)]
pub enum Error {
    /// A global logger was already installed for this process.
    #[error("a global logger is already installed")]
    AlreadyInstalled,

    /// File logging was requested without a file path.
    #[error("file logging requires log_file_path")]
    MissingFilePath,

    /// The rolling file appender could not be created.
    #[error("failed to open log file {0}: {1}")]
    RollingFile(String, #[source] tracing_appender::rolling::InitError),
}
