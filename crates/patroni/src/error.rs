use std::path::PathBuf;

use thiserror::Error;

/// Result type for Patroni configuration and launch.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from rendering the Patroni configuration or preparing its launch.
#[derive(Debug, Error)]
pub enum Error {
    /// No `patroni` under `bin_path` and none on `PATH`.
    #[error("patroni executable not found on PATH: {0}")]
    BinaryNotFound(#[source] which::Error),

    /// A value could not be rendered as inline YAML.
    #[error("failed to render {0}: {1}")]
    Inline(&'static str, #[source] serde_json::Error),

    /// IO failure outside the template and target file.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The rendered file could not be handed to the service account.
    #[error("failed to chown {0}: {1}")]
    Ownership(PathBuf, #[source] nix::Error),

    /// The template could not be read.
    #[error("failed to read template {0}: {1}")]
    TemplateRead(PathBuf, #[source] std::io::Error),

    /// The service account does not exist.
    #[error("user '{0}' does not exist")]
    UnknownUser(String),

    /// The template names a placeholder nothing provides.
    #[error("unknown placeholder {{{0}}} in template")]
    UnknownPlaceholder(String),

    /// Looking up the service account failed.
    #[error("failed to look up user '{0}': {1}")]
    UserLookup(String, #[source] nix::Error),

    /// The configuration directory or file could not be written.
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, #[source] std::io::Error),
}
