use std::fmt;

use dbcp_install::ManagedService;
use thiserror::Error;

/// Result type for the agent.
pub type Result<T> = std::result::Result<T, Error>;

/// A bring-up stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Installing one managed service.
    Install(ManagedService),

    /// Forming or joining the etcd cluster.
    Formation,

    /// Rendering the Patroni configuration.
    Render,

    /// Launching Patroni.
    Launch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install(service) => write!(f, "install {service}"),
            Self::Formation => write!(f, "formation"),
            Self::Render => write!(f, "render"),
            Self::Launch => write!(f, "launch"),
        }
    }
}

/// Agent errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] dbcp_config::Error),

    /// Directory preparation or OS detection failed.
    #[error("failed to prepare host: {0}")]
    Host(#[source] dbcp_install::Error),

    /// The etcd client could not be built from the selected transport.
    #[error("failed to build etcd client: {0}")]
    EtcdClient(#[source] dbcp_etcd::Error),

    /// SIGTERM or SIGINT arrived; the named stage and every later one were skipped.
    #[error("shutdown requested, stopping before the {0} stage")]
    Interrupted(Stage),

    /// Logging could not be set up.
    #[error(transparent)]
    Logger(#[from] dbcp_logger::Error),

    /// Signal handlers could not be registered.
    #[error("failed to register signal handler: {0}")]
    Signal(#[source] std::io::Error),

    /// A bring-up stage failed; later stages did not run.
    #[error("{stage} stage failed: {source}")]
    Stage {
        /// The failing stage.
        stage: Stage,

        /// What went wrong inside it.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub(crate) fn stage<E>(stage: Stage) -> impl FnOnce(E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        move |e| Self::Stage {
            stage,
            source: Box::new(e),
        }
    }

    /// The failing stage, if the error came from bring-up.
    #[must_use]
    pub const fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
