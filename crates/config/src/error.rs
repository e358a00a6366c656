use std::path::PathBuf;

use thiserror::Error;

/// Result type for configuration loading and validation.
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors. All of them are detected before any side effect.
#[derive(Debug, Error)]
pub enum Error {
    /// The same member name appears twice in `cluster.nodes`.
    #[error("cluster.nodes lists '{0}' more than once")]
    DuplicateMember(String),

    /// `node.etcd.cluster_mode` is neither `bootstrap` nor `join`.
    #[error("invalid etcd.cluster_mode '{0}': must be 'bootstrap' or 'join'")]
    InvalidFormationMode(String),

    /// `log_rotation` is not a recognised policy.
    #[error("invalid log_rotation: {0}")]
    InvalidLogRotation(String),

    /// `log_output` is neither `stdout` nor `file`.
    #[error("invalid log_output '{0}': must be 'stdout' or 'file'")]
    InvalidLogOutput(String),

    /// Join mode with nobody to join.
    #[error("etcd.cluster_mode 'join' requires at least one cluster node besides '{0}'")]
    JoinWithoutPeers(String),

    /// One or more required fields are empty.
    #[error("{0} required")]
    MissingField(&'static str),

    /// The selected repository entry does not exist.
    #[error("{service} repositories not found for default '{default}'")]
    MissingRepository {
        /// Repository section name.
        service: &'static str,

        /// The `default` key that failed to resolve.
        default: String,
    },

    /// `node.host` differs from this node's own `cluster.nodes` entry.
    #[error("node.host '{host}' differs from '{listed}' listed for '{node}' in cluster.nodes")]
    NodeHostMismatch {
        /// This node's name.
        node: String,

        /// `node.host`.
        host: String,

        /// Host in this node's `cluster.nodes` entry.
        listed: String,
    },

    /// This node is not part of the cluster it is configured for.
    #[error("node.name '{0}' is not listed in cluster.nodes")]
    NodeNotInCluster(String),

    /// The YAML could not be parsed.
    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The file could not be read.
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    /// A `timeouts` entry is zero.
    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}
