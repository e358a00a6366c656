use std::io;

use thiserror::Error;

/// Result type for etcd formation.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while forming or joining the etcd cluster.
#[derive(Debug, Error)]
pub enum Error {
    /// The HTTP client for health probes could not be built.
    #[error("failed to build health-probe client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// IO error.
    #[error("io error: {0} - {1}")]
    Io(&'static str, #[source] io::Error),

    /// Join mode was requested but the topology lists nobody else.
    #[error("cannot join: '{0}' is the only member of the cluster")]
    JoinWithoutPeers(String),

    /// The etcd process could not be launched.
    #[error(transparent)]
    Launch(#[from] dbcp_launcher::Error),

    /// Every candidate peer failed its health probe.
    #[error("no healthy peer found to join through (tried {})", tried.join(", "))]
    NoHealthyPeer {
        /// Client endpoints probed, in order.
        tried: Vec<String>,
    },

    /// `etcdctl member add` exited unsuccessfully.
    #[error("etcd member add via {peer} rejected: {output}")]
    RegistrationRejected {
        /// Client endpoint of the peer the call went through.
        peer: String,

        /// Combined output of the call.
        output: String,
    },

    /// `etcdctl member add` ran past its time limit.
    #[error("etcd member add via {0} timed out")]
    RegistrationTimeout(String),
}
