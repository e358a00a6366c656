//! Agent configuration: the YAML schema, its defaults and validation.
//!
//! Loading never has side effects. [`AgentConfig::validate`] fills in defaults and
//! returns warnings as strings because the logger is built from this same file and
//! does not exist yet when validation runs.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cluster;
mod error;
mod node;
mod repositories;
mod timeouts;

pub use cluster::{
    ClusterConfig, ClusterFormationMode, ClusterNode, ClusterTopology, Member, NodeIdentity,
};
pub use error::{Error, Result};
pub use node::{
    Credentials, DcsConfig, EtcdConfig, NodeConfig, PatroniAuthentication, PatroniConfig,
    PostgresConfig, PostgresParameters, PostgresUser,
};
pub use repositories::{RepoEntry, Repositories};
pub use timeouts::Timeouts;

use std::path::{Path, PathBuf};

use dbcp_logger::{Destination, LoggerOptions, RotationInterval, RotationPolicy, parse_level};
use serde::Deserialize;

const DEFAULT_ETCD_BIN_PATH: &str = "/usr/local/bin";
const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Root of the agent configuration file.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AgentConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`.
    #[serde(default)]
    pub log_level: String,

    /// `stdout` or `file`.
    #[serde(default)]
    pub log_output: String,

    /// Log file used when `log_output` is `file`.
    #[serde(default)]
    pub log_file_path: Option<PathBuf>,

    /// `never`, `hourly` or `daily`.
    #[serde(default)]
    pub log_rotation: Option<String>,

    /// Rolled files to keep.
    #[serde(default)]
    pub log_max_backups: Option<usize>,

    /// This node.
    #[serde(default)]
    pub node: NodeConfig,

    /// Expected membership.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Package and archive sources.
    #[serde(default)]
    pub repositories: Repositories,

    /// Bounds on external calls.
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl AgentConfig {
    /// Reads and parses a configuration file without validating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::Read(path.to_path_buf(), e))?;

        Self::from_yaml(&contents)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML does not match the schema.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Checks required fields, fills in defaults and returns the warnings produced.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure found.
    pub fn validate(&mut self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        self.validate_logging(&mut warnings)?;
        self.validate_node()?;
        self.validate_postgresql(&mut warnings)?;
        self.validate_patroni()?;
        self.validate_etcd(&mut warnings)?;
        self.validate_cluster()?;
        self.validate_repositories()?;

        if let Some(name) = self.timeouts.first_zero() {
            return Err(Error::ZeroTimeout(name));
        }

        Ok(warnings)
    }

    fn validate_logging(&self, warnings: &mut Vec<String>) -> Result<()> {
        let (_, known) = parse_level(&self.log_level);
        if !known {
            warnings.push(format!(
                "unknown log_level '{}', falling back to info",
                self.log_level
            ));
        }

        match self.log_output.as_str() {
            "" | "stdout" => {}
            "file" => {
                if self.log_file_path.is_none() {
                    return Err(Error::MissingField("log_file_path (for log_output 'file')"));
                }
            }
            other => return Err(Error::InvalidLogOutput(other.to_string())),
        }

        if let Some(rotation) = &self.log_rotation {
            rotation
                .parse::<RotationInterval>()
                .map_err(Error::InvalidLogRotation)?;
        }

        Ok(())
    }

    fn validate_node(&self) -> Result<()> {
        let node = &self.node;
        if node.name.is_empty() || node.host.is_empty() || node.role.is_empty() {
            return Err(Error::MissingField("node.name, node.host and node.role"));
        }
        if node.tmp_path.as_os_str().is_empty() {
            return Err(Error::MissingField("node.tmp_path"));
        }

        Ok(())
    }

    fn validate_postgresql(&mut self, warnings: &mut Vec<String>) -> Result<()> {
        let pg = &mut self.node.postgresql;
        if pg.version.is_empty() || pg.data_dir.as_os_str().is_empty() {
            return Err(Error::MissingField("postgresql.version and data_dir"));
        }

        if pg.bin_path.as_os_str().is_empty() {
            let os_release = std::fs::read_to_string(OS_RELEASE_PATH).unwrap_or_default();
            pg.bin_path = guess_postgres_bin_path(&os_release, &pg.version);
            warnings.push(format!(
                "postgresql.bin_path not specified, using default: {}",
                pg.bin_path.display()
            ));
        }

        Ok(())
    }

    fn validate_patroni(&self) -> Result<()> {
        let patroni = &self.node.patroni;
        if patroni.version.is_empty() || patroni.config_path.as_os_str().is_empty() {
            return Err(Error::MissingField("patroni.version and config_path"));
        }

        let auth = &patroni.authentication;
        if auth.superuser.username.is_empty() || auth.replication.username.is_empty() {
            return Err(Error::MissingField(
                "patroni.authentication superuser and replication usernames",
            ));
        }

        Ok(())
    }

    fn validate_etcd(&mut self, warnings: &mut Vec<String>) -> Result<()> {
        let etcd = &mut self.node.etcd;
        if etcd.version.is_empty()
            || etcd.data_dir.as_os_str().is_empty()
            || etcd.peer_port == 0
            || etcd.client_port == 0
        {
            return Err(Error::MissingField(
                "etcd.version, data_dir, peer_port and client_port",
            ));
        }

        if etcd.bin_path.as_os_str().is_empty() {
            warnings.push(format!(
                "etcd.bin_path not specified, using default: {DEFAULT_ETCD_BIN_PATH}"
            ));
            etcd.bin_path = PathBuf::from(DEFAULT_ETCD_BIN_PATH);
        }

        match etcd.cluster_mode.as_deref() {
            None | Some("") => {
                warnings.push("etcd.cluster_mode not set, defaulting to 'bootstrap'".to_string());
                etcd.cluster_mode = Some(ClusterFormationMode::Bootstrap.to_string());
            }
            Some(mode) => {
                mode.parse::<ClusterFormationMode>()?;
            }
        }

        Ok(())
    }

    fn validate_cluster(&self) -> Result<()> {
        let cluster = &self.cluster;
        if cluster.name.is_empty() || cluster.nodes.is_empty() {
            return Err(Error::MissingField("cluster.name and at least one node"));
        }
        if cluster
            .nodes
            .iter()
            .any(|n| n.name.is_empty() || n.host.is_empty())
        {
            return Err(Error::MissingField("name and host for each cluster node"));
        }

        let topology = self.cluster_topology()?;
        let own = topology
            .members()
            .iter()
            .find(|m| m.name == self.node.name)
            .ok_or_else(|| Error::NodeNotInCluster(self.node.name.clone()))?;
        // etcd rejects an advertised peer URL missing from --initial-cluster.
        if own.host != self.node.host {
            return Err(Error::NodeHostMismatch {
                node: self.node.name.clone(),
                host: self.node.host.clone(),
                listed: own.host.clone(),
            });
        }

        if self.formation_mode()? == ClusterFormationMode::Join
            && topology.peers_of(&self.node.name).next().is_none()
        {
            return Err(Error::JoinWithoutPeers(self.node.name.clone()));
        }

        Ok(())
    }

    fn validate_repositories(&self) -> Result<()> {
        let checks = [
            ("postgresql", &self.repositories.postgresql),
            ("etcd", &self.repositories.etcd),
        ];

        for (service, entry) in checks {
            if entry.selected().is_none() {
                return Err(Error::MissingRepository {
                    service,
                    default: entry.default.clone(),
                });
            }
        }

        Ok(())
    }

    /// This node's identity.
    #[must_use]
    pub fn node_identity(&self) -> NodeIdentity {
        NodeIdentity {
            name: self.node.name.clone(),
            host: self.node.host.clone(),
            os_user: self.node.os_user.clone(),
        }
    }

    /// Expected membership in configured order.
    ///
    /// # Errors
    ///
    /// Returns an error if a member name repeats.
    pub fn cluster_topology(&self) -> Result<ClusterTopology> {
        let members = self
            .cluster
            .nodes
            .iter()
            .map(|n| Member {
                name: n.name.clone(),
                host: n.host.clone(),
            })
            .collect();

        ClusterTopology::new(self.cluster.name.clone(), members)
    }

    /// The configured formation mode, `Bootstrap` if unset.
    ///
    /// # Errors
    ///
    /// Returns an error for anything other than `bootstrap` or `join`.
    pub fn formation_mode(&self) -> Result<ClusterFormationMode> {
        match self.node.etcd.cluster_mode.as_deref() {
            None | Some("") => Ok(ClusterFormationMode::Bootstrap),
            Some(mode) => mode.parse(),
        }
    }

    /// Logger options derived from the `log_*` keys.
    #[must_use]
    pub fn logger_options(&self) -> LoggerOptions {
        let (level, _) = parse_level(&self.log_level);

        let destination = match (self.log_output.as_str(), &self.log_file_path) {
            ("file", Some(path)) => Destination::File(path.clone()),
            _ => Destination::Stdout,
        };

        let rotation = RotationPolicy {
            interval: self
                .log_rotation
                .as_deref()
                .and_then(|r| r.parse().ok())
                .unwrap_or_default(),
            max_files: self.log_max_backups.filter(|n| *n > 0),
        };

        LoggerOptions {
            level,
            destination,
            rotation,
        }
    }
}

/// Distribution default for the PostgreSQL binary directory.
fn guess_postgres_bin_path(os_release: &str, version: &str) -> PathBuf {
    let id = os_release
        .lines()
        .find_map(|line| line.strip_prefix("ID="))
        .map(|id| id.trim().trim_matches('"'))
        .unwrap_or_default();

    match id {
        "debian" | "ubuntu" => PathBuf::from(format!("/usr/lib/postgresql/{version}/bin")),
        "fedora" | "centos" | "rocky" | "almalinux" | "rhel" | "ol" => {
            PathBuf::from(format!("/usr/pgsql-{version}/bin"))
        }
        _ => PathBuf::from("/usr/local/pgsql/bin"),
    }
}
