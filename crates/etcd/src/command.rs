//! One builder for every etcd and etcdctl invocation this node makes.

use std::fmt;
use std::path::{Path, PathBuf};

use dbcp_config::{AgentConfig, ClusterTopology, NodeIdentity};
use dbcp_launcher::LaunchSpec;

use crate::transport::Transport;

/// `--initial-cluster-state` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterState {
    /// A brand-new cluster.
    New,

    /// A cluster that already has members.
    Existing,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Existing => write!(f, "existing"),
        }
    }
}

/// Options for [`EtcdCommand`].
#[derive(Clone, Debug)]
pub struct EtcdCommandOptions {
    /// Directory holding `etcd` and `etcdctl`.
    pub bin_dir: PathBuf,

    /// Client port, the same on every member.
    pub client_port: u16,

    /// etcd data directory.
    pub data_dir: PathBuf,

    /// This node.
    pub identity: NodeIdentity,

    /// Peer port, the same on every member.
    pub peer_port: u16,

    /// Expected membership, self included.
    pub topology: ClusterTopology,

    /// Transport for every URL this builder produces.
    pub transport: Transport,
}

/// Builds etcd server and etcdctl argument lists for this node.
#[derive(Clone, Debug)]
pub struct EtcdCommand {
    bin_dir: PathBuf,
    client_port: u16,
    data_dir: PathBuf,
    identity: NodeIdentity,
    peer_port: u16,
    topology: ClusterTopology,
    transport: Transport,
}

impl EtcdCommand {
    /// Creates a new `EtcdCommand`.
    #[must_use]
    pub fn new(
        EtcdCommandOptions {
            bin_dir,
            client_port,
            data_dir,
            identity,
            peer_port,
            topology,
            transport,
        }: EtcdCommandOptions,
    ) -> Self {
        Self {
            bin_dir,
            client_port,
            data_dir,
            identity,
            peer_port,
            topology,
            transport,
        }
    }

    /// Builds from validated configuration and an already-selected transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster topology is invalid.
    pub fn from_config(config: &AgentConfig, transport: Transport) -> dbcp_config::Result<Self> {
        let etcd = &config.node.etcd;

        Ok(Self::new(EtcdCommandOptions {
            bin_dir: etcd.bin_path.clone(),
            client_port: etcd.client_port,
            data_dir: etcd.data_dir.clone(),
            identity: config.node_identity(),
            peer_port: etcd.peer_port,
            topology: config.cluster_topology()?,
            transport,
        }))
    }

    /// This node.
    #[must_use]
    pub const fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Expected membership.
    #[must_use]
    pub const fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    /// The transport every URL is built with.
    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// etcd data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the `etcd` binary.
    #[must_use]
    pub fn etcd_binary(&self) -> PathBuf {
        self.bin_dir.join("etcd")
    }

    /// Path of the `etcdctl` binary.
    #[must_use]
    pub fn etcdctl_binary(&self) -> PathBuf {
        self.bin_dir.join("etcdctl")
    }

    /// `scheme://host:peer_port` for any host.
    #[must_use]
    pub fn peer_url(&self, host: &str) -> String {
        format!("{}://{host}:{}", self.transport.scheme(), self.peer_port)
    }

    /// `scheme://host:client_port` for any host.
    #[must_use]
    pub fn client_url(&self, host: &str) -> String {
        format!("{}://{host}:{}", self.transport.scheme(), self.client_port)
    }

    /// This node's advertised peer URL.
    #[must_use]
    pub fn advertised_peer_url(&self) -> String {
        self.peer_url(&self.identity.host)
    }

    /// This node's advertised client URL.
    #[must_use]
    pub fn advertised_client_url(&self) -> String {
        self.client_url(&self.identity.host)
    }

    /// `name=scheme://host:peer_port` for every member, self included, comma-joined
    /// in configured order.
    #[must_use]
    pub fn initial_cluster(&self) -> String {
        self.topology
            .members()
            .iter()
            .map(|m| format!("{}={}", m.name, self.peer_url(&m.host)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// etcd server arguments.
    #[must_use]
    pub fn server_args(&self, state: ClusterState) -> Vec<String> {
        let scheme = self.transport.scheme();

        let mut args = self.transport.server_args();
        args.extend([
            format!("--name={}", self.identity.name),
            format!("--data-dir={}", self.data_dir.display()),
            format!("--initial-cluster={}", self.initial_cluster()),
            format!("--initial-cluster-state={state}"),
            format!("--initial-advertise-peer-urls={}", self.advertised_peer_url()),
            format!("--listen-peer-urls={scheme}://0.0.0.0:{}", self.peer_port),
            format!("--listen-client-urls={scheme}://0.0.0.0:{}", self.client_port),
            format!("--advertise-client-urls={}", self.advertised_client_url()),
        ]);

        args
    }

    /// Launch description of the etcd server logging to `log_file`.
    #[must_use]
    pub fn launch_spec(&self, state: ClusterState, log_file: &Path) -> LaunchSpec {
        LaunchSpec::new(self.etcd_binary(), self.server_args(state), log_file)
    }

    /// `etcdctl` arguments registering this node through `endpoint`.
    #[must_use]
    pub fn member_add_args(&self, endpoint: &str) -> Vec<String> {
        let mut args = vec![format!("--endpoints={endpoint}")];
        args.extend(self.transport.client_args());
        args.extend([
            "member".to_string(),
            "add".to_string(),
            self.identity.name.clone(),
            format!("--peer-urls={}", self.advertised_peer_url()),
        ]);

        args
    }
}

#[cfg(test)]
mod tests {
    use dbcp_config::Member;

    use super::*;

    fn command(transport: Transport) -> EtcdCommand {
        let members = ["node1", "node2", "node3"]
            .iter()
            .enumerate()
            .map(|(i, name)| Member {
                name: (*name).to_string(),
                host: format!("10.0.0.{}", i + 1),
            })
            .collect();

        EtcdCommand::new(EtcdCommandOptions {
            bin_dir: PathBuf::from("/opt/etcd/bin"),
            client_port: 2379,
            data_dir: PathBuf::from("/dbcp/data/etcd"),
            identity: NodeIdentity {
                name: "node2".to_string(),
                host: "10.0.0.2".to_string(),
                os_user: "postgres".to_string(),
            },
            peer_port: 2380,
            topology: ClusterTopology::new("pg", members).unwrap(),
            transport,
        })
    }

    #[test]
    fn test_bootstrap_builds_full_peer_list() {
        let cmd = command(Transport::select("", "", ""));

        let initial = cmd.initial_cluster();
        let entries: Vec<_> = initial.split(',').collect();
        assert_eq!(
            entries,
            vec![
                "node1=http://10.0.0.1:2380",
                "node2=http://10.0.0.2:2380",
                "node3=http://10.0.0.3:2380",
            ]
        );

        let args = cmd.server_args(ClusterState::New);
        assert!(args.contains(&"--initial-cluster-state=new".to_string()));
        assert!(args.contains(&format!("--initial-cluster={initial}")));
        assert!(args.contains(&"--name=node2".to_string()));
        assert!(args.contains(&"--advertise-client-urls=http://10.0.0.2:2379".to_string()));
        assert!(args.contains(&"--listen-peer-urls=http://0.0.0.0:2380".to_string()));
    }

    #[test]
    fn test_tls_changes_every_url_and_adds_flags() {
        let cmd = command(Transport::select("/c.crt", "/c.key", "/ca.crt"));

        let args = cmd.server_args(ClusterState::Existing);
        assert_eq!(args.len(), 16);
        assert!(args.contains(&"--initial-cluster-state=existing".to_string()));
        assert!(
            args.iter()
                .filter(|a| a.contains("://"))
                .all(|a| a.contains("https://"))
        );
        assert_eq!(cmd.client_url("10.0.0.3"), "https://10.0.0.3:2379");
    }

    #[test]
    fn test_member_add_uses_same_peer_url_form() {
        let cmd = command(Transport::select("/c.crt", "/c.key", "/ca.crt"));

        let args = cmd.member_add_args("https://10.0.0.1:2379");

        assert_eq!(args[0], "--endpoints=https://10.0.0.1:2379");
        assert!(args.contains(&"--cacert=/ca.crt".to_string()));
        let tail = &args[args.len() - 4..];
        assert_eq!(
            tail,
            ["member", "add", "node2", "--peer-urls=https://10.0.0.2:2380"]
        );
        assert!(cmd.initial_cluster().contains("node2=https://10.0.0.2:2380"));
    }

    #[test]
    fn test_launch_spec() {
        let cmd = command(Transport::select("", "", ""));

        let spec = cmd.launch_spec(ClusterState::New, Path::new("/dbcp/tmp/etcd.log"));

        assert_eq!(spec.executable, PathBuf::from("/opt/etcd/bin/etcd"));
        assert_eq!(spec.log_file, PathBuf::from("/dbcp/tmp/etcd.log"));
        assert_eq!(spec.args.len(), 8);
    }
}
