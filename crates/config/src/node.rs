//! `node` section: this machine and the services it runs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// `node` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NodeConfig {
    /// Member name in `cluster.nodes`.
    #[serde(default)]
    pub name: String,

    /// Advertised host.
    #[serde(default)]
    pub host: String,

    /// Free-form role label.
    #[serde(default)]
    pub role: String,

    /// OS user owning data directories and running Patroni.
    #[serde(default)]
    pub os_user: String,

    /// Scratch directory for downloads and process logs.
    #[serde(default)]
    pub tmp_path: PathBuf,

    /// Whether an already-running PostgreSQL may be stopped during install.
    #[serde(default)]
    pub allow_restart_services: bool,

    /// PostgreSQL settings.
    #[serde(default)]
    pub postgresql: PostgresConfig,

    /// Patroni settings.
    #[serde(default)]
    pub patroni: PatroniConfig,

    /// etcd settings.
    #[serde(default)]
    pub etcd: EtcdConfig,
}

/// `node.postgresql` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PostgresConfig {
    /// Major version, e.g. `17`.
    #[serde(default)]
    pub version: String,

    /// Data directory handed to Patroni.
    #[serde(default)]
    pub data_dir: PathBuf,

    /// Directory holding `postgres`, `initdb` and friends.
    #[serde(default)]
    pub bin_path: PathBuf,

    /// Roles created at bootstrap.
    #[serde(default)]
    pub users: BTreeMap<String, PostgresUser>,

    /// Server parameters.
    #[serde(default)]
    pub parameters: PostgresParameters,

    /// initdb options, one single-key map per option. An empty value is a bare flag.
    #[serde(default)]
    pub initdb: Vec<BTreeMap<String, String>>,

    /// pg_hba lines.
    #[serde(default)]
    pub pg_hba: Vec<String>,
}

/// A bootstrap role.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct PostgresUser {
    /// Role password.
    #[serde(default)]
    pub password: String,

    /// Role options such as `superuser` or `login`.
    #[serde(default)]
    pub options: Vec<String>,
}

/// `node.postgresql.parameters` section.
#[derive(Clone, Debug, Deserialize)]
pub struct PostgresParameters {
    /// Listen port.
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Let Patroni use pg_rewind.
    #[serde(default)]
    pub use_pg_rewind: bool,

    /// Let Patroni manage replication slots.
    #[serde(default)]
    pub use_slots: bool,

    /// Every other key is passed through as a server parameter.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for PostgresParameters {
    fn default() -> Self {
        Self {
            port: default_pg_port(),
            use_pg_rewind: false,
            use_slots: false,
            extra: BTreeMap::new(),
        }
    }
}

const fn default_pg_port() -> u16 {
    5432
}

/// `node.patroni` section.
#[derive(Clone, Debug, Deserialize)]
pub struct PatroniConfig {
    /// Expected version string.
    #[serde(default)]
    pub version: String,

    /// DCS namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Directory holding the `patroni` executable. Looked up on `PATH` when unset.
    #[serde(default)]
    pub bin_path: Option<PathBuf>,

    /// REST API listen address.
    #[serde(default = "default_api_listen")]
    pub api_listen: String,

    /// REST API port.
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Where the rendered configuration is written.
    #[serde(default)]
    pub config_path: PathBuf,

    /// Template to render. The built-in template is used when unset.
    #[serde(default)]
    pub template_path: Option<PathBuf>,

    /// DCS timing.
    #[serde(default)]
    pub dcs: DcsConfig,

    /// Superuser and replication credentials.
    #[serde(default)]
    pub authentication: PatroniAuthentication,

    /// Replica creation methods in order of preference.
    #[serde(default)]
    pub create_replica_methods: Vec<String>,

    /// Patroni tags.
    #[serde(default)]
    pub tags: BTreeMap<String, serde_yaml::Value>,
}

impl Default for PatroniConfig {
    fn default() -> Self {
        Self {
            version: String::new(),
            namespace: default_namespace(),
            bin_path: None,
            api_listen: default_api_listen(),
            port: default_api_port(),
            config_path: PathBuf::new(),
            template_path: None,
            dcs: DcsConfig::default(),
            authentication: PatroniAuthentication::default(),
            create_replica_methods: Vec::new(),
            tags: BTreeMap::new(),
        }
    }
}

fn default_namespace() -> String {
    "/service/".to_string()
}

fn default_api_listen() -> String {
    "0.0.0.0".to_string()
}

const fn default_api_port() -> u16 {
    8008
}

/// `node.patroni.dcs` section.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct DcsConfig {
    /// Leader key TTL in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// HA loop sleep in seconds.
    #[serde(default = "default_loop_wait")]
    pub loop_wait: u32,

    /// DCS and PostgreSQL operation retry timeout in seconds.
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout: u32,

    /// Maximum replica lag in bytes for failover candidates.
    #[serde(default = "default_maximum_lag")]
    pub maximum_lag_on_failover: u64,
}

impl Default for DcsConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            loop_wait: default_loop_wait(),
            retry_timeout: default_retry_timeout(),
            maximum_lag_on_failover: default_maximum_lag(),
        }
    }
}

const fn default_ttl() -> u32 {
    30
}

const fn default_loop_wait() -> u32 {
    10
}

const fn default_retry_timeout() -> u32 {
    10
}

const fn default_maximum_lag() -> u64 {
    1_048_576
}

/// `node.patroni.authentication` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PatroniAuthentication {
    /// Superuser credentials.
    #[serde(default)]
    pub superuser: Credentials,

    /// Replication credentials.
    #[serde(default)]
    pub replication: Credentials,
}

/// Username and password pair.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// Username.
    #[serde(default)]
    pub username: String,

    /// Password.
    #[serde(default)]
    pub password: String,
}

/// `node.etcd` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct EtcdConfig {
    /// Expected version string, e.g. `3.5.20`.
    #[serde(default)]
    pub version: String,

    /// `bootstrap` or `join`. Defaults to `bootstrap` with a warning.
    #[serde(default)]
    pub cluster_mode: Option<String>,

    /// etcd data directory.
    #[serde(default)]
    pub data_dir: PathBuf,

    /// Directory holding `etcd` and `etcdctl`.
    #[serde(default)]
    pub bin_path: PathBuf,

    /// Certificate path. TLS is used only if cert, key and CA are all set.
    #[serde(default)]
    pub cert_file: String,

    /// Private key path.
    #[serde(default)]
    pub key_file: String,

    /// CA bundle path.
    #[serde(default)]
    pub ca_file: String,

    /// Peer port.
    #[serde(default)]
    pub peer_port: u16,

    /// Client port.
    #[serde(default)]
    pub client_port: u16,
}
