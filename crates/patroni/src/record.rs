//! The merged node, cluster and credentials record Patroni is configured from.

use std::collections::BTreeMap;
use std::path::PathBuf;

use dbcp_config::{AgentConfig, Credentials, DcsConfig, PostgresUser};
use dbcp_etcd::Transport;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};

/// The `etcd3` section: every member's client endpoint and the transport in use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EtcdSection {
    /// `host:client_port` for every cluster member, in configured order.
    pub hosts: Vec<String>,

    /// `http` or `https`.
    pub protocol: &'static str,

    /// CA bundle, under mutual TLS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cacert: Option<PathBuf>,

    /// Client certificate, under mutual TLS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,

    /// Client key, under mutual TLS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
}

impl EtcdSection {
    fn new(config: &AgentConfig, transport: &Transport) -> Self {
        let client_port = config.node.etcd.client_port;
        let tls = transport.tls();

        Self {
            hosts: config
                .cluster
                .nodes
                .iter()
                .map(|n| format!("{}:{client_port}", n.host))
                .collect(),
            protocol: transport.scheme(),
            cacert: tls.map(|t| t.ca_file.clone()),
            cert: tls.map(|t| t.cert_file.clone()),
            key: tls.map(|t| t.key_file.clone()),
        }
    }
}

/// One initdb option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitdbOption {
    /// A bare flag such as `data-checksums`.
    Flag(String),

    /// An option with a value such as `encoding: UTF8`.
    Value(String, String),
}

impl InitdbOption {
    fn to_json(&self) -> Value {
        match self {
            Self::Flag(flag) => Value::String(flag.clone()),
            Self::Value(key, value) => {
                let mut option = Map::new();
                option.insert(key.clone(), Value::String(value.clone()));
                Value::Object(option)
            }
        }
    }
}

/// Everything the Patroni configuration is rendered from.
#[derive(Clone, Debug)]
pub struct PatroniRecord {
    /// Patroni scope.
    pub cluster_name: String,

    /// DCS namespace.
    pub namespace: String,

    /// This member's name.
    pub node_name: String,

    /// This member's advertised host.
    pub host: String,

    /// REST API listen address and port.
    pub api_listen: String,

    /// REST API port.
    pub api_port: u16,

    /// DCS endpoints.
    pub etcd: EtcdSection,

    /// PostgreSQL port.
    pub pg_port: u16,

    /// PostgreSQL data directory.
    pub data_dir: PathBuf,

    /// PostgreSQL binaries.
    pub bin_dir: PathBuf,

    /// Roles created at bootstrap.
    pub users: BTreeMap<String, PostgresUser>,

    /// Superuser credentials.
    pub superuser: Credentials,

    /// Replication credentials.
    pub replication: Credentials,

    /// initdb options in configured order.
    pub initdb: Vec<InitdbOption>,

    /// pg_hba lines.
    pub pg_hba: Vec<String>,

    /// DCS timing.
    pub dcs: DcsConfig,

    /// Let Patroni use pg_rewind.
    pub use_pg_rewind: bool,

    /// Let Patroni manage replication slots.
    pub use_slots: bool,

    /// Extra server parameters.
    pub parameters: BTreeMap<String, serde_yaml::Value>,

    /// Replica creation methods.
    pub create_replica_methods: Vec<String>,

    /// Patroni tags.
    pub tags: BTreeMap<String, serde_yaml::Value>,
}

impl PatroniRecord {
    /// Merges validated configuration with the transport etcd was started on.
    #[must_use]
    pub fn new(config: &AgentConfig, transport: &Transport) -> Self {
        let node = &config.node;
        let pg = &node.postgresql;
        let patroni = &node.patroni;

        let initdb = pg
            .initdb
            .iter()
            .flat_map(|item| item.iter())
            .map(|(key, value)| {
                if value.is_empty() {
                    InitdbOption::Flag(key.clone())
                } else {
                    InitdbOption::Value(key.clone(), value.clone())
                }
            })
            .collect();

        Self {
            cluster_name: config.cluster.name.clone(),
            namespace: patroni.namespace.clone(),
            node_name: node.name.clone(),
            host: node.host.clone(),
            api_listen: format!("{}:{}", patroni.api_listen, patroni.port),
            api_port: patroni.port,
            etcd: EtcdSection::new(config, transport),
            pg_port: pg.parameters.port,
            data_dir: pg.data_dir.clone(),
            bin_dir: pg.bin_path.clone(),
            users: pg.users.clone(),
            superuser: patroni.authentication.superuser.clone(),
            replication: patroni.authentication.replication.clone(),
            initdb,
            pg_hba: pg.pg_hba.clone(),
            dcs: patroni.dcs.clone(),
            use_pg_rewind: pg.parameters.use_pg_rewind,
            use_slots: pg.parameters.use_slots,
            parameters: pg.parameters.extra.clone(),
            create_replica_methods: patroni.create_replica_methods.clone(),
            tags: patroni.tags.clone(),
        }
    }

    /// Placeholder values, each rendered as inline YAML.
    ///
    /// Strings are quoted and structured values are flow collections, so a value
    /// can be dropped anywhere a YAML scalar is expected.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be represented, such as a non-UTF-8 path.
    pub fn placeholders(&self) -> Result<BTreeMap<&'static str, String>> {
        let users: Map<String, Value> = self
            .users
            .iter()
            .map(|(name, user)| {
                (
                    name.clone(),
                    json!({ "password": user.password, "options": user.options }),
                )
            })
            .collect();
        let initdb: Vec<Value> = self.initdb.iter().map(InitdbOption::to_json).collect();

        let mut values = BTreeMap::new();
        values.insert("cluster_name", inline("cluster_name", &self.cluster_name)?);
        values.insert("namespace", inline("namespace", &self.namespace)?);
        values.insert("node_name", inline("node_name", &self.node_name)?);
        values.insert("api_listen", inline("api_listen", &self.api_listen)?);
        values.insert(
            "api_connect_address",
            inline("api_connect_address", &format!("{}:{}", self.host, self.api_port))?,
        );
        values.insert("etcd3", inline("etcd3", &self.etcd)?);
        values.insert("pg_listen", inline("pg_listen", &format!("0.0.0.0:{}", self.pg_port))?);
        values.insert(
            "pg_connect_address",
            inline("pg_connect_address", &format!("{}:{}", self.host, self.pg_port))?,
        );
        values.insert("data_dir", inline("data_dir", &self.data_dir)?);
        values.insert("bin_dir", inline("bin_dir", &self.bin_dir)?);
        values.insert("users", inline("users", &users)?);
        values.insert("superuser", credentials("superuser", &self.superuser)?);
        values.insert("replication", credentials("replication", &self.replication)?);
        values.insert("initdb", inline("initdb", &initdb)?);
        values.insert("pg_hba", inline("pg_hba", &self.pg_hba)?);
        values.insert("dcs_ttl", self.dcs.ttl.to_string());
        values.insert("dcs_loop_wait", self.dcs.loop_wait.to_string());
        values.insert("dcs_retry_timeout", self.dcs.retry_timeout.to_string());
        values.insert(
            "dcs_maximum_lag_on_failover",
            self.dcs.maximum_lag_on_failover.to_string(),
        );
        values.insert("use_pg_rewind", self.use_pg_rewind.to_string());
        values.insert("use_slots", self.use_slots.to_string());
        values.insert("parameters", inline("parameters", &self.parameters)?);
        values.insert(
            "create_replica_methods",
            inline("create_replica_methods", &self.create_replica_methods)?,
        );
        values.insert("tags", inline("tags", &self.tags)?);

        Ok(values)
    }
}

fn credentials(name: &'static str, creds: &Credentials) -> Result<String> {
    inline(
        name,
        &json!({ "username": creds.username, "password": creds.password }),
    )
}

fn inline<T: Serialize + ?Sized>(name: &'static str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Inline(name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
node:
  name: node2
  host: 10.0.0.2
  role: database
  os_user: postgres
  tmp_path: /tmp/dbcp
  postgresql:
    version: "17"
    data_dir: /data/pgsql
    bin_path: /usr/lib/postgresql/17/bin
    users:
      monitor:
        password: secret
        options: [login]
    parameters:
      port: 5433
      use_slots: true
      max_connections: 200
    initdb:
      - encoding: UTF8
      - data-checksums: ""
  patroni:
    version: "4.0.4"
    config_path: /etc/patroni/patroni.yml
    authentication:
      superuser: { username: postgres, password: pw1 }
      replication: { username: replicator, password: pw2 }
  etcd:
    version: "3.5.20"
    data_dir: /data/etcd
    cert_file: /tls/etcd.crt
    key_file: /tls/etcd.key
    ca_file: /tls/ca.crt
    peer_port: 2380
    client_port: 2379
cluster:
  name: pg-cluster-01
  nodes:
    - { name: node1, host: 10.0.0.1 }
    - { name: node2, host: 10.0.0.2 }
    - { name: node3, host: 10.0.0.3 }
"#;

    fn record() -> PatroniRecord {
        let config = AgentConfig::from_yaml(CONFIG).unwrap();
        let transport = Transport::from_config(&config.node.etcd);
        PatroniRecord::new(&config, &transport)
    }

    #[test]
    fn test_etcd_hosts_cover_every_member_with_tls() {
        let record = record();

        assert_eq!(
            record.etcd.hosts,
            vec!["10.0.0.1:2379", "10.0.0.2:2379", "10.0.0.3:2379"]
        );
        assert_eq!(record.etcd.protocol, "https");
        assert_eq!(record.etcd.cert, Some(PathBuf::from("/tls/etcd.crt")));
    }

    #[test]
    fn test_initdb_flags_and_values() {
        assert_eq!(
            record().initdb,
            vec![
                InitdbOption::Value("encoding".to_string(), "UTF8".to_string()),
                InitdbOption::Flag("data-checksums".to_string()),
            ]
        );
    }

    #[test]
    fn test_placeholders_are_inline_yaml() {
        let values = record().placeholders().unwrap();

        assert_eq!(values["cluster_name"], r#""pg-cluster-01""#);
        assert_eq!(values["api_listen"], r#""0.0.0.0:8008""#);
        assert_eq!(values["pg_connect_address"], r#""10.0.0.2:5433""#);
        assert_eq!(values["initdb"], r#"[{"encoding":"UTF8"},"data-checksums"]"#);
        assert_eq!(values["use_slots"], "true");
        assert_eq!(values["use_pg_rewind"], "false");
        assert_eq!(values["dcs_ttl"], "30");
        assert_eq!(values["parameters"], r#"{"max_connections":200}"#);
        assert_eq!(
            values["superuser"],
            r#"{"password":"pw1","username":"postgres"}"#
        );

        let etcd3: serde_yaml::Value = serde_yaml::from_str(&values["etcd3"]).unwrap();
        assert_eq!(etcd3["protocol"], "https");
        assert_eq!(etcd3["cacert"], "/tls/ca.crt");
    }
}
