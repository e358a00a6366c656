//! Cluster membership and the identities derived from it.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::Error;

/// `cluster` section.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name, also the Patroni scope.
    #[serde(default)]
    pub name: String,

    /// Every expected member, self included.
    #[serde(default)]
    pub nodes: Vec<ClusterNode>,
}

/// One entry of `cluster.nodes`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ClusterNode {
    /// Member name, used as the etcd member name.
    #[serde(default)]
    pub name: String,

    /// Address other members reach it on.
    #[serde(default)]
    pub host: String,
}

/// Who this node is. Fixed for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Member name.
    pub name: String,

    /// Advertised host.
    pub host: String,

    /// OS user that owns data directories and runs the HA manager.
    pub os_user: String,
}

/// A member of the expected topology.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    /// Member name.
    pub name: String,

    /// Member host.
    pub host: String,
}

/// Expected membership, in configured order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterTopology {
    cluster_name: String,
    members: Vec<Member>,
}

impl ClusterTopology {
    /// Builds a topology, rejecting duplicate member names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateMember`] if a name repeats.
    pub fn new(cluster_name: impl Into<String>, members: Vec<Member>) -> Result<Self, Error> {
        for (index, member) in members.iter().enumerate() {
            if members[..index].iter().any(|m| m.name == member.name) {
                return Err(Error::DuplicateMember(member.name.clone()));
            }
        }

        Ok(Self {
            cluster_name: cluster_name.into(),
            members,
        })
    }

    /// The cluster name.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// All members, self included, in configured order.
    #[must_use]
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Members other than `self_name`, in configured order.
    pub fn peers_of<'a>(&'a self, self_name: &'a str) -> impl Iterator<Item = &'a Member> + 'a {
        self.members.iter().filter(move |m| m.name != self_name)
    }

    /// Whether a member with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name == name)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether there are no members at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// How this node enters the consensus ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClusterFormationMode {
    /// Originate a new ring.
    #[default]
    Bootstrap,

    /// Attach to a running ring through a healthy member.
    Join,
}

impl FromStr for ClusterFormationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bootstrap" => Ok(Self::Bootstrap),
            "join" => Ok(Self::Join),
            other => Err(Error::InvalidFormationMode(other.to_string())),
        }
    }
}

impl fmt::Display for ClusterFormationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::Join => write!(f, "join"),
        }
    }
}
