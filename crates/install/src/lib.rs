//! Idempotent installation of PostgreSQL, etcd and Patroni.
//!
//! [`InstallGate`] answers "is a compatible version already here?" by probing the
//! filesystem and the binary's own version report. [`ServiceInstaller`] does the
//! actual work when the answer is no.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod dirs;
mod error;
mod etcd;
mod gate;
mod installer;
mod os;
mod packages;

pub use dirs::ensure_dirs;
pub use error::{Error, Result};
pub use etcd::{EtcdRelease, release_arch, unpack_binaries};
pub use gate::{InstallGate, ServiceSpec, VersionGate};
pub use installer::{ServiceInstaller, SystemInstaller, SystemInstallerOptions};
pub use os::OsInfo;
pub use packages::CommandRunner;

use std::fmt;

/// A service this agent installs and runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ManagedService {
    /// PostgreSQL server binaries.
    Postgres,

    /// etcd consensus store.
    Etcd,

    /// Patroni HA manager.
    Patroni,
}

impl ManagedService {
    /// Install order.
    pub const ALL: [Self; 3] = [Self::Postgres, Self::Etcd, Self::Patroni];
}

impl fmt::Display for ManagedService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgresql"),
            Self::Etcd => write!(f, "etcd"),
            Self::Patroni => write!(f, "patroni"),
        }
    }
}
