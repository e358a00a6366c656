//! etcd cluster formation for a single node.
//!
//! [`Transport`] is evaluated once per run and feeds both the server arguments built
//! by [`EtcdCommand`] and the [`HttpHealthProbe`] client. [`FormationController`]
//! decides between bootstrapping a new cluster and joining through the first
//! healthy member, then launches etcd detached.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod command;
mod error;
mod formation;
mod probe;
mod registrar;
mod transport;

pub use command::{ClusterState, EtcdCommand, EtcdCommandOptions};
pub use error::{Error, Result};
pub use formation::{
    ClusterFormation, FormationController, FormationControllerOptions, FormationOutcome,
    FormationState,
};
pub use probe::{HealthProbe, HttpHealthProbe, is_healthy_body};
pub use registrar::{EtcdctlRegistrar, MemberRegistrar};
pub use transport::{TlsMaterial, Transport, TransportMode};
