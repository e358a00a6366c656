//! Node agent bringing up etcd and Patroni-managed PostgreSQL on one machine.
//!
//! [`StartupSequencer`] runs the stages in a fixed order: install what is missing,
//! form or join the etcd cluster, render the Patroni configuration, launch Patroni.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod sequencer;

pub use error::{Error, Result, Stage};
pub use sequencer::{BringUp, StartupSequencer, StartupSequencerOptions};
