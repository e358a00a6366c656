//! Patroni configuration rendering and launch preparation.
//!
//! [`PatroniRecord`] merges node, cluster and credential settings with the etcd
//! [`Transport`](dbcp_etcd::Transport) chosen for the run. A [`ConfigRenderer`] turns
//! it into `patroni.yml`, and [`PatroniCommand`] describes the detached launch.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod command;
mod error;
mod record;
mod renderer;

pub use command::{PatroniCommand, tighten_data_dir};
pub use error::{Error, Result};
pub use record::{EtcdSection, InitdbOption, PatroniRecord};
pub use renderer::{ConfigRenderer, TemplateRenderer, TemplateRendererOptions, substitute};
