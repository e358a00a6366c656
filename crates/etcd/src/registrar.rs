use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::EtcdCommand;
use crate::error::{Error, Result};

/// Registers this node as a new member through an existing healthy member.
#[async_trait]
pub trait MemberRegistrar: Send + Sync {
    /// Adds this node's name and advertised peer URL via `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the peer and the remote output if registration fails.
    async fn add_member(&self, command: &EtcdCommand, endpoint: &str) -> Result<()>;
}

/// Registers through `etcdctl member add`.
#[derive(Clone, Copy, Debug)]
pub struct EtcdctlRegistrar {
    timeout: Duration,
}

impl EtcdctlRegistrar {
    /// Creates a registrar whose call is bounded by `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl MemberRegistrar for EtcdctlRegistrar {
    async fn add_member(&self, command: &EtcdCommand, endpoint: &str) -> Result<()> {
        let args = command.member_add_args(endpoint);
        debug!(target: "formation", "etcdctl {}", args.join(" "));

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(command.etcdctl_binary())
                .args(&args)
                .env("ETCDCTL_API", "3")
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::RegistrationTimeout(endpoint.to_string()))?
        .map_err(|e| Error::Io("failed to run etcdctl", e))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(Error::RegistrationRejected {
                peer: endpoint.to_string(),
                output: combined.trim().to_string(),
            });
        }

        info!(
            target: "formation",
            "registered {} via {endpoint}: {}",
            command.identity().name,
            combined.trim()
        );
        Ok(())
    }
}
