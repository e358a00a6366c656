//! Bootstrap-or-join formation of the local etcd member.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dbcp_config::ClusterFormationMode;
use dbcp_launcher::{ProcessHandle, ProcessLauncher};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::command::{ClusterState, EtcdCommand};
use crate::error::{Error, Result};
use crate::probe::HealthProbe;
use crate::registrar::MemberRegistrar;

/// Where the controller is in its run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormationState {
    /// Not started.
    Idle,

    /// Launching a brand-new cluster.
    Bootstrapping,

    /// Looking for a healthy member to join through.
    Discovering,

    /// Registering with the found member and launching.
    Joining,

    /// etcd has been launched, or was already running.
    Running,

    /// Formation stopped with an error.
    Failed,
}

impl fmt::Display for FormationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Bootstrapping => "bootstrapping",
            Self::Discovering => "discovering",
            Self::Joining => "joining",
            Self::Running => "running",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// How the controller reached [`FormationState::Running`].
#[derive(Debug)]
pub enum FormationOutcome {
    /// Started a new cluster.
    Bootstrapped(Box<dyn ProcessHandle>),

    /// Registered through `peer` and started as an additional member.
    Joined {
        /// Client endpoint of the member the join went through.
        peer: String,

        /// The local etcd process.
        process: Box<dyn ProcessHandle>,
    },

    /// Relaunched on membership state left by an earlier run.
    Resumed(Box<dyn ProcessHandle>),

    /// The local client endpoint already answered healthy; nothing was launched.
    AlreadyRunning,
}

impl FormationOutcome {
    /// The launched process, if one was launched.
    #[must_use]
    pub fn process(&self) -> Option<&dyn ProcessHandle> {
        match self {
            Self::Bootstrapped(process) | Self::Resumed(process) => Some(process.as_ref()),
            Self::Joined { process, .. } => Some(process.as_ref()),
            Self::AlreadyRunning => None,
        }
    }
}

/// Brings the local etcd member to a running state.
#[async_trait]
pub trait ClusterFormation: Send + Sync {
    /// Runs formation to `Running` or `Failed`.
    ///
    /// # Errors
    ///
    /// Returns an error if no peer is healthy, registration is rejected, or etcd
    /// cannot be launched.
    async fn form(&self) -> Result<FormationOutcome>;
}

/// Options for [`FormationController`].
pub struct FormationControllerOptions<P, R> {
    /// Argument builder shared by every path.
    pub command: EtcdCommand,

    /// Launches the etcd process.
    pub launcher: Arc<dyn ProcessLauncher>,

    /// File receiving etcd's output.
    pub log_file: PathBuf,

    /// Bootstrap or join.
    pub mode: ClusterFormationMode,

    /// Health probe using the same transport as `command`.
    pub probe: P,

    /// Member registration for join mode.
    pub registrar: R,
}

/// State machine deciding between bootstrap, join and resume.
pub struct FormationController<P, R> {
    command: EtcdCommand,
    launcher: Arc<dyn ProcessLauncher>,
    log_file: PathBuf,
    mode: ClusterFormationMode,
    probe: P,
    registrar: R,
    state: Mutex<FormationState>,
}

impl<P, R> FormationController<P, R>
where
    P: HealthProbe,
    R: MemberRegistrar,
{
    /// Creates a new `FormationController` in [`FormationState::Idle`].
    pub fn new(
        FormationControllerOptions {
            command,
            launcher,
            log_file,
            mode,
            probe,
            registrar,
        }: FormationControllerOptions<P, R>,
    ) -> Self {
        Self {
            command,
            launcher,
            log_file,
            mode,
            probe,
            registrar,
            state: Mutex::new(FormationState::Idle),
        }
    }

    /// The current state.
    pub fn state(&self) -> FormationState {
        *self.state.lock()
    }

    fn transition(&self, next: FormationState) {
        let mut state = self.state.lock();
        info!(target: "formation", "etcd formation: {} -> {next}", *state);
        *state = next;
    }

    fn fail(&self, err: Error) -> Error {
        error!(target: "formation", "etcd formation failed: {err}");
        self.transition(FormationState::Failed);
        err
    }

    async fn launch(&self, state: ClusterState) -> Result<Box<dyn ProcessHandle>> {
        let spec = self.command.launch_spec(state, &self.log_file);

        match self.launcher.launch(spec).await {
            Ok(process) => {
                info!(
                    target: "formation",
                    "etcd started with pid {} (initial-cluster-state={state}), logs at {}",
                    process.pid(),
                    self.log_file.display()
                );
                self.transition(FormationState::Running);
                Ok(process)
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    async fn has_member_state(&self) -> bool {
        let member_dir = self.command.data_dir().join("member");
        tokio::fs::try_exists(&member_dir).await.unwrap_or(false)
    }

    async fn bootstrap(&self) -> Result<FormationOutcome> {
        self.transition(FormationState::Bootstrapping);
        info!(
            target: "formation",
            "bootstrapping new etcd cluster: {}",
            self.command.initial_cluster()
        );

        Ok(FormationOutcome::Bootstrapped(
            self.launch(ClusterState::New).await?,
        ))
    }

    async fn join(&self) -> Result<FormationOutcome> {
        self.transition(FormationState::Discovering);

        let identity = self.command.identity();
        let mut tried = Vec::new();
        let mut found = None;

        for peer in self.command.topology().peers_of(&identity.name) {
            let endpoint = self.command.client_url(&peer.host);
            info!(target: "formation", "probing {} at {endpoint}", peer.name);

            if self.probe.is_healthy(&endpoint).await {
                info!(target: "formation", "found healthy peer {} at {endpoint}", peer.name);
                found = Some(endpoint);
                break;
            }

            warn!(target: "formation", "peer {} at {endpoint} is not healthy", peer.name);
            tried.push(endpoint);
        }

        let Some(peer) = found else {
            if tried.is_empty() {
                return Err(self.fail(Error::JoinWithoutPeers(identity.name.clone())));
            }
            return Err(self.fail(Error::NoHealthyPeer { tried }));
        };

        self.transition(FormationState::Joining);
        if let Err(e) = self.registrar.add_member(&self.command, &peer).await {
            return Err(self.fail(e));
        }

        let process = self.launch(ClusterState::Existing).await?;
        Ok(FormationOutcome::Joined { peer, process })
    }
}

#[async_trait]
impl<P, R> ClusterFormation for FormationController<P, R>
where
    P: HealthProbe,
    R: MemberRegistrar,
{
    async fn form(&self) -> Result<FormationOutcome> {
        let self_endpoint = self.command.advertised_client_url();
        if self.probe.is_healthy(&self_endpoint).await {
            info!(
                target: "formation",
                "etcd already answers healthy at {self_endpoint}, not launching"
            );
            self.transition(FormationState::Running);
            return Ok(FormationOutcome::AlreadyRunning);
        }

        if self.has_member_state().await {
            info!(
                target: "formation",
                "{} already holds membership state, relaunching instead of {}",
                self.command.data_dir().display(),
                self.mode
            );
            return Ok(FormationOutcome::Resumed(
                self.launch(ClusterState::Existing).await?,
            ));
        }

        match self.mode {
            ClusterFormationMode::Bootstrap => self.bootstrap().await,
            ClusterFormationMode::Join => self.join().await,
        }
    }
}
