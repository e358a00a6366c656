//! Ordered bring-up: install, form etcd, render Patroni configuration, launch Patroni.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dbcp_config::AgentConfig;
use dbcp_etcd::{
    ClusterFormation, EtcdCommand, EtcdctlRegistrar, FormationController,
    FormationControllerOptions, FormationOutcome, HttpHealthProbe, Transport,
};
use dbcp_install::{
    InstallGate, OsInfo, ServiceInstaller, ServiceSpec, SystemInstaller, SystemInstallerOptions,
    VersionGate,
};
use dbcp_launcher::{DetachedLauncher, ProcessHandle, ProcessLauncher};
use dbcp_logger::Logger;
use dbcp_patroni::{
    ConfigRenderer, PatroniCommand, PatroniRecord, TemplateRenderer, tighten_data_dir,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, warn};

use crate::error::{Error, Result, Stage};

/// What a successful bring-up left running.
#[derive(Debug)]
pub struct BringUp {
    /// How etcd reached a running state.
    pub etcd: FormationOutcome,

    /// Where the Patroni configuration was written.
    pub patroni_config: PathBuf,

    /// The Patroni process, unless one was already serving its REST port.
    pub patroni: Option<Box<dyn ProcessHandle>>,
}

/// Options for [`StartupSequencer`].
pub struct StartupSequencerOptions {
    /// PostgreSQL data directory, restricted to its owner once Patroni is up.
    pub data_dir: PathBuf,

    /// etcd formation.
    pub formation: Arc<dyn ClusterFormation>,

    /// Decides whether each service needs installing.
    pub gate: Arc<dyn InstallGate>,

    /// Installs services the gate rejects.
    pub installer: Arc<dyn ServiceInstaller>,

    /// Launches Patroni.
    pub launcher: Arc<dyn ProcessLauncher>,

    /// Receives every log line of the bring-up.
    pub logger: Logger,

    /// How Patroni is launched.
    pub patroni: PatroniCommand,

    /// Bound on the Patroni REST port check.
    pub probe_timeout: Duration,

    /// Record the Patroni configuration is rendered from.
    pub record: PatroniRecord,

    /// Writes the Patroni configuration.
    pub renderer: Arc<dyn ConfigRenderer>,

    /// Services to check, in install order.
    pub services: Vec<ServiceSpec>,

    /// Cancelled on SIGTERM or SIGINT. Checked between stages only.
    pub shutdown_token: CancellationToken,
}

/// Runs the bring-up stages strictly in order. The first failure stops the run.
///
/// Nothing already started is stopped on a later failure. A rerun relies on the
/// install gate and on etcd membership state to pick up where this one stopped.
///
/// Cancelling the shutdown token lets the running stage finish its external
/// command; the run then stops with [`Error::Interrupted`] before the next stage.
pub struct StartupSequencer {
    data_dir: PathBuf,
    formation: Arc<dyn ClusterFormation>,
    gate: Arc<dyn InstallGate>,
    installer: Arc<dyn ServiceInstaller>,
    launcher: Arc<dyn ProcessLauncher>,
    logger: Logger,
    patroni: PatroniCommand,
    probe_timeout: Duration,
    record: PatroniRecord,
    renderer: Arc<dyn ConfigRenderer>,
    services: Vec<ServiceSpec>,
    shutdown_token: CancellationToken,
}

impl StartupSequencer {
    /// Creates a new `StartupSequencer`.
    #[must_use]
    pub fn new(
        StartupSequencerOptions {
            data_dir,
            formation,
            gate,
            installer,
            launcher,
            logger,
            patroni,
            probe_timeout,
            record,
            renderer,
            services,
            shutdown_token,
        }: StartupSequencerOptions,
    ) -> Self {
        Self {
            data_dir,
            formation,
            gate,
            installer,
            launcher,
            logger,
            patroni,
            probe_timeout,
            record,
            renderer,
            services,
            shutdown_token,
        }
    }

    /// Wires the production collaborators for validated configuration.
    ///
    /// The etcd transport is selected once here and shared by the etcd command line,
    /// its health probe and the Patroni record.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology or formation mode is invalid, or the TLS
    /// material cannot be loaded.
    pub fn from_config(
        config: &AgentConfig,
        os: OsInfo,
        logger: Logger,
        shutdown_token: CancellationToken,
    ) -> Result<Self> {
        let timeouts = &config.timeouts;
        let transport = Transport::from_config(&config.node.etcd);

        let launcher: Arc<dyn ProcessLauncher> = Arc::new(DetachedLauncher::new());
        let formation = FormationController::new(FormationControllerOptions {
            command: EtcdCommand::from_config(config, transport.clone())?,
            launcher: launcher.clone(),
            log_file: config.node.tmp_path.join("etcd.log"),
            mode: config.formation_mode()?,
            probe: HttpHealthProbe::new(&transport, timeouts.health_probe())
                .map_err(Error::EtcdClient)?,
            registrar: EtcdctlRegistrar::new(timeouts.member_add()),
        });

        Ok(Self::new(StartupSequencerOptions {
            data_dir: config.node.postgresql.data_dir.clone(),
            formation: Arc::new(formation),
            gate: Arc::new(VersionGate::new(timeouts.version_probe())),
            installer: Arc::new(SystemInstaller::new(SystemInstallerOptions {
                config: config.clone(),
                os,
            })),
            launcher,
            logger,
            patroni: PatroniCommand::from_config(config),
            probe_timeout: timeouts.health_probe(),
            record: PatroniRecord::new(config, &transport),
            renderer: Arc::new(TemplateRenderer::from_config(config)),
            services: ServiceSpec::all(config),
            shutdown_token,
        }))
    }

    /// Runs every stage under this sequencer's logger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Stage`] naming the first stage that failed, or
    /// [`Error::Interrupted`] if shutdown was requested between stages.
    pub async fn run(&self) -> Result<BringUp> {
        async {
            let result = self.bring_up().await;
            if let Err(e) = &result {
                error!(target: "startup", "bring-up aborted: {e}");
            }
            result
        }
        .with_subscriber(self.logger.dispatch().clone())
        .await
    }

    async fn bring_up(&self) -> Result<BringUp> {
        for spec in &self.services {
            let stage = Stage::Install(spec.service);
            self.checkpoint(stage)?;
            info!(
                target: "startup",
                "stage {stage}: checking for {} {}",
                spec.service,
                spec.expected_version
            );

            if self.gate.should_install(spec).await {
                self.installer
                    .install(spec)
                    .await
                    .map_err(Error::stage(stage))?;
                info!(
                    target: "startup",
                    "{} {} installed",
                    spec.service,
                    spec.expected_version
                );
            }
        }

        self.checkpoint(Stage::Formation)?;
        info!(target: "startup", "stage {}: bringing up etcd", Stage::Formation);
        let etcd = self
            .formation
            .form()
            .await
            .map_err(Error::stage(Stage::Formation))?;

        self.checkpoint(Stage::Render)?;
        info!(target: "startup", "stage {}: writing patroni configuration", Stage::Render);
        let patroni_config = self
            .renderer
            .render(&self.record)
            .await
            .map_err(Error::stage(Stage::Render))?;

        self.checkpoint(Stage::Launch)?;
        info!(target: "startup", "stage {}: starting patroni", Stage::Launch);
        let patroni = self.launch_patroni().await?;

        match tighten_data_dir(&self.data_dir).await {
            Ok(()) => info!(
                target: "startup",
                "restricted {} to mode 0700",
                self.data_dir.display()
            ),
            Err(e) => warn!(
                target: "startup",
                "could not restrict {}: {e}",
                self.data_dir.display()
            ),
        }

        info!(target: "startup", "bring-up complete");
        Ok(BringUp {
            etcd,
            patroni_config,
            patroni,
        })
    }

    fn checkpoint(&self, next: Stage) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::Interrupted(next));
        }
        Ok(())
    }

    async fn launch_patroni(&self) -> Result<Option<Box<dyn ProcessHandle>>> {
        if self.patroni.is_running(self.probe_timeout).await {
            info!(
                target: "startup",
                "patroni already listening on port {}, not launching",
                self.patroni.rest_port()
            );
            return Ok(None);
        }

        let spec = self
            .patroni
            .launch_spec()
            .map_err(Error::stage(Stage::Launch))?;
        let process = self
            .launcher
            .launch(spec)
            .await
            .map_err(Error::stage(Stage::Launch))?;

        info!(
            target: "startup",
            "patroni started with pid {}, logs at {}",
            process.pid(),
            self.patroni.log_file().display()
        );
        Ok(Some(process))
    }
}
