//! Formation state machine against fake probes, registrars and launchers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dbcp_config::{ClusterFormationMode, ClusterTopology, Member, NodeIdentity};
use dbcp_etcd::{
    ClusterFormation, EtcdCommand, EtcdCommandOptions, Error, FormationController,
    FormationControllerOptions, FormationOutcome, FormationState, HealthProbe, MemberRegistrar,
    Transport,
};
use dbcp_launcher::{LaunchSpec, ProcessHandle, ProcessLauncher};
use dbcp_logger::Logger;
use parking_lot::Mutex;
use tracing::Level;
use tracing::instrument::WithSubscriber;

#[derive(Default)]
struct ProbeState {
    healthy: HashSet<String>,
    probed: Mutex<Vec<String>>,
}

/// Answers healthy for a fixed set of endpoints and records every probe.
#[derive(Clone, Default)]
struct RecordingProbe(Arc<ProbeState>);

impl RecordingProbe {
    fn healthy(endpoints: &[&str]) -> Self {
        Self(Arc::new(ProbeState {
            healthy: endpoints.iter().map(|e| (*e).to_string()).collect(),
            probed: Mutex::default(),
        }))
    }

    fn probed(&self) -> Vec<String> {
        self.0.probed.lock().clone()
    }
}

#[async_trait]
impl HealthProbe for RecordingProbe {
    async fn is_healthy(&self, endpoint: &str) -> bool {
        self.0.probed.lock().push(endpoint.to_string());
        self.0.healthy.contains(endpoint)
    }
}

#[derive(Default)]
struct RegistrarState {
    calls: AtomicUsize,
    endpoints: Mutex<Vec<String>>,
    reject: bool,
}

#[derive(Clone, Default)]
struct CountingRegistrar(Arc<RegistrarState>);

impl CountingRegistrar {
    fn rejecting() -> Self {
        Self(Arc::new(RegistrarState {
            reject: true,
            ..RegistrarState::default()
        }))
    }

    fn calls(&self) -> usize {
        self.0.calls.load(Ordering::SeqCst)
    }

    fn endpoints(&self) -> Vec<String> {
        self.0.endpoints.lock().clone()
    }
}

#[async_trait]
impl MemberRegistrar for CountingRegistrar {
    async fn add_member(&self, _command: &EtcdCommand, endpoint: &str) -> dbcp_etcd::Result<()> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        self.0.endpoints.lock().push(endpoint.to_string());

        if self.0.reject {
            return Err(Error::RegistrationRejected {
                peer: endpoint.to_string(),
                output: "etcdserver: unhealthy cluster".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
struct FakeProcess;

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> u32 {
        4242
    }

    async fn wait(&self) -> dbcp_launcher::Result<ExitStatus> {
        Err(dbcp_launcher::Error::Wait(4242))
    }
}

#[derive(Default)]
struct FakeLauncher {
    specs: Mutex<Vec<LaunchSpec>>,
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(&self, spec: LaunchSpec) -> dbcp_launcher::Result<Box<dyn ProcessHandle>> {
        self.specs.lock().push(spec);
        Ok(Box::new(FakeProcess))
    }
}

struct Harness {
    controller: FormationController<RecordingProbe, CountingRegistrar>,
    launcher: Arc<FakeLauncher>,
    probe: RecordingProbe,
    registrar: CountingRegistrar,
}

impl Harness {
    fn launched(&self) -> Vec<LaunchSpec> {
        self.launcher.specs.lock().clone()
    }

    fn probed(&self) -> Vec<String> {
        self.probe.probed()
    }

    fn registrations(&self) -> usize {
        self.registrar.calls()
    }
}

/// `self_name` is the local member; every member's host is `<name>.test`.
fn harness(
    data_dir: &Path,
    self_name: &str,
    members: &[&str],
    mode: ClusterFormationMode,
    probe: RecordingProbe,
    registrar: CountingRegistrar,
) -> Harness {
    let topology = ClusterTopology::new(
        "pg-cluster-01",
        members
            .iter()
            .map(|name| Member {
                name: (*name).to_string(),
                host: format!("{name}.test"),
            })
            .collect(),
    )
    .unwrap();

    let command = EtcdCommand::new(EtcdCommandOptions {
        bin_dir: PathBuf::from("/opt/etcd/bin"),
        client_port: 2379,
        data_dir: data_dir.to_path_buf(),
        identity: NodeIdentity {
            name: self_name.to_string(),
            host: format!("{self_name}.test"),
            os_user: "postgres".to_string(),
        },
        peer_port: 2380,
        topology,
        transport: Transport::select("", "", ""),
    });

    let launcher = Arc::new(FakeLauncher::default());
    let controller = FormationController::new(FormationControllerOptions {
        command,
        launcher: launcher.clone(),
        log_file: data_dir.join("etcd.log"),
        mode,
        probe: probe.clone(),
        registrar: registrar.clone(),
    });

    Harness {
        controller,
        launcher,
        probe,
        registrar,
    }
}

fn arg<'a>(spec: &'a LaunchSpec, flag: &str) -> &'a str {
    spec.args
        .iter()
        .find_map(|a| a.strip_prefix(flag))
        .unwrap_or_else(|| panic!("missing {flag} in {:?}", spec.args))
}

#[tokio::test]
async fn test_bootstrap_launches_with_full_peer_list() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        "node1",
        &["node1", "node2", "node3"],
        ClusterFormationMode::Bootstrap,
        RecordingProbe::healthy(&[]),
        CountingRegistrar::default(),
    );

    let outcome = h.controller.form().await.unwrap();

    assert!(matches!(outcome, FormationOutcome::Bootstrapped(_)));
    assert_eq!(h.controller.state(), FormationState::Running);
    assert_eq!(h.registrations(), 0);

    let launched = h.launched();
    assert_eq!(launched.len(), 1);
    let initial = arg(&launched[0], "--initial-cluster=");
    let entries: Vec<_> = initial.split(',').collect();
    assert_eq!(entries.len(), 3);
    assert!(entries.contains(&"node2=http://node2.test:2380"));
    assert_eq!(arg(&launched[0], "--initial-cluster-state="), "new");
    assert_eq!(launched[0].log_file, dir.path().join("etcd.log"));
}

#[tokio::test]
async fn test_join_without_healthy_peer_fails_without_registering() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        "node3",
        &["node1", "node2", "node3"],
        ClusterFormationMode::Join,
        RecordingProbe::healthy(&[]),
        CountingRegistrar::default(),
    );

    let err = h.controller.form().await.unwrap_err();

    assert!(matches!(err, Error::NoHealthyPeer { ref tried } if tried.len() == 2));
    assert!(err.to_string().contains("no healthy peer"));
    assert_eq!(h.controller.state(), FormationState::Failed);
    assert_eq!(h.registrations(), 0);
    assert!(h.launched().is_empty());
}

#[tokio::test]
async fn test_join_picks_first_healthy_peer_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        "self",
        &["a", "self", "b", "c"],
        ClusterFormationMode::Join,
        RecordingProbe::healthy(&["http://b.test:2379", "http://c.test:2379"]),
        CountingRegistrar::default(),
    );

    let outcome = h.controller.form().await.unwrap();

    match outcome {
        FormationOutcome::Joined { peer, process } => {
            assert_eq!(peer, "http://b.test:2379");
            assert_eq!(process.pid(), 4242);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert_eq!(
        h.probed(),
        vec![
            "http://self.test:2379",
            "http://a.test:2379",
            "http://b.test:2379",
        ]
    );
    assert_eq!(h.registrations(), 1);
    assert_eq!(h.registrar.endpoints(), vec!["http://b.test:2379"]);

    let launched = h.launched();
    assert_eq!(arg(&launched[0], "--initial-cluster-state="), "existing");
    assert_eq!(arg(&launched[0], "--initial-cluster=").split(',').count(), 4);
    assert_eq!(h.controller.state(), FormationState::Running);
}

#[tokio::test]
async fn test_rejected_registration_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        "node2",
        &["node1", "node2"],
        ClusterFormationMode::Join,
        RecordingProbe::healthy(&["http://node1.test:2379"]),
        CountingRegistrar::rejecting(),
    );

    let err = h.controller.form().await.unwrap_err();

    assert!(err.to_string().contains("rejected"));
    assert!(err.to_string().contains("unhealthy cluster"));
    assert_eq!(h.controller.state(), FormationState::Failed);
    assert!(h.launched().is_empty());
}

#[tokio::test]
async fn test_join_with_no_other_member_fails() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        "node1",
        &["node1"],
        ClusterFormationMode::Join,
        RecordingProbe::healthy(&[]),
        CountingRegistrar::default(),
    );

    let err = h.controller.form().await.unwrap_err();

    assert!(matches!(err, Error::JoinWithoutPeers(_)));
    assert_eq!(h.controller.state(), FormationState::Failed);
}

#[tokio::test]
async fn test_existing_member_state_resumes_without_discovery() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("member")).unwrap();
    let h = harness(
        dir.path(),
        "node3",
        &["node1", "node2", "node3"],
        ClusterFormationMode::Join,
        RecordingProbe::healthy(&["http://node1.test:2379"]),
        CountingRegistrar::default(),
    );

    let outcome = h.controller.form().await.unwrap();

    assert!(matches!(outcome, FormationOutcome::Resumed(_)));
    assert_eq!(h.probed(), vec!["http://node3.test:2379"]);
    assert_eq!(h.registrations(), 0);
    assert_eq!(arg(&h.launched()[0], "--initial-cluster-state="), "existing");
}

#[tokio::test]
async fn test_healthy_local_member_is_not_relaunched() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        "node1",
        &["node1", "node2", "node3"],
        ClusterFormationMode::Bootstrap,
        RecordingProbe::healthy(&["http://node1.test:2379"]),
        CountingRegistrar::default(),
    );

    let outcome = h.controller.form().await.unwrap();

    assert!(matches!(outcome, FormationOutcome::AlreadyRunning));
    assert!(outcome.process().is_none());
    assert!(h.launched().is_empty());
    assert_eq!(h.controller.state(), FormationState::Running);
}

#[tokio::test]
async fn test_transitions_are_logged_to_the_given_logger() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        dir.path(),
        "node1",
        &["node1", "node2"],
        ClusterFormationMode::Bootstrap,
        RecordingProbe::healthy(&[]),
        CountingRegistrar::default(),
    );
    let (logger, logs) = Logger::capture(Level::INFO);

    h.controller
        .form()
        .with_subscriber(logger.dispatch().clone())
        .await
        .unwrap();

    assert!(logs.contains("idle -> bootstrapping"));
    assert!(logs.contains("bootstrapping -> running"));
    assert!(logs.contains("pid 4242"));
}
