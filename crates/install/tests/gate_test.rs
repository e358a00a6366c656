//! Install gating against fake binaries on disk.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dbcp_install::{InstallGate, ManagedService, ServiceSpec, VersionGate};
use dbcp_logger::Logger;
use tracing::Level;
use tracing::instrument::WithSubscriber;

fn fake_binary(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn etcd_spec(dir: &Path, version: &str) -> ServiceSpec {
    ServiceSpec {
        service: ManagedService::Etcd,
        expected_version: version.to_string(),
        binaries: vec![dir.join("etcd"), dir.join("etcdctl")],
    }
}

fn gate() -> VersionGate {
    VersionGate::new(Duration::from_secs(5))
}

#[tokio::test]
async fn test_matching_version_skips_install() {
    let dir = tempfile::tempdir().unwrap();
    fake_binary(dir.path(), "etcd", "echo 'etcd Version: 3.5.20'");
    fake_binary(dir.path(), "etcdctl", "echo 'etcdctl version: 3.5.20'");

    let (logger, logs) = Logger::capture(Level::INFO);
    let install = gate()
        .should_install(&etcd_spec(dir.path(), "3.5.20"))
        .with_subscriber(logger.dispatch().clone())
        .await;

    assert!(!install);
    assert!(logs.contains("already installed"));
}

#[tokio::test]
async fn test_version_mismatch_requires_install() {
    let dir = tempfile::tempdir().unwrap();
    fake_binary(dir.path(), "etcd", "echo 'etcd Version: 3.4.27'");
    fake_binary(dir.path(), "etcdctl", "echo 'etcdctl version: 3.4.27'");

    let (logger, logs) = Logger::capture(Level::INFO);
    let install = gate()
        .should_install(&etcd_spec(dir.path(), "3.5.20"))
        .with_subscriber(logger.dispatch().clone())
        .await;

    assert!(install);
    assert!(logs.contains("version mismatch"));
}

#[tokio::test]
async fn test_missing_companion_binary_requires_install() {
    let dir = tempfile::tempdir().unwrap();
    fake_binary(dir.path(), "etcd", "echo 'etcd Version: 3.5.20'");

    assert!(gate().should_install(&etcd_spec(dir.path(), "3.5.20")).await);
}

#[tokio::test]
async fn test_failing_probe_requires_install() {
    let dir = tempfile::tempdir().unwrap();
    fake_binary(dir.path(), "etcd", "echo 'etcd Version: 3.5.20'; exit 1");
    fake_binary(dir.path(), "etcdctl", "exit 0");

    assert!(gate().should_install(&etcd_spec(dir.path(), "3.5.20")).await);
}

#[tokio::test]
async fn test_hung_probe_times_out() {
    let dir = tempfile::tempdir().unwrap();
    fake_binary(dir.path(), "etcd", "sleep 5; echo 'etcd Version: 3.5.20'");
    fake_binary(dir.path(), "etcdctl", "exit 0");

    let gate = VersionGate::new(Duration::from_millis(200));

    assert!(gate.should_install(&etcd_spec(dir.path(), "3.5.20")).await);
}

#[tokio::test]
async fn test_bare_name_not_on_path_requires_install() {
    let spec = ServiceSpec {
        service: ManagedService::Patroni,
        expected_version: "4.0.4".to_string(),
        binaries: vec![PathBuf::from("dbcp-test-no-such-binary")],
    };

    assert!(gate().should_install(&spec).await);
}

#[tokio::test]
async fn test_empty_binaries_require_install() {
    let spec = ServiceSpec {
        service: ManagedService::Postgres,
        expected_version: "17".to_string(),
        binaries: Vec::new(),
    };

    assert!(gate().should_install(&spec).await);
}
