use std::fs;

use dbcp_launcher::{DetachedLauncher, Error, LaunchSpec, ProcessLauncher};

#[tokio::test]
async fn test_output_streams_are_appended_to_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let log_file = dir.path().join("child.log");
    fs::write(&log_file, "earlier run\n").unwrap();

    let spec = LaunchSpec::new("/bin/sh", ["-c", "echo to-stdout; echo to-stderr >&2"], &log_file);
    let handle = DetachedLauncher::new().launch(spec).await.unwrap();

    assert!(handle.pid() > 0);
    let status = handle.wait().await.unwrap();
    assert!(status.success());

    let contents = fs::read_to_string(&log_file).unwrap();
    assert!(contents.starts_with("earlier run\n"));
    assert!(contents.contains("to-stdout"));
    assert!(contents.contains("to-stderr"));
}

#[tokio::test]
async fn test_wait_reports_non_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let spec = LaunchSpec::new("/bin/sh", ["-c", "exit 3"], dir.path().join("child.log"));

    let handle = DetachedLauncher::new().launch(spec).await.unwrap();
    let status = handle.wait().await.unwrap();

    assert_eq!(status.code(), Some(3));
}

#[tokio::test]
async fn test_environment_is_passed_through() {
    let dir = tempfile::tempdir().unwrap();
    let log_file = dir.path().join("child.log");
    let spec = LaunchSpec::new("/bin/sh", ["-c", "echo value=$DBCP_TEST_VALUE"], &log_file)
        .with_env("DBCP_TEST_VALUE", "42")
        .with_working_dir(dir.path());

    let handle = DetachedLauncher::new().launch(spec).await.unwrap();
    handle.wait().await.unwrap();

    assert!(fs::read_to_string(&log_file).unwrap().contains("value=42"));
}

#[tokio::test]
async fn test_missing_executable_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let spec = LaunchSpec::new(
        dir.path().join("does-not-exist"),
        Vec::<String>::new(),
        dir.path().join("child.log"),
    );

    let err = DetachedLauncher::new().launch(spec).await.unwrap_err();
    assert!(matches!(err, Error::Spawn(..)));
}

#[tokio::test]
async fn test_unopenable_log_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let spec = LaunchSpec::new(
        "/bin/true",
        Vec::<String>::new(),
        dir.path().join("missing-dir").join("child.log"),
    );

    let err = DetachedLauncher::new().launch(spec).await.unwrap_err();
    assert!(matches!(err, Error::LogFile(..)));
}

#[tokio::test]
async fn test_unknown_user_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let spec = LaunchSpec::new("/bin/true", Vec::<String>::new(), dir.path().join("child.log"))
        .with_run_as("dbcp-no-such-user");

    let err = DetachedLauncher::new().launch(spec).await.unwrap_err();
    assert!(matches!(err, Error::UnknownUser(name) if name == "dbcp-no-such-user"));
}
