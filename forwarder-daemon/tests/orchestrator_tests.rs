//! Orchestrator integration tests.
//!
//! Full flow: config -> build -> run -> shutdown trigger -> PID file cleanup.

use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use syslog_forwarder_core::config::AgentConfig;
use syslog_forwarder_core::pipeline::HealthStatus;
use syslog_forwarder_daemon::orchestrator::Orchestrator;

fn test_toml(watch_dir: &Path, drain: &str, pid_file: &Path, listen: &str) -> String {
    format!(
        r#"
[general]
log_level = "info"
pid_file = "{pid}"

[drain]
address = "{drain}"
reconnect_initial_ms = 10
reconnect_max_ms = 100
shutdown_timeout_ms = 1000

[receiver]
enabled = true
listen = "{listen}"

[tailer]
enabled = true
watch_dir = "{dir}"
poll_interval_ms = 20

[instance]
hostname = "daemon-test"

[instance.params]
deployment = "cf"
"#,
        pid = pid_file.display(),
        dir = watch_dir.display(),
    )
}

fn test_config(watch_dir: &Path, drain: &str, pid_file: &Path, listen: &str) -> AgentConfig {
    AgentConfig::parse(&test_toml(watch_dir, drain, pid_file, listen))
        .expect("failed to parse test config")
}

async fn read_until(stream: &mut tokio::net::TcpStream, needle: &[u8]) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    tokio::time::timeout(Duration::from_secs(5), async {
        while !received.windows(needle.len()).any(|w| w == needle) {
            let n = stream.read(&mut buf).await.expect("drain read failed");
            assert!(n > 0, "drain connection closed early");
            received.extend_from_slice(&buf[..n]);
        }
    })
    .await
    .expect("timed out waiting for forwarded data");
    received
}

#[tokio::test]
async fn run_forwards_tailed_lines_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let watch_dir = dir.path().join("logs");
    std::fs::create_dir(&watch_dir).unwrap();
    std::fs::write(watch_dir.join("app.log"), b"hello-daemon\n").unwrap();
    let pid_file = dir.path().join("run").join("forwarder.pid");

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let drain = listener.local_addr().unwrap().to_string();

    let config = test_config(&watch_dir, &drain, &pid_file, "127.0.0.1:0");
    let mut orchestrator = Orchestrator::build_from_config(config).unwrap();
    assert_eq!(orchestrator.config().instance.hostname, "daemon-test");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let result = orchestrator
            .run_until(async move {
                let _ = stop_rx.await;
                Ok("test")
            })
            .await;
        (orchestrator, result)
    });

    let (mut stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("no connection from forwarder")
        .unwrap();
    let received = read_until(&mut stream, b"hello-daemon").await;
    let text = String::from_utf8_lossy(&received);
    assert!(text.contains("daemon-test"), "{text}");
    assert!(text.contains("[instance@47450 deployment=\"cf\"]"), "{text}");
    assert!(pid_file.exists());

    stop_tx.send(()).unwrap();
    let (orchestrator, result) = handle.await.unwrap();
    result.unwrap();

    assert!(!pid_file.exists(), "PID file should be removed on shutdown");
    assert_eq!(orchestrator.pipeline().state_name(), "stopped");
}

#[tokio::test]
async fn build_fails_for_missing_watch_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(
        &dir.path().join("missing"),
        "127.0.0.1:6514",
        &dir.path().join("forwarder.pid"),
        "127.0.0.1:0",
    );

    let err = Orchestrator::build_from_config(config)
        .err()
        .expect("build should fail");
    assert!(err.to_string().contains("tailer.watch_dir"), "{err}");
}

#[tokio::test]
async fn start_failure_removes_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let busy = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let listen = busy.local_addr().unwrap().to_string();
    let pid_file = dir.path().join("forwarder.pid");

    let config = test_config(dir.path(), "127.0.0.1:6514", &pid_file, &listen);
    let mut orchestrator = Orchestrator::build_from_config(config).unwrap();

    let result = orchestrator
        .run_until(async { Ok("never") })
        .await;
    assert!(result.is_err());
    assert!(!pid_file.exists());
}

#[tokio::test]
async fn existing_pid_file_prevents_run() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("forwarder.pid");
    std::fs::write(&pid_file, "4242\n").unwrap();

    let config = test_config(dir.path(), "127.0.0.1:6514", &pid_file, "127.0.0.1:0");
    let mut orchestrator = Orchestrator::build_from_config(config).unwrap();

    let err = orchestrator
        .run_until(async { Ok("never") })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("4242"), "{err}");
    assert_eq!(std::fs::read_to_string(&pid_file).unwrap(), "4242\n");
    assert_eq!(orchestrator.pipeline().state_name(), "initialized");
}

#[tokio::test]
async fn build_from_file_reports_health_across_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("forwarder.pid");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let drain = listener.local_addr().unwrap().to_string();

    let watch_dir = dir.path().join("logs");
    std::fs::create_dir(&watch_dir).unwrap();
    let config_path = dir.path().join("syslog-forwarder.toml");
    let toml_str = test_toml(&watch_dir, &drain, &pid_file, "127.0.0.1:0");
    std::fs::write(&config_path, toml_str).unwrap();

    let mut orchestrator = Orchestrator::build(&config_path).await.unwrap();
    assert_eq!(orchestrator.config().drain.address, drain);
    assert_eq!(
        orchestrator.health().await,
        HealthStatus::Unhealthy("not started".to_owned())
    );
    assert!(orchestrator.uptime_secs() < 5);

    let accept = tokio::spawn(async move { listener.accept().await });
    orchestrator
        .run_until(async move {
            let _ = accept.await;
            Ok("test")
        })
        .await
        .unwrap();

    assert_eq!(
        orchestrator.health().await,
        HealthStatus::Unhealthy("stopped".to_owned())
    );
    assert!(!pid_file.exists());
}

#[tokio::test]
async fn build_fails_for_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Orchestrator::build(&dir.path().join("absent.toml"))
        .await
        .err()
        .expect("build should fail");
    assert!(err.to_string().contains("failed to load config"), "{err}");
}
