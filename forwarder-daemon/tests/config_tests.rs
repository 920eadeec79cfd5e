//! Configuration loading through the daemon: file, environment, CLI.

use std::io::Write;

use clap::Parser;
use serial_test::serial;

use syslog_forwarder_daemon::cli::DaemonCli;
use syslog_forwarder_daemon::orchestrator::Orchestrator;

const CONFIG: &str = r#"
[general]
log_level = "info"
log_format = "json"
pid_file = ""

[drain]
address = "logs.example.com:6514"

[tailer]
watch_dir = "/var/vcap/sys/log"
"#;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn cli(args: &[&str]) -> DaemonCli {
    DaemonCli::parse_from(std::iter::once("syslog-forwarder").chain(args.iter().copied()))
}

struct EnvGuard {
    key: &'static str,
    original: Option<String>,
}

impl EnvGuard {
    fn set(key: &'static str, value: &str) -> Self {
        let original = std::env::var(key).ok();
        // SAFETY: serial tests do not touch the environment concurrently.
        unsafe { std::env::set_var(key, value) };
        Self { key, original }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // SAFETY: serial tests do not touch the environment concurrently.
        unsafe {
            match &self.original {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }
}

#[tokio::test]
#[serial]
async fn loads_file_values() {
    let file = write_config(CONFIG);
    let config = Orchestrator::load_config(&cli(&["--config", file.path().to_str().unwrap()]))
        .await
        .unwrap();

    assert_eq!(config.drain.address, "logs.example.com:6514");
    assert_eq!(config.tailer.watch_dir, "/var/vcap/sys/log");
    assert!(config.general.pid_file.is_empty());
}

#[tokio::test]
#[serial]
async fn cli_flags_take_precedence_over_environment() {
    let file = write_config(CONFIG);
    let _level = EnvGuard::set("SYSLOG_FORWARDER_GENERAL_LOG_LEVEL", "warn");
    let _drain = EnvGuard::set("SYSLOG_FORWARDER_DRAIN_ADDRESS", "10.0.0.5:514");

    let config = Orchestrator::load_config(&cli(&[
        "--config",
        file.path().to_str().unwrap(),
        "--log-level",
        "debug",
        "--pid-file",
        "/run/fwd.pid",
    ]))
    .await
    .unwrap();

    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.general.pid_file, "/run/fwd.pid");
    assert_eq!(config.drain.address, "10.0.0.5:514");
}

#[tokio::test]
#[serial]
async fn invalid_cli_override_fails_validation() {
    let file = write_config(CONFIG);
    let err = Orchestrator::load_config(&cli(&[
        "--config",
        file.path().to_str().unwrap(),
        "--log-format",
        "xml",
    ]))
    .await
    .unwrap_err();

    assert!(err.to_string().contains("general.log_format"), "{err}");
}

#[tokio::test]
#[serial]
async fn missing_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = Orchestrator::load_config(&cli(&["--config", path.to_str().unwrap()]))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("failed to load config"), "{err}");
}

#[tokio::test]
#[serial]
async fn invalid_drain_address_is_rejected() {
    let file = write_config(
        r#"
[drain]
address = "no-port-here"
"#,
    );
    let err = Orchestrator::load_config(&cli(&["--config", file.path().to_str().unwrap()]))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("drain.address"), "{err}");
}
