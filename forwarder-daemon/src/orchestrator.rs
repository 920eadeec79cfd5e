//! Daemon orchestration -- configuration, pipeline lifecycle and shutdown.
//!
//! The [`Orchestrator`] owns the loaded configuration and the forwarding
//! pipeline. It writes the PID file, starts the pipeline, waits for a
//! shutdown signal and stops the pipeline so queued events get a chance
//! to reach the drain before the process exits.
//!
//! # Startup
//!
//! 1. Load `syslog-forwarder.toml`, apply environment and CLI overrides
//! 2. Validate the configuration
//! 3. Install the metrics recorder (if enabled)
//! 4. Build the pipeline (watch directory and addresses are checked here)
//! 5. Write the PID file and start the pipeline
//!
//! # Shutdown
//!
//! `SIGTERM` or `SIGINT` stops the producers first, then drains the send
//! queue for at most `drain.shutdown_timeout_ms`.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;

use syslog_forwarder::{ForwarderConfig, ForwardingPipeline, ForwardingPipelineBuilder};
use syslog_forwarder_core::config::AgentConfig;
use syslog_forwarder_core::pipeline::{HealthStatus, Pipeline};

use crate::cli::DaemonCli;
use crate::metrics_server;

/// Interval between pipeline health checks in the main loop.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Interval between uptime gauge updates.
const UPTIME_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: AgentConfig,
    /// The forwarding pipeline.
    pipeline: ForwardingPipeline,
    /// Signals background tasks owned by the orchestrator.
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load the configuration file and apply overrides in order:
    /// file, then `SYSLOG_FORWARDER_*` environment variables, then CLI flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid.
    pub async fn load_config(cli: &DaemonCli) -> Result<AgentConfig> {
        let mut config = AgentConfig::from_file(&cli.config)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        config.apply_env_overrides();
        cli.apply_overrides(&mut config);
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        Ok(config)
    }

    /// Load configuration from `config_path` and build the orchestrator.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = AgentConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails, the metrics recorder cannot be
    /// installed, or the pipeline rejects its configuration (for example a
    /// missing watch directory).
    pub fn build_from_config(config: AgentConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let forwarder_config = ForwarderConfig::from_core(&config)
            .map_err(|e| anyhow::anyhow!("invalid forwarder config: {}", e))?;
        let pipeline = ForwardingPipelineBuilder::new()
            .config(forwarder_config)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build forwarding pipeline: {}", e))?;

        tracing::info!(
            drain = %config.drain.address,
            receiver = config.receiver.enabled,
            tailer = config.tailer.enabled,
            "orchestrator initialized"
        );

        let (shutdown_tx, _) = broadcast::channel(4);
        Ok(Self {
            config,
            pipeline,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start the pipeline and block until `SIGTERM` or `SIGINT`.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Start the pipeline and block until `shutdown` resolves.
    ///
    /// The future yields the name of the trigger for logging. The PID file
    /// is removed on every exit path after it has been written.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        let pid_file = self.config.general.pid_file.clone();
        if !pid_file.is_empty() {
            write_pid_file(Path::new(&pid_file))?;
        }

        let result = self.serve(shutdown).await;

        if !pid_file.is_empty() {
            remove_pid_file(Path::new(&pid_file));
        }
        result
    }

    async fn serve<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        tracing::info!("starting forwarding pipeline");
        self.pipeline
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start forwarding pipeline: {}", e))?;

        if let Some(addr) = self.pipeline.receiver_addr() {
            tracing::info!(listen = %addr, "local receiver listening");
        }

        let uptime_task = if self.config.metrics.enabled {
            Some(spawn_uptime_updater(
                self.start_time,
                self.shutdown_tx.subscribe(),
            ))
        } else {
            None
        };

        let outcome = self.watch(shutdown).await;

        let _ = self.shutdown_tx.send(());
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        tracing::info!("stopping forwarding pipeline");
        let stopped = self
            .pipeline
            .stop()
            .await
            .map_err(|e| anyhow::anyhow!("failed to stop forwarding pipeline: {}", e));

        outcome.and(stopped)
    }

    /// Main loop: periodic health checks until the shutdown future resolves.
    async fn watch<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        tokio::pin!(shutdown);

        let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        let mut last = HealthStatus::Healthy;
        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    let signal = signal?;
                    tracing::info!(signal = signal, "shutdown signal received");
                    return Ok(());
                }
                _ = interval.tick() => {
                    let status = self.pipeline.health_check().await;
                    if status != last {
                        log_health_change(&last, &status);
                        last = status;
                    }
                }
            }
        }
    }

    /// Current pipeline health.
    pub async fn health(&self) -> HealthStatus {
        self.pipeline.health_check().await
    }

    /// The forwarding pipeline.
    pub fn pipeline(&self) -> &ForwardingPipeline {
        &self.pipeline
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Seconds since the orchestrator was built.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

fn log_health_change(previous: &HealthStatus, current: &HealthStatus) {
    match current {
        HealthStatus::Healthy => {
            tracing::info!(previous = %previous, "pipeline recovered");
        }
        HealthStatus::Degraded(reason) => {
            tracing::warn!(reason = %reason, "pipeline degraded");
        }
        HealthStatus::Unhealthy(reason) => {
            tracing::error!(reason = %reason, "pipeline unhealthy");
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to install Ctrl-C handler: {}", e))?;
    Ok("ctrl-c")
}

/// Write the current process PID to a file.
///
/// The file is created atomically with `create_new`, so a second instance
/// pointed at the same path fails instead of overwriting it. The parent
/// directory is created with mode 0700 and the file with mode 0600.
///
/// # Errors
///
/// Returns an error if the PID file already exists or cannot be written.
pub(crate) fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_string());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on shutdown. Failures are logged, not returned.
pub(crate) fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        );
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Spawn a background task that periodically updates the uptime gauge.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use syslog_forwarder_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let uptime_secs = start_time.elapsed().as_secs();
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(uptime_secs as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn write_pid_file_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("run").join("forwarder.pid");

        write_pid_file(&pid_file).unwrap();

        let content = fs::read_to_string(&pid_file).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn write_pid_file_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("forwarder.pid");
        fs::write(&pid_file, "12345").unwrap();

        let err = write_pid_file(&pid_file).unwrap_err().to_string();
        assert!(err.contains("already exists"), "{err}");
        assert!(err.contains("12345"), "{err}");
        assert_eq!(fs::read_to_string(&pid_file).unwrap(), "12345");
    }

    #[cfg(unix)]
    #[test]
    fn pid_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("forwarder.pid");
        write_pid_file(&pid_file).unwrap();

        let mode = fs::metadata(&pid_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn remove_pid_file_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("forwarder.pid");
        write_pid_file(&pid_file).unwrap();

        remove_pid_file(&pid_file);
        assert!(!pid_file.exists());
        remove_pid_file(&pid_file);
    }
}
