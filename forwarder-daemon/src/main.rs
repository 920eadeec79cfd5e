use anyhow::Result;
use clap::Parser;

use syslog_forwarder_daemon::cli::DaemonCli;
use syslog_forwarder_daemon::logging;
use syslog_forwarder_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let config = Orchestrator::load_config(&cli).await?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "syslog-forwarder starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config)?;
    if let Err(e) = orchestrator.run().await {
        tracing::error!(error = %e, "syslog-forwarder exited with error");
        return Err(e);
    }

    tracing::info!("syslog-forwarder shut down");
    Ok(())
}
