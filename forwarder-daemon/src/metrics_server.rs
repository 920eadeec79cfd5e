//! Prometheus metrics HTTP listener.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`.
//! Every `metrics::counter!()` / `metrics::gauge!()` call in the forwarder
//! crates is recorded once this is installed.

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use syslog_forwarder_core::config::MetricsConfig;

/// Parse `listen_addr:port` into a socket address.
pub fn metrics_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    let host = if config.listen_addr.contains(':') && !config.listen_addr.starts_with('[') {
        format!("[{}]", config.listen_addr)
    } else {
        config.listen_addr.clone()
    };
    format!("{}:{}", host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process.
///
/// # Errors
///
/// - The listen address does not parse
/// - Socket binding fails
/// - A global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = metrics_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    syslog_forwarder_core::metrics::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_from_config() {
        let config = MetricsConfig {
            enabled: true,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9102,
        };
        assert_eq!(
            metrics_addr(&config).unwrap(),
            "127.0.0.1:9102".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn ipv6_addr_is_bracketed() {
        let config = MetricsConfig {
            enabled: true,
            listen_addr: "::1".to_owned(),
            port: 9102,
        };
        assert_eq!(metrics_addr(&config).unwrap().port(), 9102);
    }

    #[test]
    fn invalid_addr_is_rejected() {
        let config = MetricsConfig {
            enabled: true,
            listen_addr: "not an address".to_owned(),
            port: 9102,
        };
        assert!(metrics_addr(&config).is_err());
    }
}
