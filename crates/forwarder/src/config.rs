//! 포워더 설정
//!
//! [`ForwarderConfig`]는 core의 [`AgentConfig`]를 컴포넌트별 설정으로 변환합니다.
//! 문자열로 된 주소/정책은 여기서 타입으로 해석되고, 밀리초 값은 `Duration`이 됩니다.
//!
//! # 사용 예시
//! ```ignore
//! use syslog_forwarder_core::config::AgentConfig;
//! use syslog_forwarder::config::ForwarderConfig;
//!
//! let core_config = AgentConfig::default();
//! let config = ForwarderConfig::from_core(&core_config)?;
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use syslog_forwarder_core::config::AgentConfig;

use crate::collector::file::TailerConfig;
use crate::collector::receiver::ReceiverConfig;
use crate::dispatcher::DispatcherConfig;
use crate::error::ForwardError;
use crate::normalizer::NormalizerConfig;

/// 전송 큐가 가득 찼을 때의 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// 가장 오래된 이벤트를 드롭하고 새 이벤트를 받음 (기본값)
    #[default]
    Oldest,
    /// 큐에 자리가 날 때까지 생산자를 대기시킴
    Block,
}

impl FromStr for OverflowPolicy {
    type Err = ForwardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oldest" => Ok(Self::Oldest),
            "block" => Ok(Self::Block),
            other => Err(ForwardError::config(
                "drain.overflow_policy",
                format!("unknown policy '{other}'"),
            )),
        }
    }
}

/// 로컬 수신 소켓 주소
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    /// UDP `host:port`
    Udp(SocketAddr),
    /// Unix 데이터그램 소켓 경로
    Unix(PathBuf),
}

impl FromStr for ListenAddr {
    type Err = ForwardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self::Udp(addr));
        }
        let path = Path::new(s);
        if path.is_absolute() {
            return Ok(Self::Unix(path.to_path_buf()));
        }
        Err(ForwardError::config(
            "receiver.listen",
            format!("'{s}' is neither a socket address nor an absolute socket path"),
        ))
    }
}

impl std::fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Udp(addr) => write!(f, "udp://{addr}"),
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// 포워더 전체 설정
#[derive(Debug, Clone, Default)]
pub struct ForwarderConfig {
    /// 로컬 syslog 수신기
    pub receiver: ReceiverConfig,
    /// 디렉토리 tailer
    pub tailer: TailerConfig,
    /// tail 이벤트 정규화
    pub normalizer: NormalizerConfig,
    /// 드레인 디스패처
    pub dispatcher: DispatcherConfig,
}

impl ForwarderConfig {
    /// core 설정에서 포워더 설정을 생성합니다.
    ///
    /// 빈 `instance.hostname`은 로컬 호스트명으로 채워집니다.
    pub fn from_core(core: &AgentConfig) -> Result<Self, ForwardError> {
        let hostname = if core.instance.hostname.is_empty() {
            local_hostname()
        } else {
            core.instance.hostname.clone()
        };

        let normalizer = NormalizerConfig {
            hostname: hostname.clone(),
            app_name: Some(core.instance.app_name.clone()).filter(|a| !a.is_empty()),
            facility: core.instance.facility,
            severity: core.instance.severity,
            sd_id: core.instance.sd_id.clone(),
            params: core
                .instance
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            annotate_local: core.instance.annotate_local,
        };

        let receiver = ReceiverConfig {
            enabled: core.receiver.enabled,
            listen: core.receiver.listen.parse()?,
            max_message_size: core.receiver.max_message_size,
            fallback_hostname: hostname,
        };

        let tailer = TailerConfig {
            enabled: core.tailer.enabled,
            watch_dir: PathBuf::from(&core.tailer.watch_dir),
            poll_interval: Duration::from_millis(core.tailer.poll_interval_ms),
            read_chunk_size: core.tailer.read_chunk_size,
        };

        let dispatcher = DispatcherConfig {
            address: core.drain.address.clone(),
            connect_timeout: Duration::from_millis(core.drain.connect_timeout_ms),
            write_timeout: Duration::from_millis(core.drain.write_timeout_ms),
            reconnect_initial: Duration::from_millis(core.drain.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(core.drain.reconnect_max_ms),
            queue_capacity: core.drain.queue_capacity,
            overflow_policy: core.drain.overflow_policy.parse()?,
            shutdown_timeout: Duration::from_millis(core.drain.shutdown_timeout_ms),
        };

        Ok(Self {
            receiver,
            tailer,
            normalizer,
            dispatcher,
        })
    }

    /// 시작 전에 확인해야 하는 설정을 검증합니다.
    ///
    /// 감시 디렉토리가 존재하고 디렉토리인지도 여기서 확인합니다.
    pub fn validate(&self) -> Result<(), ForwardError> {
        if !self.receiver.enabled && !self.tailer.enabled {
            return Err(ForwardError::config(
                "receiver.enabled",
                "at least one source must be enabled",
            ));
        }

        if self.receiver.enabled && self.receiver.max_message_size == 0 {
            return Err(ForwardError::config(
                "receiver.max_message_size",
                "must be greater than 0",
            ));
        }

        if self.tailer.enabled {
            Self::validate_watch_dir(&self.tailer.watch_dir)?;
            if self.tailer.poll_interval.is_zero() {
                return Err(ForwardError::config(
                    "tailer.poll_interval_ms",
                    "must be greater than 0",
                ));
            }
            if self.tailer.read_chunk_size == 0 {
                return Err(ForwardError::config(
                    "tailer.read_chunk_size",
                    "must be greater than 0",
                ));
            }
        }

        if self.dispatcher.queue_capacity == 0 {
            return Err(ForwardError::config(
                "drain.queue_capacity",
                "must be greater than 0",
            ));
        }

        if self.dispatcher.reconnect_initial.is_zero()
            || self.dispatcher.reconnect_initial > self.dispatcher.reconnect_max
        {
            return Err(ForwardError::config(
                "drain.reconnect_initial_ms",
                "must be greater than 0 and not exceed drain.reconnect_max_ms",
            ));
        }

        self.normalizer.validate()
    }

    fn validate_watch_dir(dir: &Path) -> Result<(), ForwardError> {
        if !dir.is_absolute() {
            return Err(ForwardError::config(
                "tailer.watch_dir",
                format!("'{}' must be an absolute path", dir.display()),
            ));
        }

        match std::fs::metadata(dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(ForwardError::config(
                "tailer.watch_dir",
                format!("'{}' is not a directory", dir.display()),
            )),
            Err(e) => Err(ForwardError::config(
                "tailer.watch_dir",
                format!("'{}' is not accessible: {e}", dir.display()),
            )),
        }
    }
}

/// 로컬 호스트명을 반환합니다. 조회에 실패하면 `localhost`.
pub fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => match name.into_string() {
            Ok(name) if !name.is_empty() => name,
            _ => "localhost".to_owned(),
        },
        Err(e) => {
            tracing::warn!(error = %e, "failed to resolve local hostname, using 'localhost'");
            "localhost".to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core_with_dir(dir: &Path) -> AgentConfig {
        let mut core = AgentConfig::default();
        core.tailer.watch_dir = dir.display().to_string();
        core
    }

    #[test]
    fn from_core_converts_units_and_policies() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = core_with_dir(dir.path());
        core.drain.overflow_policy = "block".to_owned();
        core.drain.reconnect_initial_ms = 250;
        core.receiver.listen = "/run/forwarder.sock".to_owned();
        core.instance.hostname = "forwarder-0".to_owned();
        core.instance
            .params
            .insert("deployment".to_owned(), "cf".to_owned());

        let config = ForwarderConfig::from_core(&core).unwrap();
        assert_eq!(config.dispatcher.overflow_policy, OverflowPolicy::Block);
        assert_eq!(
            config.dispatcher.reconnect_initial,
            Duration::from_millis(250)
        );
        assert_eq!(
            config.receiver.listen,
            ListenAddr::Unix(PathBuf::from("/run/forwarder.sock"))
        );
        assert_eq!(config.normalizer.hostname, "forwarder-0");
        assert_eq!(config.receiver.fallback_hostname, "forwarder-0");
        assert_eq!(
            config.normalizer.params,
            vec![("deployment".to_owned(), "cf".to_owned())]
        );
        assert_eq!(config.normalizer.app_name, None);
        config.validate().unwrap();
    }

    #[test]
    fn empty_hostname_resolves_locally() {
        let config = ForwarderConfig::from_core(&AgentConfig::default()).unwrap();
        assert!(!config.normalizer.hostname.is_empty());
    }

    #[test]
    fn listen_addr_parsing() {
        assert_eq!(
            "127.0.0.1:514".parse::<ListenAddr>().unwrap(),
            ListenAddr::Udp("127.0.0.1:514".parse().unwrap())
        );
        assert!(matches!(
            "/dev/log".parse::<ListenAddr>().unwrap(),
            ListenAddr::Unix(_)
        ));
        assert!("dev/log".parse::<ListenAddr>().is_err());
    }

    #[test]
    fn overflow_policy_parsing() {
        assert_eq!("oldest".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::Oldest);
        assert_eq!("block".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::Block);
        assert!("newest".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn validate_rejects_missing_watch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let core = core_with_dir(&dir.path().join("missing"));
        let config = ForwarderConfig::from_core(&core).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not accessible"));
    }

    #[test]
    fn validate_rejects_file_as_watch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.log");
        std::fs::write(&file, b"x").unwrap();
        let config = ForwarderConfig::from_core(&core_with_dir(&file)).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn validate_skips_watch_dir_when_tailer_disabled() {
        let mut core = core_with_dir(Path::new("/nonexistent/forwarder"));
        core.tailer.enabled = false;
        ForwarderConfig::from_core(&core).unwrap().validate().unwrap();
    }
}
