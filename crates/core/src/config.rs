//! 설정 관리 -- syslog-forwarder.toml 파싱 및 런타임 설정
//!
//! [`AgentConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`SYSLOG_FORWARDER_DRAIN_ADDRESS=host:514` 형식)
//! 3. 설정 파일 (`syslog-forwarder.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), syslog_forwarder_core::error::AgentError> {
//! use syslog_forwarder_core::config::AgentConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = AgentConfig::load("syslog-forwarder.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = AgentConfig::parse("[drain]\naddress = \"10.0.0.5:514\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AgentError, ConfigError};

/// RFC 5424 SD-ID 최대 길이
pub const MAX_SD_NAME_LEN: usize = 32;

/// syslog-forwarder 통합 설정
///
/// `syslog-forwarder.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 드레인(전송 대상) 설정
    #[serde(default)]
    pub drain: DrainConfig,
    /// 로컬 syslog 수신 설정
    #[serde(default)]
    pub receiver: ReceiverConfig,
    /// 디렉토리 tail 설정
    #[serde(default)]
    pub tailer: TailerConfig,
    /// 인스턴스 식별 정보
    #[serde(default)]
    pub instance: InstanceConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AgentConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                AgentError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, AgentError> {
        toml::from_str(toml_str).map_err(|e| {
            AgentError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `SYSLOG_FORWARDER_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "SYSLOG_FORWARDER_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "SYSLOG_FORWARDER_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "SYSLOG_FORWARDER_GENERAL_PID_FILE");

        // Drain
        override_string(&mut self.drain.address, "SYSLOG_FORWARDER_DRAIN_ADDRESS");
        override_u64(
            &mut self.drain.connect_timeout_ms,
            "SYSLOG_FORWARDER_DRAIN_CONNECT_TIMEOUT_MS",
        );
        override_u64(
            &mut self.drain.write_timeout_ms,
            "SYSLOG_FORWARDER_DRAIN_WRITE_TIMEOUT_MS",
        );
        override_u64(
            &mut self.drain.reconnect_initial_ms,
            "SYSLOG_FORWARDER_DRAIN_RECONNECT_INITIAL_MS",
        );
        override_u64(
            &mut self.drain.reconnect_max_ms,
            "SYSLOG_FORWARDER_DRAIN_RECONNECT_MAX_MS",
        );
        override_usize(
            &mut self.drain.queue_capacity,
            "SYSLOG_FORWARDER_DRAIN_QUEUE_CAPACITY",
        );
        override_string(
            &mut self.drain.overflow_policy,
            "SYSLOG_FORWARDER_DRAIN_OVERFLOW_POLICY",
        );
        override_u64(
            &mut self.drain.shutdown_timeout_ms,
            "SYSLOG_FORWARDER_DRAIN_SHUTDOWN_TIMEOUT_MS",
        );

        // Receiver
        override_bool(&mut self.receiver.enabled, "SYSLOG_FORWARDER_RECEIVER_ENABLED");
        override_string(&mut self.receiver.listen, "SYSLOG_FORWARDER_RECEIVER_LISTEN");
        override_usize(
            &mut self.receiver.max_message_size,
            "SYSLOG_FORWARDER_RECEIVER_MAX_MESSAGE_SIZE",
        );

        // Tailer
        override_bool(&mut self.tailer.enabled, "SYSLOG_FORWARDER_TAILER_ENABLED");
        override_string(&mut self.tailer.watch_dir, "SYSLOG_FORWARDER_TAILER_WATCH_DIR");
        override_u64(
            &mut self.tailer.poll_interval_ms,
            "SYSLOG_FORWARDER_TAILER_POLL_INTERVAL_MS",
        );
        override_usize(
            &mut self.tailer.read_chunk_size,
            "SYSLOG_FORWARDER_TAILER_READ_CHUNK_SIZE",
        );

        // Instance
        override_string(&mut self.instance.sd_id, "SYSLOG_FORWARDER_INSTANCE_SD_ID");
        override_string(&mut self.instance.hostname, "SYSLOG_FORWARDER_INSTANCE_HOSTNAME");
        override_string(&mut self.instance.app_name, "SYSLOG_FORWARDER_INSTANCE_APP_NAME");
        override_u8(&mut self.instance.facility, "SYSLOG_FORWARDER_INSTANCE_FACILITY");
        override_u8(&mut self.instance.severity, "SYSLOG_FORWARDER_INSTANCE_SEVERITY");
        override_bool(
            &mut self.instance.annotate_local,
            "SYSLOG_FORWARDER_INSTANCE_ANNOTATE_LOCAL",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "SYSLOG_FORWARDER_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "SYSLOG_FORWARDER_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "SYSLOG_FORWARDER_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    ///
    /// 여기서 실패하면 어떤 컴포넌트도 시작되지 않습니다.
    pub fn validate(&self) -> Result<(), AgentError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.drain.validate()?;
        self.receiver.validate()?;
        self.tailer.validate()?;
        self.instance.validate()?;

        if !self.receiver.enabled && !self.tailer.enabled {
            return Err(invalid(
                "receiver.enabled",
                "at least one of receiver or tailer must be enabled".to_owned(),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0".to_owned()));
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 기록하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: "/var/run/syslog-forwarder.pid".to_owned(),
        }
    }
}

/// 드레인 연결 및 전송 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainConfig {
    /// 드레인 주소 (host:port)
    pub address: String,
    /// 연결 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,
    /// 메시지당 쓰기 타임아웃 (밀리초)
    pub write_timeout_ms: u64,
    /// 재연결 백오프 초기값 (밀리초)
    pub reconnect_initial_ms: u64,
    /// 재연결 백오프 상한 (밀리초)
    pub reconnect_max_ms: u64,
    /// 전송 대기 큐 최대 용량
    pub queue_capacity: usize,
    /// 큐가 가득 찼을 때의 정책 (oldest, block)
    pub overflow_policy: String,
    /// 종료 시 큐를 비우는 데 허용하는 최대 시간 (밀리초)
    pub shutdown_timeout_ms: u64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:514".to_owned(),
            connect_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            queue_capacity: 10_000,
            overflow_policy: "oldest".to_owned(),
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl DrainConfig {
    fn validate(&self) -> Result<(), AgentError> {
        const MAX_QUEUE_CAPACITY: usize = 10_000_000;

        validate_host_port(&self.address).map_err(|reason| invalid("drain.address", reason))?;

        for (field, value) in [
            ("drain.connect_timeout_ms", self.connect_timeout_ms),
            ("drain.write_timeout_ms", self.write_timeout_ms),
            ("drain.reconnect_initial_ms", self.reconnect_initial_ms),
            ("drain.reconnect_max_ms", self.reconnect_max_ms),
            ("drain.shutdown_timeout_ms", self.shutdown_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0".to_owned()));
            }
        }

        if self.reconnect_initial_ms > self.reconnect_max_ms {
            return Err(invalid(
                "drain.reconnect_initial_ms",
                "must not exceed drain.reconnect_max_ms".to_owned(),
            ));
        }

        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(invalid(
                "drain.queue_capacity",
                format!("must be 1-{MAX_QUEUE_CAPACITY}"),
            ));
        }

        let valid_policies = ["oldest", "block"];
        if !valid_policies.contains(&self.overflow_policy.as_str()) {
            return Err(invalid(
                "drain.overflow_policy",
                format!("must be one of: {}", valid_policies.join(", ")),
            ));
        }

        Ok(())
    }
}

/// 로컬 syslog 수신 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소: UDP `host:port` 또는 Unix 데이터그램 소켓 절대 경로
    pub listen: String,
    /// 최대 데이터그램 크기 (바이트)
    pub max_message_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "127.0.0.1:514".to_owned(),
            max_message_size: 65_535,
        }
    }
}

impl ReceiverConfig {
    fn validate(&self) -> Result<(), AgentError> {
        if !self.enabled {
            return Ok(());
        }

        if self.listen.parse::<SocketAddr>().is_err() && !Path::new(&self.listen).is_absolute() {
            return Err(invalid(
                "receiver.listen",
                format!(
                    "'{}' is neither a socket address nor an absolute socket path",
                    self.listen
                ),
            ));
        }

        if self.max_message_size == 0 || self.max_message_size > 65_535 {
            return Err(invalid(
                "receiver.max_message_size",
                "must be 1-65535".to_owned(),
            ));
        }

        Ok(())
    }
}

/// 디렉토리 tail 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailerConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 감시 디렉토리 (절대 경로)
    pub watch_dir: String,
    /// 디렉토리 스캔 주기 (밀리초)
    pub poll_interval_ms: u64,
    /// 한 번의 read 호출로 읽을 바이트 수 (라인 길이 제한이 아님)
    pub read_chunk_size: usize,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_dir: "/var/vcap/sys/log/syslog_forwarder".to_owned(),
            poll_interval_ms: 1_000,
            read_chunk_size: 8 * 1024,
        }
    }
}

impl TailerConfig {
    fn validate(&self) -> Result<(), AgentError> {
        if !self.enabled {
            return Ok(());
        }

        if self.watch_dir.is_empty() || !Path::new(&self.watch_dir).is_absolute() {
            return Err(invalid(
                "tailer.watch_dir",
                format!("'{}' must be an absolute path", self.watch_dir),
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(invalid(
                "tailer.poll_interval_ms",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.read_chunk_size == 0 {
            return Err(invalid(
                "tailer.read_chunk_size",
                "must be greater than 0".to_owned(),
            ));
        }

        Ok(())
    }
}

/// 인스턴스 식별 정보 -- 전달되는 메시지의 structured data에 들어갑니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// structured data 요소의 SD-ID (예: `instance@47450`)
    pub sd_id: String,
    /// SD-ID에 붙일 파라미터
    pub params: BTreeMap<String, String>,
    /// 호스트명 (빈 문자열이면 로컬 호스트명)
    pub hostname: String,
    /// tail 이벤트의 APP-NAME (빈 문자열이면 NILVALUE)
    pub app_name: String,
    /// tail 이벤트의 facility (0-23)
    pub facility: u8,
    /// tail 이벤트의 severity (0-7)
    pub severity: u8,
    /// 로컬 syslog 이벤트에도 인스턴스 SD를 붙일지 여부
    pub annotate_local: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            sd_id: "instance@47450".to_owned(),
            params: BTreeMap::new(),
            hostname: String::new(),
            app_name: String::new(),
            facility: 1,
            severity: 6,
            annotate_local: false,
        }
    }
}

impl InstanceConfig {
    fn validate(&self) -> Result<(), AgentError> {
        validate_sd_name(&self.sd_id).map_err(|reason| invalid("instance.sd_id", reason))?;

        for name in self.params.keys() {
            validate_sd_name(name).map_err(|reason| invalid("instance.params", reason))?;
        }

        if self.facility > 23 {
            return Err(invalid("instance.facility", "must be 0-23".to_owned()));
        }

        if self.severity > 7 {
            return Err(invalid("instance.severity", "must be 0-7".to_owned()));
        }

        if self.app_name.len() > 48 || self.app_name.contains(char::is_whitespace) {
            return Err(invalid(
                "instance.app_name",
                "must be at most 48 characters without whitespace".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9102,
        }
    }
}

/// RFC 5424 SD-NAME 규칙을 검사합니다.
///
/// 1-32자의 출력 가능한 ASCII, `=`, 공백, `]`, `"` 제외.
pub fn validate_sd_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_SD_NAME_LEN {
        return Err(format!("'{name}' must be 1-{MAX_SD_NAME_LEN} characters"));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !c.is_ascii_graphic() || matches!(c, '=' | ']' | '"'))
    {
        return Err(format!("'{name}' contains invalid character {bad:?}"));
    }

    Ok(())
}

fn validate_host_port(address: &str) -> Result<(), String> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| format!("'{address}' must be in host:port form"))?;

    if host.is_empty() {
        return Err(format!("'{address}' has an empty host"));
    }

    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("'{address}' has an invalid port")),
        Ok(_) => Ok(()),
    }
}

fn invalid(field: &str, reason: String) -> AgentError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_u8(target: &mut u8, env_key: &str) {
    override_parsed(target, env_key, "u8");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}
