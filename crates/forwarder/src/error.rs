//! 포워더 에러 타입
//!
//! [`ForwardError`]는 수신, tail, 인코딩, 드레인 연결 등 포워딩 경로에서
//! 발생하는 모든 에러를 표현합니다.
//! `From<ForwardError> for AgentError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 설정 에러를 제외한 모든 에러는 런타임에 치명적이지 않습니다.
//! 각 컴포넌트가 로그를 남기고 카운트한 뒤 계속 동작합니다.

use syslog_forwarder_core::error::{AgentError, ConfigError, PipelineError};

/// 포워더 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// syslog 메시지 또는 프레임 파싱 실패
    #[error("malformed message at offset {offset}: {reason}")]
    MalformedMessage {
        /// 실패 위치 (바이트 오프셋)
        offset: usize,
        /// 실패 사유
        reason: String,
    },

    /// 감시 파일 읽기 실패
    #[error("tail read error: {path}: {source}")]
    TailRead {
        /// 파일 경로
        path: String,
        /// 원인 I/O 에러
        #[source]
        source: std::io::Error,
    },

    /// 드레인 연결/쓰기 실패
    #[error("connection error: {target}: {source}")]
    Connection {
        /// 드레인 주소
        target: String,
        /// 원인 I/O 에러
        #[source]
        source: std::io::Error,
    },

    /// 이벤트를 RFC 5424로 인코딩할 수 없음
    #[error("encode error: {field}: {reason}")]
    Encode {
        /// 문제가 된 필드
        field: String,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForwardError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn encode(field: &str, reason: impl Into<String>) -> Self {
        Self::Encode {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn config(field: &str, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

impl From<ForwardError> for AgentError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::Config { field, reason } => {
                AgentError::Config(ConfigError::InvalidValue { field, reason })
            }
            ForwardError::Io(e) => AgentError::Io(e),
            other => AgentError::Pipeline(PipelineError::InitFailed(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_display() {
        let err = ForwardError::malformed(4, "unsupported version");
        let msg = err.to_string();
        assert!(msg.contains("offset 4"));
        assert!(msg.contains("unsupported version"));
    }

    #[test]
    fn connection_error_keeps_source() {
        use std::error::Error;

        let err = ForwardError::Connection {
            target: "127.0.0.1:514".to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.to_string().contains("127.0.0.1:514"));
        assert!(err.source().is_some());
    }

    #[test]
    fn config_error_converts_to_agent_config_error() {
        let err: AgentError = ForwardError::config("tailer.watch_dir", "not a directory").into();
        assert!(matches!(
            err,
            AgentError::Config(ConfigError::InvalidValue { ref field, .. })
                if field == "tailer.watch_dir"
        ));
    }

    #[test]
    fn other_errors_convert_to_pipeline_error() {
        let err: AgentError = ForwardError::Channel("dispatcher closed".to_owned()).into();
        assert!(matches!(err, AgentError::Pipeline(_)));
    }
}
