//! 로그 이벤트 모델
//!
//! [`LogEvent`]는 수신기/tailer가 생성하고 디스패처가 소비하는 RFC 5424 구조의
//! 이벤트입니다. 인코딩과 파싱은 [`codec`](crate::codec) 모듈이 담당합니다.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};

/// user 레벨 메시지 facility
pub const FACILITY_USER: u8 = 1;

/// informational severity
pub const SEVERITY_INFO: u8 = 6;

/// notice severity
pub const SEVERITY_NOTICE: u8 = 5;

/// 이벤트 출처
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// 로컬 syslog 소켓으로 수신
    LocalSyslog,
    /// 감시 디렉토리의 파일에서 읽은 라인
    TailedFile,
}

impl Origin {
    /// 메트릭 레이블 값으로 사용하는 문자열을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalSyslog => "local_syslog",
            Self::TailedFile => "tailed_file",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 5424 structured data 요소 하나 (`[id name="value" ...]`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredElement {
    /// SD-ID (예: `instance@47450`)
    pub id: String,
    /// 순서가 유지되는 파라미터 목록
    pub params: Vec<(String, String)>,
}

impl StructuredElement {
    /// 파라미터가 없는 요소를 생성합니다.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            params: Vec::new(),
        }
    }

    /// 파라미터를 추가합니다.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// 이름으로 첫 번째 파라미터 값을 찾습니다.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// 포워딩 대상 로그 이벤트
///
/// 디스패처에 들어가는 이벤트는 생산자 경계에서 이미 정규화되어 있어야 합니다.
/// `origin`은 생성 이후 바뀌지 않습니다.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    /// facility (0-23)
    pub facility: u8,
    /// severity (0-7)
    pub severity: u8,
    /// 이벤트 시각 (없으면 NILVALUE)
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// HOSTNAME
    pub hostname: Option<String>,
    /// APP-NAME
    pub app_name: Option<String>,
    /// PROCID
    pub proc_id: Option<String>,
    /// MSGID
    pub msg_id: Option<String>,
    /// STRUCTURED-DATA 요소 목록
    pub structured_data: Vec<StructuredElement>,
    /// MSG 원시 바이트 (길이 제한 없음)
    pub message: Bytes,
    /// 이벤트 출처
    pub origin: Origin,
}

impl LogEvent {
    /// 헤더 필드가 모두 비어 있는 user.info 이벤트를 생성합니다.
    pub fn new(origin: Origin, message: impl Into<Bytes>) -> Self {
        Self {
            facility: FACILITY_USER,
            severity: SEVERITY_INFO,
            timestamp: None,
            hostname: None,
            app_name: None,
            proc_id: None,
            msg_id: None,
            structured_data: Vec::new(),
            message: message.into(),
            origin,
        }
    }

    /// tail된 한 줄로부터 이벤트를 생성합니다.
    pub fn tailed(line: impl Into<Bytes>) -> Self {
        Self::new(Origin::TailedFile, line)
    }

    /// PRI 값 (`facility * 8 + severity`)
    pub fn pri(&self) -> u16 {
        u16::from(self.facility) * 8 + u16::from(self.severity)
    }

    /// 주어진 SD-ID의 요소를 찾습니다.
    pub fn element(&self, id: &str) -> Option<&StructuredElement> {
        self.structured_data.iter().find(|e| e.id == id)
    }

    /// 주어진 SD-ID의 요소가 있는지 확인합니다.
    pub fn has_element(&self, id: &str) -> bool {
        self.element(id).is_some()
    }
}
