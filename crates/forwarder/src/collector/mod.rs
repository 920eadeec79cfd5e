//! 이벤트 수집 모듈 -- 로컬 syslog 소켓과 감시 디렉토리에서 이벤트를 만듭니다.
//!
//! # 수집 소스
//! - [`LocalReceiver`]: UDP 또는 Unix 데이터그램 syslog 수신 (RFC 5424 / RFC 3164)
//! - [`FileTailer`]: 디렉토리 폴링 + 파일 tail (회전/절단 감지)
//!
//! # 아키텍처
//! 각 수집기는 자체 tokio 태스크에서 실행되며, 만든 [`LogEvent`](crate::event::LogEvent)를
//! `tokio::mpsc::Sender<LogEvent>` 채널로 내보냅니다.
//! 수신기 출력은 디스패처로, tailer 출력은 정규화 단계로 갑니다.

pub mod file;
pub mod receiver;

pub use file::{FileTailer, TailerConfig};
pub use receiver::{LocalReceiver, ReceiverConfig, ReceiverSocket};

/// 수집기 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorStatus {
    /// 실행 대기 중
    Idle,
    /// 실행 중
    Running,
    /// 에러로 중단됨
    Error(String),
    /// 정상 종료됨
    Stopped,
}

impl CollectorStatus {
    /// 상태 이름을 반환합니다.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Error(_) => "error",
            Self::Stopped => "stopped",
        }
    }
}
