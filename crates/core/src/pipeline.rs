//! 파이프라인 trait -- 생명주기 관리 확장 포인트 정의

use std::fmt;
use std::future::Future;

use crate::error::AgentError;

/// 컴포넌트 헬스 상태
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// 정상 동작
    Healthy,
    /// 동작은 하지만 성능/기능 저하
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 동작 불가 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 데몬이 관리하는 파이프라인 생명주기 trait
///
/// ```text
/// build → start() → Running → stop() → Stopped
/// ```
pub trait Pipeline: Send {
    /// 모든 백그라운드 태스크를 시작합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), AgentError>> + Send;

    /// 생산자를 먼저 멈추고, 남은 큐를 제한 시간 내에 비운 뒤 종료합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), AgentError>> + Send;

    /// 현재 헬스 상태를 반환합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
