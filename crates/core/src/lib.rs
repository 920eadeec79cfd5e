//! syslog-forwarder 공통 크레이트
//!
//! 모든 컴포넌트가 공유하는 설정, 에러 타입, 메트릭 이름, 파이프라인 trait을 정의합니다.

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;

// --- 주요 타입 re-export ---

// 에러
pub use error::{AgentError, ConfigError, PipelineError};

// 설정
pub use config::AgentConfig;

// 파이프라인 trait
pub use pipeline::{HealthStatus, Pipeline};
