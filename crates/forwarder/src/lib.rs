#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`event`]: RFC 5424 구조의 로그 이벤트 모델
//! - [`codec`]: RFC 5424 인코딩/파싱, RFC 3164 보조 파싱, RFC 6587 octet-counting 프레이밍
//! - [`collector`]: 로컬 syslog 수신기와 디렉토리 tailer
//! - [`normalizer`]: tail 이벤트에 헤더와 instance SD 요소를 채움
//! - [`dispatcher`]: 전송 큐, 드레인 연결, 재연결 백오프
//! - [`buffer`]: 오버플로우 정책이 있는 전송 큐
//! - [`pipeline`]: 전체 조립과 생명주기 (Pipeline trait 구현)
//! - [`config`]: 포워더 설정 (core 설정에서 변환)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! LocalReceiver ---------------------------> Dispatcher --> octet-counted TCP
//! FileTailer ------> Normalizer ----------->     |
//!                    (instance@47450)        SendBuffer
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod normalizer;
pub mod pipeline;

pub mod collector;
pub mod dispatcher;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{ForwardingPipeline, ForwardingPipelineBuilder};

// 설정
pub use config::{ForwarderConfig, ListenAddr, OverflowPolicy};

// 에러
pub use error::ForwardError;

// 이벤트
pub use event::{LogEvent, Origin, StructuredElement};

// 수집기
pub use collector::{FileTailer, LocalReceiver};

// 정규화
pub use normalizer::Normalizer;

// 디스패처
pub use dispatcher::{Dispatcher, DispatcherStats, DrainConnector, StatsSnapshot, TcpConnector};
