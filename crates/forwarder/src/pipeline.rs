//! 포워딩 파이프라인 -- 수신기/tailer/정규화기/디스패처를 조립하고 생명주기를 관리합니다.
//!
//! [`ForwardingPipeline`]은 core의 [`Pipeline`] trait을 구현하여
//! 데몬에서 start/stop/health_check로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! LocalReceiver ----------------------------+
//!                                           +--> mpsc --> Dispatcher --> TCP drain
//! FileTailer --> mpsc --> Normalizer -------+
//! ```
//!
//! # 종료 순서
//! 1. 생산자(수신기, tailer) 취소 후 종료 대기
//! 2. 정규화기는 입력이 닫히면 종료, 디스패처는 큐를 비우면 종료
//! 3. `shutdown_timeout` 안에 끝나지 않으면 디스패처 취소

use std::sync::Arc;

use syslog_forwarder_core::error::{AgentError, PipelineError};
use syslog_forwarder_core::pipeline::{HealthStatus, Pipeline};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::buffer::utilization;
use crate::collector::{FileTailer, LocalReceiver, ReceiverSocket};
use crate::config::{ForwarderConfig, ListenAddr};
use crate::dispatcher::{Dispatcher, DispatcherStats, DrainConnector, StatsSnapshot, TcpConnector};
use crate::error::ForwardError;
use crate::normalizer::Normalizer;

/// 생산자 -> 디스패처, tailer -> 정규화기 채널 용량
const CHANNEL_CAPACITY: usize = 1024;

/// 큐 사용률이 이 값을 넘으면 Degraded
const QUEUE_DEGRADED_RATIO: f64 = 0.9;

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 포워딩 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use syslog_forwarder::{ForwarderConfig, ForwardingPipelineBuilder};
///
/// let mut pipeline = ForwardingPipelineBuilder::new()
///     .config(ForwarderConfig::from_core(&core_config)?)
///     .build()?;
///
/// pipeline.start().await?;
/// ```
pub struct ForwardingPipeline<C: DrainConnector = TcpConnector> {
    config: ForwarderConfig,
    state: PipelineState,
    /// 시작 시 디스패처로 넘어감
    connector: Option<C>,
    /// 수신기/tailer 종료 신호
    producer_cancel: CancellationToken,
    /// 정규화기/디스패처 종료 신호
    dispatcher_cancel: CancellationToken,
    stats: Option<Arc<DispatcherStats>>,
    receiver_addr: Option<ListenAddr>,
    producers: Vec<JoinHandle<()>>,
    normalizer: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<Result<StatsSnapshot, ForwardError>>>,
}

impl<C: DrainConnector> ForwardingPipeline<C> {
    /// 현재 상태 이름을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            PipelineState::Initialized => "initialized",
            PipelineState::Running => "running",
            PipelineState::Stopped => "stopped",
        }
    }

    /// 수신기가 실제로 바인드된 주소 (시작 전이거나 수신기가 꺼져 있으면 `None`)
    pub fn receiver_addr(&self) -> Option<&ListenAddr> {
        self.receiver_addr.as_ref()
    }

    /// 디스패처 통계 (시작 전에는 `None`)
    pub fn stats(&self) -> Option<Arc<DispatcherStats>> {
        self.stats.clone()
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    fn spawn_tasks(&mut self, connector: C, socket: Option<ReceiverSocket>) {
        let (intake_tx, intake_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let dispatcher = Dispatcher::new(
            self.config.dispatcher.clone(),
            connector,
            intake_rx,
            self.dispatcher_cancel.clone(),
        );
        self.stats = Some(dispatcher.stats());
        self.dispatcher = Some(tokio::spawn(dispatcher.run()));

        let normalizer = Normalizer::new(self.config.normalizer.clone());

        if self.config.tailer.enabled {
            let (tail_tx, tail_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let mut tailer =
                FileTailer::new(self.config.tailer.clone(), tail_tx, self.producer_cancel.clone());
            self.producers.push(tokio::spawn(async move {
                if let Err(e) = tailer.run().await {
                    error!(error = %e, "file tailer failed");
                }
            }));

            let stage = normalizer.clone();
            let out = intake_tx.clone();
            let cancel = self.dispatcher_cancel.clone();
            self.normalizer = Some(tokio::spawn(async move {
                if let Err(e) = stage.run(tail_rx, out, cancel).await {
                    error!(error = %e, "normalizer failed");
                }
            }));
        }

        if let Some(socket) = socket {
            let mut receiver = LocalReceiver::new(
                self.config.receiver.clone(),
                intake_tx,
                self.producer_cancel.clone(),
            );
            if self.config.normalizer.annotate_local {
                receiver = receiver.with_annotation(normalizer.instance_element().clone());
            }
            self.producers.push(tokio::spawn(async move {
                if let Err(e) = receiver.run_on(socket).await {
                    error!(error = %e, "local receiver failed");
                }
            }));
        }
    }

    async fn join_dispatcher(&mut self) -> Result<(), AgentError> {
        let deadline = Instant::now() + self.config.dispatcher.shutdown_timeout;

        if let Some(mut handle) = self.normalizer.take() {
            let joined = match timeout_at(deadline, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    self.dispatcher_cancel.cancel();
                    handle.await
                }
            };
            if let Err(e) = joined {
                warn!(error = %e, "normalizer task panicked");
            }
        }

        let Some(mut handle) = self.dispatcher.take() else {
            return Ok(());
        };
        let joined = match timeout_at(deadline, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    timeout_ms = self.config.dispatcher.shutdown_timeout.as_millis() as u64,
                    "shutdown timeout elapsed, abandoning queued events"
                );
                self.dispatcher_cancel.cancel();
                handle.await
            }
        };

        match joined {
            Ok(Ok(snapshot)) => {
                info!(sent = snapshot.sent, dropped = snapshot.dropped, "dispatcher drained");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(PipelineError::TaskJoin(e.to_string()).into()),
        }
    }
}

impl<C: DrainConnector> Pipeline for ForwardingPipeline<C> {
    async fn start(&mut self) -> Result<(), AgentError> {
        if self.state == PipelineState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        if self.connector.is_none() {
            return Err(PipelineError::InitFailed(
                "pipeline was already stopped; build a new one".to_owned(),
            )
            .into());
        }

        info!(
            drain = %self.config.dispatcher.address,
            receiver = self.config.receiver.enabled,
            tailer = self.config.tailer.enabled,
            "starting forwarding pipeline"
        );

        // 바인드 실패는 태스크를 띄우기 전에 보고
        let socket = if self.config.receiver.enabled {
            let socket = ReceiverSocket::bind(&self.config.receiver.listen).await?;
            self.receiver_addr = Some(socket.local_addr()?);
            Some(socket)
        } else {
            None
        };

        let Some(connector) = self.connector.take() else {
            return Err(PipelineError::InitFailed("drain connector missing".to_owned()).into());
        };
        self.spawn_tasks(connector, socket);
        self.state = PipelineState::Running;
        info!("forwarding pipeline started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), AgentError> {
        if self.state != PipelineState::Running {
            return Err(PipelineError::NotRunning.into());
        }
        info!("stopping forwarding pipeline");

        // 1. 생산자
        self.producer_cancel.cancel();
        for handle in self.producers.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "producer task panicked");
            }
        }

        // 2. 정규화기, 디스패처
        let result = self.join_dispatcher().await;
        self.dispatcher_cancel.cancel();

        self.state = PipelineState::Stopped;
        info!("forwarding pipeline stopped");
        result
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if self.dispatcher.as_ref().is_some_and(JoinHandle::is_finished) {
                    return HealthStatus::Unhealthy("dispatcher exited".to_owned());
                }
                let Some(stats) = &self.stats else {
                    return HealthStatus::Unhealthy("dispatcher not started".to_owned());
                };
                if !stats.is_connected() {
                    return HealthStatus::Degraded(format!(
                        "drain {} disconnected",
                        self.config.dispatcher.address
                    ));
                }
                let ratio = utilization(stats.queue_len(), self.config.dispatcher.queue_capacity);
                if ratio > QUEUE_DEGRADED_RATIO {
                    HealthStatus::Degraded(format!(
                        "send queue utilization high: {:.1}%",
                        ratio * 100.0
                    ))
                } else {
                    HealthStatus::Healthy
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 포워딩 파이프라인 빌더
pub struct ForwardingPipelineBuilder {
    config: ForwarderConfig,
}

impl ForwardingPipelineBuilder {
    /// 기본 설정으로 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: ForwarderConfig::default(),
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: ForwarderConfig) -> Self {
        self.config = config;
        self
    }

    /// TCP 드레인으로 보내는 파이프라인을 빌드합니다.
    pub fn build(self) -> Result<ForwardingPipeline, ForwardError> {
        let connector = TcpConnector::new(
            self.config.dispatcher.address.clone(),
            self.config.dispatcher.connect_timeout,
        );
        self.build_with_connector(connector)
    }

    /// 지정한 커넥터로 파이프라인을 빌드합니다.
    ///
    /// 설정 검증(감시 디렉토리 존재 여부 포함)이 여기서 수행됩니다.
    pub fn build_with_connector<C: DrainConnector>(
        self,
        connector: C,
    ) -> Result<ForwardingPipeline<C>, ForwardError> {
        self.config.validate()?;

        Ok(ForwardingPipeline {
            config: self.config,
            state: PipelineState::Initialized,
            connector: Some(connector),
            producer_cancel: CancellationToken::new(),
            dispatcher_cancel: CancellationToken::new(),
            stats: None,
            receiver_addr: None,
            producers: Vec::new(),
            normalizer: None,
            dispatcher: None,
        })
    }
}

impl Default for ForwardingPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
