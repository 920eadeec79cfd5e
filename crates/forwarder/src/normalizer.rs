//! tail 이벤트 정규화
//!
//! [`FileTailer`](crate::collector::FileTailer)가 만든 이벤트는 메시지 외의 필드가 비어 있습니다.
//! [`Normalizer`]가 타임스탬프, 호스트명, facility/severity를 채우고
//! instance SD 요소(`[instance@47450 ...]`)를 붙인 뒤 디스패처로 보냅니다.
//!
//! `LocalSyslog` 이벤트는 변경하지 않습니다.

use chrono::{DateTime, FixedOffset, SubsecRound, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::{MAX_APP_NAME_LEN, MAX_HOSTNAME_LEN, is_print_ascii, is_sd_name};
use crate::config::local_hostname;
use crate::error::ForwardError;
use crate::event::{FACILITY_USER, LogEvent, Origin, SEVERITY_INFO, StructuredElement};

/// 기본 instance SD-ID
pub const DEFAULT_SD_ID: &str = "instance@47450";

/// 정규화 설정
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// 이벤트 HOSTNAME (비어 있으면 NILVALUE)
    pub hostname: String,
    /// 이벤트 APP-NAME
    pub app_name: Option<String>,
    /// facility (0-23)
    pub facility: u8,
    /// severity (0-7)
    pub severity: u8,
    /// instance SD-ID
    pub sd_id: String,
    /// instance SD 파라미터 (순서 유지)
    pub params: Vec<(String, String)>,
    /// 로컬 syslog 이벤트에도 instance SD 요소를 붙일지 여부
    pub annotate_local: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            hostname: local_hostname(),
            app_name: None,
            facility: FACILITY_USER,
            severity: SEVERITY_INFO,
            sd_id: DEFAULT_SD_ID.to_owned(),
            params: Vec::new(),
            annotate_local: false,
        }
    }
}

impl NormalizerConfig {
    /// 정규화 결과가 항상 인코딩 가능한지 확인합니다.
    pub fn validate(&self) -> Result<(), ForwardError> {
        if self.hostname.len() > MAX_HOSTNAME_LEN
            || (!self.hostname.is_empty() && !is_print_ascii(&self.hostname))
        {
            return Err(ForwardError::config(
                "instance.hostname",
                format!("'{}' is not a valid syslog hostname", self.hostname),
            ));
        }

        if let Some(app) = &self.app_name {
            if app.is_empty() || app.len() > MAX_APP_NAME_LEN || !is_print_ascii(app) {
                return Err(ForwardError::config(
                    "instance.app_name",
                    format!("'{app}' must be 1-{MAX_APP_NAME_LEN} printable ASCII characters"),
                ));
            }
        }

        if self.facility > 23 {
            return Err(ForwardError::config(
                "instance.facility",
                format!("{} exceeds 23", self.facility),
            ));
        }
        if self.severity > 7 {
            return Err(ForwardError::config(
                "instance.severity",
                format!("{} exceeds 7", self.severity),
            ));
        }

        if !is_sd_name(&self.sd_id) {
            return Err(ForwardError::config(
                "instance.sd_id",
                format!("'{}' is not a valid SD-ID", self.sd_id),
            ));
        }
        if let Some((name, _)) = self.params.iter().find(|(name, _)| !is_sd_name(name)) {
            return Err(ForwardError::config(
                "instance.params",
                format!("'{name}' is not a valid PARAM-NAME"),
            ));
        }

        Ok(())
    }
}

/// tail 이벤트 정규화기
#[derive(Debug, Clone)]
pub struct Normalizer {
    config: NormalizerConfig,
    element: StructuredElement,
}

impl Normalizer {
    /// 설정으로 정규화기를 생성합니다.
    pub fn new(config: NormalizerConfig) -> Self {
        let element = StructuredElement {
            id: config.sd_id.clone(),
            params: config.params.clone(),
        };
        Self { config, element }
    }

    /// 붙일 instance SD 요소
    pub fn instance_element(&self) -> &StructuredElement {
        &self.element
    }

    /// 정규화 설정
    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// 현재 시각으로 이벤트를 정규화합니다.
    pub fn normalize(&self, event: LogEvent) -> LogEvent {
        let now = Utc::now().trunc_subsecs(6).fixed_offset();
        self.normalize_at(event, now)
    }

    pub(crate) fn normalize_at(&self, mut event: LogEvent, now: DateTime<FixedOffset>) -> LogEvent {
        if event.origin != Origin::TailedFile {
            return event;
        }

        if event.timestamp.is_none() {
            event.timestamp = Some(now);
        }
        if event.hostname.is_none() && !self.config.hostname.is_empty() {
            event.hostname = Some(self.config.hostname.clone());
        }
        if event.app_name.is_none() {
            event.app_name.clone_from(&self.config.app_name);
        }
        event.facility = self.config.facility;
        event.severity = self.config.severity;

        if !event.has_element(&self.element.id) {
            event.structured_data.push(self.element.clone());
        }
        event
    }

    /// 입력 채널의 이벤트를 정규화하여 출력 채널로 보냅니다.
    ///
    /// 입력 채널이 닫히면 (tailer 종료) 반환합니다. `cancel`은 디스패처의 종료 신호로,
    /// 출력 쪽이 더 이상 받지 않을 때 대기 중인 전송을 풀어 줍니다.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<LogEvent>,
        tx: mpsc::Sender<LogEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ForwardError> {
        info!(sd_id = %self.element.id, "normalizer started");
        let mut processed: u64 = 0;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let event = self.normalize(event);
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = tx.send(event) => {
                    if result.is_err() {
                        debug!("dispatcher intake closed, stopping normalizer");
                        break;
                    }
                }
            }
            processed += 1;
        }

        info!(processed, "normalizer stopped");
        Ok(())
    }
}
