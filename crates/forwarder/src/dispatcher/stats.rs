//! 디스패처 통계
//!
//! 디스패처 태스크가 갱신하고 파이프라인(헬스 체크)과 테스트가 읽는 공유 카운터입니다.
//! 갱신할 때 `metrics` 파사드에도 같은 값을 기록합니다.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use syslog_forwarder_core::metrics as m;

use crate::event::Origin;

/// 디스패처 통계 카운터
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// 큐에 들어온 이벤트 수
    received: AtomicU64,
    /// 드레인에 기록된 이벤트 수
    sent: AtomicU64,
    /// 드레인에 기록된 바이트 수 (프레임 헤더 포함)
    bytes_sent: AtomicU64,
    /// 큐 오버플로우로 버려진 이벤트 수
    dropped: AtomicU64,
    /// 인코딩 실패로 버려진 이벤트 수
    encode_errors: AtomicU64,
    /// 연결이 끊긴 뒤 다시 연결된 횟수
    reconnects: AtomicU64,
    /// 현재 드레인 연결 여부
    connected: AtomicBool,
    /// 현재 큐 길이
    queue_len: AtomicU64,
}

impl DispatcherStats {
    /// 빈 통계를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_received(&self, origin: Origin) {
        self.received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::EVENTS_RECEIVED_TOTAL, m::LABEL_SOURCE => origin.as_str())
            .increment(1);
    }

    #[inline]
    pub(crate) fn record_sent(&self, bytes: u64) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        metrics::counter!(m::EVENTS_SENT_TOTAL).increment(1);
        metrics::counter!(m::BYTES_SENT_TOTAL).increment(bytes);
    }

    #[inline]
    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::EVENTS_DROPPED_TOTAL).increment(1);
    }

    #[inline]
    pub(crate) fn record_encode_error(&self) {
        self.encode_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::ENCODE_ERRORS_TOTAL).increment(1);
    }

    #[inline]
    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::RECONNECTS_TOTAL).increment(1);
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
        metrics::gauge!(m::DRAIN_CONNECTED).set(if connected { 1.0 } else { 0.0 });
    }

    pub(crate) fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len as u64, Ordering::Relaxed);
        metrics::gauge!(m::QUEUE_SIZE).set(len as f64);
    }

    /// 드레인 연결 여부
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// 현재 큐 길이
    pub fn queue_len(&self) -> usize {
        usize::try_from(self.queue_len.load(Ordering::Relaxed)).unwrap_or(usize::MAX)
    }

    /// 지금까지 드롭된 이벤트 수
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 현재 값의 스냅샷
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            encode_errors: self.encode_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connected: self.is_connected(),
            queue_len: self.queue_len(),
        }
    }
}

/// 특정 시점의 디스패처 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub sent: u64,
    pub bytes_sent: u64,
    pub dropped: u64,
    pub encode_errors: u64,
    pub reconnects: u64,
    pub connected: bool,
    pub queue_len: usize,
}
