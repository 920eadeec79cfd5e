//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `syslog_forwarder_`
//! - 접미어: `_total` (counter), `_seconds` (시간), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use syslog_forwarder_core::metrics as m;
//!
//! metrics::counter!(m::EVENTS_SENT_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 이벤트 출처 레이블 키 (local_syslog, tailed_file)
pub const LABEL_SOURCE: &str = "source";

// ─── 수집 메트릭 ────────────────────────────────────────────────────

/// 디스패처 큐에 유입된 이벤트 수 (counter, label: source)
pub const EVENTS_RECEIVED_TOTAL: &str = "syslog_forwarder_events_received_total";

/// 파싱에 실패해 버려진 로컬 데이터그램 수 (counter)
pub const MALFORMED_MESSAGES_TOTAL: &str = "syslog_forwarder_malformed_messages_total";

/// 파일 읽기 실패 수 (counter)
pub const TAIL_READ_ERRORS_TOTAL: &str = "syslog_forwarder_tail_read_errors_total";

/// 감시 중인 파일 수 (gauge)
pub const FILES_WATCHED: &str = "syslog_forwarder_files_watched";

/// 회전/절단 감지로 오프셋이 초기화된 횟수 (counter)
pub const FILE_ROTATIONS_TOTAL: &str = "syslog_forwarder_file_rotations_total";

// ─── 전송 메트릭 ────────────────────────────────────────────────────

/// 드레인으로 전송된 이벤트 수 (counter)
pub const EVENTS_SENT_TOTAL: &str = "syslog_forwarder_events_sent_total";

/// 드레인으로 전송된 바이트 수, 프레임 접두사 포함 (counter)
pub const BYTES_SENT_TOTAL: &str = "syslog_forwarder_bytes_sent_total";

/// 큐 오버플로우로 드롭된 이벤트 수 (counter)
pub const EVENTS_DROPPED_TOTAL: &str = "syslog_forwarder_events_dropped_total";

/// 인코딩 실패로 드롭된 이벤트 수 (counter)
pub const ENCODE_ERRORS_TOTAL: &str = "syslog_forwarder_encode_errors_total";

/// 드레인 재연결 시도 수 (counter)
pub const RECONNECTS_TOTAL: &str = "syslog_forwarder_reconnects_total";

/// 전송 대기 큐 길이 (gauge)
pub const QUEUE_SIZE: &str = "syslog_forwarder_queue_size";

/// 드레인 연결 상태, 1 = 연결됨 (gauge)
pub const DRAIN_CONNECTED: &str = "syslog_forwarder_drain_connected";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "syslog_forwarder_daemon_uptime_seconds";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        EVENTS_RECEIVED_TOTAL,
        "Total number of events accepted into the send queue, by source"
    );
    describe_counter!(
        MALFORMED_MESSAGES_TOTAL,
        "Total number of local datagrams dropped because they could not be parsed"
    );
    describe_counter!(
        TAIL_READ_ERRORS_TOTAL,
        "Total number of failed reads while tailing watched files"
    );
    describe_gauge!(FILES_WATCHED, "Number of files currently tailed");
    describe_counter!(
        FILE_ROTATIONS_TOTAL,
        "Total number of rotations or truncations detected on tailed files"
    );

    describe_counter!(EVENTS_SENT_TOTAL, "Total number of events written to the drain");
    describe_counter!(
        BYTES_SENT_TOTAL,
        "Total bytes written to the drain, including frame headers"
    );
    describe_counter!(
        EVENTS_DROPPED_TOTAL,
        "Total number of events dropped due to send queue overflow"
    );
    describe_counter!(
        ENCODE_ERRORS_TOTAL,
        "Total number of events dropped because they could not be encoded"
    );
    describe_counter!(RECONNECTS_TOTAL, "Total number of drain connection attempts");
    describe_gauge!(QUEUE_SIZE, "Current number of events waiting in the send queue");
    describe_gauge!(DRAIN_CONNECTED, "1 when a drain connection is established");

    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
}
