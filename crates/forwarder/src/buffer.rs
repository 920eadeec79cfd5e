//! 전송 대기 큐 -- 드레인으로 나가기 전의 인메모리 버퍼
//!
//! [`SendBuffer`]는 디스패처가 단독으로 소유하는 FIFO 큐입니다.
//! 맨 앞의 이벤트는 전송에 성공할 때까지 큐에 남아 있으므로,
//! 연결이 끊겨도 같은 이벤트를 다음 연결에서 다시 보냅니다.
//!
//! # 오버플로우 정책
//! 버퍼가 가득 찬 경우:
//! - [`OverflowPolicy::Oldest`](crate::config::OverflowPolicy::Oldest): 가장 오래된 엔트리를 드롭
//! - [`OverflowPolicy::Block`](crate::config::OverflowPolicy::Block): 드롭하지 않음.
//!   디스패처가 [`SendBuffer::has_room`]을 보고 입력 채널 수신을 멈춥니다.

use std::collections::VecDeque;

use crate::config::OverflowPolicy;
use crate::event::LogEvent;

/// 전송 대기 큐
pub struct SendBuffer {
    /// 버퍼 내부 저장소
    buffer: VecDeque<LogEvent>,
    /// 최대 용량
    capacity: usize,
    /// 오버플로우 정책
    policy: OverflowPolicy,
    /// 드롭된 엔트리 카운터
    dropped_count: u64,
    /// 총 유입 엔트리 카운터
    total_received: u64,
}

impl SendBuffer {
    /// 새 전송 큐를 생성합니다.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(10_000)),
            capacity,
            policy,
            dropped_count: 0,
            total_received: 0,
        }
    }

    /// 이벤트를 큐 끝에 추가합니다.
    ///
    /// `Oldest` 정책에서 큐가 가득 차 있으면 맨 앞 이벤트를 버리고 `true`를 반환합니다.
    /// `Block` 정책은 호출자가 [`has_room`](Self::has_room)을 먼저 확인하므로
    /// 용량을 넘겨도 드롭하지 않습니다.
    pub fn push(&mut self, event: LogEvent) -> bool {
        self.total_received += 1;

        let mut dropped = false;
        if self.buffer.len() >= self.capacity && self.policy == OverflowPolicy::Oldest {
            self.buffer.pop_front();
            self.dropped_count += 1;
            dropped = true;
            tracing::warn!(
                dropped = self.dropped_count,
                capacity = self.capacity,
                "send queue full, dropped oldest event"
            );
        }

        self.buffer.push_back(event);
        dropped
    }

    /// 다음에 보낼 이벤트
    pub fn front(&self) -> Option<&LogEvent> {
        self.buffer.front()
    }

    /// 전송이 끝난 맨 앞 이벤트를 제거합니다.
    pub fn pop_front(&mut self) -> Option<LogEvent> {
        self.buffer.pop_front()
    }

    /// 새 이벤트를 드롭 없이 받을 수 있는지 확인합니다.
    pub fn has_room(&self) -> bool {
        self.buffer.len() < self.capacity
    }

    /// 현재 버퍼에 저장된 엔트리 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// 버퍼가 비어있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// 버퍼 최대 용량을 반환합니다.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 오버플로우 정책을 반환합니다.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// 지금까지 드롭된 엔트리 수를 반환합니다.
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// 총 유입 엔트리 수를 반환합니다.
    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    /// 버퍼 사용률을 0.0~1.0 범위로 반환합니다.
    pub fn utilization(&self) -> f64 {
        utilization(self.buffer.len(), self.capacity)
    }
}

/// `len / capacity`를 0.0~1.0 범위로 계산합니다.
pub(crate) fn utilization(len: usize, capacity: usize) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    let ratio = f64::from(u32::try_from(len).unwrap_or(u32::MAX))
        / f64::from(u32::try_from(capacity).unwrap_or(u32::MAX));
    ratio.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn event(msg: &str) -> LogEvent {
        LogEvent::tailed(Bytes::copy_from_slice(msg.as_bytes()))
    }

    fn messages(buf: &mut SendBuffer) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(e) = buf.pop_front() {
            out.push(String::from_utf8(e.message.to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn fifo_order() {
        let mut buf = SendBuffer::new(10, OverflowPolicy::Oldest);
        for i in 0..3 {
            buf.push(event(&format!("log{i}")));
        }
        assert_eq!(buf.front().map(|e| &e.message[..]), Some(&b"log0"[..]));
        assert_eq!(messages(&mut buf), vec!["log0", "log1", "log2"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn oldest_policy_drops_front() {
        let mut buf = SendBuffer::new(3, OverflowPolicy::Oldest);
        assert!(!buf.push(event("log1")));
        assert!(!buf.push(event("log2")));
        assert!(!buf.push(event("log3")));
        assert!(!buf.has_room());

        // 4번째 추가 시 가장 오래된 것이 드롭됨
        assert!(buf.push(event("log4")));
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.dropped_count(), 1);
        assert_eq!(messages(&mut buf), vec!["log2", "log3", "log4"]);
    }

    #[test]
    fn dropped_count_is_monotonic() {
        let mut buf = SendBuffer::new(2, OverflowPolicy::Oldest);
        let mut last = 0;
        for i in 0..20 {
            buf.push(event(&format!("log{i}")));
            assert!(buf.dropped_count() >= last);
            last = buf.dropped_count();
        }
        assert_eq!(buf.dropped_count(), 18);
        assert_eq!(buf.total_received(), 20);
    }

    #[test]
    fn block_policy_never_drops() {
        let mut buf = SendBuffer::new(2, OverflowPolicy::Block);
        buf.push(event("1"));
        buf.push(event("2"));
        assert!(!buf.has_room());
        assert!(!buf.push(event("3")));
        assert_eq!(buf.dropped_count(), 0);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.policy(), OverflowPolicy::Block);
    }

    #[test]
    fn utilization_calculation() {
        let mut buf = SendBuffer::new(100, OverflowPolicy::Oldest);
        assert_eq!(buf.utilization(), 0.0);

        for i in 0..50 {
            buf.push(event(&format!("log{i}")));
        }
        let util = buf.utilization();
        assert!(util > 0.49 && util < 0.51);
        assert_eq!(buf.capacity(), 100);
    }

    #[test]
    fn utilization_is_capped() {
        assert_eq!(utilization(5, 2), 1.0);
        assert_eq!(utilization(1, 0), 0.0);
    }
}
