//! 포워딩 디스패처 -- 드레인 연결의 단일 writer
//!
//! 수신기와 정규화기가 보낸 이벤트를 하나의 전송 큐로 모아
//! RFC 5424로 인코딩하고 octet-counting 프레임으로 드레인에 씁니다.
//!
//! # 연결 상태
//! ```text
//! Disconnected -> Connecting -> Connected
//!      ^                            |
//!      +--------- (write error) ----+
//! ```
//! 연결 실패 시 `reconnect_initial`부터 `reconnect_max`까지 지수 백오프로 재시도합니다.
//! 연결 중이던 연결이 끊기면 바로 한 번 재연결을 시도합니다.
//! 전송 중 실패한 이벤트는 큐 맨 앞에 남아 다음 연결에서 다시 전송됩니다 (at-least-once).
//!
//! 드레인은 데이터를 보내지 않으므로 읽기 쪽 EOF/에러는 연결이 닫혔다는 뜻입니다.
//! 유휴 상태에서는 읽기를 함께 기다리고, 쓰기 직전에는 논블로킹으로 한 번 확인해서
//! 이미 닫힌 소켓의 커널 버퍼로 이벤트를 흘려보내지 않습니다.
//!
//! # 백프레셔
//! 큐 오버플로우 정책은 [`OverflowPolicy`]로 지정합니다.
//! `Block`이면 큐가 가득 찬 동안 입력 채널에서 꺼내지 않으므로 생산자가 전송에서 대기합니다.

pub mod connector;
pub mod stats;

use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Instant;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use connector::{DrainConnector, TcpConnector};
pub use stats::{DispatcherStats, StatsSnapshot};

use crate::buffer::SendBuffer;
use crate::codec::{self, OctetCountingCodec};
use crate::config::OverflowPolicy;
use crate::error::ForwardError;
use crate::event::LogEvent;

/// 한 번에 입력 채널에서 바로 꺼내는 최대 이벤트 수
const INTAKE_BATCH: usize = 256;

/// 디스패처 설정
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// 드레인 주소 (`host:port`)
    pub address: String,
    /// 연결 타임아웃
    pub connect_timeout: Duration,
    /// 이벤트 하나의 쓰기 타임아웃
    pub write_timeout: Duration,
    /// 첫 재연결 대기 시간
    pub reconnect_initial: Duration,
    /// 최대 재연결 대기 시간
    pub reconnect_max: Duration,
    /// 전송 큐 용량
    pub queue_capacity: usize,
    /// 큐가 가득 찼을 때의 정책
    pub overflow_policy: OverflowPolicy,
    /// 종료 시 큐를 비우는 데 허용하는 시간
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:514".to_owned(),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            reconnect_initial: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            queue_capacity: 10_000,
            overflow_policy: OverflowPolicy::Oldest,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// 드레인 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 연결 없음 (백오프 대기 포함)
    Disconnected,
    /// 연결 시도 중
    Connecting,
    /// 연결됨
    Connected,
}

/// 포워딩 디스패처
pub struct Dispatcher<C: DrainConnector> {
    config: DispatcherConfig,
    connector: C,
    /// 수신기/정규화기 출력이 모이는 입력 채널
    rx: mpsc::Receiver<LogEvent>,
    /// 입력 채널이 아직 열려 있는지
    intake_open: bool,
    /// 종료 신호
    cancel: CancellationToken,
    queue: SendBuffer,
    stats: Arc<DispatcherStats>,
    state: ConnectionState,
    framer: OctetCountingCodec,
    /// 현재 전송 중인 프레임
    wire: BytesMut,
}

impl<C: DrainConnector> Dispatcher<C> {
    /// 새 디스패처를 생성합니다.
    pub fn new(
        config: DispatcherConfig,
        connector: C,
        rx: mpsc::Receiver<LogEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let queue = SendBuffer::new(config.queue_capacity, config.overflow_policy);
        Self {
            config,
            connector,
            rx,
            intake_open: true,
            cancel,
            queue,
            stats: Arc::new(DispatcherStats::new()),
            state: ConnectionState::Disconnected,
            framer: OctetCountingCodec::new(),
            wire: BytesMut::with_capacity(4096),
        }
    }

    /// 공유 통계 핸들. `run()`으로 디스패처가 소비된 뒤에도 유효합니다.
    pub fn stats(&self) -> Arc<DispatcherStats> {
        Arc::clone(&self.stats)
    }

    /// 현재 연결 상태
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 디스패처를 실행합니다.
    ///
    /// 입력 채널이 닫히고 큐가 비면, 또는 취소되면 반환합니다.
    /// 취소 시 큐에 남은 이벤트는 전송되지 않습니다.
    pub async fn run(mut self) -> Result<StatsSnapshot, ForwardError> {
        info!(
            target = %self.connector.target(),
            capacity = self.queue.capacity(),
            policy = ?self.queue.policy(),
            "dispatcher started"
        );

        let mut conn: Option<C::Conn> = None;
        let mut backoff = self.config.reconnect_initial;
        let mut retry_at: Option<Instant> = None;
        let mut ever_connected = false;

        loop {
            self.absorb_ready();
            if !self.intake_open && self.queue.is_empty() {
                debug!("intake closed and queue drained");
                break;
            }

            let Some(stream) = conn.as_mut() else {
                if let Some(at) = retry_at {
                    let accepting = self.accepting();
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep_until(at) => retry_at = None,
                        event = self.rx.recv(), if accepting => self.accept(event),
                    }
                    continue;
                }

                self.set_state(ConnectionState::Connecting);
                let attempt = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    result = self.connector.connect() => result,
                };

                match attempt {
                    Ok(stream) => {
                        if ever_connected {
                            self.stats.record_reconnect();
                        }
                        ever_connected = true;
                        backoff = self.config.reconnect_initial;
                        conn = Some(stream);
                        self.set_state(ConnectionState::Connected);
                        info!(target = %self.connector.target(), "connected to drain");
                    }
                    Err(source) => {
                        self.set_state(ConnectionState::Disconnected);
                        let error = ForwardError::Connection {
                            target: self.connector.target().to_owned(),
                            source,
                        };
                        warn!(
                            error = %error,
                            retry_in_ms = backoff.as_millis() as u64,
                            queued = self.queue.len(),
                            "drain connection failed"
                        );
                        retry_at = Some(Instant::now() + backoff);
                        backoff = (backoff * 2).min(self.config.reconnect_max);
                    }
                }
                continue;
            };

            if self.queue.is_empty() {
                // 연결됨, 보낼 이벤트 없음
                let mut scratch = [0u8; 64];
                let closed = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    event = self.rx.recv(), if self.intake_open => {
                        self.accept(event);
                        None
                    }
                    read = stream.read(&mut scratch) => match read {
                        Ok(0) => Some(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "drain closed the connection",
                        )),
                        Ok(_) => None,
                        Err(e) => Some(e),
                    },
                };
                if let Some(source) = closed {
                    conn = None;
                    retry_at = None;
                    self.drop_connection(source, "drain closed idle connection");
                }
                continue;
            }

            if let Some(source) = peer_closed(stream).await {
                conn = None;
                retry_at = None;
                self.drop_connection(source, "drain closed connection, reconnecting");
                continue;
            }

            let Some(front) = self.queue.front() else {
                continue;
            };

            let message = match codec::encode(front) {
                Ok(message) => message,
                Err(e) => {
                    self.queue.pop_front();
                    self.stats.record_encode_error();
                    self.stats.set_queue_len(self.queue.len());
                    warn!(error = %e, "dropping event that cannot be encoded");
                    continue;
                }
            };

            self.wire.clear();
            self.framer.encode(message, &mut self.wire)?;

            let wire = &self.wire;
            let write = async {
                stream.write_all(wire).await?;
                stream.flush().await
            };
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = tokio::time::timeout(self.config.write_timeout, write) => result,
            };

            let failure = match result {
                Ok(Ok(())) => {
                    let bytes = self.wire.len() as u64;
                    self.queue.pop_front();
                    self.stats.record_sent(bytes);
                    self.stats.set_queue_len(self.queue.len());
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_) => io::Error::new(io::ErrorKind::TimedOut, "write timed out"),
            };

            // 연결을 통째로 버리고 같은 이벤트를 새 연결로 다시 보냄
            conn = None;
            retry_at = None;
            self.drop_connection(failure, "drain write failed, reconnecting");
        }

        if let Some(mut stream) = conn.take() {
            let _ = tokio::time::timeout(self.config.write_timeout, stream.shutdown()).await;
        }
        self.set_state(ConnectionState::Disconnected);

        let snapshot = self.stats.snapshot();
        info!(
            received = snapshot.received,
            sent = snapshot.sent,
            bytes_sent = snapshot.bytes_sent,
            dropped = snapshot.dropped,
            encode_errors = snapshot.encode_errors,
            reconnects = snapshot.reconnects,
            unsent = self.queue.len(),
            "dispatcher stopped"
        );
        Ok(snapshot)
    }

    fn drop_connection(&mut self, source: io::Error, reason: &'static str) {
        self.set_state(ConnectionState::Disconnected);
        let error = ForwardError::Connection {
            target: self.connector.target().to_owned(),
            source,
        };
        warn!(error = %error, queued = self.queue.len(), "{reason}");
    }

    /// 정책상 입력 채널에서 이벤트를 더 꺼낼 수 있는지
    fn accepting(&self) -> bool {
        self.intake_open
            && (self.queue.has_room() || self.queue.policy() == OverflowPolicy::Oldest)
    }

    /// 이미 도착한 이벤트를 기다리지 않고 큐로 옮깁니다.
    fn absorb_ready(&mut self) {
        for _ in 0..INTAKE_BATCH {
            if !self.accepting() {
                return;
            }
            match self.rx.try_recv() {
                Ok(event) => self.enqueue(event),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => self.intake_open = false,
            }
        }
    }

    fn accept(&mut self, event: Option<LogEvent>) {
        match event {
            Some(event) => self.enqueue(event),
            None => self.intake_open = false,
        }
    }

    fn enqueue(&mut self, event: LogEvent) {
        self.stats.record_received(event.origin);
        if self.queue.push(event) {
            self.stats.record_dropped();
        }
        self.stats.set_queue_len(self.queue.len());
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "drain connection state");
        }
        self.state = state;
        self.stats
            .set_connected(state == ConnectionState::Connected);
    }
}

/// 기다리지 않고 읽기 쪽을 한 번 폴링해서 드레인이 연결을 닫았는지 확인합니다.
///
/// 아직 읽을 것이 없으면 `None`. 드레인이 보낸 데이터는 버립니다.
async fn peer_closed<S: AsyncRead + Unpin>(stream: &mut S) -> Option<io::Error> {
    poll_fn(|cx| {
        let mut scratch = [0u8; 64];
        let mut buf = ReadBuf::new(&mut scratch);
        match Pin::new(&mut *stream).poll_read(cx, &mut buf) {
            Poll::Pending => Poll::Ready(None),
            Poll::Ready(Ok(())) if buf.filled().is_empty() => Poll::Ready(Some(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "drain closed the connection",
            ))),
            Poll::Ready(Ok(())) => Poll::Ready(None),
            Poll::Ready(Err(e)) => Poll::Ready(Some(e)),
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio_util::codec::Decoder;

    /// 미리 준비한 연결을 순서대로 돌려주고, 없으면 거부
    #[derive(Default)]
    struct MockConnector {
        conns: Mutex<VecDeque<DuplexStream>>,
        attempts: AtomicUsize,
    }

    impl MockConnector {
        fn with(conns: Vec<DuplexStream>) -> Self {
            Self {
                conns: Mutex::new(conns.into()),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    impl DrainConnector for MockConnector {
        type Conn = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.conns.lock().unwrap().pop_front();
            next.ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }

        fn target(&self) -> &str {
            "mock"
        }
    }

    fn config(capacity: usize, policy: OverflowPolicy) -> DispatcherConfig {
        DispatcherConfig {
            reconnect_initial: Duration::from_millis(5),
            reconnect_max: Duration::from_millis(20),
            queue_capacity: capacity,
            overflow_policy: policy,
            ..DispatcherConfig::default()
        }
    }

    fn event(msg: &'static str) -> LogEvent {
        LogEvent::new(crate::event::Origin::LocalSyslog, Bytes::from_static(msg.as_bytes()))
    }

    async fn read_frames(mut peer: DuplexStream) -> Vec<LogEvent> {
        let mut raw = Vec::new();
        peer.read_to_end(&mut raw).await.unwrap();
        let mut src = BytesMut::from(&raw[..]);
        let mut decoder = OctetCountingCodec::new();
        let mut events = Vec::new();
        while let Some(frame) = decoder.decode(&mut src).unwrap() {
            events.push(codec::parse(&frame).unwrap());
        }
        assert!(src.is_empty());
        events
    }

    async fn read_one_frame(peer: &mut DuplexStream) -> LogEvent {
        let mut src = BytesMut::new();
        let mut decoder = OctetCountingCodec::new();
        loop {
            if let Some(frame) = decoder.decode(&mut src).unwrap() {
                return codec::parse(&frame).unwrap();
            }
            assert!(peer.read_buf(&mut src).await.unwrap() > 0, "peer closed early");
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn sends_framed_events_in_order() {
        let (local, peer) = tokio::io::duplex(64 * 1024);
        let (tx, rx) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(
            config(16, OverflowPolicy::Oldest),
            MockConnector::with(vec![local]),
            rx,
            CancellationToken::new(),
        );
        let handle = tokio::spawn(dispatcher.run());

        for msg in ["one", "two", "three"] {
            tx.send(event(msg)).await.unwrap();
        }
        drop(tx);

        let snapshot = handle.await.unwrap().unwrap();
        assert_eq!(snapshot.sent, 3);
        assert_eq!(snapshot.received, 3);
        assert!(!snapshot.connected);

        let events = read_frames(peer).await;
        let messages: Vec<_> = events
            .iter()
            .map(|e| String::from_utf8(e.message.to_vec()).unwrap())
            .collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
        assert_eq!(events[0], event("one"));
    }

    #[tokio::test]
    async fn unencodable_event_is_dropped_and_counted() {
        let (local, peer) = tokio::io::duplex(64 * 1024);
        let (tx, rx) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(
            config(16, OverflowPolicy::Oldest),
            MockConnector::with(vec![local]),
            rx,
            CancellationToken::new(),
        );
        let handle = tokio::spawn(dispatcher.run());

        let mut bad = event("bad");
        bad.facility = 30;
        tx.send(bad).await.unwrap();
        tx.send(event("good")).await.unwrap();
        drop(tx);

        let snapshot = handle.await.unwrap().unwrap();
        assert_eq!(snapshot.encode_errors, 1);
        assert_eq!(snapshot.sent, 1);

        let events = read_frames(peer).await;
        assert_eq!(events.len(), 1);
        assert_eq!(&events[0].message[..], b"good");
    }

    #[tokio::test]
    async fn failed_write_is_resent_on_new_connection() {
        // 첫 연결은 상대편이 이미 닫혀 있어 쓰기 실패
        let (broken, closed_peer) = tokio::io::duplex(1024);
        drop(closed_peer);
        let (good, peer) = tokio::io::duplex(64 * 1024);

        let (tx, rx) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(
            config(16, OverflowPolicy::Oldest),
            MockConnector::with(vec![broken, good]),
            rx,
            CancellationToken::new(),
        );
        let handle = tokio::spawn(dispatcher.run());

        tx.send(event("retry-me")).await.unwrap();
        drop(tx);

        let snapshot = handle.await.unwrap().unwrap();
        assert_eq!(snapshot.sent, 1);
        assert_eq!(snapshot.reconnects, 1);

        let events = read_frames(peer).await;
        assert_eq!(events.len(), 1);
        assert_eq!(&events[0].message[..], b"retry-me");
    }

    #[tokio::test]
    async fn drain_closing_idle_connection_does_not_lose_next_event() {
        let (first, mut first_peer) = tokio::io::duplex(64 * 1024);
        let (second, second_peer) = tokio::io::duplex(64 * 1024);

        let (tx, rx) = mpsc::channel(16);
        let dispatcher = Dispatcher::new(
            config(16, OverflowPolicy::Oldest),
            MockConnector::with(vec![first, second]),
            rx,
            CancellationToken::new(),
        );
        let stats = dispatcher.stats();
        let handle = tokio::spawn(dispatcher.run());

        tx.send(event("before-restart")).await.unwrap();
        assert_eq!(&read_one_frame(&mut first_peer).await.message[..], b"before-restart");

        // 드레인 재시작: 유휴 연결을 닫음
        drop(first_peer);
        wait_for(|| stats.snapshot().reconnects == 1).await;

        tx.send(event("after-restart")).await.unwrap();
        drop(tx);

        let snapshot = handle.await.unwrap().unwrap();
        assert_eq!(snapshot.sent, 2);

        let events = read_frames(second_peer).await;
        assert_eq!(events.len(), 1);
        assert_eq!(&events[0].message[..], b"after-restart");
    }

    #[tokio::test]
    async fn peer_closed_detects_eof_without_blocking() {
        let (mut local, peer) = tokio::io::duplex(1024);
        assert!(peer_closed(&mut local).await.is_none());

        drop(peer);
        let err = peer_closed(&mut local).await.unwrap();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn unreachable_drain_drops_oldest() {
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let connector = MockConnector::default();
        let dispatcher = Dispatcher::new(
            config(3, OverflowPolicy::Oldest),
            connector,
            rx,
            cancel.clone(),
        );
        let stats = dispatcher.stats();
        let handle = tokio::spawn(dispatcher.run());

        let mut last_dropped = 0;
        for i in 0..10 {
            tx.send(event(if i % 2 == 0 { "even" } else { "odd" }))
                .await
                .unwrap();
            let dropped = stats.dropped();
            assert!(dropped >= last_dropped);
            last_dropped = dropped;
        }

        wait_for(|| stats.snapshot().received == 10).await;
        let snap = stats.snapshot();
        assert_eq!(snap.dropped, 7);
        assert_eq!(snap.queue_len, 3);
        assert_eq!(snap.sent, 0);
        assert!(!snap.connected);

        cancel.cancel();
        let snapshot = handle.await.unwrap().unwrap();
        assert_eq!(snapshot.dropped, 7);
    }

    #[tokio::test]
    async fn block_policy_stops_intake() {
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            config(2, OverflowPolicy::Block),
            MockConnector::default(),
            rx,
            cancel.clone(),
        );
        let stats = dispatcher.stats();
        let handle = tokio::spawn(dispatcher.run());

        tx.send(event("1")).await.unwrap();
        tx.send(event("2")).await.unwrap();
        wait_for(|| stats.snapshot().received == 2).await;

        // 큐가 가득 차서 채널에 남음
        tx.send(event("3")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tx.try_send(event("4")).is_err());

        let snap = stats.snapshot();
        assert_eq!(snap.received, 2);
        assert_eq!(snap.dropped, 0);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn backoff_retries_until_connected() {
        let (tx, rx) = mpsc::channel(4);
        let connector = Arc::new(MockConnector::default());
        let dispatcher = Dispatcher::new(
            config(4, OverflowPolicy::Oldest),
            SharedConnector(Arc::clone(&connector)),
            rx,
            CancellationToken::new(),
        );
        let stats = dispatcher.stats();
        let handle = tokio::spawn(dispatcher.run());

        tx.send(event("late")).await.unwrap();
        wait_for(|| connector.attempts.load(Ordering::SeqCst) >= 3).await;
        assert!(!stats.is_connected());

        let (local, peer) = tokio::io::duplex(64 * 1024);
        connector.conns.lock().unwrap().push_back(local);
        drop(tx);

        let snapshot = handle.await.unwrap().unwrap();
        assert_eq!(snapshot.sent, 1);
        // 첫 연결은 재연결로 세지 않음
        assert_eq!(snapshot.reconnects, 0);
        assert_eq!(read_frames(peer).await.len(), 1);
    }

    struct SharedConnector(Arc<MockConnector>);

    impl DrainConnector for SharedConnector {
        type Conn = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            self.0.connect().await
        }

        fn target(&self) -> &str {
            self.0.target()
        }
    }

    #[tokio::test]
    async fn cancel_stops_disconnected_dispatcher() {
        let (_tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(
            config(4, OverflowPolicy::Oldest),
            MockConnector::default(),
            rx,
            cancel.clone(),
        );
        assert_eq!(dispatcher.state(), ConnectionState::Disconnected);
        let handle = tokio::spawn(dispatcher.run());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
