//! 로컬 syslog 수신기
//!
//! UDP 소켓 또는 Unix 데이터그램 소켓으로 들어오는 syslog 메시지를 수신합니다.
//! 데이터그램 하나가 메시지 하나이며, RFC 5424 헤더(`<PRI>1 `)로 시작하면
//! 엄격 파서를, 그 외에는 RFC 3164 보조 파서를 사용합니다.
//!
//! 해석할 수 없는 데이터그램은 카운트 후 버리고 수신 루프는 계속됩니다.

use std::io;
#[cfg(unix)]
use std::path::PathBuf;

use syslog_forwarder_core::metrics as m;
use tokio::net::UdpSocket;
#[cfg(unix)]
use tokio::net::UnixDatagram;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::CollectorStatus;
use crate::codec;
use crate::config::ListenAddr;
use crate::error::ForwardError;
use crate::event::{LogEvent, StructuredElement};

/// 수신기 설정
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// 수신기 활성화 여부
    pub enabled: bool,
    /// 수신 주소 (UDP 또는 Unix 소켓 경로)
    pub listen: ListenAddr,
    /// 최대 데이터그램 크기 (바이트)
    pub max_message_size: usize,
    /// RFC 3164 메시지에 HOSTNAME이 없을 때 사용할 호스트명
    pub fallback_hostname: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: ListenAddr::Udp(std::net::SocketAddr::from(([127, 0, 0, 1], 514))),
            max_message_size: 65535,
            fallback_hostname: "localhost".to_owned(),
        }
    }
}

/// 바인드된 수신 소켓
#[derive(Debug)]
pub enum ReceiverSocket {
    /// UDP 소켓
    Udp(UdpSocket),
    /// Unix 데이터그램 소켓과 그 경로 (drop 시 파일 제거)
    #[cfg(unix)]
    Unix(UnixDatagram, PathBuf),
}

impl ReceiverSocket {
    /// 주소에 소켓을 바인드합니다.
    ///
    /// Unix 소켓 경로에 이전 실행이 남긴 파일이 있으면 먼저 제거합니다.
    pub async fn bind(addr: &ListenAddr) -> Result<Self, ForwardError> {
        match addr {
            ListenAddr::Udp(socket_addr) => {
                let socket = UdpSocket::bind(socket_addr).await.map_err(|e| {
                    ForwardError::config("receiver.listen", format!("failed to bind {addr}: {e}"))
                })?;
                Ok(Self::Udp(socket))
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => {
                match std::fs::remove_file(path) {
                    Ok(()) => debug!(path = %path.display(), "removed stale receiver socket"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(ForwardError::config(
                            "receiver.listen",
                            format!("cannot replace {}: {e}", path.display()),
                        ));
                    }
                }
                let socket = UnixDatagram::bind(path).map_err(|e| {
                    ForwardError::config("receiver.listen", format!("failed to bind {addr}: {e}"))
                })?;
                Ok(Self::Unix(socket, path.clone()))
            }
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => Err(ForwardError::config(
                "receiver.listen",
                "unix datagram sockets are not supported on this platform",
            )),
        }
    }

    /// 데이터그램 하나를 수신합니다.
    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Udp(socket) => socket.recv_from(buf).await.map(|(n, _)| n),
            #[cfg(unix)]
            Self::Unix(socket, _) => socket.recv(buf).await,
        }
    }

    /// 실제 바인드된 주소 (포트 0으로 바인드한 경우 할당된 포트 포함)
    pub fn local_addr(&self) -> io::Result<ListenAddr> {
        match self {
            Self::Udp(socket) => socket.local_addr().map(ListenAddr::Udp),
            #[cfg(unix)]
            Self::Unix(_, path) => Ok(ListenAddr::Unix(path.clone())),
        }
    }
}

#[cfg(unix)]
impl Drop for ReceiverSocket {
    fn drop(&mut self) {
        if let Self::Unix(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// 로컬 syslog 수신기
///
/// 파싱한 이벤트는 정규화를 거치지 않고 디스패처 입력 채널로 바로 보냅니다.
pub struct LocalReceiver {
    /// 수신기 설정
    config: ReceiverConfig,
    /// 디스패처 입력 채널
    tx: mpsc::Sender<LogEvent>,
    /// 종료 신호
    cancel: CancellationToken,
    /// 설정된 경우 로컬 이벤트에 붙일 instance SD 요소
    annotation: Option<StructuredElement>,
    /// 현재 상태
    status: CollectorStatus,
    /// 버려진 데이터그램 수
    malformed_count: u64,
}

impl LocalReceiver {
    /// 새 수신기를 생성합니다.
    pub fn new(
        config: ReceiverConfig,
        tx: mpsc::Sender<LogEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            tx,
            cancel,
            annotation: None,
            status: CollectorStatus::Idle,
            malformed_count: 0,
        }
    }

    /// 같은 SD-ID가 없는 로컬 이벤트에 `element`를 덧붙이도록 설정합니다.
    pub fn with_annotation(mut self, element: StructuredElement) -> Self {
        self.annotation = Some(element);
        self
    }

    /// 설정된 주소에 바인드하고 수신 루프를 실행합니다.
    pub async fn run(&mut self) -> Result<(), ForwardError> {
        let socket = ReceiverSocket::bind(&self.config.listen).await?;
        self.run_on(socket).await
    }

    /// 이미 바인드된 소켓으로 수신 루프를 실행합니다.
    ///
    /// 취소되거나 디스패처 채널이 닫힐 때까지 실행됩니다.
    pub async fn run_on(&mut self, socket: ReceiverSocket) -> Result<(), ForwardError> {
        self.status = CollectorStatus::Running;
        let listen = socket
            .local_addr()
            .map_or_else(|_| self.config.listen.to_string(), |a| a.to_string());
        info!(listen = %listen, "local receiver started");

        // 한 바이트 여유로 max_message_size를 넘는 데이터그램을 구분
        let max_size = self.config.max_message_size.max(1);
        let mut buf = vec![0u8; max_size + 1];

        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = socket.recv(&mut buf) => result,
            };

            let len = match received {
                Ok(len) => len,
                Err(e) => {
                    // 데이터그램 소켓의 recv 에러는 해당 데이터그램에만 영향
                    warn!(listen = %listen, error = %e, "receive failed");
                    continue;
                }
            };

            let parsed = if len > max_size {
                Err(ForwardError::malformed(
                    max_size,
                    format!("datagram exceeds max_message_size ({max_size} bytes)"),
                ))
            } else {
                self.handle_datagram(&buf[..len])
            };
            let event = match parsed {
                Ok(event) => event,
                Err(e) => {
                    self.malformed_count += 1;
                    metrics::counter!(m::MALFORMED_MESSAGES_TOTAL).increment(1);
                    warn!(
                        listen = %listen,
                        bytes = len,
                        error = %e,
                        "dropping malformed datagram"
                    );
                    continue;
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.tx.send(event) => {
                    if result.is_err() {
                        debug!("dispatcher intake closed, stopping local receiver");
                        break;
                    }
                }
            }
        }

        self.status = CollectorStatus::Stopped;
        info!(
            listen = %listen,
            malformed = self.malformed_count,
            "local receiver stopped"
        );
        Ok(())
    }

    /// 데이터그램 하나를 이벤트로 변환합니다.
    pub fn handle_datagram(&self, datagram: &[u8]) -> Result<LogEvent, ForwardError> {
        let payload = trim_trailer(datagram);
        if payload.is_empty() {
            return Err(ForwardError::malformed(0, "empty datagram"));
        }

        let mut event = if has_rfc5424_header(payload) {
            codec::parse(payload)?
        } else {
            codec::parse_legacy(payload, &self.config.fallback_hostname)?
        };

        if let Some(element) = &self.annotation {
            if !event.has_element(&element.id) {
                event.structured_data.push(element.clone());
            }
        }

        Ok(event)
    }

    /// 버려진 데이터그램 수를 반환합니다.
    pub fn malformed_count(&self) -> u64 {
        self.malformed_count
    }

    /// 현재 상태를 반환합니다.
    pub fn status(&self) -> &CollectorStatus {
        &self.status
    }
}

/// 끝의 `\n`, `\r`, `\0`을 제거합니다.
fn trim_trailer(datagram: &[u8]) -> &[u8] {
    let end = datagram
        .iter()
        .rposition(|&b| !matches!(b, b'\n' | b'\r' | b'\0'))
        .map_or(0, |pos| pos + 1);
    &datagram[..end]
}

/// `<1~3자리 숫자>1 ` 접두사 확인
fn has_rfc5424_header(payload: &[u8]) -> bool {
    let Some(rest) = payload.strip_prefix(b"<") else {
        return false;
    };
    let Some(close) = rest.iter().take(4).position(|&b| b == b'>') else {
        return false;
    };
    (1..=3).contains(&close)
        && rest[..close].iter().all(u8::is_ascii_digit)
        && rest[close + 1..].starts_with(b"1 ")
}
