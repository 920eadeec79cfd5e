//! 드레인 연결 생성

use std::future::Future;
use std::io::{self, ErrorKind};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// 드레인 연결을 만드는 트레이트
///
/// 디스패처는 이 트레이트로만 연결을 얻으므로 테스트에서는
/// `tokio::io::duplex` 기반 구현으로 대체할 수 있습니다.
pub trait DrainConnector: Send + Sync + 'static {
    /// 연결 타입. 드레인이 연결을 닫았는지 읽기 쪽으로 감지합니다.
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// 새 연결을 엽니다.
    fn connect(&self) -> impl Future<Output = io::Result<Self::Conn>> + Send;

    /// 로그에 표시할 연결 대상
    fn target(&self) -> &str;
}

/// TCP 드레인 커넥터
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// `host:port` 주소와 연결 타임아웃으로 커넥터를 생성합니다.
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }
}

impl DrainConnector for TcpConnector {
    type Conn = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&self.address)).await {
            Ok(result) => result?,
            Err(_) => return Err(io::Error::new(ErrorKind::TimedOut, "connection timed out")),
        };

        // 실패해도 전송에는 지장 없음
        if let Err(e) = stream.set_nodelay(true) {
            debug!(target = %self.address, error = %e, "failed to set TCP_NODELAY");
        }
        Ok(stream)
    }

    fn target(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let connector = TcpConnector::new(addr.clone(), Duration::from_secs(5));
        assert_eq!(connector.target(), addr);

        let stream = connector.connect().await.unwrap();
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn refused_connection_is_error() {
        // 바인드 후 바로 닫은 포트
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let connector = TcpConnector::new(addr, Duration::from_secs(5));
        assert!(connector.connect().await.is_err());
    }
}
