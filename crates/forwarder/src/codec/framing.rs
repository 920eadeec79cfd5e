//! RFC 6587 octet-counting 프레이밍
//!
//! ```text
//! SYSLOG-FRAME = MSG-LEN SP SYSLOG-MSG
//! MSG-LEN      = NONZERO-DIGIT *DIGIT
//! ```
//!
//! 종료 문자가 없으므로 메시지 안에 개행이 있어도 안전합니다.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ForwardError;

/// 기본 최대 프레임 크기 (1MB)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

/// MSG-LEN 최대 자릿수 (usize 십진 표현이 넘치지 않도록)
const MAX_LEN_DIGITS: usize = 10;

/// octet-counting 프레임 인코더/디코더
///
/// 디스패처는 [`Encoder`]로 와이어 프레임을 만들고,
/// 드레인 측 도구와 테스트는 [`Decoder`]로 프레임을 읽어 들입니다.
#[derive(Debug, Clone)]
pub struct OctetCountingCodec {
    /// 디코딩 시 허용하는 최대 메시지 길이
    max_frame_length: usize,
    /// 헤더를 읽고 본문을 기다리는 중인 프레임 길이
    pending_len: Option<usize>,
}

impl OctetCountingCodec {
    /// 기본 최대 프레임 크기로 코덱을 생성합니다.
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// 최대 프레임 크기를 지정하여 코덱을 생성합니다.
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            pending_len: None,
        }
    }

    /// 최대 프레임 크기를 반환합니다.
    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// 프레임 헤더 (`<len> `)를 읽습니다. 아직 공백이 도착하지 않았으면 `None`.
    fn decode_header(&self, src: &BytesMut) -> Result<Option<(usize, usize)>, ForwardError> {
        let Some(space) = src.iter().take(MAX_LEN_DIGITS + 1).position(|&b| b == b' ') else {
            if src.len() > MAX_LEN_DIGITS {
                return Err(ForwardError::malformed(0, "MSG-LEN too long"));
            }
            if let Some(pos) = src.iter().position(|b| !b.is_ascii_digit()) {
                return Err(ForwardError::malformed(pos, "MSG-LEN must be decimal digits"));
            }
            return Ok(None);
        };

        let digits = &src[..space];
        if digits.is_empty() || digits[0] == b'0' {
            return Err(ForwardError::malformed(0, "MSG-LEN must start with a nonzero digit"));
        }
        if let Some(pos) = digits.iter().position(|b| !b.is_ascii_digit()) {
            return Err(ForwardError::malformed(pos, "MSG-LEN must be decimal digits"));
        }

        let len = digits
            .iter()
            .try_fold(0usize, |acc, d| {
                acc.checked_mul(10)?.checked_add(usize::from(d - b'0'))
            })
            .ok_or_else(|| ForwardError::malformed(0, "MSG-LEN overflows"))?;

        if len > self.max_frame_length {
            return Err(ForwardError::malformed(
                0,
                format!(
                    "frame length {len} exceeds maximum {}",
                    self.max_frame_length
                ),
            ));
        }

        Ok(Some((len, space + 1)))
    }
}

impl Default for OctetCountingCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for OctetCountingCodec {
    type Item = Bytes;
    type Error = ForwardError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ForwardError> {
        let len = match self.pending_len {
            Some(len) => len,
            None => match self.decode_header(src)? {
                Some((len, header_len)) => {
                    src.advance(header_len);
                    self.pending_len = Some(len);
                    len
                }
                None => return Ok(None),
            },
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.pending_len = None;
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for OctetCountingCodec {
    type Error = ForwardError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), ForwardError> {
        let header = item.len().to_string();
        dst.reserve(header.len() + 1 + item.len());
        dst.put_slice(header.as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(&item);
        Ok(())
    }
}
