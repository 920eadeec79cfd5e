//! RFC 5424 파서
//!
//! [RFC 5424](https://tools.ietf.org/html/rfc5424) 형식의 syslog 메시지를 엄격하게 파싱합니다.
//! 바이트 단위로 동작하므로 MSG 부분은 UTF-8이 아니어도 그대로 보존됩니다.
//!
//! ## 지원 기능
//! - PRI 필드에서 facility/severity 디코딩 (0-191)
//! - RFC 3339 타임스탬프 파싱 (타임존 필수)
//! - Structured Data 파싱 (이스케이프, 중복 SD-ID 검출)
//! - NILVALUE (`-`) 처리
//! - MSG 앞의 UTF-8 BOM 제거

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};

use super::{
    BOM, MAX_APP_NAME_LEN, MAX_HOSTNAME_LEN, MAX_MSG_ID_LEN, MAX_PRI, MAX_PROC_ID_LEN, NILVALUE,
    decode_pri, is_print_ascii, is_sd_name,
};
use crate::error::ForwardError;
use crate::event::{LogEvent, Origin, StructuredElement};

/// RFC 5424 메시지를 파싱합니다. 결과 이벤트의 출처는 [`Origin::LocalSyslog`]입니다.
pub fn parse(raw: &[u8]) -> Result<LogEvent, ForwardError> {
    parse_with_origin(raw, Origin::LocalSyslog)
}

/// 출처를 지정하여 RFC 5424 메시지를 파싱합니다.
pub fn parse_with_origin(raw: &[u8], origin: Origin) -> Result<LogEvent, ForwardError> {
    let mut cursor = Cursor::new(raw);

    let pri = cursor.pri()?;
    let (facility, severity) = decode_pri(pri);

    let version = cursor.token("VERSION")?;
    if version != b"1" {
        return Err(cursor.error_at(
            cursor.pos - version.len(),
            format!("unsupported version '{}'", String::from_utf8_lossy(version)),
        ));
    }
    cursor.space()?;

    let timestamp = cursor.timestamp()?;
    cursor.space()?;
    let hostname = cursor.header("HOSTNAME", MAX_HOSTNAME_LEN)?;
    cursor.space()?;
    let app_name = cursor.header("APP-NAME", MAX_APP_NAME_LEN)?;
    cursor.space()?;
    let proc_id = cursor.header("PROCID", MAX_PROC_ID_LEN)?;
    cursor.space()?;
    let msg_id = cursor.header("MSGID", MAX_MSG_ID_LEN)?;
    cursor.space()?;

    let structured_data = cursor.structured_data()?;

    let message = if cursor.is_at_end() {
        Bytes::new()
    } else {
        cursor.space()?;
        let rest = cursor.rest();
        Bytes::copy_from_slice(rest.strip_prefix(BOM).unwrap_or(rest))
    };

    Ok(LogEvent {
        facility,
        severity,
        timestamp,
        hostname,
        app_name,
        proc_id,
        msg_id,
        structured_data,
        message,
        origin,
    })
}

/// RFC 3339 타임스탬프를 파싱합니다.
///
/// 예: `2024-01-15T12:00:00Z` 또는 `2024-01-15T12:00:00.123+09:00`
pub(crate) fn parse_rfc3339(timestamp: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| format!("invalid RFC 3339 timestamp '{timestamp}': {e}"))
}

/// 입력 바이트 위의 읽기 위치
struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, reason: impl Into<String>) -> ForwardError {
        ForwardError::malformed(self.pos, reason)
    }

    fn error_at(&self, offset: usize, reason: impl Into<String>) -> ForwardError {
        ForwardError::malformed(offset, reason)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn rest(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    fn expect(&mut self, expected: u8, what: &str) -> Result<(), ForwardError> {
        match self.peek() {
            Some(b) if b == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.error(format!("expected {what}"))),
            None => Err(self.error(format!("unexpected end of input, expected {what}"))),
        }
    }

    fn space(&mut self) -> Result<(), ForwardError> {
        self.expect(b' ', "space")
    }

    /// 다음 공백 직전까지의 비어 있지 않은 토큰
    fn token(&mut self, what: &str) -> Result<&'a [u8], ForwardError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b' ' {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error(format!("empty {what} field")));
        }
        Ok(&self.input[start..self.pos])
    }

    /// `<NNN>` 형식의 PRI
    fn pri(&mut self) -> Result<u16, ForwardError> {
        if self.is_at_end() {
            return Err(self.error("empty input"));
        }
        self.expect(b'<', "'<' at start of PRI")?;

        let start = self.pos;
        while let Some(b) = self.peek() {
            if !b.is_ascii_digit() {
                break;
            }
            self.pos += 1;
        }
        let digits = &self.input[start..self.pos];
        if digits.is_empty() || digits.len() > 3 {
            return Err(self.error_at(start, "PRI must be 1-3 digits"));
        }
        self.expect(b'>', "'>' closing PRI")?;

        let pri = digits
            .iter()
            .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
        if pri > MAX_PRI {
            return Err(self.error_at(
                start,
                format!("PRI value {pri} out of valid range (0-{MAX_PRI})"),
            ));
        }
        Ok(pri)
    }

    fn timestamp(&mut self) -> Result<Option<DateTime<FixedOffset>>, ForwardError> {
        let start = self.pos;
        let token = self.token("TIMESTAMP")?;
        if token == NILVALUE.as_bytes() {
            return Ok(None);
        }
        let text = std::str::from_utf8(token)
            .map_err(|_| self.error_at(start, "TIMESTAMP is not valid UTF-8"))?;
        parse_rfc3339(text)
            .map(Some)
            .map_err(|reason| self.error_at(start, reason))
    }

    /// NILVALUE를 `None`으로 바꾸는 헤더 필드 (PRINTUSASCII, 최대 `max_len` 바이트)
    fn header(&mut self, what: &str, max_len: usize) -> Result<Option<String>, ForwardError> {
        let start = self.pos;
        let token = self.token(what)?;
        if token == NILVALUE.as_bytes() {
            return Ok(None);
        }
        if token.len() > max_len {
            return Err(self.error_at(
                start,
                format!("{what} exceeds {max_len} bytes ({})", token.len()),
            ));
        }
        match std::str::from_utf8(token) {
            Ok(text) if is_print_ascii(text) => Ok(Some(text.to_owned())),
            _ => Err(self.error_at(start, format!("{what} must be printable US-ASCII"))),
        }
    }

    /// `-` 또는 하나 이상의 `[SD-ID PARAM="VALUE" ...]`
    fn structured_data(&mut self) -> Result<Vec<StructuredElement>, ForwardError> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(Vec::new())
            }
            Some(b'[') => {
                let mut elements: Vec<StructuredElement> = Vec::new();
                while self.peek() == Some(b'[') {
                    let start = self.pos;
                    let element = self.sd_element()?;
                    if elements.iter().any(|e| e.id == element.id) {
                        return Err(
                            self.error_at(start, format!("duplicate SD-ID '{}'", element.id))
                        );
                    }
                    elements.push(element);
                }
                Ok(elements)
            }
            Some(_) => Err(self.error("expected '-' or '[' for STRUCTURED-DATA")),
            None => Err(self.error("missing STRUCTURED-DATA")),
        }
    }

    fn sd_element(&mut self) -> Result<StructuredElement, ForwardError> {
        self.expect(b'[', "'['")?;
        let id = self.sd_name("SD-ID")?;
        let mut element = StructuredElement::new(id);

        loop {
            match self.next() {
                Some(b']') => return Ok(element),
                Some(b' ') => {
                    let name = self.sd_name("PARAM-NAME")?;
                    self.expect(b'=', "'=' after PARAM-NAME")?;
                    self.expect(b'"', "'\"' opening PARAM-VALUE")?;
                    let value = self.param_value()?;
                    element.params.push((name, value));
                }
                Some(_) => {
                    return Err(self.error_at(self.pos - 1, "unexpected character in SD-ELEMENT"));
                }
                None => return Err(self.error("unterminated SD-ELEMENT")),
            }
        }
    }

    fn sd_name(&mut self, what: &str) -> Result<String, ForwardError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b' ' | b'=' | b']' | b'"') {
                break;
            }
            self.pos += 1;
        }
        let name = std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .filter(|name| is_sd_name(name))
            .ok_or_else(|| self.error_at(start, format!("invalid {what}")))?;
        Ok(name.to_owned())
    }

    /// 닫는 `"`까지의 값. `\"`, `\\`, `\]`만 이스케이프로 해석하고
    /// 그 외의 역슬래시는 그대로 둡니다.
    fn param_value(&mut self) -> Result<String, ForwardError> {
        let start = self.pos;
        let mut value = Vec::new();
        loop {
            match self.next() {
                Some(b'"') => break,
                Some(b'\\') => match self.peek() {
                    Some(b @ (b'"' | b'\\' | b']')) => {
                        self.pos += 1;
                        value.push(b);
                    }
                    _ => value.push(b'\\'),
                },
                Some(b) => value.push(b),
                None => return Err(self.error("unterminated PARAM-VALUE")),
            }
        }
        String::from_utf8(value).map_err(|_| self.error_at(start, "PARAM-VALUE is not valid UTF-8"))
    }
}
