//! 메시지 코덱 -- RFC 5424 인코딩/파싱, RFC 3164 보조 파싱, RFC 6587 프레이밍
//!
//! # RFC 5424 메시지 형식
//! ```text
//! <PRI>VERSION TIMESTAMP HOSTNAME APP-NAME PROCID MSGID STRUCTURED-DATA [MSG]
//! ```
//!
//! # 전송 프레이밍 (octet counting)
//! ```text
//! <MSG-LEN> SP <SYSLOG-MSG>
//! ```
//!
//! # 사용 예시
//! ```
//! use bytes::Bytes;
//! use syslog_forwarder::codec;
//! use syslog_forwarder::event::{LogEvent, Origin};
//!
//! let event = LogEvent::new(Origin::LocalSyslog, Bytes::from_static(b"hello"));
//! let wire = codec::encode(&event).unwrap();
//! assert_eq!(&wire[..], b"<14>1 - - - - - - hello");
//!
//! let parsed = codec::parse(&wire).unwrap();
//! assert_eq!(parsed, event);
//! ```

pub mod encode;
pub mod framing;
pub mod legacy;
pub mod parse;

pub use encode::{encode, encode_into};
pub use framing::OctetCountingCodec;
pub use legacy::parse_legacy;
pub use parse::{parse, parse_with_origin};

/// RFC 5424 NILVALUE
pub const NILVALUE: &str = "-";

/// RFC 5424에서 유효한 최대 PRI 값
/// facility 최댓값 23 * 8 + severity 최댓값 7 = 191
pub const MAX_PRI: u16 = 191;

/// HOSTNAME 최대 길이
pub const MAX_HOSTNAME_LEN: usize = 255;

/// APP-NAME 최대 길이
pub const MAX_APP_NAME_LEN: usize = 48;

/// PROCID 최대 길이
pub const MAX_PROC_ID_LEN: usize = 128;

/// MSGID 최대 길이
pub const MAX_MSG_ID_LEN: usize = 32;

/// SD-ID / PARAM-NAME 최대 길이
pub const MAX_SD_NAME_LEN: usize = 32;

/// UTF-8 BOM
pub(crate) const BOM: &[u8] = b"\xEF\xBB\xBF";

/// PRI 값에서 facility와 severity를 분리합니다.
///
/// PRI = facility * 8 + severity
pub fn decode_pri(pri: u16) -> (u8, u8) {
    // MAX_PRI 이하만 들어오므로 잘림 없음
    let facility = (pri / 8) as u8;
    let severity = (pri % 8) as u8;
    (facility, severity)
}

/// RFC 5424 PRINTUSASCII (33-126) 문자만으로 이루어졌는지 확인합니다.
pub(crate) fn is_print_ascii(value: &str) -> bool {
    value.bytes().all(|b| (33..=126).contains(&b))
}

/// SD-NAME 규칙: PRINTUSASCII 중 `=`, `]`, `"` 제외
pub(crate) fn is_sd_name(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_SD_NAME_LEN
        && value
            .bytes()
            .all(|b| (33..=126).contains(&b) && !matches!(b, b'=' | b']' | b'"'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_pri_splits_components() {
        // facility=4 (auth), severity=2 (critical): 4*8+2 = 34
        assert_eq!(decode_pri(34), (4, 2));
        assert_eq!(decode_pri(0), (0, 0));
        assert_eq!(decode_pri(MAX_PRI), (23, 7));
    }

    #[test]
    fn sd_name_rules() {
        assert!(is_sd_name("instance@47450"));
        assert!(is_sd_name("a"));
        assert!(!is_sd_name(""));
        assert!(!is_sd_name("has space"));
        assert!(!is_sd_name("k=v"));
        assert!(!is_sd_name("quote\""));
        assert!(!is_sd_name(&"x".repeat(33)));
    }

    #[test]
    fn print_ascii() {
        assert!(is_print_ascii("web-01.example.com"));
        assert!(!is_print_ascii("two words"));
        assert!(!is_print_ascii("호스트"));
    }
}
