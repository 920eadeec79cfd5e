//! RFC 5424 인코더
//!
//! [`LogEvent`]를 RFC 5424 와이어 형식으로 직렬화합니다.
//! 모든 필드를 먼저 검증한 뒤에 쓰기 때문에, 실패하면 출력 버퍼는 변경되지 않습니다.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, FixedOffset, SecondsFormat, Timelike};

use super::{
    MAX_APP_NAME_LEN, MAX_HOSTNAME_LEN, MAX_MSG_ID_LEN, MAX_PROC_ID_LEN, NILVALUE, is_print_ascii,
    is_sd_name,
};
use crate::error::ForwardError;
use crate::event::LogEvent;

/// 이벤트를 RFC 5424 메시지 바이트로 인코딩합니다.
pub fn encode(event: &LogEvent) -> Result<Bytes, ForwardError> {
    let mut dst = BytesMut::with_capacity(64 + event.message.len());
    encode_into(event, &mut dst)?;
    Ok(dst.freeze())
}

/// 이벤트를 RFC 5424 형식으로 `dst` 끝에 덧붙입니다.
pub fn encode_into(event: &LogEvent, dst: &mut BytesMut) -> Result<(), ForwardError> {
    validate(event)?;

    dst.put_u8(b'<');
    dst.put_slice(event.pri().to_string().as_bytes());
    dst.put_slice(b">1 ");

    match &event.timestamp {
        Some(ts) => dst.put_slice(format_timestamp(ts).as_bytes()),
        None => dst.put_slice(NILVALUE.as_bytes()),
    }

    for field in [
        &event.hostname,
        &event.app_name,
        &event.proc_id,
        &event.msg_id,
    ] {
        dst.put_u8(b' ');
        dst.put_slice(header_value(field).as_bytes());
    }

    dst.put_u8(b' ');
    if event.structured_data.is_empty() {
        dst.put_slice(NILVALUE.as_bytes());
    } else {
        for element in &event.structured_data {
            dst.put_u8(b'[');
            dst.put_slice(element.id.as_bytes());
            for (name, value) in &element.params {
                dst.put_u8(b' ');
                dst.put_slice(name.as_bytes());
                dst.put_slice(b"=\"");
                put_escaped(dst, value);
                dst.put_u8(b'"');
            }
            dst.put_u8(b']');
        }
    }

    if !event.message.is_empty() {
        dst.put_u8(b' ');
        dst.put_slice(&event.message);
    }

    Ok(())
}

/// RFC 3339 타임스탬프 (최대 마이크로초 정밀도, UTC는 `Z`)
pub(crate) fn format_timestamp(ts: &DateTime<FixedOffset>) -> String {
    let format = if ts.nanosecond() == 0 {
        SecondsFormat::Secs
    } else {
        SecondsFormat::Micros
    };
    ts.to_rfc3339_opts(format, true)
}

fn header_value(field: &Option<String>) -> &str {
    match field.as_deref() {
        Some("") | None => NILVALUE,
        Some(value) => value,
    }
}

/// PARAM-VALUE 이스케이프: `"`, `\`, `]`
fn put_escaped(dst: &mut BytesMut, value: &str) {
    for b in value.bytes() {
        if matches!(b, b'"' | b'\\' | b']') {
            dst.put_u8(b'\\');
        }
        dst.put_u8(b);
    }
}

fn validate(event: &LogEvent) -> Result<(), ForwardError> {
    if event.facility > 23 {
        return Err(ForwardError::encode(
            "facility",
            format!("{} out of range (0-23)", event.facility),
        ));
    }
    if event.severity > 7 {
        return Err(ForwardError::encode(
            "severity",
            format!("{} out of range (0-7)", event.severity),
        ));
    }

    validate_header("hostname", &event.hostname, MAX_HOSTNAME_LEN)?;
    validate_header("app_name", &event.app_name, MAX_APP_NAME_LEN)?;
    validate_header("proc_id", &event.proc_id, MAX_PROC_ID_LEN)?;
    validate_header("msg_id", &event.msg_id, MAX_MSG_ID_LEN)?;

    let mut seen: Vec<&str> = Vec::with_capacity(event.structured_data.len());
    for element in &event.structured_data {
        if !is_sd_name(&element.id) {
            return Err(ForwardError::encode(
                "structured_data",
                format!("invalid SD-ID '{}'", element.id),
            ));
        }
        if seen.contains(&element.id.as_str()) {
            return Err(ForwardError::encode(
                "structured_data",
                format!("duplicate SD-ID '{}'", element.id),
            ));
        }
        seen.push(&element.id);

        if let Some((name, _)) = element.params.iter().find(|(name, _)| !is_sd_name(name)) {
            return Err(ForwardError::encode(
                "structured_data",
                format!("invalid PARAM-NAME '{name}' in '{}'", element.id),
            ));
        }
    }

    Ok(())
}

fn validate_header(name: &str, field: &Option<String>, max_len: usize) -> Result<(), ForwardError> {
    let Some(value) = field.as_deref() else {
        return Ok(());
    };

    if value.len() > max_len {
        return Err(ForwardError::encode(
            name,
            format!("{} bytes exceeds limit of {max_len}", value.len()),
        ));
    }
    if !is_print_ascii(value) {
        return Err(ForwardError::encode(
            name,
            format!("'{value}' contains spaces or non-printable characters"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Origin, StructuredElement};
    use chrono::TimeZone;

    fn event(message: &'static [u8]) -> LogEvent {
        LogEvent::new(Origin::LocalSyslog, Bytes::from_static(message))
    }

    fn encoded(event: &LogEvent) -> String {
        String::from_utf8(encode(event).unwrap().to_vec()).unwrap()
    }

    #[test]
    fn all_nil_fields() {
        assert_eq!(encoded(&event(b"hello")), "<14>1 - - - - - - hello");
    }

    #[test]
    fn empty_message_omits_trailing_space() {
        assert_eq!(encoded(&event(b"")), "<14>1 - - - - - -");
    }

    #[test]
    fn full_header() {
        let mut e = event(b"Failed password for root");
        e.facility = 4;
        e.severity = 2;
        e.timestamp = Some(
            FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
                .unwrap(),
        );
        e.hostname = Some("myhost".to_owned());
        e.app_name = Some("sshd".to_owned());
        e.proc_id = Some("1234".to_owned());
        e.msg_id = Some("ID47".to_owned());

        assert_eq!(
            encoded(&e),
            "<34>1 2024-01-15T12:00:00Z myhost sshd 1234 ID47 - Failed password for root"
        );
    }

    #[test]
    fn empty_header_string_renders_nil() {
        let mut e = event(b"x");
        e.hostname = Some(String::new());
        assert_eq!(encoded(&e), "<14>1 - - - - - - x");
    }

    #[test]
    fn timestamp_with_offset_and_micros() {
        let ts = FixedOffset::east_opt(9 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
            .unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        assert_eq!(format_timestamp(&ts), "2024-01-15T12:00:00.123456+09:00");
    }

    #[test]
    fn structured_data_rendering_and_escaping() {
        let mut e = event(b"msg");
        e.structured_data.push(
            StructuredElement::new("instance@47450")
                .with_param("deployment", "cf")
                .with_param("note", r#"a "q" \ b]"#),
        );
        e.structured_data
            .push(StructuredElement::new("origin").with_param("ip", "10.0.0.1"));

        assert_eq!(
            encoded(&e),
            r#"<14>1 - - - - - [instance@47450 deployment="cf" note="a \"q\" \\ b\]"][origin ip="10.0.0.1"] msg"#
        );
    }

    #[test]
    fn element_without_params() {
        let mut e = event(b"");
        e.structured_data.push(StructuredElement::new("meta"));
        assert_eq!(encoded(&e), "<14>1 - - - - - [meta]");
    }

    #[test]
    fn message_bytes_are_copied_verbatim() {
        let e = LogEvent::new(
            Origin::TailedFile,
            Bytes::from_static(b"\xFF\xFE raw \x00 bytes"),
        );
        let wire = encode(&e).unwrap();
        assert!(wire.ends_with(b"\xFF\xFE raw \x00 bytes"));
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let mut e = event(b"x");
        e.facility = 24;
        assert!(matches!(
            encode(&e),
            Err(ForwardError::Encode { ref field, .. }) if field == "facility"
        ));

        let mut e = event(b"x");
        e.severity = 8;
        assert!(encode(&e).is_err());
    }

    #[test]
    fn rejects_invalid_sd_id() {
        let mut e = event(b"x");
        e.structured_data.push(StructuredElement::new("bad id"));
        assert!(encode(&e).is_err());

        let mut e = event(b"x");
        e.structured_data.push(StructuredElement::new(""));
        assert!(encode(&e).is_err());
    }

    #[test]
    fn rejects_duplicate_sd_id() {
        let mut e = event(b"x");
        e.structured_data.push(StructuredElement::new("dup"));
        e.structured_data.push(StructuredElement::new("dup"));
        let err = encode(&e).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_invalid_param_name() {
        let mut e = event(b"x");
        e.structured_data
            .push(StructuredElement::new("meta").with_param("a=b", "v"));
        assert!(encode(&e).is_err());
    }

    #[test]
    fn rejects_header_with_space_or_too_long() {
        let mut e = event(b"x");
        e.hostname = Some("two words".to_owned());
        assert!(encode(&e).is_err());

        let mut e = event(b"x");
        e.app_name = Some("a".repeat(49));
        assert!(encode(&e).is_err());

        let mut e = event(b"x");
        e.msg_id = Some("m".repeat(33));
        assert!(encode(&e).is_err());
    }

    #[test]
    fn failed_encode_leaves_buffer_untouched() {
        let mut dst = BytesMut::from(&b"prefix"[..]);
        let mut e = event(b"x");
        e.severity = 9;
        assert!(encode_into(&e, &mut dst).is_err());
        assert_eq!(&dst[..], b"prefix");
    }

    #[test]
    fn large_message_is_not_truncated() {
        let body = vec![b'a'; 1025];
        let e = LogEvent::new(Origin::TailedFile, Bytes::from(body));
        let wire = encode(&e).unwrap();
        assert_eq!(wire.len(), "<14>1 - - - - - - ".len() + 1025);
    }
}
