//! RFC 3164 (BSD syslog) 보조 파서
//!
//! 로컬 소켓으로 들어오는 메시지 중 RFC 5424가 아닌 것은 최선 노력으로
//! 헤더를 추출합니다. 추출할 수 없는 부분은 모두 MSG에 남깁니다.
//!
//! 형식: `<PRI>MMM DD HH:MM:SS [HOSTNAME ]TAG[PID]: MSG`

use bytes::Bytes;
use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDateTime, SubsecRound, TimeDelta, TimeZone, Utc,
};

use super::{
    MAX_APP_NAME_LEN, MAX_HOSTNAME_LEN, MAX_PRI, MAX_PROC_ID_LEN, decode_pri, is_print_ascii,
};
use crate::error::ForwardError;
use crate::event::{FACILITY_USER, LogEvent, Origin, SEVERITY_NOTICE};

/// BSD 타임스탬프 길이 (`Jan 15 12:00:00`)
const BSD_TIMESTAMP_LEN: usize = 15;

/// RFC 3164 메시지를 최선 노력으로 해석합니다.
///
/// - PRI가 없으면 user.notice (13)
/// - 타임스탬프가 없거나 해석할 수 없으면 현재 시각
/// - HOSTNAME이 없으면 `fallback_hostname`
///
/// 빈 입력만 에러로 처리합니다.
pub fn parse_legacy(raw: &[u8], fallback_hostname: &str) -> Result<LogEvent, ForwardError> {
    let now = Utc::now().trunc_subsecs(6).fixed_offset();
    parse_legacy_at(raw, fallback_hostname, now)
}

pub(crate) fn parse_legacy_at(
    raw: &[u8],
    fallback_hostname: &str,
    now: DateTime<FixedOffset>,
) -> Result<LogEvent, ForwardError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Err(ForwardError::malformed(0, "empty input"));
    }

    let (pri, mut rest) = split_pri(raw);
    let (facility, severity) = decode_pri(pri);

    let timestamp = match parse_bsd_timestamp(rest, now) {
        Some(ts) => {
            rest = &rest[BSD_TIMESTAMP_LEN..];
            rest = rest.strip_prefix(b" ").unwrap_or(rest);
            Some(ts)
        }
        None => None,
    };

    let mut event = LogEvent::new(Origin::LocalSyslog, Bytes::new());
    event.facility = facility;
    event.severity = severity;
    event.timestamp = Some(timestamp.unwrap_or(now));
    event.hostname = Some(fallback_hostname.to_owned()).filter(|h| valid_hostname(h));

    let (first, after_first) = split_token(rest);
    if let Some((app, pid)) = split_tag(first) {
        event.app_name = app;
        event.proc_id = pid;
        rest = after_first;
    } else if timestamp.is_some() && valid_hostname_bytes(first) {
        // 타임스탬프가 있을 때만 첫 토큰을 HOSTNAME으로 간주
        let (second, after_second) = split_token(after_first);
        if let Some((app, pid)) = split_tag(second) {
            event.hostname = std::str::from_utf8(first).ok().map(str::to_owned);
            event.app_name = app;
            event.proc_id = pid;
            rest = after_second;
        }
    }

    event.message = Bytes::copy_from_slice(rest);
    Ok(event)
}

/// `<NNN>` 접두사가 유효하면 분리하고, 아니면 기본 PRI(13)와 원본을 반환합니다.
fn split_pri(raw: &[u8]) -> (u16, &[u8]) {
    const DEFAULT_PRI: u16 = FACILITY_USER as u16 * 8 + SEVERITY_NOTICE as u16;

    if raw.first() != Some(&b'<') {
        return (DEFAULT_PRI, raw);
    }
    let Some(close) = raw.iter().take(5).position(|&b| b == b'>') else {
        return (DEFAULT_PRI, raw);
    };
    let digits = &raw[1..close];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return (DEFAULT_PRI, raw);
    }
    let pri = digits
        .iter()
        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
    if pri > MAX_PRI {
        return (DEFAULT_PRI, raw);
    }
    (pri, &raw[close + 1..])
}

/// BSD syslog 타임스탬프를 파싱합니다.
///
/// 형식: `MMM DD HH:MM:SS` (예: `Jan 15 12:00:00`, `Jan  5 08:00:00`)
/// 연도 정보가 없으므로 UTC와 현재 연도를 가정하되, 결과가 `now`보다
/// 하루 이상 미래이면 (연말에 쓰인 메시지를 연초에 받은 경우) 전년도로 봅니다.
fn parse_bsd_timestamp(input: &[u8], now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let head = input.get(..BSD_TIMESTAMP_LEN)?;
    if input.len() > BSD_TIMESTAMP_LEN && input[BSD_TIMESTAMP_LEN] != b' ' {
        return None;
    }
    let text = std::str::from_utf8(head).ok()?;
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let at_year = |year: i32| {
        NaiveDateTime::parse_from_str(&format!("{year} {normalized}"), "%Y %b %d %H:%M:%S")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive).fixed_offset())
    };

    // Feb 29는 윤년이 아닌 해에는 파싱되지 않으므로 전년도로 재시도
    match at_year(now.year()) {
        Some(ts) if ts - now <= TimeDelta::days(1) => Some(ts),
        _ => at_year(now.year() - 1),
    }
}

/// 첫 공백까지의 토큰과 그 뒤 (공백 하나 제외)
fn split_token(input: &[u8]) -> (&[u8], &[u8]) {
    match input.iter().position(|&b| b == b' ') {
        Some(pos) => (&input[..pos], &input[pos + 1..]),
        None => (input, &input[input.len()..]),
    }
}

/// `name:` 또는 `name[pid]:` 형식의 TAG를 (APP-NAME, PROCID)로 분리합니다.
fn split_tag(token: &[u8]) -> Option<(Option<String>, Option<String>)> {
    let token = std::str::from_utf8(token).ok()?.strip_suffix(':')?;

    let (name, pid) = match token.strip_suffix(']') {
        Some(inner) => {
            let (name, pid) = inner.split_once('[')?;
            (name, Some(pid))
        }
        None => (token, None),
    };

    if name.is_empty() || !is_print_ascii(name) || name.contains(['[', ']', ':']) {
        return None;
    }

    // APP-NAME 길이 제한을 넘으면 잘라냄 (ASCII이므로 바이트 경계 안전)
    let app = name[..name.len().min(MAX_APP_NAME_LEN)].to_owned();
    let pid = pid
        .filter(|p| !p.is_empty() && p.len() <= MAX_PROC_ID_LEN && is_print_ascii(p))
        .map(str::to_owned);

    Some((Some(app), pid))
}

fn valid_hostname(host: &str) -> bool {
    !host.is_empty() && host.len() <= MAX_HOSTNAME_LEN && is_print_ascii(host)
}

fn valid_hostname_bytes(token: &[u8]) -> bool {
    std::str::from_utf8(token).is_ok_and(valid_hostname)
}
