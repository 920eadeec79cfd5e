#![no_main]

use libfuzzer_sys::fuzz_target;
use syslog_forwarder::codec::{encode, parse, parse_legacy};

fuzz_target!(|data: &[u8]| {
    // 크래시나 패닉 없이 Ok 또는 Err을 반환해야 한다
    if let Ok(event) = parse(data) {
        // 인코딩 결과는 다시 파싱되고, 재인코딩해도 바뀌지 않아야 한다
        if let Ok(encoded) = encode(&event) {
            let reparsed = parse(&encoded).expect("encoded event must parse");
            assert_eq!(encode(&reparsed).expect("reparsed event must encode"), encoded);
        }
    }

    // 보조 파서 결과는 항상 인코딩 가능해야 한다
    if let Ok(event) = parse_legacy(data, "fuzz-host") {
        encode(&event).expect("legacy event must encode");
    }
});
