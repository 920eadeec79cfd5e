#![no_main]

use arbitrary::Arbitrary;
use bytes::{Bytes, BytesMut};
use libfuzzer_sys::fuzz_target;
use syslog_forwarder::codec::OctetCountingCodec;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 임의 바이트 스트림
    raw: Vec<u8>,
    /// 인코딩 후 다시 읽을 메시지들
    messages: Vec<Vec<u8>>,
    /// 스트림을 나눠 넣을 크기
    split: u8,
}

fuzz_target!(|input: FuzzInput| {
    // 임의 입력: 에러는 허용, 패닉은 불가
    let mut codec = OctetCountingCodec::with_max_frame_length(64 * 1024);
    let mut src = BytesMut::from(&input.raw[..]);
    while let Ok(Some(_)) = codec.decode(&mut src) {}

    // 인코딩한 프레임은 조각나 도착해도 원래 메시지로 복원되어야 한다
    let messages: Vec<Vec<u8>> = input
        .messages
        .into_iter()
        .filter(|m| !m.is_empty())
        .take(32)
        .collect();

    let mut wire = BytesMut::new();
    let mut encoder = OctetCountingCodec::new();
    for msg in &messages {
        encoder
            .encode(Bytes::copy_from_slice(msg), &mut wire)
            .expect("encode never fails");
    }

    let chunk = usize::from(input.split.max(1));
    let mut decoder = OctetCountingCodec::new();
    let mut buf = BytesMut::new();
    let mut decoded = Vec::new();
    for piece in wire.chunks(chunk) {
        buf.extend_from_slice(piece);
        while let Some(frame) = decoder.decode(&mut buf).expect("valid stream") {
            decoded.push(frame.to_vec());
        }
    }

    assert_eq!(decoded, messages);
    assert!(buf.is_empty());
});
