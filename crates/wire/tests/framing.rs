//! Framing behaviour over arbitrarily chunked byte streams

use bytes::BytesMut;
use futures::StreamExt;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder, FramedRead};

use drachtio_wire::{codec::frame, FrameCodec, FramingError, WireMessage};

fn encode_all(bodies: &[String]) -> Vec<u8> {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    for body in bodies {
        codec.encode(body.clone(), &mut buf).unwrap();
    }
    buf.to_vec()
}

proptest! {
    #[test]
    fn frames_survive_any_chunking(
        bodies in prop::collection::vec("[ -~é#|0-9]{0,40}", 1..8),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
    ) {
        let bytes = encode_all(&bodies);
        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(bytes.len() + 1)).collect();
        points.push(0);
        points.push(bytes.len());
        points.sort_unstable();
        points.dedup();

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for window in points.windows(2) {
            buf.extend_from_slice(&bytes[window[0]..window[1]]);
            while let Some(body) = codec.decode(&mut buf).unwrap() {
                decoded.push(body);
            }
        }

        prop_assert_eq!(decoded, bodies);
        prop_assert!(buf.is_empty());
        prop_assert!(!codec.is_mid_frame());
    }
}

#[tokio::test]
async fn test_framed_read_over_split_socket_reads() {
    let first = "a1|response|r1|OK|host:5060";
    let second = "a2|route|invite";
    let stream = format!("{}{}", frame(first), frame(second));
    let (left, right) = stream.as_bytes().split_at(5);
    let (middle, right) = right.split_at(30);

    let mock = tokio_test::io::Builder::new()
        .read(left)
        .read(middle)
        .read(right)
        .build();
    let mut reader = FramedRead::new(mock, FrameCodec::new());

    let body = reader.next().await.unwrap().unwrap();
    match WireMessage::decode(&body).unwrap() {
        WireMessage::Response(reply) => assert_eq!(reply.hostport(), Some("host:5060")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(reader.next().await.unwrap().unwrap(), second);
    assert!(reader.next().await.is_none());
}

#[tokio::test]
async fn test_framed_read_stops_on_bad_prefix() {
    let mock = tokio_test::io::Builder::new().read(b"nope#hello").build();
    let mut reader = FramedRead::new(mock, FrameCodec::new());

    match reader.next().await {
        Some(Err(FramingError::InvalidLengthPrefix { .. })) => {}
        other => panic!("unexpected {:?}", other),
    }
}
