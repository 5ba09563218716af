//! Tests for frame ordering on the shared connection

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use h2_mux::{
    Config, Frame, FrameKind, H2Error, H2Header, Handler, StreamHandle, StreamRequest,
};

use super::{request_headers, status, Peer};

const BODY_LEN: usize = 50_000;
const STREAMS: [u32; 3] = [1, 3, 5];

/// Answers with a body filled with the stream id.
struct Fill;

#[async_trait]
impl Handler for Fill {
    async fn handle(&self, request: StreamRequest, stream: StreamHandle) -> Result<(), H2Error> {
        let body = Bytes::from(vec![request.stream_id as u8; BODY_LEN]);
        stream.send_response(&status("200"), body).await
    }
}

/// Answers with a header too large for one frame and no body.
struct BigHeader;

#[async_trait]
impl Handler for BigHeader {
    async fn handle(&self, request: StreamRequest, stream: StreamHandle) -> Result<(), H2Error> {
        let mut headers = status("200");
        let fill = char::from(b'a' + request.stream_id as u8);
        headers.push(H2Header::new("x-big", fill.to_string().repeat(40_000)));
        stream.send_headers(&headers, true).await
    }
}

#[tokio::test]
async fn test_concurrent_bodies_do_not_interleave() {
    let mut peer = Peer::connect(Config::default(), Arc::new(Fill)).await;
    peer.send(Frame::window_update(0, 1_000_000)).await;

    for id in STREAMS {
        peer.request(id, &request_headers("GET", "/"), true).await;
    }

    let mut received: HashMap<u32, usize> = HashMap::new();
    let mut finished = Vec::new();
    while finished.len() < STREAMS.len() {
        let frame = peer.recv_frame().await;
        let id = frame.stream_id();
        let end_stream = frame.header().is_end_stream();
        match frame.into_kind() {
            FrameKind::Headers { block, .. } => {
                assert!(!received.contains_key(&id), "HEADERS after DATA on {id}");
                let headers = peer.decoder.decode(&block).unwrap();
                assert_eq!(headers, status("200"));
                received.insert(id, 0);
            }
            FrameKind::Data { data } => {
                let seen = received.get_mut(&id).expect("DATA before HEADERS");
                assert!(data.iter().all(|b| u32::from(*b) == id), "foreign bytes on {id}");
                *seen += data.len();
            }
            other => panic!("unexpected {other:?}"),
        }
        if end_stream {
            assert!(!finished.contains(&id));
            finished.push(id);
        }
    }

    for id in STREAMS {
        assert_eq!(received[&id], BODY_LEN);
    }
    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_header_block_continuations_stay_contiguous() {
    let mut peer = Peer::connect(Config::default(), Arc::new(BigHeader)).await;

    for id in STREAMS {
        peer.request(id, &request_headers("GET", "/"), true).await;
    }

    let mut finished = Vec::new();
    let mut open: Option<(u32, BytesMut)> = None;
    while finished.len() < STREAMS.len() {
        let frame = peer.recv_frame().await;
        let id = frame.stream_id();
        let end_headers = frame.header().is_end_headers();
        let part = match frame.into_kind() {
            FrameKind::Headers { block, .. } => {
                assert!(open.is_none(), "HEADERS on {id} inside another header block");
                open = Some((id, BytesMut::new()));
                block
            }
            FrameKind::Continuation { block } => {
                let (owner, _) = open.as_ref().expect("CONTINUATION outside a header block");
                assert_eq!(*owner, id, "CONTINUATION for the wrong stream");
                block
            }
            other => panic!("unexpected {other:?}"),
        };
        let Some((_, block)) = open.as_mut() else {
            unreachable!()
        };
        assert!(part.len() <= 16384);
        block.extend_from_slice(&part);

        if end_headers {
            let (owner, block) = open.take().unwrap();
            let headers = peer.decoder.decode(&block).unwrap();
            let big = headers.iter().find(|h| h.name == "x-big").unwrap();
            let fill = char::from(b'a' + owner as u8);
            assert_eq!(big.value.len(), 40_000);
            assert!(big.value.chars().all(|c| c == fill));
            finished.push(owner);
        }
    }

    finished.sort_unstable();
    assert_eq!(finished, STREAMS.to_vec());
    assert!(peer.close().await.is_ok());
}
