//! Tests for request and response streams

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use h2_mux::{
    Config, ErrorCode, ErrorScope, Frame, FrameKind, H2Error, H2Header, Handler, Priority,
    StreamHandle, StreamRequest,
};

use super::{request_headers, Echo, Peer, Record, Respond};

#[tokio::test]
async fn test_echo_request_body() {
    let mut peer = Peer::connect(Config::default(), Arc::new(Echo)).await;

    peer.request(1, &request_headers("POST", "/upload"), false)
        .await;
    peer.send(Frame::data(1, Bytes::from_static(b"hel"), false))
        .await;
    peer.send(Frame::data(1, Bytes::from_static(b"lo"), true))
        .await;

    let response = peer.response(1).await;
    assert_eq!(response.header(":status"), Some("200"));
    assert_eq!(response.header("x-path"), Some("/upload"));
    assert_eq!(&response.body[..], b"hello");
    assert_eq!(response.data_frames, vec![5]);

    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_empty_body_ends_on_headers() {
    let mut peer = Peer::connect(Config::default(), Arc::new(Echo)).await;

    peer.request(1, &request_headers("GET", "/"), true).await;

    let response = peer.response(1).await;
    assert_eq!(response.header(":status"), Some("200"));
    assert!(response.body.is_empty());
    assert!(response.data_frames.is_empty());

    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_sequential_streams_share_hpack_context() {
    let mut peer = Peer::connect(
        Config::default(),
        Arc::new(Respond(Bytes::from_static(b"ok"))),
    )
    .await;

    for id in [1, 3, 5] {
        peer.request(id, &request_headers("GET", "/same"), true)
            .await;
        let response = peer.response(id).await;
        assert_eq!(response.header(":status"), Some("200"));
        assert_eq!(&response.body[..], b"ok");
    }

    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_request_header_block_split_across_continuation() {
    let (handler, mut requests) = Record::new();
    let mut peer = Peer::connect(Config::default(), handler).await;

    let mut headers = request_headers("GET", "/split");
    headers.push(H2Header::new("x-long", "v".repeat(300)));
    let block = peer.encoder.encode(&headers);
    let (first, rest) = block.split_at(10);
    peer.send(Frame::headers(1, Bytes::copy_from_slice(first), true, false))
        .await;
    peer.send(Frame::continuation(1, Bytes::copy_from_slice(rest), true))
        .await;

    peer.ping(*b"assemble").await;
    let request = requests.recv().await.unwrap();
    assert_eq!(request.stream_id, 1);
    assert_eq!(request.path(), Some("/split"));
    assert_eq!(request.header("x-long").map(str::len), Some(300));
    assert!(request.body.is_empty());

    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_trailers_collected() {
    let (handler, mut requests) = Record::new();
    let mut peer = Peer::connect(Config::default(), handler).await;

    peer.request(1, &request_headers("POST", "/"), false).await;
    peer.send(Frame::data(1, Bytes::from_static(b"body"), false))
        .await;
    peer.request(1, &[H2Header::new("x-checksum", "abc")], true)
        .await;

    let request = requests.recv().await.unwrap();
    assert_eq!(request.method(), Some("POST"));
    assert_eq!(&request.body[..], b"body");
    assert_eq!(request.trailers, vec![H2Header::new("x-checksum", "abc")]);

    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_data_after_end_stream_escalates() {
    let (handler, _requests) = Record::new();
    let mut peer = Peer::connect(Config::default(), handler).await;

    peer.request(5, &request_headers("GET", "/"), true).await;
    peer.send(Frame::data(5, Bytes::from_static(b"late"), false))
        .await;

    let (last_stream_id, code, _) = peer.goaway().await;
    assert_eq!(last_stream_id, 5);
    assert_eq!(code, ErrorCode::StreamClosed);

    let err = peer.join().await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::StreamClosed));
    assert_eq!(err.scope(), Some(ErrorScope::Stream(5)));
}

#[tokio::test]
async fn test_data_after_end_stream_resets_without_escalation() {
    let (handler, _requests) = Record::new();
    let config = Config::default().with_escalate_stream_errors(false);
    let mut peer = Peer::connect(config, handler).await;

    peer.request(5, &request_headers("GET", "/"), true).await;
    peer.send(Frame::data(5, Bytes::from_static(b"late"), false))
        .await;

    let frame = peer.recv_frame().await;
    assert_eq!(frame.stream_id(), 5);
    assert_eq!(
        frame.kind(),
        &FrameKind::RstStream {
            error_code: ErrorCode::StreamClosed.as_u32()
        }
    );

    // The connection keeps serving.
    assert!(peer.ping(*b"continue").await.is_empty());
    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_headers_on_finished_stream_is_stream_closed() {
    let config = Config::default().with_closed_stream_grace(Duration::ZERO);
    let mut peer = Peer::connect(config, Arc::new(Respond(Bytes::from_static(b"done")))).await;

    peer.request(1, &request_headers("GET", "/"), true).await;
    peer.response(1).await;

    // Late WINDOW_UPDATE on a closed stream is tolerated.
    peer.send(Frame::window_update(1, 100)).await;
    assert!(peer.ping(*b"tolerate").await.is_empty());

    peer.request(1, &request_headers("GET", "/"), true).await;
    let (last_stream_id, code, _) = peer.goaway().await;
    assert_eq!(last_stream_id, 1);
    assert_eq!(code, ErrorCode::StreamClosed);
}

#[tokio::test]
async fn test_reset_by_peer_skips_handler() {
    let (handler, mut requests) = Record::new();
    let mut peer = Peer::connect(Config::default(), handler).await;

    peer.request(1, &request_headers("POST", "/"), false).await;
    peer.send(Frame::data(1, Bytes::from_static(b"partial"), false))
        .await;
    peer.send(Frame::rst_stream(1, ErrorCode::Cancel)).await;

    assert!(peer.ping(*b"after-rs").await.is_empty());
    assert!(requests.try_recv().is_err());

    // Further DATA on the reset stream is refused.
    peer.send(Frame::data(1, Bytes::from_static(b"more"), false))
        .await;
    let (_, code, _) = peer.goaway().await;
    assert_eq!(code, ErrorCode::StreamClosed);
}

#[tokio::test]
async fn test_body_survives_single_slot_stream_queue() {
    let config = Config::default().with_stream_queue_capacity(1);
    let mut peer = Peer::connect(config, Arc::new(Echo)).await;

    peer.request(1, &request_headers("POST", "/chunks"), false)
        .await;
    let mut expected = Vec::new();
    for i in 0..20u8 {
        let chunk = vec![b'a' + i; 100];
        expected.extend_from_slice(&chunk);
        peer.send(Frame::data(1, Bytes::from(chunk), i == 19)).await;
    }

    let response = peer.response(1).await;
    assert_eq!(response.header("x-path"), Some("/chunks"));
    assert_eq!(&response.body[..], &expected[..]);
    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_priority_before_headers() {
    let mut peer = Peer::connect(Config::default(), Arc::new(Echo)).await;

    let priority = Priority {
        exclusive: false,
        dependency: 0,
        weight: 15,
    };
    peer.send(Frame::priority(1, priority)).await;
    peer.request(1, &request_headers("GET", "/prioritized"), true)
        .await;

    let response = peer.response(1).await;
    assert_eq!(response.header("x-path"), Some("/prioritized"));
    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_even_stream_never_promised() {
    let mut peer = Peer::connect(Config::default(), Arc::new(Echo)).await;

    peer.request(2, &request_headers("GET", "/"), true).await;

    let (last_stream_id, code, _) = peer.goaway().await;
    assert_eq!(last_stream_id, 0);
    assert_eq!(code, ErrorCode::ProtocolError);
}

#[tokio::test]
async fn test_push_promise_from_client_rejected() {
    let mut peer = Peer::connect(Config::default(), Arc::new(Echo)).await;

    let block = peer.encoder.encode(&request_headers("GET", "/"));
    peer.send(Frame::push_promise(1, 2, block, true)).await;

    let (_, code, reason) = peer.goaway().await;
    assert_eq!(code, ErrorCode::ProtocolError);
    assert!(reason.contains("PUSH_PROMISE"), "{reason}");
}

#[tokio::test]
async fn test_undecodable_header_block_is_compression_error() {
    let mut peer = Peer::connect(Config::default(), Arc::new(Echo)).await;

    peer.send(Frame::headers(1, Bytes::from_static(&[0xbe]), true, true))
        .await;

    let (_, code, _) = peer.goaway().await;
    assert_eq!(code, ErrorCode::CompressionError);
}

struct Failing;

#[async_trait]
impl Handler for Failing {
    async fn handle(&self, _: StreamRequest, _: StreamHandle) -> Result<(), H2Error> {
        Err(H2Error::stream(1, ErrorCode::InternalError, "handler gave up"))
    }
}

#[tokio::test]
async fn test_handler_error_resets_stream() {
    let mut peer = Peer::connect(Config::default(), Arc::new(Failing)).await;

    peer.request(1, &request_headers("GET", "/"), true).await;

    let frame = peer.recv_frame().await;
    assert_eq!(frame.stream_id(), 1);
    assert_eq!(
        frame.kind(),
        &FrameKind::RstStream {
            error_code: ErrorCode::InternalError.as_u32()
        }
    );
    assert!(peer.close().await.is_ok());
}
