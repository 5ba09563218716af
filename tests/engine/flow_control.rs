//! Tests for connection and stream flow-control windows

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use h2_mux::{Config, ErrorCode, Frame, FrameKind, SettingId};

use super::{request_headers, Peer, Record, Respond};

fn is_settings_ack(frame: &Frame) -> bool {
    matches!(frame.kind(), FrameKind::Settings { .. }) && frame.header().is_ack()
}

#[tokio::test]
async fn test_window_update_after_half_consumed() {
    let (handler, _requests) = Record::new();
    let mut peer = Peer::connect(Config::default(), handler).await;

    peer.request(1, &request_headers("POST", "/"), false).await;
    for _ in 0..2 {
        peer.send(Frame::data(1, Bytes::from(vec![0u8; 16384]), false))
            .await;
    }

    let first = peer.recv_frame().await;
    let second = peer.recv_frame().await;
    assert_eq!(first.stream_id(), 0);
    assert_eq!(first.kind(), &FrameKind::WindowUpdate { increment: 32768 });
    assert_eq!(second.stream_id(), 1);
    assert_eq!(second.kind(), &FrameKind::WindowUpdate { increment: 32768 });

    assert!(peer.ping(*b"no-extra").await.is_empty());
    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_custom_divisor_replenishes_later() {
    let (handler, _requests) = Record::new();
    let config = Config::default().with_window_threshold_divisor(4);
    let mut peer = Peer::connect(config, handler).await;

    peer.request(1, &request_headers("POST", "/"), false).await;
    peer.send(Frame::data(1, Bytes::from(vec![0u8; 16384]), false))
        .await;
    peer.send(Frame::data(1, Bytes::from(vec![0u8; 16384]), false))
        .await;

    // 32767 left is still above 65535 / 4, so nothing is sent yet.
    assert!(peer.ping(*b"too-soon").await.is_empty());

    peer.send(Frame::data(1, Bytes::from(vec![0u8; 16384]), false))
        .await;
    let frames = peer.ping(*b"now-then").await;
    let increments: Vec<_> = frames
        .iter()
        .map(|f| (f.stream_id(), f.kind().clone()))
        .collect();
    assert_eq!(
        increments,
        vec![
            (0, FrameKind::WindowUpdate { increment: 49152 }),
            (1, FrameKind::WindowUpdate { increment: 49152 }),
        ]
    );
}

#[tokio::test]
async fn test_data_beyond_stream_window_is_flow_control_error() {
    let (handler, _requests) = Record::new();
    let config = Config::default().with_setting(SettingId::InitialWindowSize, 1000);
    let mut peer = Peer::connect(config, handler).await;
    assert_eq!(peer.server_settings, vec![(0x4, 1000)]);
    peer.send(Frame::settings_ack()).await;

    peer.request(1, &request_headers("POST", "/"), false).await;
    peer.send(Frame::data(1, Bytes::from(vec![0u8; 1500]), false))
        .await;

    let (last_stream_id, code, _) = peer.goaway().await;
    assert_eq!(last_stream_id, 1);
    assert_eq!(code, ErrorCode::FlowControlError);
}

#[tokio::test]
async fn test_default_window_holds_until_settings_acked() {
    let (handler, mut requests) = Record::new();
    let config = Config::default().with_setting(SettingId::InitialWindowSize, 1000);
    let mut peer = Peer::connect(config, handler).await;

    // Still allowed 65535 until our SETTINGS are acknowledged.
    peer.request(1, &request_headers("POST", "/"), false).await;
    peer.send(Frame::data(1, Bytes::from(vec![7u8; 1500]), true))
        .await;

    let request = requests.recv().await.unwrap();
    assert_eq!(request.body.len(), 1500);
    assert!(peer.ping(*b"pre-ack!").await.is_empty());

    peer.send(Frame::settings_ack()).await;
    peer.request(3, &request_headers("POST", "/"), false).await;
    peer.send(Frame::data(3, Bytes::from(vec![7u8; 1500]), false))
        .await;
    let (last_stream_id, code, _) = peer.goaway().await;
    assert_eq!(last_stream_id, 3);
    assert_eq!(code, ErrorCode::FlowControlError);
}

#[tokio::test]
async fn test_response_waits_for_stream_window() {
    let body = Bytes::from(vec![b'x'; 25]);
    let mut peer = Peer::connect_with(
        Config::default(),
        Arc::new(Respond(body)),
        vec![(0x4, 10)],
    )
    .await;

    peer.request(1, &request_headers("GET", "/"), true).await;

    let headers = peer.recv_frame().await;
    assert!(matches!(headers.kind(), FrameKind::Headers { .. }));
    let data = peer.recv_frame().await;
    assert_eq!(data.kind(), &FrameKind::Data { data: Bytes::from(vec![b'x'; 10]) });
    assert!(!data.header().is_end_stream());

    assert!(peer.recv_within(Duration::from_millis(100)).await.is_none());

    peer.send(Frame::window_update(1, 10)).await;
    let data = peer.recv_frame().await;
    assert_eq!(data.kind(), &FrameKind::Data { data: Bytes::from(vec![b'x'; 10]) });
    assert!(!data.header().is_end_stream());

    peer.send(Frame::window_update(1, 100)).await;
    let data = peer.recv_frame().await;
    assert_eq!(data.kind(), &FrameKind::Data { data: Bytes::from(vec![b'x'; 5]) });
    assert!(data.header().is_end_stream());

    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_settings_rebase_unblocks_sender() {
    let mut peer = Peer::connect_with(
        Config::default(),
        Arc::new(Respond(Bytes::from_static(b"hello"))),
        vec![(0x4, 0)],
    )
    .await;

    peer.request(1, &request_headers("GET", "/"), true).await;
    let headers = peer.recv_frame().await;
    assert!(matches!(headers.kind(), FrameKind::Headers { .. }));
    assert!(peer.recv_within(Duration::from_millis(100)).await.is_none());

    peer.send(Frame::settings(vec![(0x4, 100)])).await;

    // The ACK and the released DATA race each other onto the queue.
    let mut acked = false;
    loop {
        let frame = peer.recv_frame().await;
        if is_settings_ack(&frame) {
            acked = true;
            continue;
        }
        assert_eq!(frame.stream_id(), 1);
        assert_eq!(frame.kind(), &FrameKind::Data { data: Bytes::from_static(b"hello") });
        assert!(frame.header().is_end_stream());
        break;
    }
    if !acked {
        assert!(is_settings_ack(&peer.recv_frame().await));
    }

    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_response_waits_for_connection_window() {
    let body = Bytes::from(vec![b'y'; 70_000]);
    let mut peer = Peer::connect_with(
        Config::default(),
        Arc::new(Respond(body)),
        vec![(0x4, 1 << 20)],
    )
    .await;

    peer.request(1, &request_headers("GET", "/"), true).await;

    let mut received = 0;
    let mut last_data_end_stream = false;
    while received < 65535 {
        let frame = peer.recv_frame().await;
        if let FrameKind::Data { data } = frame.kind() {
            received += data.len();
            last_data_end_stream = frame.header().is_end_stream();
        }
    }
    assert_eq!(received, 65535);
    assert!(!last_data_end_stream);
    assert!(peer.recv_within(Duration::from_millis(100)).await.is_none());

    peer.send(Frame::window_update(0, 10_000)).await;
    let frame = peer.recv_frame().await;
    assert_eq!(frame.kind(), &FrameKind::Data { data: Bytes::from(vec![b'y'; 4465]) });
    assert!(frame.header().is_end_stream());

    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_data_split_at_peer_max_frame_size() {
    let mut peer = Peer::connect(
        Config::default(),
        Arc::new(Respond(Bytes::from(vec![7u8; 40_000]))),
    )
    .await;

    peer.request(1, &request_headers("GET", "/big"), true).await;

    let response = peer.response(1).await;
    assert_eq!(response.data_frames, vec![16384, 16384, 7232]);
    assert!(response.body.iter().all(|b| *b == 7));

    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_larger_peer_max_frame_size_used() {
    let mut peer = Peer::connect_with(
        Config::default(),
        Arc::new(Respond(Bytes::from(vec![7u8; 40_000]))),
        vec![(0x5, 32768)],
    )
    .await;

    peer.request(1, &request_headers("GET", "/big"), true).await;

    let response = peer.response(1).await;
    assert_eq!(response.data_frames, vec![32768, 7232]);

    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_stream_window_overflow_is_flow_control_error() {
    let (handler, _requests) = Record::new();
    let mut peer = Peer::connect(Config::default(), handler).await;

    peer.request(1, &request_headers("POST", "/"), false).await;
    peer.send(Frame::window_update(1, 0x7FFF_FFFF)).await;

    let (last_stream_id, code, _) = peer.goaway().await;
    assert_eq!(last_stream_id, 1);
    assert_eq!(code, ErrorCode::FlowControlError);
}
