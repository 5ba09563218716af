//! Tests for server push

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use h2_mux::{
    Config, ErrorCode, FrameKind, H2Error, H2Header, Handler, StreamHandle, StreamRequest,
    StreamState,
};
use tokio::sync::mpsc;

use super::{request_headers, status, Peer};

/// Pushes a stylesheet alongside every response. Push failures are
/// reported on the channel and the response still goes out.
struct Pusher(mpsc::UnboundedSender<Result<(u32, StreamState), ErrorCode>>);

#[async_trait]
impl Handler for Pusher {
    async fn handle(&self, _: StreamRequest, stream: StreamHandle) -> Result<(), H2Error> {
        let pushed = match stream.push_promise(&request_headers("GET", "/style.css")).await {
            Ok(pushed) => {
                let _ = self.0.send(Ok((pushed.id(), pushed.state())));
                Some(pushed)
            }
            Err(err) => {
                let _ = self.0.send(Err(err.code().unwrap_or(ErrorCode::InternalError)));
                None
            }
        };

        stream
            .send_response(&status("200"), Bytes::from_static(b"<html>"))
            .await?;
        if let Some(pushed) = pushed {
            let mut headers = status("200");
            headers.push(H2Header::new("content-type", "text/css"));
            pushed
                .send_response(&headers, Bytes::from_static(b"body{}"))
                .await?;
        }
        Ok(())
    }
}

fn pusher() -> (
    Arc<Pusher>,
    mpsc::UnboundedReceiver<Result<(u32, StreamState), ErrorCode>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Pusher(tx)), rx)
}

#[tokio::test]
async fn test_push_promise_reserves_even_stream() {
    let (handler, mut pushes) = pusher();
    let mut peer = Peer::connect(Config::default(), handler).await;

    peer.request(1, &request_headers("GET", "/"), true).await;

    let promise = peer.recv_frame().await;
    assert_eq!(promise.stream_id(), 1);
    assert!(promise.header().is_end_headers());
    let FrameKind::PushPromise {
        promised_stream_id,
        block,
    } = promise.into_kind()
    else {
        panic!("expected PUSH_PROMISE");
    };
    assert_eq!(promised_stream_id, 2);
    let promised_request = peer.decoder.decode(&block).unwrap();
    assert_eq!(promised_request, request_headers("GET", "/style.css"));

    let parent = peer.response(1).await;
    assert_eq!(parent.header(":status"), Some("200"));
    assert_eq!(&parent.body[..], b"<html>");

    let pushed = peer.response(2).await;
    assert_eq!(pushed.header(":status"), Some("200"));
    assert_eq!(pushed.header("content-type"), Some("text/css"));
    assert_eq!(&pushed.body[..], b"body{}");

    assert_eq!(
        pushes.recv().await.unwrap(),
        Ok((2, StreamState::ReservedLocal))
    );
    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_pushed_ids_increase() {
    let (handler, mut pushes) = pusher();
    let mut peer = Peer::connect(Config::default(), handler).await;

    for (request_id, promised_id) in [(1, 2), (3, 4)] {
        peer.request(request_id, &request_headers("GET", "/"), true)
            .await;
        let promise = peer.recv_frame().await;
        let FrameKind::PushPromise {
            promised_stream_id,
            block,
        } = promise.into_kind()
        else {
            panic!("expected PUSH_PROMISE");
        };
        assert_eq!(promised_stream_id, promised_id);
        peer.decoder.decode(&block).unwrap();
        peer.response(request_id).await;
        peer.response(promised_id).await;
        assert!(pushes.recv().await.unwrap().is_ok());
    }

    assert!(peer.close().await.is_ok());
}

#[tokio::test]
async fn test_push_refused_when_peer_disables_it() {
    let (handler, mut pushes) = pusher();
    let mut peer = Peer::connect_with(Config::default(), handler, vec![(0x2, 0)]).await;

    peer.request(1, &request_headers("GET", "/"), true).await;

    let response = peer.response(1).await;
    assert_eq!(&response.body[..], b"<html>");
    assert_eq!(pushes.recv().await.unwrap(), Err(ErrorCode::ProtocolError));

    assert!(peer.close().await.is_ok());
}
