//! One logical stream and the application's view of it.
//!
//! The inbound loop owns state transitions for received frames and feeds
//! payload events into a per-stream queue. A payload assembler task drains
//! that queue, buffers the request and hands it to the [`Handler`] exactly
//! once. The handler answers through a [`StreamHandle`], whose writes go
//! through the state machine and then the connection's outbound queue.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace, warn};

use crate::connection::Shared;
use crate::error::{ErrorCode, H2Error};
use crate::h2_codec::{flags, Frame, FrameType};
use crate::hpack::{self, H2Header};
use crate::state::{self, Direction, StreamState};
use crate::window::Window;

/// Payload events delivered to a stream's assembler, in wire order.
#[derive(Debug)]
pub enum Inbound {
    Headers { headers: Vec<H2Header>, end_stream: bool },
    Data { data: Bytes, end_stream: bool },
    Reset(ErrorCode),
}

#[derive(Debug)]
pub struct Stream {
    id: u32,
    state: Mutex<StreamState>,
    window: Mutex<Window>,
    window_changed: Notify,
    closed: AtomicBool,
    inbound: Mutex<Option<mpsc::Sender<Inbound>>>,
}

impl Stream {
    pub(crate) fn new(id: u32, window: Window, inbound: Option<mpsc::Sender<Inbound>>) -> Self {
        Self {
            id,
            state: Mutex::new(StreamState::Idle),
            window: Mutex::new(window),
            window_changed: Notify::new(),
            closed: AtomicBool::new(false),
            inbound: Mutex::new(inbound),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run one frame through the state machine. Rejections are scoped to
    /// this stream; the connection decides whether to escalate.
    pub(crate) fn transition(
        &self,
        frame_type: FrameType,
        frame_flags: u8,
        direction: Direction,
    ) -> Result<StreamState, H2Error> {
        let mut state = self.state.lock();
        let from = *state;
        let next = state::transition(from, frame_type, frame_flags, direction)
            .map_err(|e| H2Error::stream(self.id, e.code, e.to_string()))?;
        *state = next;
        drop(state);

        if next != from {
            trace!(stream_id = self.id, %from, to = %next, %direction, %frame_type, "stream state");
        }
        if next == StreamState::Closed && from != StreamState::Closed {
            self.closed.store(true, Ordering::Release);
            debug!(stream_id = self.id, "stream closed");
            self.window_changed.notify_waiters();
        }
        Ok(next)
    }

    pub(crate) fn window(&self) -> MutexGuard<'_, Window> {
        self.window.lock()
    }

    /// Wake senders waiting on this stream's peer window.
    pub(crate) fn notify_window(&self) {
        self.window_changed.notify_waiters();
    }

    pub(crate) fn inbound(&self) -> Option<mpsc::Sender<Inbound>> {
        self.inbound.lock().clone()
    }

    /// Force the stream to CLOSED: its payload queue is shut and anyone
    /// waiting for window is woken.
    pub(crate) fn close(&self) {
        *self.state.lock() = StreamState::Closed;
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(stream_id = self.id, "stream closed");
        }
        self.inbound.lock().take();
        self.window_changed.notify_waiters();
    }
}

/// A complete request: the first header block, any trailers, and the
/// buffered body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub stream_id: u32,
    pub headers: Vec<H2Header>,
    pub trailers: Vec<H2Header>,
    pub body: Bytes,
}

impl StreamRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        hpack::find(&self.headers, name)
    }

    pub fn method(&self) -> Option<&str> {
        self.header(":method")
    }

    pub fn path(&self) -> Option<&str> {
        self.header(":path")
    }

    pub fn authority(&self) -> Option<&str> {
        self.header(":authority")
    }

    pub fn scheme(&self) -> Option<&str> {
        self.header(":scheme")
    }
}

/// Application callback, invoked once per peer-initiated stream when its
/// request is complete.
///
/// An error return resets the stream with INTERNAL_ERROR unless the handler
/// already closed it.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: StreamRequest, stream: StreamHandle) -> Result<(), H2Error>;
}

/// Sending side of a stream.
pub struct StreamHandle {
    stream: Arc<Stream>,
    conn: Arc<Shared>,
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.stream.id())
            .field("state", &self.stream.state())
            .finish()
    }
}

impl StreamHandle {
    pub(crate) fn new(stream: Arc<Stream>, conn: Arc<Shared>) -> Self {
        Self { stream, conn }
    }

    pub fn id(&self) -> u32 {
        self.stream.id()
    }

    pub fn state(&self) -> StreamState {
        self.stream.state()
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }

    fn check_open(&self) -> Result<(), H2Error> {
        if self.stream.is_closed() {
            return Err(H2Error::stream(
                self.id(),
                ErrorCode::StreamClosed,
                "stream is closed",
            ));
        }
        Ok(())
    }

    /// Send a single frame as is. DATA written this way bypasses flow
    /// control; use [`StreamHandle::send_data`] for bodies.
    pub async fn write(&self, frame: Frame) -> Result<(), H2Error> {
        self.write_batch(vec![frame]).await
    }

    /// Transition on the first frame of the batch, then enqueue the whole
    /// batch so it reaches the wire contiguously.
    async fn write_batch(&self, frames: Vec<Frame>) -> Result<(), H2Error> {
        let Some(first) = frames.first() else {
            return Ok(());
        };
        let id = self.id();
        if first.stream_id() != id {
            return Err(H2Error::stream(
                id,
                ErrorCode::InternalError,
                format!("frame for stream {} written on stream {}", first.stream_id(), id),
            ));
        }
        let frame_type = first.frame_type().ok_or_else(|| {
            H2Error::stream(id, ErrorCode::InternalError, "cannot send an unknown frame type")
        })?;
        self.check_open()?;
        let next = self
            .stream
            .transition(frame_type, first.header().flags, Direction::Send)?;
        self.conn.enqueue(frames).await?;
        self.after_send(next);
        Ok(())
    }

    fn after_send(&self, state: StreamState) {
        if state == StreamState::Closed {
            self.conn.schedule_removal(self.id());
        }
    }

    /// Encode `headers` and send them as HEADERS plus as many CONTINUATION
    /// frames as the peer's MAX_FRAME_SIZE requires.
    pub async fn send_headers(&self, headers: &[H2Header], end_stream: bool) -> Result<(), H2Error> {
        self.check_open()?;
        let id = self.id();
        let max_frame_size = self.conn.peer_max_frame_size() as usize;
        let frame_flags = if end_stream { flags::END_STREAM } else { 0 };

        // Held until the block is queued: encoder order must be wire order.
        let mut encoder = self.conn.encoder.lock().await;
        let next = self
            .stream
            .transition(FrameType::Headers, frame_flags, Direction::Send)?;
        let block = encoder.encode(headers);
        let frames = header_block_frames(id, block, max_frame_size, |chunk, end_headers| {
            Frame::headers(id, chunk, end_stream, end_headers)
        });
        trace!(stream_id = id, frames = frames.len(), end_stream, "sending headers");
        self.conn.enqueue(frames).await?;
        drop(encoder);

        self.after_send(next);
        Ok(())
    }

    /// Send `data` as DATA frames sized to the peer's MAX_FRAME_SIZE and
    /// the stream and connection windows, waiting for WINDOW_UPDATE when
    /// either window is exhausted. END_STREAM rides on the last chunk, or on
    /// an empty DATA frame when `data` is empty.
    pub async fn send_data(&self, mut data: Bytes, end_stream: bool) -> Result<(), H2Error> {
        let id = self.id();
        if data.is_empty() {
            if end_stream {
                self.write_batch(vec![Frame::data(id, Bytes::new(), true)])
                    .await?;
            }
            return Ok(());
        }

        while !data.is_empty() {
            let granted = self.reserve(data.len()).await?;
            let chunk = data.split_to(granted);
            let last = data.is_empty() && end_stream;
            if let Err(err) = self.write_batch(vec![Frame::data(id, chunk, last)]).await {
                self.refund(granted);
                return Err(err);
            }
            trace!(stream_id = id, sent = granted, rest = data.len(), "data sent");
        }
        Ok(())
    }

    /// Take up to `want` bytes of send budget from both windows, waiting
    /// until at least one byte is available.
    async fn reserve(&self, want: usize) -> Result<usize, H2Error> {
        let want = want.min(self.conn.peer_max_frame_size() as usize) as u32;
        loop {
            let stream_changed = self.stream.window_changed.notified();
            let conn_changed = self.conn.window_changed.notified();
            tokio::pin!(stream_changed);
            tokio::pin!(conn_changed);
            stream_changed.as_mut().enable();
            conn_changed.as_mut().enable();

            self.check_open()?;
            if self.conn.is_closed() {
                return Err(H2Error::QueueClosed);
            }

            let granted = {
                let mut conn_window = self.conn.window.lock();
                let mut stream_window = self.stream.window.lock();
                let n = stream_window
                    .consumable_peer_budget(conn_window.consumable_peer_budget(want));
                if n > 0 {
                    conn_window.consume_peer(n);
                    stream_window.consume_peer(n);
                }
                n
            };
            if granted > 0 {
                return Ok(granted as usize);
            }

            trace!(stream_id = self.id(), want, "waiting for peer window");
            tokio::select! {
                _ = &mut stream_changed => {}
                _ = &mut conn_changed => {}
            }
        }
    }

    /// Give back budget for a chunk that never went out.
    fn refund(&self, n: usize) {
        let n = n as u32;
        let conn_result = self.conn.window.lock().apply_peer_increment(n);
        let stream_result = self.stream.window.lock().apply_peer_increment(n);
        if conn_result.is_err() || stream_result.is_err() {
            warn!(stream_id = self.id(), n, "could not refund window");
        }
    }

    /// Headers, then the body with END_STREAM.
    pub async fn send_response(&self, headers: &[H2Header], body: Bytes) -> Result<(), H2Error> {
        if body.is_empty() {
            return self.send_headers(headers, true).await;
        }
        self.send_headers(headers, false).await?;
        self.send_data(body, true).await
    }

    /// Abort the stream with RST_STREAM.
    pub async fn reset(&self, code: ErrorCode) -> Result<(), H2Error> {
        self.check_open()?;
        let id = self.id();
        self.stream
            .transition(FrameType::RstStream, 0, Direction::Send)?;
        debug!(stream_id = id, %code, "resetting stream");
        self.conn.enqueue(vec![Frame::rst_stream(id, code)]).await?;
        self.stream.close();
        self.conn.schedule_removal(id);
        Ok(())
    }

    /// Promise a pushed response for the request described by `headers`.
    ///
    /// Allocates the next even stream id, moves it to RESERVED_LOCAL and
    /// sends PUSH_PROMISE on this stream. The returned handle sends the
    /// pushed response.
    pub async fn push_promise(&self, headers: &[H2Header]) -> Result<StreamHandle, H2Error> {
        let id = self.id();
        if !self.conn.peer_push_enabled() {
            return Err(H2Error::stream(
                id,
                ErrorCode::ProtocolError,
                "peer disabled server push",
            ));
        }
        self.check_open()?;
        let max_frame_size = self.conn.peer_max_frame_size() as usize;

        let mut encoder = self.conn.encoder.lock().await;
        self.stream
            .transition(FrameType::PushPromise, 0, Direction::Send)?;
        let promised = self.conn.open_pushed_stream()?;
        let promised_id = promised.id();
        let block = encoder.encode(headers);
        // The promised stream id takes four bytes of the first frame.
        let frames = header_block_frames(id, block, max_frame_size - 4, |chunk, end_headers| {
            Frame::push_promise(id, promised_id, chunk, end_headers)
        });
        self.conn.enqueue(frames).await?;
        drop(encoder);

        debug!(stream_id = id, promised_id, "push promised");
        Ok(StreamHandle::new(promised, self.conn.clone()))
    }
}

/// Split a header block into an opening frame built by `first` and
/// CONTINUATION frames, each at most `max` bytes of block.
fn header_block_frames(
    stream_id: u32,
    mut block: Bytes,
    max: usize,
    first: impl FnOnce(Bytes, bool) -> Frame,
) -> Vec<Frame> {
    let max = max.max(1);
    let head = block.split_to(block.len().min(max));
    let mut frames = vec![first(head, block.is_empty())];
    while !block.is_empty() {
        let chunk = block.split_to(block.len().min(max));
        frames.push(Frame::continuation(stream_id, chunk, block.is_empty()));
    }
    frames
}

/// Payload assembler: buffers one request and calls the handler once.
pub(crate) async fn assemble(
    mut rx: mpsc::Receiver<Inbound>,
    handle: StreamHandle,
    handler: Arc<dyn Handler>,
) {
    let id = handle.id();
    let mut headers: Option<Vec<H2Header>> = None;
    let mut trailers = Vec::new();
    let mut body = BytesMut::new();

    let complete = loop {
        match rx.recv().await {
            Some(Inbound::Headers {
                headers: block,
                end_stream,
            }) => {
                if headers.is_none() {
                    headers = Some(block);
                } else {
                    trailers.extend(block);
                }
                if end_stream {
                    break true;
                }
            }
            Some(Inbound::Data { data, end_stream }) => {
                body.extend_from_slice(&data);
                if end_stream {
                    break true;
                }
            }
            Some(Inbound::Reset(code)) => {
                debug!(stream_id = id, %code, "stream reset before request completed");
                break false;
            }
            None => break false,
        }
    };
    drop(rx);

    let Some(headers) = headers.filter(|_| complete) else {
        trace!(stream_id = id, "stream ended without a complete request");
        return;
    };
    let request = StreamRequest {
        stream_id: id,
        headers,
        trailers,
        body: body.freeze(),
    };
    debug!(
        stream_id = id,
        method = request.method().unwrap_or("-"),
        path = request.path().unwrap_or("-"),
        body = request.body.len(),
        "request complete"
    );

    let fallback = StreamHandle::new(handle.stream.clone(), handle.conn.clone());
    if let Err(err) = handler.handle(request, handle).await {
        warn!(stream_id = id, %err, "handler failed");
        if !fallback.is_closed() {
            if let Err(err) = fallback.reset(ErrorCode::InternalError).await {
                debug!(stream_id = id, %err, "could not reset stream");
            }
        }
    }
}
