//! Connection dispatcher.
//!
//! A connection runs two loops. The inbound loop ([`Connection::run`])
//! decodes one frame at a time and routes it: stream 0 frames to the
//! connection handlers, everything else through the stream state machine and
//! on to the stream's payload assembler. The outbound loop
//! ([`FrameWriter::run`]) is the only writer of the transport; every other
//! component enqueues frame batches on one bounded queue it drains in order.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, trace, warn};

use crate::config::Config;
use crate::error::{ErrorCode, ErrorScope, H2Error};
use crate::h2_codec::{flags, frame_type, Frame, FrameKind, FrameReader, FrameType, H2FrameHeader};
use crate::hpack::{H2Header, HpackDecoder, HpackEncoder};
use crate::settings::{PeerSettings, SettingId, SettingsMap};
use crate::state::{self, Direction, StreamState};
use crate::store::StreamStore;
use crate::stream::{self, Handler, Inbound, Stream, StreamHandle};
use crate::window::{Window, DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};

/// Largest header block (HEADERS plus CONTINUATIONs) we buffer.
pub const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// Largest legal stream id (2^31 - 1).
const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// State shared between the inbound loop, the stream handles and the
/// connection owner.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) store: Mutex<StreamStore>,
    /// Connection-level flow-control window.
    pub(crate) window: Mutex<Window>,
    pub(crate) window_changed: Notify,
    pub(crate) peer: Mutex<PeerSettings>,
    /// Held across encode and enqueue so HPACK table order is wire order.
    pub(crate) encoder: tokio::sync::Mutex<HpackEncoder>,
    tx: mpsc::Sender<Vec<Frame>>,
    shutdown: Arc<Notify>,
    last_stream_id: AtomicU32,
    last_pushed_id: AtomicU32,
    /// The peer has acknowledged our SETTINGS. Only written with `store`
    /// locked.
    settings_acked: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    /// Put a batch on the outbound queue. Frames in one batch reach the
    /// wire back to back.
    pub(crate) async fn enqueue(&self, batch: Vec<Frame>) -> Result<(), H2Error> {
        for frame in &batch {
            let header = frame.header();
            trace!(
                stream_id = header.stream_id,
                frame_type = header.frame_type,
                flags = header.flags,
                length = header.length,
                "enqueue frame"
            );
        }
        self.tx.send(batch).await.map_err(|_| H2Error::QueueClosed)
    }

    pub(crate) fn schedule_removal(&self, id: u32) {
        self.store.lock().schedule_removal(id, Instant::now());
    }

    pub(crate) fn peer_max_frame_size(&self) -> u32 {
        self.peer.lock().effective.get(SettingId::MaxFrameSize)
    }

    pub(crate) fn peer_push_enabled(&self) -> bool {
        self.peer.lock().effective.get(SettingId::EnablePush) == 1
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Highest stream id the peer has opened.
    pub(crate) fn last_stream_id(&self) -> u32 {
        self.last_stream_id.load(Ordering::Acquire)
    }

    /// Highest even stream id we have promised.
    pub(crate) fn last_pushed_id(&self) -> u32 {
        self.last_pushed_id.load(Ordering::Acquire)
    }

    /// Window for a stream created now: our advertised initial size on the
    /// receive side, the peer's on the send side. Until the peer ACKs our
    /// SETTINGS it may still be sending against the protocol default
    /// (RFC 7540 Section 6.5.3), so that is what we enforce.
    ///
    /// Call with `store` locked so an ACK cannot slip in between reading the
    /// flag and inserting the stream.
    fn stream_window(&self) -> Window {
        let local_initial = if self.settings_acked.load(Ordering::Acquire) {
            self.config.local_initial_window()
        } else {
            DEFAULT_INITIAL_WINDOW_SIZE
        };
        let peer_initial = self.peer.lock().effective.get(SettingId::InitialWindowSize);
        Window::with_divisor(
            local_initial,
            i32::try_from(peer_initial).unwrap_or(MAX_WINDOW_SIZE),
            self.config.window_threshold_divisor,
        )
    }

    /// Allocate the next even stream id and reserve it with PUSH_PROMISE.
    pub(crate) fn open_pushed_stream(&self) -> Result<Arc<Stream>, H2Error> {
        let id = self
            .last_pushed_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                last.checked_add(2).filter(|id| *id <= MAX_STREAM_ID)
            })
            .map_err(|_| {
                H2Error::connection(ErrorCode::RefusedStream, "server stream ids exhausted")
            })?
            + 2;
        let mut store = self.store.lock();
        let stream = Arc::new(Stream::new(id, self.stream_window(), None));
        stream.transition(FrameType::PushPromise, 0, Direction::Send)?;
        Ok(store.insert(stream))
    }

    /// Close every stream and tell the writer to drain and stop.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let streams = self.store.lock().drain();
        debug!(streams = streams.len(), "closing connection");
        for stream in streams {
            stream.close();
        }
        self.window_changed.notify_waiters();
        self.shutdown.notify_one();
    }
}

/// What the inbound loop does after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// A HEADERS block waiting for its CONTINUATION frames.
#[derive(Debug)]
struct PendingBlock {
    stream_id: u32,
    flags: u8,
    block: BytesMut,
}

/// Frame payload as the router needs it, header blocks already decoded.
enum Payload {
    Headers(Vec<H2Header>),
    Data(Bytes),
    WindowUpdate(u32),
    Reset(ErrorCode),
    None,
}

/// The inbound half of a connection.
pub struct Connection<R> {
    reader: FrameReader<R>,
    shared: Arc<Shared>,
    decoder: HpackDecoder,
    handler: Arc<dyn Handler>,
    pending: Option<PendingBlock>,
}

impl<R> Connection<R>
where
    R: AsyncRead + Unpin,
{
    /// Build both halves of a connection. The writer must be driven
    /// (usually on its own task) for anything to reach the transport.
    pub fn new<W>(
        reader: FrameReader<R>,
        io: W,
        config: Config,
        handler: Arc<dyn Handler>,
    ) -> (Self, FrameWriter<W>)
    where
        W: AsyncWrite + Unpin,
    {
        let (tx, rx) = mpsc::channel(config.outbound_queue_capacity);
        let shutdown = Arc::new(Notify::new());
        let window = Window::with_divisor(
            DEFAULT_INITIAL_WINDOW_SIZE,
            DEFAULT_INITIAL_WINDOW_SIZE,
            config.window_threshold_divisor,
        );
        let shared = Arc::new(Shared {
            store: Mutex::new(StreamStore::new(config.closed_stream_grace)),
            window: Mutex::new(window),
            window_changed: Notify::new(),
            peer: Mutex::new(PeerSettings::default()),
            encoder: tokio::sync::Mutex::new(HpackEncoder::new()),
            tx,
            shutdown: shutdown.clone(),
            last_stream_id: AtomicU32::new(0),
            last_pushed_id: AtomicU32::new(0),
            settings_acked: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            config,
        });
        let connection = Self {
            reader,
            shared,
            decoder: HpackDecoder::new(),
            handler,
            pending: None,
        };
        let writer = FrameWriter {
            io,
            rx,
            shutdown,
            buf: BytesMut::with_capacity(16 * 1024),
        };
        (connection, writer)
    }

    /// Highest stream id the peer has opened so far.
    pub fn last_stream_id(&self) -> u32 {
        self.shared.last_stream_id()
    }

    /// Number of streams still in the table, closed ones inside their grace
    /// period included.
    pub fn stream_count(&self) -> usize {
        self.shared.store.lock().len()
    }

    /// Current state of a stream still in the table.
    pub fn stream_state(&self, id: u32) -> Option<StreamState> {
        let stream = self.shared.store.lock().get(id);
        stream.map(|s| s.state())
    }

    /// Send our SETTINGS, the server half of the connection preface.
    pub async fn send_settings(&self) -> Result<(), H2Error> {
        self.shared.config.validate()?;
        let pairs = self.shared.config.settings.to_pairs();
        debug!(settings = ?pairs, "sending initial SETTINGS");
        self.shared.enqueue(vec![Frame::settings(pairs)]).await
    }

    /// Run the inbound loop until the peer goes away, the transport closes
    /// or a connection error occurs. Connection errors are answered with
    /// GOAWAY before being returned.
    pub async fn run(&mut self) -> Result<(), H2Error> {
        debug!("read loop started");
        let max_frame_size = self.shared.config.local_max_frame_size();
        loop {
            self.shared.store.lock().prune(Instant::now());

            let outcome = match self.reader.next_frame(max_frame_size).await {
                Ok(Some(frame)) => self.dispatch(frame).await,
                Ok(None) => {
                    debug!("transport closed by peer");
                    return Ok(());
                }
                Err(err) => Err(err),
            };

            let err = match outcome {
                Ok(Flow::Continue) => continue,
                Ok(Flow::Stop) => {
                    debug!("read loop stopped");
                    return Ok(());
                }
                Err(err) => err,
            };

            match (err.scope(), err.code()) {
                (Some(ErrorScope::Stream(id)), Some(code))
                    if !self.shared.config.escalate_stream_errors =>
                {
                    warn!(%err, "stream error");
                    self.reset_stream(id, code).await?;
                }
                (Some(_), Some(code)) => {
                    error!(%err, "connection error");
                    let reason = err.reason().unwrap_or_default().to_string();
                    if let Err(send_err) = self.go_away(code, reason).await {
                        debug!(%send_err, "GOAWAY not sent");
                    }
                    return Err(err);
                }
                _ => {
                    error!(%err, "read loop failed");
                    return Err(err);
                }
            }
        }
    }

    /// Close every stream and stop the writer once it has drained.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Enqueue GOAWAY naming the last peer stream we saw.
    pub async fn go_away(&self, code: ErrorCode, reason: impl Into<String>) -> Result<(), H2Error> {
        let last_stream_id = self.shared.last_stream_id();
        let reason = reason.into();
        debug!(last_stream_id, %code, %reason, "sending GOAWAY");
        self.shared
            .enqueue(vec![Frame::go_away(last_stream_id, code, Bytes::from(reason))])
            .await
    }

    /// Answer a stream error with RST_STREAM and forget the stream.
    async fn reset_stream(&self, id: u32, code: ErrorCode) -> Result<(), H2Error> {
        self.shared.enqueue(vec![Frame::rst_stream(id, code)]).await?;
        let stream = self.shared.store.lock().get(id);
        if let Some(stream) = stream {
            stream.close();
            self.shared.schedule_removal(id);
        }
        Ok(())
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<Flow, H2Error> {
        let header = *frame.header();
        trace!(
            stream_id = header.stream_id,
            frame_type = header.frame_type,
            flags = header.flags,
            length = header.length,
            "recv frame"
        );

        if let Some(pending) = &self.pending {
            if header.frame_type != frame_type::CONTINUATION || header.stream_id != pending.stream_id {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    format!(
                        "expected CONTINUATION on stream {}, got frame type {:#x} on stream {}",
                        pending.stream_id, header.frame_type, header.stream_id
                    ),
                ));
            }
            return self.continue_block(header, frame.into_kind()).await;
        }

        if header.stream_id == 0 {
            self.dispatch_connection(header, frame.into_kind()).await
        } else {
            self.dispatch_stream(header, frame.into_kind()).await
        }
    }

    async fn dispatch_connection(
        &mut self,
        header: H2FrameHeader,
        kind: FrameKind,
    ) -> Result<Flow, H2Error> {
        match kind {
            FrameKind::Settings { settings } => {
                self.on_settings(header.is_ack(), &settings).await?;
            }
            FrameKind::WindowUpdate { increment } => {
                self.on_connection_window_update(increment)?;
            }
            FrameKind::Ping { data } => {
                if header.is_ack() {
                    trace!("PING ACK received");
                } else {
                    self.shared.enqueue(vec![Frame::ping(true, data)]).await?;
                }
            }
            FrameKind::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                debug!(
                    last_stream_id,
                    code = %ErrorCode::from_u32(error_code),
                    debug_data = %String::from_utf8_lossy(&debug_data),
                    "GOAWAY received"
                );
                return Ok(Flow::Stop);
            }
            FrameKind::Unknown { .. } => {}
            _ => {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    format!("{} frame for stream 0", frame_name(&header)),
                ));
            }
        }
        Ok(Flow::Continue)
    }

    async fn dispatch_stream(
        &mut self,
        header: H2FrameHeader,
        kind: FrameKind,
    ) -> Result<Flow, H2Error> {
        let id = header.stream_id;
        let Some(frame_type) = header.kind() else {
            trace!(stream_id = id, frame_type = header.frame_type, "ignoring unknown frame");
            return Ok(Flow::Continue);
        };
        match frame_type {
            FrameType::Settings | FrameType::Ping | FrameType::GoAway => {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    format!("{frame_type} frame for stream {id}"),
                ));
            }
            FrameType::PushPromise => {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    "PUSH_PROMISE sent by client",
                ));
            }
            FrameType::Continuation => {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    format!("CONTINUATION on stream {id} without a header block"),
                ));
            }
            FrameType::AltSvc | FrameType::Origin => return Ok(Flow::Continue),
            _ => {}
        }

        let payload = match kind {
            FrameKind::Headers { block, .. } if !header.is_end_headers() => {
                check_block_size(block.len())?;
                self.pending = Some(PendingBlock {
                    stream_id: id,
                    flags: header.flags,
                    block: BytesMut::from(&block[..]),
                });
                return Ok(Flow::Continue);
            }
            FrameKind::Headers { block, .. } => Payload::Headers(self.decoder.decode(&block)?),
            FrameKind::Data { data } => Payload::Data(data),
            FrameKind::WindowUpdate { increment } => Payload::WindowUpdate(increment),
            FrameKind::RstStream { error_code } => Payload::Reset(ErrorCode::from_u32(error_code)),
            _ => Payload::None,
        };
        self.route(header, frame_type, payload).await
    }

    async fn continue_block(&mut self, header: H2FrameHeader, kind: FrameKind) -> Result<Flow, H2Error> {
        let FrameKind::Continuation { block } = kind else {
            return Err(H2Error::connection(
                ErrorCode::ProtocolError,
                "malformed CONTINUATION frame",
            ));
        };
        let Some(pending) = self.pending.as_mut() else {
            return Err(H2Error::connection(
                ErrorCode::ProtocolError,
                "CONTINUATION without a header block",
            ));
        };
        check_block_size(pending.block.len() + block.len())?;
        pending.block.extend_from_slice(&block);
        if !header.is_end_headers() {
            return Ok(Flow::Continue);
        }

        let Some(pending) = self.pending.take() else {
            return Ok(Flow::Continue);
        };
        let headers = self.decoder.decode(&pending.block)?;
        // Route the whole block as the HEADERS frame that opened it.
        let opening = H2FrameHeader {
            length: pending.block.len() as u32,
            frame_type: frame_type::HEADERS,
            flags: pending.flags | flags::END_HEADERS,
            stream_id: pending.stream_id,
        };
        self.route(opening, FrameType::Headers, Payload::Headers(headers))
            .await
    }

    /// Stream-level handling for a fully decoded frame.
    async fn route(
        &mut self,
        header: H2FrameHeader,
        frame_type: FrameType,
        payload: Payload,
    ) -> Result<Flow, H2Error> {
        let id = header.stream_id;
        if frame_type == FrameType::Data {
            self.consume_connection_window(header.length).await?;
        }

        let Some(stream) = self.lookup(id)? else {
            // Removed streams behave as CLOSED.
            state::transition(StreamState::Closed, frame_type, header.flags, Direction::Recv)
                .map_err(|e| H2Error::stream(id, e.code, e.to_string()))?;
            trace!(stream_id = id, %frame_type, "frame for closed stream ignored");
            return Ok(Flow::Continue);
        };

        let next = stream.transition(frame_type, header.flags, Direction::Recv)?;
        let end_stream = header.is_end_stream();
        match payload {
            Payload::Data(data) => {
                self.consume_stream_window(&stream, header.length, next)
                    .await?;
                deliver(&stream, Inbound::Data { data, end_stream }).await;
            }
            Payload::Headers(headers) => {
                deliver(&stream, Inbound::Headers { headers, end_stream }).await;
            }
            Payload::WindowUpdate(increment) => {
                on_stream_window_update(&stream, increment)?;
            }
            Payload::Reset(code) => {
                debug!(stream_id = id, %code, "RST_STREAM received");
                deliver(&stream, Inbound::Reset(code)).await;
                stream.close();
            }
            Payload::None => {}
        }

        if next == StreamState::Closed {
            self.shared.schedule_removal(id);
        }
        Ok(Flow::Continue)
    }

    /// Find the stream for `id`, creating it for a new peer-initiated id.
    /// `None` means the id belongs to a stream that is already gone.
    fn lookup(&mut self, id: u32) -> Result<Option<Arc<Stream>>, H2Error> {
        let existing = self.shared.store.lock().get(id);
        if existing.is_some() {
            return Ok(existing);
        }

        if id % 2 == 0 {
            if id > self.shared.last_pushed_id() {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    format!("frame on stream {id} which was never promised"),
                ));
            }
            return Ok(None);
        }
        if id <= self.shared.last_stream_id() {
            return Ok(None);
        }
        Ok(Some(self.open_stream(id)))
    }

    fn open_stream(&mut self, id: u32) -> Arc<Stream> {
        let (tx, rx) = mpsc::channel(self.shared.config.stream_queue_capacity);
        let stream = {
            let mut store = self.shared.store.lock();
            store.insert(Arc::new(Stream::new(id, self.shared.stream_window(), Some(tx))))
        };
        self.shared.last_stream_id.fetch_max(id, Ordering::AcqRel);
        debug!(stream_id = id, "stream opened");

        let handle = StreamHandle::new(stream.clone(), self.shared.clone());
        tokio::spawn(stream::assemble(rx, handle, self.handler.clone()));
        stream
    }

    /// DATA counts against the connection window before anything else; a
    /// WINDOW_UPDATE for stream 0 is sent once it drops below threshold.
    async fn consume_connection_window(&self, length: u32) -> Result<(), H2Error> {
        let increment = self
            .shared
            .window
            .lock()
            .consume_local(length)
            .map_err(|e| H2Error::connection(ErrorCode::FlowControlError, e.to_string()))?;
        if increment > 0 {
            trace!(increment, "replenishing connection window");
            self.shared
                .enqueue(vec![Frame::window_update(0, increment)])
                .await?;
            self.shared
                .window
                .lock()
                .apply_local_increment(increment)
                .map_err(|e| H2Error::connection(ErrorCode::FlowControlError, e.to_string()))?;
        }
        Ok(())
    }

    /// Charge DATA to the stream window. No update is sent once the peer
    /// can no longer send on the stream.
    async fn consume_stream_window(
        &self,
        stream: &Stream,
        length: u32,
        state: StreamState,
    ) -> Result<(), H2Error> {
        let id = stream.id();
        let increment = stream
            .window()
            .consume_local(length)
            .map_err(|e| H2Error::stream(id, ErrorCode::FlowControlError, e.to_string()))?;
        if increment > 0 && state.can_recv_data() {
            trace!(stream_id = id, increment, "replenishing stream window");
            self.shared
                .enqueue(vec![Frame::window_update(id, increment)])
                .await?;
            stream
                .window()
                .apply_local_increment(increment)
                .map_err(|e| H2Error::stream(id, ErrorCode::FlowControlError, e.to_string()))?;
        }
        Ok(())
    }

    fn on_connection_window_update(&self, increment: u32) -> Result<(), H2Error> {
        if increment == 0 {
            return Err(H2Error::connection(
                ErrorCode::ProtocolError,
                "WINDOW_UPDATE with zero increment on stream 0",
            ));
        }
        self.shared
            .window
            .lock()
            .apply_peer_increment(increment)
            .map_err(|e| H2Error::connection(ErrorCode::FlowControlError, e.to_string()))?;
        trace!(increment, "connection window update");
        self.shared.window_changed.notify_waiters();
        Ok(())
    }

    /// Validate, record and acknowledge a SETTINGS frame from the peer.
    async fn on_settings(&self, ack: bool, pairs: &[(u16, u32)]) -> Result<(), H2Error> {
        if ack {
            self.on_settings_ack();
            return Ok(());
        }
        let sent = SettingsMap::from_pairs(pairs);
        sent.validate()?;

        let mut merged = SettingsMap::defaults();
        merged.merge(&sent);
        for (id, value) in merged.iter() {
            trace!(setting = ?id, value, "peer setting");
        }

        let initial_window = sent.explicit(SettingId::InitialWindowSize);
        self.shared.peer.lock().record(sent);

        if let Some(initial) = initial_window {
            let streams = self.shared.store.lock().streams();
            for stream in &streams {
                stream
                    .window()
                    .rebase_initial(initial)
                    .map_err(|e| H2Error::connection(ErrorCode::FlowControlError, e.to_string()))?;
                stream.notify_window();
            }
            debug!(initial, streams = streams.len(), "stream windows rebased");
        }

        self.shared.enqueue(vec![Frame::settings_ack()]).await
    }

    /// Our SETTINGS are in force from here on: live streams move their
    /// receive side to the configured initial window.
    fn on_settings_ack(&self) {
        let streams = {
            let store = self.shared.store.lock();
            if self.shared.settings_acked.swap(true, Ordering::AcqRel) {
                trace!("SETTINGS ACK received");
                return;
            }
            store.streams()
        };
        let initial = self.shared.config.local_initial_window();
        if initial != DEFAULT_INITIAL_WINDOW_SIZE {
            for stream in &streams {
                stream.window().rebase_local(initial);
            }
        }
        debug!(initial, streams = streams.len(), "local SETTINGS acknowledged");
    }
}

fn frame_name(header: &H2FrameHeader) -> &'static str {
    header.kind().map(FrameType::name).unwrap_or("UNKNOWN")
}

fn check_block_size(len: usize) -> Result<(), H2Error> {
    if len > MAX_HEADER_BLOCK_SIZE {
        return Err(H2Error::connection(
            ErrorCode::EnhanceYourCalm,
            format!("header block of {len} bytes exceeds {MAX_HEADER_BLOCK_SIZE}"),
        ));
    }
    Ok(())
}

fn on_stream_window_update(stream: &Stream, increment: u32) -> Result<(), H2Error> {
    let id = stream.id();
    if increment == 0 {
        return Err(H2Error::stream(
            id,
            ErrorCode::ProtocolError,
            "WINDOW_UPDATE with zero increment",
        ));
    }
    stream
        .window()
        .apply_peer_increment(increment)
        .map_err(|e| H2Error::stream(id, ErrorCode::FlowControlError, e.to_string()))?;
    trace!(stream_id = id, increment, "stream window update");
    stream.notify_window();
    Ok(())
}

/// Hand a payload event to the stream's assembler, if it still listens.
async fn deliver(stream: &Stream, event: Inbound) {
    let Some(tx) = stream.inbound() else {
        return;
    };
    if tx.send(event).await.is_err() {
        trace!(stream_id = stream.id(), "assembler gone, payload dropped");
    }
}

/// The outbound half of a connection: the only writer of the transport.
pub struct FrameWriter<W> {
    io: W,
    rx: mpsc::Receiver<Vec<Frame>>,
    shutdown: Arc<Notify>,
    buf: BytesMut,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Drain the outbound queue onto the transport. Stops on the first
    /// write error; after shutdown is signalled, writes what is still
    /// queued and exits.
    pub async fn run(mut self) -> Result<(), H2Error> {
        debug!("frame writer started");
        let mut draining = false;
        loop {
            let batch = tokio::select! {
                biased;
                batch = self.rx.recv() => batch,
                _ = self.shutdown.notified(), if !draining => {
                    draining = true;
                    self.rx.close();
                    continue;
                }
            };
            let Some(batch) = batch else {
                break;
            };
            if let Err(err) = self.write_batch(&batch).await {
                error!(%err, "frame writer failed");
                self.rx.close();
                return Err(err);
            }
        }
        if let Err(err) = self.io.shutdown().await {
            debug!(%err, "transport shutdown failed");
        }
        debug!("frame writer stopped");
        Ok(())
    }

    async fn write_batch(&mut self, batch: &[Frame]) -> Result<(), H2Error> {
        self.buf.clear();
        for frame in batch {
            trace!(
                stream_id = frame.stream_id(),
                frame_type = frame.header().frame_type,
                "send frame"
            );
            frame.encode(&mut self.buf);
        }
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        Ok(())
    }
}
