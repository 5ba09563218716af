//! HTTP/2 frame codec (RFC 7540 Section 4 and 6).
//!
//! Turns transport bytes into [`Frame`] values and back. A frame keeps the
//! header exactly as it appeared on the wire (so flow control can charge the
//! full padded length) next to a parsed [`FrameKind`] payload. The dispatcher
//! only ever sees frame values; it never touches raw bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ErrorCode, H2Error};

/// HTTP/2 frame types (RFC 7540 Section 6)
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
    pub const ALTSVC: u8 = 0xa;
    pub const ORIGIN: u8 = 0xc;
}

/// HTTP/2 frame flags
pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Size of the fixed frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// The HTTP/2 connection preface (24 bytes)
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Check if data starts with HTTP/2 connection preface (h2c detection)
pub fn is_h2c_preface(data: &[u8]) -> bool {
    data.len() >= CONNECTION_PREFACE.len() && &data[..CONNECTION_PREFACE.len()] == CONNECTION_PREFACE
}

/// The frame types the stream state machine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Data = frame_type::DATA,
    Headers = frame_type::HEADERS,
    Priority = frame_type::PRIORITY,
    RstStream = frame_type::RST_STREAM,
    Settings = frame_type::SETTINGS,
    PushPromise = frame_type::PUSH_PROMISE,
    Ping = frame_type::PING,
    GoAway = frame_type::GOAWAY,
    WindowUpdate = frame_type::WINDOW_UPDATE,
    Continuation = frame_type::CONTINUATION,
    AltSvc = frame_type::ALTSVC,
    Origin = frame_type::ORIGIN,
}

impl FrameType {
    pub const ALL: [FrameType; 12] = [
        FrameType::Data,
        FrameType::Headers,
        FrameType::Priority,
        FrameType::RstStream,
        FrameType::Settings,
        FrameType::PushPromise,
        FrameType::Ping,
        FrameType::GoAway,
        FrameType::WindowUpdate,
        FrameType::Continuation,
        FrameType::AltSvc,
        FrameType::Origin,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| *t as u8 == v)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Data => "DATA",
            Self::Headers => "HEADERS",
            Self::Priority => "PRIORITY",
            Self::RstStream => "RST_STREAM",
            Self::Settings => "SETTINGS",
            Self::PushPromise => "PUSH_PROMISE",
            Self::Ping => "PING",
            Self::GoAway => "GOAWAY",
            Self::WindowUpdate => "WINDOW_UPDATE",
            Self::Continuation => "CONTINUATION",
            Self::AltSvc => "ALTSVC",
            Self::Origin => "ORIGIN",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed HTTP/2 frame header (9 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2FrameHeader {
    pub length: u32,      // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,   // 31 bits (high bit reserved)
}

impl H2FrameHeader {
    /// Parse a 9-byte frame header
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }

        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let frame_type = data[3];
        let flags = data[4];
        let stream_id = u32::from_be_bytes([data[5], data[6], data[7], data[8]]);
        let stream_id = stream_id & 0x7FFFFFFF; // Clear reserved bit

        Some(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    /// Write the 9-byte header, clearing the reserved bit.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_uint(u64::from(self.length & 0x00FF_FFFF), 3);
        dst.put_u8(self.frame_type);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id & 0x7FFFFFFF);
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length as usize
    }

    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }

    /// END_STREAM is only defined on DATA and HEADERS.
    pub fn is_end_stream(&self) -> bool {
        matches!(self.frame_type, frame_type::DATA | frame_type::HEADERS)
            && self.flags & flags::END_STREAM != 0
    }

    /// END_HEADERS is only defined on HEADERS, PUSH_PROMISE and CONTINUATION.
    pub fn is_end_headers(&self) -> bool {
        matches!(
            self.frame_type,
            frame_type::HEADERS | frame_type::PUSH_PROMISE | frame_type::CONTINUATION
        ) && self.flags & flags::END_HEADERS != 0
    }

    /// ACK is only defined on SETTINGS and PING.
    pub fn is_ack(&self) -> bool {
        matches!(self.frame_type, frame_type::SETTINGS | frame_type::PING)
            && self.flags & flags::ACK != 0
    }
}

/// Stream dependency carried by PRIORITY frames and prioritized HEADERS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u8,
}

impl Priority {
    fn parse(data: &[u8]) -> Self {
        let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        Self {
            exclusive: raw & 0x8000_0000 != 0,
            dependency: raw & 0x7FFF_FFFF,
            weight: data[4],
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        let mut raw = self.dependency & 0x7FFF_FFFF;
        if self.exclusive {
            raw |= 0x8000_0000;
        }
        dst.put_u32(raw);
        dst.put_u8(self.weight);
    }
}

/// Type-specific payload of a frame, with padding and priority fields
/// already stripped from header blocks and DATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    Data { data: Bytes },
    Headers { priority: Option<Priority>, block: Bytes },
    Priority(Priority),
    RstStream { error_code: u32 },
    Settings { settings: Vec<(u16, u32)> },
    PushPromise { promised_stream_id: u32, block: Bytes },
    Ping { data: [u8; 8] },
    GoAway { last_stream_id: u32, error_code: u32, debug_data: Bytes },
    WindowUpdate { increment: u32 },
    Continuation { block: Bytes },
    /// ALTSVC, ORIGIN and unrecognized types; carried opaquely.
    Unknown { payload: Bytes },
}

/// One HTTP/2 frame: the header as seen on the wire plus its parsed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: H2FrameHeader,
    kind: FrameKind,
}

impl Frame {
    fn build(frame_type: u8, flags: u8, stream_id: u32, kind: FrameKind) -> Self {
        let mut frame = Self {
            header: H2FrameHeader {
                length: 0,
                frame_type,
                flags,
                stream_id: stream_id & 0x7FFFFFFF,
            },
            kind,
        };
        frame.header.length = frame.payload_len() as u32;
        frame
    }

    pub fn data(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        let f = if end_stream { flags::END_STREAM } else { 0 };
        Self::build(frame_type::DATA, f, stream_id, FrameKind::Data { data })
    }

    pub fn headers(stream_id: u32, block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        let mut f = 0;
        if end_stream {
            f |= flags::END_STREAM;
        }
        if end_headers {
            f |= flags::END_HEADERS;
        }
        Self::build(
            frame_type::HEADERS,
            f,
            stream_id,
            FrameKind::Headers {
                priority: None,
                block,
            },
        )
    }

    pub fn priority(stream_id: u32, priority: Priority) -> Self {
        Self::build(frame_type::PRIORITY, 0, stream_id, FrameKind::Priority(priority))
    }

    pub fn continuation(stream_id: u32, block: Bytes, end_headers: bool) -> Self {
        let f = if end_headers { flags::END_HEADERS } else { 0 };
        Self::build(
            frame_type::CONTINUATION,
            f,
            stream_id,
            FrameKind::Continuation { block },
        )
    }

    pub fn rst_stream(stream_id: u32, error_code: ErrorCode) -> Self {
        Self::build(
            frame_type::RST_STREAM,
            0,
            stream_id,
            FrameKind::RstStream {
                error_code: error_code.as_u32(),
            },
        )
    }

    pub fn settings(settings: Vec<(u16, u32)>) -> Self {
        Self::build(frame_type::SETTINGS, 0, 0, FrameKind::Settings { settings })
    }

    pub fn settings_ack() -> Self {
        Self::build(
            frame_type::SETTINGS,
            flags::ACK,
            0,
            FrameKind::Settings {
                settings: Vec::new(),
            },
        )
    }

    pub fn push_promise(
        stream_id: u32,
        promised_stream_id: u32,
        block: Bytes,
        end_headers: bool,
    ) -> Self {
        let f = if end_headers { flags::END_HEADERS } else { 0 };
        Self::build(
            frame_type::PUSH_PROMISE,
            f,
            stream_id,
            FrameKind::PushPromise {
                promised_stream_id: promised_stream_id & 0x7FFFFFFF,
                block,
            },
        )
    }

    pub fn ping(ack: bool, data: [u8; 8]) -> Self {
        let f = if ack { flags::ACK } else { 0 };
        Self::build(frame_type::PING, f, 0, FrameKind::Ping { data })
    }

    pub fn go_away(last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Self {
        Self::build(
            frame_type::GOAWAY,
            0,
            0,
            FrameKind::GoAway {
                last_stream_id: last_stream_id & 0x7FFFFFFF,
                error_code: error_code.as_u32(),
                debug_data,
            },
        )
    }

    /// stream_id=0 updates connection-level window, otherwise stream-level
    pub fn window_update(stream_id: u32, increment: u32) -> Self {
        Self::build(
            frame_type::WINDOW_UPDATE,
            0,
            stream_id,
            FrameKind::WindowUpdate {
                increment: increment & 0x7FFFFFFF,
            },
        )
    }

    pub fn header(&self) -> &H2FrameHeader {
        &self.header
    }

    pub fn kind(&self) -> &FrameKind {
        &self.kind
    }

    pub fn into_kind(self) -> FrameKind {
        self.kind
    }

    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        self.header.kind()
    }

    /// Length of the payload this frame encodes to (no padding is ever sent).
    fn payload_len(&self) -> usize {
        match &self.kind {
            FrameKind::Data { data } => data.len(),
            FrameKind::Headers { priority, block } => {
                block.len() + if priority.is_some() { 5 } else { 0 }
            }
            FrameKind::Priority(_) => 5,
            FrameKind::RstStream { .. } => 4,
            FrameKind::Settings { settings } => settings.len() * 6,
            FrameKind::PushPromise { block, .. } => 4 + block.len(),
            FrameKind::Ping { .. } => 8,
            FrameKind::GoAway { debug_data, .. } => 8 + debug_data.len(),
            FrameKind::WindowUpdate { .. } => 4,
            FrameKind::Continuation { block } => block.len(),
            FrameKind::Unknown { payload } => payload.len(),
        }
    }

    /// Append the wire encoding of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        let mut header = self.header;
        header.length = self.payload_len() as u32;
        header.flags &= !flags::PADDED;
        header.flags = match &self.kind {
            FrameKind::Headers { priority: Some(_), .. } => header.flags | flags::PRIORITY,
            FrameKind::Headers { priority: None, .. } => header.flags & !flags::PRIORITY,
            _ => header.flags,
        };
        dst.reserve(header.total_size());
        header.encode(dst);

        match &self.kind {
            FrameKind::Data { data } => dst.put_slice(data),
            FrameKind::Headers { priority, block } => {
                if let Some(priority) = priority {
                    priority.encode(dst);
                }
                dst.put_slice(block);
            }
            FrameKind::Priority(priority) => priority.encode(dst),
            FrameKind::RstStream { error_code } => dst.put_u32(*error_code),
            FrameKind::Settings { settings } => {
                for (id, value) in settings {
                    dst.put_u16(*id);
                    dst.put_u32(*value);
                }
            }
            FrameKind::PushPromise {
                promised_stream_id,
                block,
            } => {
                dst.put_u32(*promised_stream_id & 0x7FFFFFFF);
                dst.put_slice(block);
            }
            FrameKind::Ping { data } => dst.put_slice(data),
            FrameKind::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                dst.put_u32(*last_stream_id & 0x7FFFFFFF);
                dst.put_u32(*error_code);
                dst.put_slice(debug_data);
            }
            FrameKind::WindowUpdate { increment } => dst.put_u32(*increment & 0x7FFFFFFF),
            FrameKind::Continuation { block } => dst.put_slice(block),
            FrameKind::Unknown { payload } => dst.put_slice(payload),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Serialize this frame onto `writer`.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), H2Error>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.to_bytes()).await?;
        Ok(())
    }
}

fn frame_size_error(reason: String) -> H2Error {
    H2Error::connection(ErrorCode::FrameSizeError, reason)
}

fn protocol_error(reason: String) -> H2Error {
    H2Error::connection(ErrorCode::ProtocolError, reason)
}

/// Try to take one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` until the whole frame is buffered. A declared length
/// above `max_frame_size` is rejected as soon as the header is readable.
pub fn decode_frame(buf: &mut BytesMut, max_frame_size: u32) -> Result<Option<Frame>, H2Error> {
    let header = match H2FrameHeader::parse(buf) {
        Some(h) => h,
        None => return Ok(None),
    };
    if header.length > max_frame_size {
        return Err(frame_size_error(format!(
            "frame of {} bytes exceeds SETTINGS_MAX_FRAME_SIZE {}",
            header.length, max_frame_size
        )));
    }
    if buf.len() < header.total_size() {
        return Ok(None);
    }

    let mut raw = buf.split_to(header.total_size());
    raw.advance(FRAME_HEADER_LEN);
    let kind = parse_payload(&header, raw.freeze())?;
    Ok(Some(Frame { header, kind }))
}

fn parse_payload(header: &H2FrameHeader, payload: Bytes) -> Result<FrameKind, H2Error> {
    match header.frame_type {
        frame_type::DATA => Ok(FrameKind::Data {
            data: strip_padding(header, payload, "DATA")?,
        }),
        frame_type::HEADERS => {
            let mut block = strip_padding(header, payload, "HEADERS")?;
            let priority = if header.flags & flags::PRIORITY != 0 {
                if block.len() < 5 {
                    return Err(frame_size_error(
                        "PRIORITY HEADERS frame with insufficient data".to_string(),
                    ));
                }
                let priority = Priority::parse(&block[..5]);
                block.advance(5);
                Some(priority)
            } else {
                None
            };
            Ok(FrameKind::Headers { priority, block })
        }
        frame_type::PRIORITY => {
            if payload.len() != 5 {
                return Err(frame_size_error(format!(
                    "PRIORITY frame must be 5 bytes, got {}",
                    payload.len()
                )));
            }
            Ok(FrameKind::Priority(Priority::parse(&payload)))
        }
        frame_type::RST_STREAM => {
            if payload.len() != 4 {
                return Err(frame_size_error("RST_STREAM frame too short".to_string()));
            }
            Ok(FrameKind::RstStream {
                error_code: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            })
        }
        frame_type::SETTINGS => {
            if header.is_ack() && !payload.is_empty() {
                return Err(frame_size_error("SETTINGS ACK with a payload".to_string()));
            }
            if payload.len() % 6 != 0 {
                return Err(frame_size_error(format!(
                    "SETTINGS payload of {} bytes is not a multiple of 6",
                    payload.len()
                )));
            }
            // Each entry is 6 bytes: u16 id + u32 value
            let settings = payload
                .chunks_exact(6)
                .map(|entry| {
                    let id = u16::from_be_bytes([entry[0], entry[1]]);
                    let value = u32::from_be_bytes([entry[2], entry[3], entry[4], entry[5]]);
                    (id, value)
                })
                .collect();
            Ok(FrameKind::Settings { settings })
        }
        frame_type::PUSH_PROMISE => {
            let mut block = strip_padding(header, payload, "PUSH_PROMISE")?;
            if block.len() < 4 {
                return Err(frame_size_error("PUSH_PROMISE frame too short".to_string()));
            }
            let promised_stream_id = block.get_u32() & 0x7FFFFFFF;
            Ok(FrameKind::PushPromise {
                promised_stream_id,
                block,
            })
        }
        frame_type::PING => {
            if payload.len() != 8 {
                return Err(frame_size_error(format!(
                    "PING frame must be 8 bytes, got {}",
                    payload.len()
                )));
            }
            let mut data = [0u8; 8];
            data.copy_from_slice(&payload);
            Ok(FrameKind::Ping { data })
        }
        frame_type::GOAWAY => {
            if payload.len() < 8 {
                return Err(frame_size_error("GOAWAY frame too short".to_string()));
            }
            let mut payload = payload;
            let last_stream_id = payload.get_u32() & 0x7FFFFFFF;
            let error_code = payload.get_u32();
            Ok(FrameKind::GoAway {
                last_stream_id,
                error_code,
                debug_data: payload,
            })
        }
        frame_type::WINDOW_UPDATE => {
            if payload.len() != 4 {
                return Err(frame_size_error(format!(
                    "WINDOW_UPDATE frame must be 4 bytes, got {}",
                    payload.len()
                )));
            }
            let increment =
                u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFFFFFF;
            Ok(FrameKind::WindowUpdate { increment })
        }
        frame_type::CONTINUATION => Ok(FrameKind::Continuation { block: payload }),
        _ => Ok(FrameKind::Unknown { payload }),
    }
}

/// Remove the pad-length octet and trailing padding when PADDED is set.
fn strip_padding(header: &H2FrameHeader, mut payload: Bytes, name: &str) -> Result<Bytes, H2Error> {
    if header.flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(frame_size_error(format!("PADDED {} frame with no payload", name)));
    }
    let pad_length = payload[0] as usize;
    if pad_length >= payload.len() {
        return Err(protocol_error(format!("Invalid padding length in {} frame", name)));
    }
    payload.truncate(payload.len() - pad_length);
    payload.advance(1);
    Ok(payload)
}

/// Reads frames off a transport, buffering partial frames between reads.
#[derive(Debug)]
pub struct FrameReader<R> {
    io: R,
    buffer: BytesMut,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(io: R) -> Self {
        Self {
            io,
            buffer: BytesMut::with_capacity(16 * 1024),
        }
    }

    /// Consume and verify the 24-byte client connection preface.
    pub async fn read_preface(&mut self) -> Result<(), H2Error> {
        while self.buffer.len() < CONNECTION_PREFACE.len() {
            if self.io.read_buf(&mut self.buffer).await? == 0 {
                return Err(H2Error::InvalidPreface);
            }
        }
        if !is_h2c_preface(&self.buffer) {
            return Err(H2Error::InvalidPreface);
        }
        self.buffer.advance(CONNECTION_PREFACE.len());
        Ok(())
    }

    /// Read the next frame. `Ok(None)` means the transport closed cleanly
    /// between frames.
    pub async fn next_frame(&mut self, max_frame_size: u32) -> Result<Option<Frame>, H2Error> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buffer, max_frame_size)? {
                return Ok(Some(frame));
            }
            if self.io.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "transport closed mid-frame",
                )
                .into());
            }
        }
    }
}
