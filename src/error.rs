//! Error types shared by the codec, the stream state machine and the
//! connection dispatcher.
//!
//! Every protocol error carries its scope from the point where it is created:
//! a [`ErrorScope::Stream`] error names the stream it belongs to and may be
//! answered with RST_STREAM, a [`ErrorScope::Connection`] error is answered
//! with GOAWAY and ends the connection.

use std::fmt;

use thiserror::Error;

/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    /// Map a wire value to a known code. Unknown codes are treated as
    /// INTERNAL_ERROR (RFC 7540 Section 7).
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            _ => Self::InternalError,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NoError => "NO_ERROR",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
            Self::FlowControlError => "FLOW_CONTROL_ERROR",
            Self::SettingsTimeout => "SETTINGS_TIMEOUT",
            Self::StreamClosed => "STREAM_CLOSED",
            Self::FrameSizeError => "FRAME_SIZE_ERROR",
            Self::RefusedStream => "REFUSED_STREAM",
            Self::Cancel => "CANCEL",
            Self::CompressionError => "COMPRESSION_ERROR",
            Self::ConnectError => "CONNECT_ERROR",
            Self::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            Self::InadequateSecurity => "INADEQUATE_SECURITY",
            Self::Http11Required => "HTTP_1_1_REQUIRED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which part of the connection an error terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    Connection,
    Stream(u32),
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => f.write_str("connection"),
            Self::Stream(id) => write!(f, "stream {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum H2Error {
    /// A protocol violation, answered with GOAWAY or RST_STREAM.
    #[error("{scope} error {code}: {reason}")]
    Protocol {
        scope: ErrorScope,
        code: ErrorCode,
        reason: String,
    },
    #[error("invalid connection preface")]
    InvalidPreface,
    /// Local settings that cannot be advertised.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The outbound queue is shut; nothing more can be sent.
    #[error("outbound queue closed")]
    QueueClosed,
    #[error("IO error {0}")]
    Io(#[from] std::io::Error),
}

impl H2Error {
    pub fn connection(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Protocol {
            scope: ErrorScope::Connection,
            code,
            reason: reason.into(),
        }
    }

    pub fn stream(stream_id: u32, code: ErrorCode, reason: impl Into<String>) -> Self {
        Self::Protocol {
            scope: ErrorScope::Stream(stream_id),
            code,
            reason: reason.into(),
        }
    }

    /// The wire error code, if this error is a protocol error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn scope(&self) -> Option<ErrorScope> {
        match self {
            Self::Protocol { scope, .. } => Some(*scope),
            _ => None,
        }
    }

    /// The diagnostic text carried in GOAWAY debug data.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Protocol { reason, .. } => Some(reason.as_str()),
            _ => None,
        }
    }
}
