//! HPACK: Header Compression for HTTP/2 (RFC 7541)
//!
//! Thin wrapper around `fluke-hpack`. Both tables are per connection: the
//! decoder is driven by the inbound loop in wire order and the encoder is
//! shared by every stream behind the connection's encoder lock.

use std::fmt;

use bytes::Bytes;

use crate::error::{ErrorCode, H2Error};

/// One header field. Names and values that are not UTF-8 are decoded
/// lossily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Header {
    pub name: String,
    pub value: String,
}

impl H2Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Pseudo-headers (`:method`, `:path`, `:status`, ...) start with a colon.
    pub fn is_pseudo(&self) -> bool {
        self.name.starts_with(':')
    }
}

impl From<(Vec<u8>, Vec<u8>)> for H2Header {
    fn from((name, value): (Vec<u8>, Vec<u8>)) -> Self {
        let text = |raw: Vec<u8>| {
            String::from_utf8(raw).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
        };
        Self {
            name: text(name),
            value: text(value),
        }
    }
}

/// First value for `name` in a header list.
pub fn find<'a>(headers: &'a [H2Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name == name)
        .map(|h| h.value.as_str())
}

/// Inbound header compression context.
pub struct HpackDecoder(fluke_hpack::Decoder<'static>);

impl fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HpackDecoder").finish_non_exhaustive()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self(fluke_hpack::Decoder::new())
    }

    /// Decode a complete header block. A block the decoder cannot parse
    /// leaves the dynamic table in an unknown state, so it is a connection
    /// COMPRESSION_ERROR.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<H2Header>, H2Error> {
        match self.0.decode(block) {
            Ok(fields) => Ok(fields.into_iter().map(H2Header::from).collect()),
            Err(e) => Err(H2Error::connection(
                ErrorCode::CompressionError,
                format!("header block of {} bytes rejected: {e:?}", block.len()),
            )),
        }
    }
}

/// Outbound header compression context.
pub struct HpackEncoder(fluke_hpack::Encoder<'static>);

impl fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HpackEncoder").finish_non_exhaustive()
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self(fluke_hpack::Encoder::new())
    }

    /// Encode headers into one header block. The caller must put the block
    /// on the wire before encoding another, since the peer's decoder applies
    /// table updates in order.
    pub fn encode(&mut self, headers: &[H2Header]) -> Bytes {
        let block = self
            .0
            .encode(headers.iter().map(|h| (h.name.as_bytes(), h.value.as_bytes())));
        Bytes::from(block)
    }
}
