//! h2-mux: a small HTTP/2 server engine
//!
//! One transport connection carries many independent streams. This crate
//! provides the pieces that make that work:
//!
//! - **Frame codec** (`h2_codec`): frame values to and from bytes
//! - **HPACK** (`hpack`): header compression via fluke-hpack
//! - **Stream state machine** (`state`): RFC 7540 Section 5.1 as a literal table
//! - **Flow control** (`window`): connection and stream window accounting
//! - **Dispatcher** (`connection`): the inbound loop and the single writer
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use h2_mux::{serve, Config, H2Error, H2Header, Handler, StreamHandle, StreamRequest};
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Handler for Hello {
//!     async fn handle(&self, _req: StreamRequest, stream: StreamHandle) -> Result<(), H2Error> {
//!         let headers = [H2Header::new(":status", "200")];
//!         stream.send_response(&headers, Bytes::from_static(b"hello")).await
//!     }
//! }
//!
//! # async fn run(socket: tokio::io::DuplexStream) -> Result<(), H2Error> {
//! serve(socket, Config::default(), Arc::new(Hello)).await
//! # }
//! ```
//!
//! # Architecture
//!
//! Per connection there is one inbound loop (the task calling [`serve`]),
//! one writer task, and one payload assembler task per client stream. All
//! outbound frames go through one ordered queue, so frames from different
//! streams never interleave on the wire.
//!
//! It does NOT provide:
//! - Listening sockets or TLS (bring a connected transport)
//! - HTTP/1.1 upgrade
//! - Priority scheduling

pub mod config;
pub mod connection;
pub mod error;
pub mod h2_codec;
pub mod hpack;
pub mod server;
pub mod settings;
pub mod state;
mod store;
pub mod stream;
pub mod window;

pub use config::Config;
pub use connection::{Connection, FrameWriter, MAX_HEADER_BLOCK_SIZE};
pub use error::{ErrorCode, ErrorScope, H2Error};
pub use h2_codec::{
    decode_frame, flags, frame_type, is_h2c_preface, Frame, FrameKind, FrameReader, FrameType,
    H2FrameHeader, Priority, CONNECTION_PREFACE,
};
pub use hpack::{H2Header, HpackDecoder, HpackEncoder};
pub use server::{serve, write_preface};
pub use settings::{PeerSettings, SettingId, SettingsMap};
pub use state::{transition, Direction, StreamState, TransitionError};
pub use stream::{Handler, Inbound, Stream, StreamHandle, StreamRequest};
pub use window::{Window, WindowError};
