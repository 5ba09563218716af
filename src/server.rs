//! Handshake and the per-connection entry point.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::error::H2Error;
use crate::h2_codec::{FrameReader, CONNECTION_PREFACE};
use crate::stream::Handler;

/// Serve one HTTP/2 connection over an established transport.
///
/// Fails with [`H2Error::InvalidConfig`] before touching the transport if
/// the local settings are out of range. Otherwise reads the client preface,
/// starts the frame writer, sends our SETTINGS and runs the inbound loop
/// until the peer leaves or an error ends the connection. Every stream is closed and the writer drained before this
/// returns.
pub async fn serve<T>(io: T, config: Config, handler: Arc<dyn Handler>) -> Result<(), H2Error>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    config.validate()?;
    let (read_half, write_half) = tokio::io::split(io);
    let mut reader = FrameReader::new(read_half);
    reader.read_preface().await?;
    debug!("connection preface received");

    let (mut connection, writer) = Connection::new(reader, write_half, config, handler);
    let writer = tokio::spawn(writer.run());

    let result = match connection.send_settings().await {
        Ok(()) => connection.run().await,
        Err(err) => Err(err),
    };
    connection.close();

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(%err, "frame writer ended with error"),
        Err(err) => warn!(%err, "frame writer task failed"),
    }
    debug!(ok = result.is_ok(), "connection finished");
    result
}

/// Write the client connection preface. This is the peer's side of the
/// handshake, for clients and tests driving a server.
pub async fn write_preface<W>(io: &mut W) -> Result<(), H2Error>
where
    W: AsyncWrite + Unpin,
{
    io.write_all(CONNECTION_PREFACE).await?;
    Ok(())
}
