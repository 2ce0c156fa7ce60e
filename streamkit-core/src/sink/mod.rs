//! `Sink` trait and the four concrete transports.

pub mod content_stream;
pub mod file;
pub mod rtmp;
pub mod srt;

use crate::error::Result;
use crate::model::Packet;

/// Destination for muxed container packets. Every sink is driven
/// exclusively by the pipeline's sink task; none are `Sync` across tasks on
/// purpose (a sink belongs to exactly one endpoint).
///
/// Contract:
/// - `write` may only be called between `start_stream` and `stop_stream`.
/// - `open` may be called again after `close` to reconnect.
/// - A `TransientIo` error from `write` means the sink is now "in error":
///   every subsequent `write` is dropped (not retried) until the caller
///   calls `open` again.
#[async_trait::async_trait]
pub trait Sink: Send {
    /// Acquire the underlying transport (open the file, connect the socket).
    async fn open(&mut self) -> Result<()>;

    /// Write one packet. Ordering within a sink must match the order
    /// `write` was called.
    async fn write(&mut self, packet: &Packet) -> Result<()>;

    /// Notify the sink that muxing is about to begin (e.g. to reset
    /// interleave buffers).
    async fn start_stream(&mut self) -> Result<()>;

    /// Flush and notify the sink that no more packets are coming this
    /// session.
    async fn stop_stream(&mut self) -> Result<()>;

    /// Release the transport. Idempotent.
    async fn close(&mut self) -> Result<()>;
}
