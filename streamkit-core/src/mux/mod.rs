//! Muxer trait and the three concrete container implementations. Concrete
//! muxers are variants behind one small trait rather than a class
//! hierarchy.

pub mod flv;
pub mod mp4;
pub mod ts;

use crate::error::Result;
use crate::model::{CodecConfig, Frame, Packet};

/// Unifies MPEG-TS, fragmented MP4, and FLV behind one call surface so the
/// orchestrator (`pipeline.rs`) doesn't need to know which container it's
/// driving.
///
/// Contract:
/// - No output before `start_stream`, none after `stop_stream` returns.
/// - Per-track output preserves input frame order.
/// - The first frame delivered for a video track must be a keyframe;
///   violations are `MuxerInternal` and the offending frame is dropped.
pub trait Muxer: Send {
    /// Register one elementary stream, returning its track id (1-based,
    /// never 0). Must be called before `start_stream`.
    fn add_stream(&mut self, config: CodecConfig) -> Result<u32>;

    /// Emit whatever initialization output the container requires (PAT/PMT/
    /// SDT burst, `ftyp`+`moov`, or FLV header + `onMetaData`).
    fn start_stream(&mut self) -> Result<Vec<Packet>>;

    /// Feed one encoded frame for `track_id`, returning zero or more
    /// container packets.
    fn write(&mut self, track_id: u32, frame: Frame) -> Result<Vec<Packet>>;

    /// Flush any buffered state (trailing `mfra`, TS null padding, closing
    /// the FLV stream) and return the final packets. Idempotent.
    fn stop_stream(&mut self) -> Result<Vec<Packet>>;
}
