use thiserror::Error;

/// Top-level error type returned by every public `streamkit-core` operation.
///
/// Variants map 1:1 onto the error-kind table: each kind carries its own
/// recovery policy, documented on the variant.
#[derive(Error, Debug)]
pub enum StreamkitError {
    /// Mis-typed descriptor, unsupported mime, or zero-length payload.
    /// Recovery: surface synchronously to the caller.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// `start_stream` called before any `add_stream`, or a registered mime
    /// is missing required configuration fields. Surfaced synchronously.
    #[error("unconfigured: {0}")]
    Unconfigured(String),

    /// Operation not permitted in the current lifecycle state. Surfaced
    /// synchronously.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Producer channel was full; the oldest queued frame was dropped.
    /// Recovery: log and continue, never returned to the caller as a hard
    /// failure (see `Pipeline::write`, which only logs this kind).
    #[error("channel overflow on stream {stream_id}, dropped oldest frame")]
    Overflow { stream_id: u32 },

    /// Sink write failed while open. Recovery: mark the sink "in error" and
    /// drop frames until the next successful `open`.
    #[error("transient I/O error: {0}")]
    TransientIo(#[source] std::io::Error),

    /// Transport socket closed remotely. Surfaced to the application via a
    /// callback/event channel; the caller decides whether to reconnect.
    #[error("connection lost")]
    ConnectionLost,

    /// Operation attempted on a released pipeline or closed sink/endpoint.
    /// Surfaced synchronously.
    #[error("closed")]
    Closed,

    /// Malformed encoded input (bad NAL, missing SPS, non-key first video
    /// frame, non-monotonic dts, ...). Recovery: log with context and drop
    /// the offending frame; the muxer re-synchronizes on the next keyframe.
    #[error("muxer internal error: {0}")]
    MuxerInternal(String),

    /// A lower-level I/O failure that is not classified as transient
    /// (e.g. failure to open a file sink).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A bitstream could not be parsed into the fields a decoder
    /// configuration record needs.
    #[error("bitstream error: {0}")]
    Bitstream(#[from] BitstreamError),
}

pub type Result<T> = std::result::Result<T, StreamkitError>;

/// Lower-level parsing failures inside the bitstream helpers, funneled into
/// `StreamkitError::Bitstream` at the muxer boundary via `#[from]`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BitstreamError {
    #[error("buffer too short: need at least {need} bytes, got {got}")]
    TooShort { need: usize, got: usize },

    #[error("no start code found")]
    NoStartCode,

    #[error("SPS NAL unit not found in codec config")]
    MissingSps,

    #[error("PPS NAL unit not found in codec config")]
    MissingPps,

    #[error("exp-Golomb read ran past the end of the bitstream")]
    BitReaderOverrun,

    #[error("unrecognized Opus codec-specific-data marker")]
    BadOpusCsd,

    #[error("unsupported profile/level combination: {0}")]
    UnsupportedProfile(String),
}
