//! Core library: encoded-frame pipeline, container muxers, sinks, and a
//! bitrate regulator for live audio/video broadcast.
//!
//! `Pipeline` (see `pipeline`) is the orchestrator most callers reach for
//! directly; `mux`, `sink`, and `endpoint` are exposed for callers that want
//! to compose their own `StreamEndpoint` without going through a pipeline.

pub mod bitstream;
pub mod buffer_pool;
pub mod clock;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod model;
pub mod mux;
pub mod pipeline;
pub mod regulator;
pub mod sink;

pub use error::{Result, StreamkitError};
pub use model::{AudioConfig, CodecConfig, Frame, Mime, Packet, Payload, Resolution, VideoConfig};
pub use pipeline::Pipeline;
