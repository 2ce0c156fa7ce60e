//! Core data model: `Frame` (encoder output), `Packet` (muxer output),
//! codec configuration, and container-side track/service/segment
//! bookkeeping.

use crate::buffer_pool::PooledBuffer;
use std::fmt;

/// Elementary stream mime type. Only these codecs are supported; anything
/// else is rejected with `BadParameter` at `add_stream`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mime {
    H264,
    H265,
    Aac,
    Opus,
}

impl Mime {
    pub fn is_video(self) -> bool {
        matches!(self, Mime::H264 | Mime::H265)
    }

    pub fn is_audio(self) -> bool {
        matches!(self, Mime::Aac | Mime::Opus)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mime::H264 => "video/avc",
            Mime::H265 => "video/hevc",
            Mime::Aac => "audio/mp4a-latm",
            Mime::Opus => "audio/opus",
        }
    }
}

impl fmt::Display for Mime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Owned byte payload: pool-backed (hot path), a plain `Vec<u8>` (codec
/// config blobs, test fixtures), or a refcounted `Shared` view used by
/// `CombineEndpoint` to fan one frame out to several constituents without
/// copying the underlying bytes per constituent. All three implement
/// `AsRef<[u8]>`.
pub enum Payload {
    Pooled(PooledBuffer),
    Owned(Vec<u8>),
    Shared(bytes::Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts to a cheaply cloneable `Shared` payload, copying the bytes
    /// once if this payload isn't already refcounted.
    pub fn into_shared(self) -> bytes::Bytes {
        match self {
            Payload::Shared(b) => b,
            Payload::Pooled(b) => bytes::Bytes::copy_from_slice(b.as_ref()),
            Payload::Owned(v) => bytes::Bytes::from(v),
        }
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        match self {
            Payload::Pooled(b) => b.as_ref(),
            Payload::Owned(v) => v.as_slice(),
            Payload::Shared(b) => b.as_ref(),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Owned(v)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("len", &self.len()).finish()
    }
}

/// Resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub w: u32,
    pub h: u32,
}

/// Audio codec configuration. Immutable once a track is created.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    pub mime: Mime,
    pub start_bitrate: u32,
    pub sample_rate: u32,
    pub channel_config: u8,
    /// Bytes per sample (2 for PCM16, irrelevant for compressed formats but
    /// kept for parity with the source API surface).
    pub byte_format: u8,
    pub profile: Option<i32>,
}

/// Video codec configuration. Immutable once a track is created.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoConfig {
    pub mime: Mime,
    pub start_bitrate: u32,
    pub resolution: Resolution,
    pub fps: u32,
    pub profile: Option<i32>,
    pub level: Option<i32>,
    pub gop_s: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodecConfig {
    Audio(AudioConfig),
    Video(VideoConfig),
}

impl CodecConfig {
    pub fn mime(&self) -> Mime {
        match self {
            CodecConfig::Audio(a) => a.mime,
            CodecConfig::Video(v) => v.mime,
        }
    }

    pub fn as_video(&self) -> Option<&VideoConfig> {
        match self {
            CodecConfig::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioConfig> {
        match self {
            CodecConfig::Audio(a) => Some(a),
            _ => None,
        }
    }
}

/// One encoded access unit, produced by an encoder.
pub struct Frame {
    pub stream_id: u32,
    pub mime: Mime,
    pub payload: Payload,
    pub pts_us: i64,
    pub dts_us: i64,
    pub is_key: bool,
    pub is_codec_config: bool,
    /// Codec-configuration segments (SPS/PPS/VPS, AudioSpecificConfig,
    /// Opus identification header) attached to the first keyframe, per the
    /// spec's "either (a) or (b)" invariant.
    pub extra: Vec<Vec<u8>>,
}

impl Frame {
    pub fn new(stream_id: u32, mime: Mime, payload: Payload, pts_us: i64, is_key: bool) -> Self {
        Frame {
            stream_id,
            mime,
            payload,
            pts_us,
            dts_us: pts_us,
            is_key,
            is_codec_config: false,
            extra: Vec::new(),
        }
    }

    pub fn with_dts(mut self, dts_us: i64) -> Self {
        self.dts_us = dts_us;
        self
    }

    pub fn with_extra(mut self, extra: Vec<Vec<u8>>) -> Self {
        self.extra = extra;
        self
    }

    pub fn codec_config(stream_id: u32, mime: Mime, payload: Payload, pts_us: i64) -> Self {
        Frame {
            stream_id,
            mime,
            payload,
            pts_us,
            dts_us: pts_us,
            is_key: false,
            is_codec_config: true,
            extra: Vec::new(),
        }
    }

    /// Builds an independent `Frame` sharing this one's payload bytes via a
    /// refcounted clone, for `CombineEndpoint` fan-out. Consumes `self`
    /// since the payload may need a one-time copy into `Payload::Shared`;
    /// callers fanning out to N constituents should call this for the
    /// first N-1 and move the original frame into the last.
    pub fn share(&mut self) -> Frame {
        let shared = std::mem::replace(&mut self.payload, Payload::Owned(Vec::new())).into_shared();
        self.payload = Payload::Shared(shared.clone());
        Frame {
            stream_id: self.stream_id,
            mime: self.mime,
            payload: Payload::Shared(shared),
            pts_us: self.pts_us,
            dts_us: self.dts_us,
            is_key: self.is_key,
            is_codec_config: self.is_codec_config,
            extra: self.extra.clone(),
        }
    }
}

/// Classification of a container packet; needed by sinks that interleave by
/// timestamp (notably the RTMP sink).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Audio,
    Video,
    Other,
}

/// One container output unit, produced by a muxer.
#[derive(Debug)]
pub struct Packet {
    pub payload: Payload,
    /// Monotonically non-decreasing timestamp, used only for bitrate
    /// accounting and RTMP interleave ordering.
    pub ts_us: i64,
    pub kind: PacketKind,
}

impl Packet {
    pub fn new(payload: Payload, ts_us: i64, kind: PacketKind) -> Self {
        Packet { payload, ts_us, kind }
    }
}

/// Container-side descriptor for one elementary stream inside one muxer.
pub struct Track {
    /// Unique within the muxer, 1-based, never 0.
    pub id: u32,
    pub config: CodecConfig,
    /// Muxer-chosen ticks per second.
    pub timescale: u32,
    pub num_samples: u64,
    pub first_pts_us: Option<i64>,
    pub last_pts_us: Option<i64>,
    pub last_dts_us: Option<i64>,
    /// Index (sample number) of every sync sample written so far.
    pub keyframe_index: Vec<u64>,
    /// Stored codec-config byte segments (SPS/PPS/VPS/AudioSpecificConfig).
    pub extra: Vec<Vec<u8>>,
    /// Set once the first sample has been written; used to enforce the
    /// "first video frame must be a keyframe" invariant.
    pub seen_first_sample: bool,
}

impl Track {
    pub fn new(id: u32, config: CodecConfig, timescale: u32) -> Self {
        Track {
            id,
            config,
            timescale,
            num_samples: 0,
            first_pts_us: None,
            last_pts_us: None,
            last_dts_us: None,
            keyframe_index: Vec::new(),
            extra: Vec::new(),
            seen_first_sample: false,
        }
    }

    pub fn is_video(&self) -> bool {
        self.config.mime().is_video()
    }

    pub fn record_sample(&mut self, pts_us: i64, is_key: bool) {
        if self.first_pts_us.is_none() {
            self.first_pts_us = Some(pts_us);
        }
        self.last_pts_us = Some(pts_us);
        if is_key {
            self.keyframe_index.push(self.num_samples);
        }
        self.num_samples += 1;
        self.seen_first_sample = true;
    }
}

/// MPEG-TS program description.
pub struct Service {
    pub service_id: u16,
    pub service_type: u8,
    pub name: String,
    pub provider_name: String,
    pub pcr_pid: u16,
    pub track_ids: Vec<u32>,
}

/// Per-track chunk accumulator for one fragmented-MP4 segment.
#[derive(Default)]
pub struct SegmentChunk {
    pub samples: Vec<SampleEntry>,
    pub data: Vec<u8>,
}

/// One sample queued in the current MP4 segment, pre-`trun` emission.
pub struct SampleEntry {
    pub duration: u32,
    pub size: u32,
    pub is_sync: bool,
    pub composition_offset: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_classification() {
        assert!(Mime::H264.is_video());
        assert!(Mime::H265.is_video());
        assert!(Mime::Aac.is_audio());
        assert!(Mime::Opus.is_audio());
        assert!(!Mime::Aac.is_video());
    }

    #[test]
    fn frame_default_dts_equals_pts() {
        let f = Frame::new(1, Mime::H264, Payload::Owned(vec![0u8; 4]), 1000, true);
        assert_eq!(f.dts_us, 1000);
    }

    #[test]
    fn track_records_keyframe_index() {
        let cfg = CodecConfig::Video(VideoConfig {
            mime: Mime::H264,
            start_bitrate: 2_000_000,
            resolution: Resolution { w: 1920, h: 1080 },
            fps: 30,
            profile: None,
            level: None,
            gop_s: 2.0,
        });
        let mut track = Track::new(1, cfg, 90_000);
        track.record_sample(0, true);
        track.record_sample(3000, false);
        track.record_sample(6000, true);
        assert_eq!(track.keyframe_index, vec![0, 2]);
        assert_eq!(track.num_samples, 3);
    }
}
