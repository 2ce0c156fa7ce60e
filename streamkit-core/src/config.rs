//! Configuration structs for the pipeline, muxers, regulator, and channels.
//!
//! Every struct here derives `Deserialize` so a caller can embed it in its
//! own TOML/JSON configuration; `streamkit-cli` is where the actual file
//! loading lives.

use serde::{Deserialize, Serialize};

/// Per-channel backpressure policy. `Block` is kept as an explicit opt-in
/// for callers that would rather apply backpressure to the producer than
/// drop frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    DropOldest,
    Block,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

/// Bounded-channel sizing between pipeline stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Producer -> muxing task channel depth, per stream.
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            capacity: 20,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

/// Container selection plus per-format knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum MuxerConfig {
    Ts {
        #[serde(default = "default_psi_cadence_ms")]
        psi_cadence_ms: u32,
        #[serde(default = "default_pcr_interval_ms")]
        pcr_interval_ms: u32,
    },
    Mp4 {
        #[serde(default = "default_segment_target_ms")]
        segment_target_ms: u32,
        #[serde(default = "default_write_mfra")]
        write_mfra: bool,
    },
    Flv {
        #[serde(default)]
        enhanced_hevc: bool,
    },
}

fn default_psi_cadence_ms() -> u32 {
    500
}

fn default_pcr_interval_ms() -> u32 {
    100
}

fn default_segment_target_ms() -> u32 {
    1000
}

fn default_write_mfra() -> bool {
    true
}

impl Default for MuxerConfig {
    fn default() -> Self {
        MuxerConfig::Ts {
            psi_cadence_ms: default_psi_cadence_ms(),
            pcr_interval_ms: default_pcr_interval_ms(),
        }
    }
}

/// Bitrate-regulator bounds and tick cadence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RegulatorConfig {
    pub period_ms: u32,
    pub min_video_bitrate: u32,
    pub max_video_bitrate: u32,
    pub min_audio_bitrate: u32,
    pub max_audio_bitrate: u32,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        RegulatorConfig {
            period_ms: 500,
            min_video_bitrate: 300_000,
            max_video_bitrate: 8_000_000,
            min_audio_bitrate: 32_000,
            max_audio_bitrate: 192_000,
        }
    }
}

/// Top-level configuration for one `Pipeline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub muxer: MuxerConfig,
    pub channel: ChannelConfig,
    pub regulator: Option<RegulatorConfig>,
    /// Timeout `stop_stream` waits for the muxing/sink tasks to drain
    /// before giving up.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

fn default_stop_timeout_ms() -> u64 {
    2000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            muxer: MuxerConfig::default(),
            channel: ChannelConfig::default(),
            regulator: None,
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}
