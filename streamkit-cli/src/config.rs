//! TOML configuration for the demo broadcaster binary, following the
//! teacher's `ConfigFile`/`ServerConfig` split: this struct is the on-disk
//! shape, with `Default` giving a config that runs out of the box against a
//! local file sink.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use streamkit_core::config::PipelineConfig;

/// Which sink the demo endpoint writes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkTarget {
    File {
        path: String,
    },
    Srt {
        remote_addr: SocketAddr,
        #[serde(default)]
        stream_id: Option<String>,
        #[serde(default = "default_latency_ms")]
        latency_ms: u32,
    },
    Rtmp {
        url: String,
    },
}

fn default_latency_ms() -> u32 {
    120
}

impl Default for SinkTarget {
    fn default() -> Self {
        SinkTarget::File { path: "stream.ts".into() }
    }
}

/// Cadence and bitrate of the synthetic AVC+AAC source (real capture/encode
/// is out of scope for this library).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_audio_sample_rate")]
    pub audio_sample_rate: u32,
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: u32,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: u32,
}

fn default_fps() -> u32 {
    30
}
fn default_audio_sample_rate() -> u32 {
    48_000
}
fn default_video_bitrate() -> u32 {
    1_500_000
}
fn default_audio_bitrate() -> u32 {
    128_000
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            fps: default_fps(),
            audio_sample_rate: default_audio_sample_rate(),
            video_bitrate: default_video_bitrate(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub sink: SinkTarget,
    #[serde(default)]
    pub source: SourceConfig,
}

impl CliConfig {
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_a_local_file() {
        let cfg = CliConfig::default();
        assert!(matches!(cfg.sink, SinkTarget::File { .. }));
        assert_eq!(cfg.source.fps, 30);
    }

    #[test]
    fn parses_srt_target_from_toml() {
        let toml_str = r#"
            [sink]
            kind = "srt"
            remote_addr = "127.0.0.1:9000"
        "#;
        let cfg: CliConfig = toml::from_str(toml_str).unwrap();
        match cfg.sink {
            SinkTarget::Srt { latency_ms, .. } => assert_eq!(latency_ms, 120),
            _ => panic!("expected Srt variant"),
        }
    }

    #[test]
    fn from_file_reads_and_parses_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamkit.toml");
        std::fs::write(&path, "[sink]\nkind = \"rtmp\"\nurl = \"rtmp://localhost/live\"\n").unwrap();

        let cfg = CliConfig::from_file(&path).unwrap();
        match cfg.sink {
            SinkTarget::Rtmp { url } => assert_eq!(url, "rtmp://localhost/live"),
            _ => panic!("expected Rtmp variant"),
        }
    }

    #[test]
    fn from_file_missing_path_is_an_io_error() {
        let err = CliConfig::from_file(std::path::Path::new("/nonexistent/streamkit.toml")).unwrap_err();
        assert!(matches!(err, crate::error::CliError::Io(_)));
    }
}
