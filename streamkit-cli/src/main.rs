//! Demo broadcaster binary: wires a synthetic AVC+AAC source through a
//! configurable muxer and sink, the runnable counterpart to the
//! `streamkit-core` library.

mod config;
mod error;
mod source;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamkit_core::clock::{Clock, SystemClock};
use streamkit_core::config::MuxerConfig;
use streamkit_core::endpoint::{Endpoint, StreamEndpoint};
use streamkit_core::model::{AudioConfig, CodecConfig, Mime, Packet, Resolution, VideoConfig};
use streamkit_core::mux::flv::{FlvMuxer, FlvMuxerConfig};
use streamkit_core::mux::mp4::{Mp4Muxer, Mp4MuxerConfig};
use streamkit_core::mux::ts::{TsMuxer, TsMuxerConfig};
use streamkit_core::mux::Muxer;
use streamkit_core::regulator::Regulator;
use streamkit_core::sink::file::FileSink;
use streamkit_core::sink::rtmp::{RtmpConfig, RtmpSink};
use streamkit_core::sink::srt::{SrtConfig, SrtSink};
use streamkit_core::sink::Sink;
use streamkit_core::Pipeline;
use streamkit_core::Result as CoreResult;

use crate::config::{CliConfig, SinkTarget};
use crate::error::Result;

/// Application name, used in startup logging.
const APP_NAME: &str = "streamkit-cli";

#[derive(Parser, Debug)]
#[command(name = APP_NAME, about = "Demo broadcaster wiring a synthetic AVC+AAC source through streamkit-core")]
struct Args {
    /// Path to a TOML config file. Defaults to built-in defaults (file sink,
    /// MPEG-TS container) when omitted or missing.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();
    let cli_config = match &args.config {
        Some(path) if path.exists() => {
            tracing::info!(path = %path.display(), "loading configuration");
            CliConfig::from_file(path)?
        }
        Some(path) => {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            CliConfig::default()
        }
        None => CliConfig::default(),
    };
    tracing::info!(?cli_config, "resolved configuration");

    let muxer = build_muxer(&cli_config.pipeline.muxer);
    let (sink, regulator) = build_sink_and_regulator(&cli_config);
    let endpoint: Box<dyn StreamEndpoint> = Box::new(Endpoint::new(muxer, sink));

    let mut pipeline = Pipeline::new(endpoint, cli_config.pipeline.channel, Duration::from_millis(cli_config.pipeline.stop_timeout_ms));

    let video_stream_id = pipeline
        .add_stream(CodecConfig::Video(VideoConfig {
            mime: Mime::H264,
            start_bitrate: cli_config.source.video_bitrate,
            resolution: Resolution { w: 1280, h: 720 },
            fps: cli_config.source.fps,
            profile: None,
            level: None,
            gop_s: 2.0,
        }))
        .await?;
    let audio_stream_id = pipeline
        .add_stream(CodecConfig::Audio(AudioConfig {
            mime: Mime::Aac,
            start_bitrate: cli_config.source.audio_bitrate,
            sample_rate: cli_config.source.audio_sample_rate,
            channel_config: 2,
            byte_format: 2,
            profile: Some(2), // AAC-LC
        }))
        .await?;

    pipeline.start_stream().await?;
    let pipeline = Arc::new(pipeline);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let video_task = tokio::spawn(source::run_video(pipeline.clone(), clock.clone(), video_stream_id, cli_config.source.clone()));
    let audio_task = tokio::spawn(source::run_audio(pipeline.clone(), clock.clone(), audio_stream_id, cli_config.source.clone()));

    if cli_config.pipeline.regulator.is_some() && !matches!(cli_config.sink, SinkTarget::Srt { .. }) {
        tracing::warn!("bitrate regulator is configured but only the SRT sink reports transport stats in this demo; ignoring");
    }

    tracing::info!("{} running, press Ctrl-C to stop", APP_NAME);
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutting down");

    video_task.abort();
    audio_task.abort();
    let _ = video_task.await;
    let _ = audio_task.await;
    if let Some(regulator) = regulator {
        regulator.stop().await;
    }

    // Both tasks have now fully torn down, so their `Arc<Pipeline>` clones
    // are dropped and this unwrap is the sole remaining owner.
    match Arc::try_unwrap(pipeline) {
        Ok(mut pipeline) => {
            pipeline.stop_stream().await?;
            pipeline.release().await;
        }
        Err(pipeline) => {
            // stop_stream/release take &mut self; without exclusive
            // ownership the best we can do is drop our handle.
            tracing::warn!("pipeline still referenced at shutdown, dropping without a clean stop");
            drop(pipeline);
        }
    }

    Ok(())
}

fn build_muxer(config: &MuxerConfig) -> Box<dyn Muxer> {
    match config {
        MuxerConfig::Ts { psi_cadence_ms, pcr_interval_ms } => Box::new(TsMuxer::new(TsMuxerConfig {
            psi_cadence_ms: *psi_cadence_ms,
            pcr_interval_ms: *pcr_interval_ms,
            ..TsMuxerConfig::default()
        })),
        MuxerConfig::Mp4 { segment_target_ms, write_mfra } => Box::new(Mp4Muxer::new(Mp4MuxerConfig {
            segment_target_ms: *segment_target_ms,
            write_mfra: *write_mfra,
        })),
        MuxerConfig::Flv { enhanced_hevc } => Box::new(FlvMuxer::new(FlvMuxerConfig { enhanced_hevc: *enhanced_hevc })),
    }
}

/// Forwards every `Sink` call through a shared lock, so the bitrate
/// regulator can hold its own handle to the same sink instance the
/// endpoint is driving (only the SRT sink exposes `TransportStats`, so this
/// is only used on that path).
struct SharedSink<S>(Arc<tokio::sync::Mutex<S>>);

#[async_trait::async_trait]
impl<S: Sink> Sink for SharedSink<S> {
    async fn open(&mut self) -> CoreResult<()> {
        self.0.lock().await.open().await
    }

    async fn write(&mut self, packet: &Packet) -> CoreResult<()> {
        self.0.lock().await.write(packet).await
    }

    async fn start_stream(&mut self) -> CoreResult<()> {
        self.0.lock().await.start_stream().await
    }

    async fn stop_stream(&mut self) -> CoreResult<()> {
        self.0.lock().await.stop_stream().await
    }

    async fn close(&mut self) -> CoreResult<()> {
        self.0.lock().await.close().await
    }
}

/// Builds the configured sink, additionally spawning a `Regulator` when the
/// sink is SRT and `[pipeline.regulator]` is set (the only transport in this
/// demo that reports real `TransportStats`).
fn build_sink_and_regulator(cli_config: &CliConfig) -> (Box<dyn Sink>, Option<Regulator>) {
    let srt_config = match &cli_config.sink {
        SinkTarget::Srt { remote_addr, stream_id, latency_ms } => Some(SrtConfig {
            remote_addr: *remote_addr,
            stream_id: stream_id.clone(),
            latency_ms: *latency_ms,
            ..SrtConfig::default()
        }),
        _ => None,
    };

    if let Some(srt_config) = srt_config {
        let srt_sink = SrtSink::new(srt_config);
        if let Some(regulator_config) = cli_config.pipeline.regulator {
            let shared = Arc::new(tokio::sync::Mutex::new(srt_sink));
            let stats_handle = shared.clone();
            let (regulator, mut targets) = Regulator::spawn(regulator_config, cli_config.source.video_bitrate, cli_config.source.audio_bitrate, move || {
                stats_handle.try_lock().map(|s| s.stats()).unwrap_or_default()
            });
            tokio::spawn(async move {
                while targets.changed().await.is_ok() {
                    let t = *targets.borrow();
                    tracing::info!(video_bitrate = t.video_bitrate, audio_bitrate = ?t.audio_bitrate, "bitrate regulator target update");
                }
            });
            return (Box::new(SharedSink(shared)), Some(regulator));
        }
        return (Box::new(srt_sink), None);
    }

    let sink: Box<dyn Sink> = match &cli_config.sink {
        SinkTarget::File { path } => Box::new(FileSink::new(path.clone())),
        SinkTarget::Rtmp { url } => Box::new(RtmpSink::new(RtmpConfig { url: url.clone(), ..RtmpConfig::default() })),
        SinkTarget::Srt { .. } => unreachable!("handled above"),
    };
    (sink, None)
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "streamkit_cli=info,streamkit_core=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_muxer_ts_uses_configured_cadence() {
        let cfg = MuxerConfig::Ts { psi_cadence_ms: 250, pcr_interval_ms: 50 };
        let _muxer = build_muxer(&cfg);
    }

    #[test]
    fn build_sink_file_constructs_without_a_regulator() {
        let cfg = CliConfig::default();
        let (_sink, regulator) = build_sink_and_regulator(&cfg);
        assert!(regulator.is_none());
    }
}
