//! Synthetic AVC+AAC frame source standing in for a real encoder, which is
//! out of scope for this library (no capture, no hardware encode). Produces
//! plausible-looking encoded access units at a fixed cadence so the
//! pipeline has something to mux and send.

use crate::config::SourceConfig;
use std::sync::Arc;
use std::time::Duration;
use streamkit_core::clock::Clock;
use streamkit_core::model::{Frame, Mime, Payload};
use streamkit_core::Pipeline;
use tracing::debug;

// Annex-B SPS+PPS, not a real decodable sequence; the muxer only needs
// well-formed start codes to split these into `extra` NAL units.
const FAKE_AVC_CONFIG: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0xc0, 0x1e, 0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80];
const FAKE_AAC_CONFIG: &[u8] = &[0x12, 0x10];

pub async fn run_video(pipeline: Arc<Pipeline>, clock: Arc<dyn Clock>, stream_id: u32, config: SourceConfig) {
    let config_frame = Frame::codec_config(stream_id, Mime::H264, Payload::Owned(FAKE_AVC_CONFIG.to_vec()), clock.now_us());
    if let Err(e) = pipeline.write(stream_id, config_frame) {
        tracing::warn!(stream_id, error = %e, "failed to enqueue video codec configuration");
    }

    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / config.fps as f64));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut frame_no: u64 = 0;
    loop {
        interval.tick().await;
        let is_key = frame_no % (config.fps as u64 * 2) == 0; // one keyframe every 2s
        let nal = if is_key { vec![0, 0, 0, 1, 0x65, 1, 2, 3] } else { vec![0, 0, 0, 1, 0x41, 4, 5, 6] };
        let frame = Frame::new(stream_id, Mime::H264, Payload::Owned(nal), clock.now_us(), is_key);
        if let Err(e) = pipeline.write(stream_id, frame) {
            debug!(stream_id, error = %e, "video source write failed");
        }
        frame_no += 1;
    }
}

pub async fn run_audio(pipeline: Arc<Pipeline>, clock: Arc<dyn Clock>, stream_id: u32, config: SourceConfig) {
    const SAMPLES_PER_FRAME: u32 = 1024;

    let config_frame = Frame::codec_config(stream_id, Mime::Aac, Payload::Owned(FAKE_AAC_CONFIG.to_vec()), clock.now_us());
    if let Err(e) = pipeline.write(stream_id, config_frame) {
        tracing::warn!(stream_id, error = %e, "failed to enqueue audio codec configuration");
    }

    let period = Duration::from_secs_f64(SAMPLES_PER_FRAME as f64 / config.audio_sample_rate as f64);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let frame = Frame::new(stream_id, Mime::Aac, Payload::Owned(vec![0u8; 64]), clock.now_us(), true);
        if let Err(e) = pipeline.write(stream_id, frame) {
            debug!(stream_id, error = %e, "audio source write failed");
        }
    }
}
