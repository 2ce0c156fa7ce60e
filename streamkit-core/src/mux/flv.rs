//! FLV muxer: tag header framing, `onMetaData` script tag, and AVC/HEVC/AAC
//! tag bodies. HEVC uses the "enhanced RTMP" FourCC (`hvc1`) packet framing,
//! gated behind `FlvMuxerConfig::enhanced_hevc` since it is not part of
//! classic FLV.

use crate::bitstream::h264::build_avc_decoder_config_record;
use crate::bitstream::h265::build_hevc_decoder_config_record;
use crate::bitstream::split_nal_units;
use crate::error::{Result, StreamkitError};
use crate::model::{CodecConfig, Frame, Mime, Packet, PacketKind, Payload};
use crate::mux::Muxer;

const TAG_TYPE_AUDIO: u8 = 8;
const TAG_TYPE_VIDEO: u8 = 9;
const TAG_TYPE_SCRIPT: u8 = 18;

#[derive(Debug, Clone, Default)]
pub struct FlvMuxerConfig {
    /// Enable the enhanced-RTMP HEVC FourCC packet framing (`hvc1`). Classic
    /// FLV has no standardized HEVC codec id; without this flag, adding an
    /// H.265 stream is rejected with `BadParameter`.
    pub enhanced_hevc: bool,
}

struct FlvTrack {
    mime: Mime,
    extra: Vec<Vec<u8>>,
    seen_first_sample: bool,
    sent_sequence_header: bool,
}

/// `onMetaData` fields sourced from an audio `add_stream` call.
struct AudioMeta {
    audiodatarate: f64,
    audiosamplerate: f64,
    audiosamplesize: f64,
    stereo: bool,
}

/// `onMetaData` fields sourced from a video `add_stream` call.
struct VideoMeta {
    videodatarate: f64,
    width: f64,
    height: f64,
    framerate: f64,
}

pub struct FlvMuxer {
    config: FlvMuxerConfig,
    tracks: Vec<FlvTrack>,
    has_video: bool,
    has_audio: bool,
    video_codec_id: Option<u8>,
    audio_meta: Option<AudioMeta>,
    video_meta: Option<VideoMeta>,
    started: bool,
    stopped: bool,
    prev_tag_size: u32,
    first_tag_timestamp_ms: Option<u32>,
}

impl FlvMuxer {
    pub fn new(config: FlvMuxerConfig) -> Self {
        FlvMuxer {
            config,
            tracks: Vec::new(),
            has_video: false,
            has_audio: false,
            video_codec_id: None,
            audio_meta: None,
            video_meta: None,
            started: false,
            stopped: false,
            prev_tag_size: 0,
            first_tag_timestamp_ms: None,
        }
    }

    fn build_tag(&mut self, tag_type: u8, timestamp_ms: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(body.len() + 15);
        out.push(tag_type);
        let len = body.len() as u32;
        out.extend_from_slice(&len.to_be_bytes()[1..4]); // 24-bit data size
        out.extend_from_slice(&timestamp_ms.to_be_bytes()[1..4]); // 24-bit timestamp
        out.push(((timestamp_ms >> 24) & 0xFF) as u8); // timestamp extended byte
        out.extend_from_slice(&[0, 0, 0]); // stream_id, always 0
        out.extend_from_slice(body);
        out.extend_from_slice(&self.prev_tag_size.to_be_bytes());
        self.prev_tag_size = (body.len() + 11) as u32;
        out
    }

    fn build_flv_header(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(13);
        out.extend_from_slice(b"FLV");
        out.push(1); // version
        let mut flags = 0u8;
        if self.has_audio {
            flags |= 0x04;
        }
        if self.has_video {
            flags |= 0x01;
        }
        out.push(flags);
        out.extend_from_slice(&9u32.to_be_bytes()); // header size
        out.extend_from_slice(&0u32.to_be_bytes()); // PreviousTagSize0
        out
    }

    /// Emits exactly `duration, audiocodecid, audiodatarate, audiosamplerate,
    /// audiosamplesize, stereo, videocodecid, videodatarate, width, height,
    /// framerate`, in that order, with `0`/`false` placeholders for whichever
    /// half (audio or video) wasn't configured.
    fn build_on_metadata(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(0x02); // AMF0 string marker
        body.extend_from_slice(&(10u16).to_be_bytes());
        body.extend_from_slice(b"onMetaData");
        body.push(0x08); // AMF0 ECMA array marker

        let audio = self.audio_meta.as_ref();
        let video = self.video_meta.as_ref();
        let entries: Vec<(&str, AmfValue)> = vec![
            ("duration", AmfValue::Number(0.0)),
            ("audiocodecid", AmfValue::Number(if self.has_audio { 10.0 } else { 0.0 })),
            ("audiodatarate", AmfValue::Number(audio.map_or(0.0, |a| a.audiodatarate))),
            ("audiosamplerate", AmfValue::Number(audio.map_or(0.0, |a| a.audiosamplerate))),
            ("audiosamplesize", AmfValue::Number(audio.map_or(0.0, |a| a.audiosamplesize))),
            ("stereo", AmfValue::Bool(audio.map_or(false, |a| a.stereo))),
            ("videocodecid", AmfValue::Number(self.video_codec_id.map_or(0.0, |c| c as f64))),
            ("videodatarate", AmfValue::Number(video.map_or(0.0, |v| v.videodatarate))),
            ("width", AmfValue::Number(video.map_or(0.0, |v| v.width))),
            ("height", AmfValue::Number(video.map_or(0.0, |v| v.height))),
            ("framerate", AmfValue::Number(video.map_or(0.0, |v| v.framerate))),
        ];

        body.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for (key, value) in entries {
            body.extend_from_slice(&(key.len() as u16).to_be_bytes());
            body.extend_from_slice(key.as_bytes());
            value.encode(&mut body);
        }
        body.extend_from_slice(&[0, 0, 0x09]); // object end marker
        body
    }

    /// Parses an `onMetaData` FLV script-data tag body back into the AMF0
    /// key/value pairs `build_on_metadata` wrote, as `(String, f64)` for
    /// numbers and `(String, bool)` for booleans. Round-trips with
    /// `build_on_metadata`: every key it writes is recovered with its value.
    fn parse_on_metadata(body: &[u8]) -> Result<Vec<(String, AmfScalar)>> {
        let too_short = || StreamkitError::MuxerInternal("truncated onMetaData tag".into());
        if body.len() < 3 || body[0] != 0x02 {
            return Err(too_short());
        }
        let name_len = u16::from_be_bytes([body[1], body[2]]) as usize;
        let mut pos = 3 + name_len;
        if body.len() < pos + 1 || body[pos] != 0x08 {
            return Err(too_short());
        }
        pos += 1 + 4; // ECMA array marker + u32 element count (not relied on, we scan to the end marker)

        let mut entries = Vec::new();
        while pos + 2 <= body.len() {
            if body[pos..].starts_with(&[0, 0, 0x09]) {
                break;
            }
            if pos + 2 > body.len() {
                return Err(too_short());
            }
            let key_len = u16::from_be_bytes([body[pos], body[pos + 1]]) as usize;
            pos += 2;
            if pos + key_len > body.len() {
                return Err(too_short());
            }
            let key = String::from_utf8_lossy(&body[pos..pos + key_len]).into_owned();
            pos += key_len;
            if pos >= body.len() {
                return Err(too_short());
            }
            let marker = body[pos];
            pos += 1;
            match marker {
                0x00 => {
                    if pos + 8 > body.len() {
                        return Err(too_short());
                    }
                    let n = f64::from_be_bytes(body[pos..pos + 8].try_into().unwrap());
                    pos += 8;
                    entries.push((key, AmfScalar::Number(n)));
                }
                0x01 => {
                    if pos >= body.len() {
                        return Err(too_short());
                    }
                    let b = body[pos] != 0;
                    pos += 1;
                    entries.push((key, AmfScalar::Bool(b)));
                }
                _ => return Err(too_short()),
            }
        }
        Ok(entries)
    }

    fn annex_b_to_avcc(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(payload.len());
        let nals = split_nal_units(payload);
        if nals.is_empty() {
            out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            out.extend_from_slice(payload);
        } else {
            for nal in nals {
                out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
                out.extend_from_slice(nal);
            }
        }
        out
    }
}

enum AmfValue {
    Number(f64),
    Bool(bool),
}

/// Decoded AMF0 scalar, as returned by `FlvMuxer::parse_on_metadata`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmfScalar {
    Number(f64),
    Bool(bool),
}

impl AmfValue {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            AmfValue::Number(n) => {
                out.push(0x00);
                out.extend_from_slice(&n.to_be_bytes());
            }
            AmfValue::Bool(b) => {
                out.push(0x01);
                out.push(if *b { 1 } else { 0 });
            }
        }
    }
}

fn codec_id_for(mime: Mime) -> u8 {
    match mime {
        Mime::H264 => 7,
        Mime::H265 => 12, // enhanced-RTMP FourCC packet codec id
        _ => 0,
    }
}

impl Muxer for FlvMuxer {
    fn add_stream(&mut self, config: CodecConfig) -> Result<u32> {
        if self.started {
            return Err(StreamkitError::InvalidState(
                "add_stream after start_stream".into(),
            ));
        }
        let mime = config.mime();
        if mime == Mime::H265 && !self.config.enhanced_hevc {
            return Err(StreamkitError::BadParameter(
                "HEVC in FLV requires FlvMuxerConfig::enhanced_hevc".into(),
            ));
        }
        if mime == Mime::Opus {
            return Err(StreamkitError::BadParameter(
                "Opus is not a supported FLV audio codec".into(),
            ));
        }
        if mime.is_video() {
            self.has_video = true;
            self.video_codec_id = Some(codec_id_for(mime));
        } else {
            self.has_audio = true;
        }
        match &config {
            CodecConfig::Audio(a) => {
                self.audio_meta = Some(AudioMeta {
                    audiodatarate: a.start_bitrate as f64 / 1000.0,
                    audiosamplerate: a.sample_rate as f64,
                    audiosamplesize: (a.byte_format as f64) * 8.0,
                    stereo: a.channel_config >= 2,
                });
            }
            CodecConfig::Video(v) => {
                self.video_meta = Some(VideoMeta {
                    videodatarate: v.start_bitrate as f64 / 1000.0,
                    width: v.resolution.w as f64,
                    height: v.resolution.h as f64,
                    framerate: v.fps as f64,
                });
            }
        }
        self.tracks.push(FlvTrack {
            mime,
            extra: Vec::new(),
            seen_first_sample: false,
            sent_sequence_header: false,
        });
        Ok((self.tracks.len()) as u32)
    }

    fn start_stream(&mut self) -> Result<Vec<Packet>> {
        if self.tracks.is_empty() {
            return Err(StreamkitError::Unconfigured("no streams added".into()));
        }
        self.started = true;
        self.stopped = false;
        self.prev_tag_size = 0;
        self.first_tag_timestamp_ms = None;

        let mut out = self.build_flv_header();
        let metadata_body = self.build_on_metadata();
        let tag = self.build_tag(TAG_TYPE_SCRIPT, 0, &metadata_body);
        out.extend(tag);
        Ok(vec![Packet::new(Payload::Owned(out), 0, PacketKind::Other)])
    }

    fn write(&mut self, track_id: u32, frame: Frame) -> Result<Vec<Packet>> {
        if !self.started || self.stopped {
            return Err(StreamkitError::InvalidState(
                "write outside Streaming state".into(),
            ));
        }
        let index = track_id
            .checked_sub(1)
            .ok_or_else(|| StreamkitError::BadParameter("track id must be >= 1".into()))?
            as usize;
        if index >= self.tracks.len() {
            return Err(StreamkitError::BadParameter(format!(
                "unknown track id {track_id}"
            )));
        }

        if frame.is_codec_config {
            let payload: &[u8] = frame.payload.as_ref();
            let track = &mut self.tracks[index];
            track.extra = match track.mime {
                Mime::H264 | Mime::H265 => split_nal_units(payload).into_iter().map(|n| n.to_vec()).collect(),
                _ => vec![payload.to_vec()],
            };
            return Ok(Vec::new());
        }

        if !frame.extra.is_empty() && self.tracks[index].extra.is_empty() {
            self.tracks[index].extra = frame.extra.clone();
        }
        if frame.payload.is_empty() {
            return Err(StreamkitError::BadParameter("zero-length payload".into()));
        }

        let is_video = self.tracks[index].mime.is_video();
        if is_video && !self.tracks[index].seen_first_sample && !frame.is_key {
            return Err(StreamkitError::MuxerInternal(
                "first video frame on a track must be a keyframe".into(),
            ));
        }

        let absolute_ms = (frame.dts_us / 1_000) as u32;
        let anchor_ms = *self.first_tag_timestamp_ms.get_or_insert(absolute_ms);
        let timestamp_ms = absolute_ms.saturating_sub(anchor_ms);
        let cts_ms = ((frame.pts_us - frame.dts_us) / 1_000) as i32;
        let mime = self.tracks[index].mime;

        let mut out = Vec::new();

        if !self.tracks[index].sent_sequence_header {
            let seq_body = match mime {
                Mime::H264 => {
                    let sps = self.tracks[index].extra.first().cloned().unwrap_or_default();
                    let pps = self.tracks[index].extra.get(1).cloned().unwrap_or_default();
                    let record = build_avc_decoder_config_record(&sps, &pps)?;
                    build_avc_video_tag_body(true, 0, &record)
                }
                Mime::H265 => {
                    let vps = self.tracks[index].extra.first().cloned().unwrap_or_default();
                    let sps = self.tracks[index].extra.get(1).cloned().unwrap_or_default();
                    let pps = self.tracks[index].extra.get(2).cloned().unwrap_or_default();
                    let record = build_hevc_decoder_config_record(&vps, &sps, &pps)?;
                    build_hevc_video_tag_body(true, 0, &record)
                }
                Mime::Aac => {
                    let asc = self.tracks[index].extra.first().cloned().unwrap_or_default();
                    build_aac_audio_tag_body(true, &asc)
                }
                Mime::Opus => unreachable!("rejected at add_stream"),
            };
            let tag_type = if is_video { TAG_TYPE_VIDEO } else { TAG_TYPE_AUDIO };
            let tag = self.build_tag(tag_type, timestamp_ms, &seq_body);
            out.push(Packet::new(Payload::Owned(tag), frame.pts_us, PacketKind::Other));
            self.tracks[index].sent_sequence_header = true;
        }

        let payload: &[u8] = frame.payload.as_ref();
        let body = match mime {
            Mime::H264 => {
                let avcc = Self::annex_b_to_avcc(payload);
                build_video_tag_body(7, false, cts_ms, &avcc, frame.is_key)
            }
            Mime::H265 => {
                let avcc = Self::annex_b_to_avcc(payload);
                build_video_tag_body(12, false, cts_ms, &avcc, frame.is_key)
            }
            Mime::Aac => build_aac_audio_tag_body(false, payload),
            Mime::Opus => unreachable!("rejected at add_stream"),
        };
        let tag_type = if is_video { TAG_TYPE_VIDEO } else { TAG_TYPE_AUDIO };
        let tag = self.build_tag(tag_type, timestamp_ms, &body);
        out.push(Packet::new(
            Payload::Owned(tag),
            frame.pts_us,
            if is_video { PacketKind::Video } else { PacketKind::Audio },
        ));

        self.tracks[index].seen_first_sample = true;
        Ok(out)
    }

    fn stop_stream(&mut self) -> Result<Vec<Packet>> {
        self.started = false;
        self.stopped = true;
        Ok(Vec::new())
    }
}

fn build_avc_video_tag_body(is_sequence_header: bool, cts_ms: i32, payload: &[u8]) -> Vec<u8> {
    build_video_tag_body(7, is_sequence_header, cts_ms, payload, true)
}

fn build_hevc_video_tag_body(is_sequence_header: bool, cts_ms: i32, payload: &[u8]) -> Vec<u8> {
    build_video_tag_body(12, is_sequence_header, cts_ms, payload, true)
}

/// Video tag body: `FrameType`+`CodecID` byte, `AVCPacketType`/
/// `HEVCPacketType`, 3-byte composition time, then either the decoder
/// config record (sequence header) or NALU data. `is_key` only matters for
/// data tags; sequence headers always report `FrameType` 1 (key frame).
fn build_video_tag_body(codec_id: u8, is_sequence_header: bool, cts_ms: i32, payload: &[u8], is_key: bool) -> Vec<u8> {
    let frame_type: u8 = if is_sequence_header || is_key { 1 } else { 2 };
    let mut out = Vec::with_capacity(payload.len() + 5);
    out.push((frame_type << 4) | (codec_id & 0x0F));
    out.push(if is_sequence_header { 0 } else { 1 }); // AVCPacketType / HEVCPacketType
    let cts = cts_ms.clamp(-(1 << 23), (1 << 23) - 1);
    out.extend_from_slice(&cts.to_be_bytes()[1..4]); // composition time, 24-bit signed
    out.extend_from_slice(payload);
    out
}

fn build_aac_audio_tag_body(is_sequence_header: bool, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(0xAF); // SoundFormat=10 (AAC), rate=3(44kHz placeholder), size=1(16-bit), type=1(stereo)
    out.push(if is_sequence_header { 0 } else { 1 }); // AACPacketType
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AudioConfig, Resolution, VideoConfig};

    fn video_config(mime: Mime) -> CodecConfig {
        CodecConfig::Video(VideoConfig {
            mime,
            start_bitrate: 2_000_000,
            resolution: Resolution { w: 1280, h: 720 },
            fps: 30,
            profile: None,
            level: None,
            gop_s: 2.0,
        })
    }

    fn audio_config() -> CodecConfig {
        CodecConfig::Audio(AudioConfig {
            mime: Mime::Aac,
            start_bitrate: 128_000,
            sample_rate: 48_000,
            channel_config: 2,
            byte_format: 2,
            profile: Some(2),
        })
    }

    #[test]
    fn flv_header_has_magic_and_flags() {
        let mut muxer = FlvMuxer::new(FlvMuxerConfig::default());
        muxer.add_stream(video_config(Mime::H264)).unwrap();
        muxer.add_stream(audio_config()).unwrap();
        let packets = muxer.start_stream().unwrap();
        let data: &[u8] = packets[0].payload.as_ref();
        assert_eq!(&data[0..3], b"FLV");
        assert_eq!(data[4], 0x05); // audio + video flags
    }

    #[test]
    fn hevc_rejected_without_enhanced_flag() {
        let mut muxer = FlvMuxer::new(FlvMuxerConfig::default());
        assert!(muxer.add_stream(video_config(Mime::H265)).is_err());
    }

    #[test]
    fn hevc_accepted_with_enhanced_flag() {
        let mut muxer = FlvMuxer::new(FlvMuxerConfig { enhanced_hevc: true });
        assert!(muxer.add_stream(video_config(Mime::H265)).is_ok());
    }

    #[test]
    fn opus_is_rejected() {
        let mut muxer = FlvMuxer::new(FlvMuxerConfig::default());
        let cfg = CodecConfig::Audio(AudioConfig {
            mime: Mime::Opus,
            start_bitrate: 64_000,
            sample_rate: 48_000,
            channel_config: 2,
            byte_format: 2,
            profile: None,
        });
        assert!(muxer.add_stream(cfg).is_err());
    }

    #[test]
    fn first_video_tag_is_sequence_header() {
        let mut muxer = FlvMuxer::new(FlvMuxerConfig::default());
        let vid = muxer.add_stream(video_config(Mime::H264)).unwrap();
        let _ = muxer.start_stream().unwrap();
        let codec_config_payload = vec![
            0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f, 0x96, 0x54, 0x05, 0x01, 0xec, 0x80, 0, 0, 0, 1, 0x68, 0xce, 0x38, 0x80,
        ];
        muxer
            .write(
                vid,
                Frame::codec_config(vid, Mime::H264, Payload::Owned(codec_config_payload), 0),
            )
            .unwrap();
        let out = muxer
            .write(vid, Frame::new(vid, Mime::H264, Payload::Owned(vec![0, 0, 0, 1, 0x65, 9, 9]), 0, true))
            .unwrap();
        assert_eq!(out.len(), 2, "sequence header tag + data tag");
        let seq_tag: &[u8] = out[0].payload.as_ref();
        assert_eq!(seq_tag[0], TAG_TYPE_VIDEO);
    }

    #[test]
    fn on_metadata_round_trips_through_parse_on_metadata() {
        let mut muxer = FlvMuxer::new(FlvMuxerConfig::default());
        muxer.add_stream(video_config(Mime::H264)).unwrap();
        muxer.add_stream(audio_config()).unwrap();

        let body = muxer.build_on_metadata();
        let entries = FlvMuxer::parse_on_metadata(&body).unwrap();

        let get_num = |key: &str| {
            entries
                .iter()
                .find(|(k, _)| k == key)
                .and_then(|(_, v)| match v {
                    AmfScalar::Number(n) => Some(*n),
                    _ => None,
                })
                .unwrap_or_else(|| panic!("missing numeric key {key}"))
        };
        let get_bool = |key: &str| {
            entries
                .iter()
                .find(|(k, _)| k == key)
                .and_then(|(_, v)| match v {
                    AmfScalar::Bool(b) => Some(*b),
                    _ => None,
                })
                .unwrap_or_else(|| panic!("missing bool key {key}"))
        };

        assert_eq!(get_num("duration"), 0.0);
        assert_eq!(get_num("audiocodecid"), 10.0);
        assert_eq!(get_num("audiodatarate"), 128.0);
        assert_eq!(get_num("audiosamplerate"), 48_000.0);
        assert_eq!(get_num("audiosamplesize"), 16.0);
        assert!(get_bool("stereo"));
        assert_eq!(get_num("videocodecid"), 7.0);
        assert_eq!(get_num("videodatarate"), 2000.0);
        assert_eq!(get_num("width"), 1280.0);
        assert_eq!(get_num("height"), 720.0);
        assert_eq!(get_num("framerate"), 30.0);
    }

    #[test]
    fn tag_timestamps_are_anchored_to_the_first_written_frame() {
        let mut muxer = FlvMuxer::new(FlvMuxerConfig::default());
        let vid = muxer.add_stream(video_config(Mime::H264)).unwrap();
        let _ = muxer.start_stream().unwrap();
        let codec_config_payload = vec![
            0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1f, 0x96, 0x54, 0x05, 0x01, 0xec, 0x80, 0, 0, 0, 1, 0x68, 0xce, 0x38, 0x80,
        ];
        muxer
            .write(
                vid,
                Frame::codec_config(vid, Mime::H264, Payload::Owned(codec_config_payload), 0),
            )
            .unwrap();

        const FIRST_DTS_US: i64 = 5_000_000;
        let first = muxer
            .write(
                vid,
                Frame::new(vid, Mime::H264, Payload::Owned(vec![0, 0, 0, 1, 0x65, 9, 9]), FIRST_DTS_US, true),
            )
            .unwrap();
        let second = muxer
            .write(
                vid,
                Frame::new(
                    vid,
                    Mime::H264,
                    Payload::Owned(vec![0, 0, 0, 1, 0x41, 1, 2]),
                    FIRST_DTS_US + 40_000,
                    false,
                ),
            )
            .unwrap();

        let first_data_tag: &[u8] = first[1].payload.as_ref();
        let second_tag: &[u8] = second[0].payload.as_ref();
        let tag_timestamp = |tag: &[u8]| -> u32 {
            ((tag[7] as u32) << 24) | ((tag[4] as u32) << 16) | ((tag[5] as u32) << 8) | (tag[6] as u32)
        };
        assert_eq!(tag_timestamp(first_data_tag), 0);
        assert_eq!(tag_timestamp(second_tag), 40);
    }
}
