//! MPEG-TS muxer: PAT/PMT/SDT tables, PES packetization, 188-byte TS
//! packets, PCR.

use crate::bitstream::{adts, split_nal_units};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StreamkitError};
use crate::model::{CodecConfig, Frame, Mime, Packet, PacketKind, Payload};
use crate::mux::Muxer;
use std::collections::HashMap;
use std::sync::Arc;

pub const TS_PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;

const PID_PAT: u16 = 0x0000;
const PID_SDT: u16 = 0x0011;
const PMT_PID_BASE: u16 = 0x1000;
const ELEMENTARY_PID_BASE: u16 = 0x0100;

const TABLE_ID_PAT: u8 = 0x00;
const TABLE_ID_PMT: u8 = 0x02;
const TABLE_ID_SDT: u8 = 0x42;

const STREAM_TYPE_AAC_ADTS: u8 = 0x0F;
const STREAM_TYPE_H264: u8 = 0x1B;
const STREAM_TYPE_H265: u8 = 0x24;
const STREAM_TYPE_OPUS: u8 = 0x06; // private data, descriptor-tagged in real streams

/// Tunables for table cadence, with spec defaults.
#[derive(Debug, Clone)]
pub struct TsMuxerConfig {
    pub psi_cadence_ms: u32,
    pub pcr_interval_ms: u32,
    pub service_id: u16,
    pub service_name: String,
    pub provider_name: String,
}

impl Default for TsMuxerConfig {
    fn default() -> Self {
        TsMuxerConfig {
            psi_cadence_ms: 500,
            pcr_interval_ms: 100,
            service_id: 1,
            service_name: "streamkit".to_string(),
            provider_name: "streamkit".to_string(),
        }
    }
}

struct TsTrack {
    pid: u16,
    mime: Mime,
    stream_type: u8,
    extra: Vec<Vec<u8>>,
    sample_rate: u32,
    channel_config: u8,
    aac_profile: u8,
    seen_first_sample: bool,
}

pub struct TsMuxer {
    config: TsMuxerConfig,
    tracks: Vec<TsTrack>,
    clock: Arc<dyn Clock>,
    continuity: HashMap<u16, u8>,
    pcr_pid: Option<u16>,
    last_pcr_write_us: Option<i64>,
    last_psi_emit_us: Option<i64>,
    pat_pmt_version: u8,
    started: bool,
    stopped: bool,
}

impl TsMuxer {
    pub fn new(config: TsMuxerConfig) -> Self {
        TsMuxer {
            config,
            tracks: Vec::new(),
            clock: Arc::new(SystemClock::new()),
            continuity: HashMap::new(),
            pcr_pid: None,
            last_pcr_write_us: None,
            last_psi_emit_us: None,
            pat_pmt_version: 0,
            started: false,
            stopped: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn next_continuity(&mut self, pid: u16) -> u8 {
        let counter = self.continuity.entry(pid).or_insert(0);
        let value = *counter;
        *counter = (*counter + 1) & 0x0F;
        value
    }

    fn elementary_pid(track_index: usize) -> u16 {
        ELEMENTARY_PID_BASE + track_index as u16
    }

    /// Build PAT + PMT + SDT as three 188-byte packets.
    fn build_psi(&mut self) -> Vec<Packet> {
        self.pat_pmt_version = self.pat_pmt_version.wrapping_add(1) & 0x1F;
        let mut out = Vec::with_capacity(3);
        out.push(self.build_pat());
        out.push(self.build_pmt());
        out.push(self.build_sdt());
        self.last_psi_emit_us = Some(self.clock.now_us());
        out
    }

    fn build_pat(&mut self) -> Packet {
        let mut section = Vec::new();
        section.extend_from_slice(&1u16.to_be_bytes()); // program_number
        section.extend_from_slice(&((0xE000) | PMT_PID_BASE).to_be_bytes());
        let pkt = build_psi_packet(
            PID_PAT,
            TABLE_ID_PAT,
            1, // transport_stream_id
            self.pat_pmt_version,
            &section,
            self.next_continuity(PID_PAT),
        );
        Packet::new(Payload::Owned(pkt), self.clock.now_us(), PacketKind::Other)
    }

    fn build_pmt(&mut self) -> Packet {
        let pcr_pid = self.pcr_pid.unwrap_or(0x1FFF);
        let mut section = Vec::new();
        section.extend_from_slice(&((0xE000) | pcr_pid).to_be_bytes());
        section.extend_from_slice(&(0xF000u16).to_be_bytes()); // program_info_length = 0
        for (i, track) in self.tracks.iter().enumerate() {
            section.push(track.stream_type);
            section.extend_from_slice(&((0xE000) | Self::elementary_pid(i)).to_be_bytes());
            section.extend_from_slice(&(0xF000u16).to_be_bytes()); // ES_info_length = 0
        }
        let pkt = build_psi_packet(
            PMT_PID_BASE,
            TABLE_ID_PMT,
            1, // program_number
            self.pat_pmt_version,
            &section,
            self.next_continuity(PMT_PID_BASE),
        );
        Packet::new(Payload::Owned(pkt), self.clock.now_us(), PacketKind::Other)
    }

    fn build_sdt(&mut self) -> Packet {
        let mut section = Vec::new();
        section.extend_from_slice(&1u16.to_be_bytes()); // original_network_id
        section.push(0xFF); // reserved
        section.extend_from_slice(&self.config.service_id.to_be_bytes());
        section.push(0xFC | 0x01); // reserved + EIT schedule/present flags=0, running_status/free_CA placeholder
        // service descriptor
        let mut descriptor = Vec::new();
        descriptor.push(0x01); // service_type: digital television
        descriptor.push(self.config.provider_name.len() as u8);
        descriptor.extend_from_slice(self.config.provider_name.as_bytes());
        descriptor.push(self.config.service_name.len() as u8);
        descriptor.extend_from_slice(self.config.service_name.as_bytes());

        let mut descriptor_with_tag = vec![0x48u8, descriptor.len() as u8];
        descriptor_with_tag.extend_from_slice(&descriptor);
        section.extend_from_slice(&(descriptor_with_tag.len() as u16).to_be_bytes());
        section.extend_from_slice(&descriptor_with_tag);

        let pkt = build_psi_packet(
            PID_SDT,
            TABLE_ID_SDT,
            1, // transport_stream_id
            self.pat_pmt_version,
            &section,
            self.next_continuity(PID_SDT),
        );
        Packet::new(Payload::Owned(pkt), self.clock.now_us(), PacketKind::Other)
    }

    fn psi_due(&self) -> bool {
        match self.last_psi_emit_us {
            None => true,
            Some(last) => {
                self.clock.now_us() - last >= self.config.psi_cadence_ms as i64 * 1000
            }
        }
    }

    fn normalize_avc_hevc_payload(track: &TsTrack, frame: &Frame) -> Vec<u8> {
        let mut out = Vec::new();
        // Access unit delimiter NAL: nal_ref_idc=0, type=9 for H264, type=35 (AUD) for HEVC.
        if track.mime == Mime::H264 {
            out.extend_from_slice(&[0, 0, 0, 1, 0x09, 0xF0]);
        } else {
            out.extend_from_slice(&[0, 0, 0, 1, 0x46, 0x01, 0x50]);
        }
        if frame.is_key {
            for extra in &track.extra {
                out.extend_from_slice(&[0, 0, 0, 1]);
                out.extend_from_slice(extra);
            }
            for extra in &frame.extra {
                out.extend_from_slice(&[0, 0, 0, 1]);
                out.extend_from_slice(extra);
            }
        }
        let payload: &[u8] = frame.payload.as_ref();
        let nals = split_nal_units(payload);
        if nals.is_empty() {
            // Payload had no start codes; caller passed a single raw NAL.
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(payload);
        } else {
            for nal in nals {
                out.extend_from_slice(&[0, 0, 0, 1]);
                out.extend_from_slice(nal);
            }
        }
        out
    }
}

impl Muxer for TsMuxer {
    fn add_stream(&mut self, config: CodecConfig) -> Result<u32> {
        if self.started {
            return Err(StreamkitError::InvalidState(
                "add_stream after start_stream".into(),
            ));
        }
        let mime = config.mime();
        let stream_type = match mime {
            Mime::H264 => STREAM_TYPE_H264,
            Mime::H265 => STREAM_TYPE_H265,
            Mime::Aac => STREAM_TYPE_AAC_ADTS,
            Mime::Opus => STREAM_TYPE_OPUS,
        };
        let index = self.tracks.len();
        let pid = Self::elementary_pid(index);
        let is_video = mime.is_video();
        let (sample_rate, channel_config, aac_profile) = match &config {
            CodecConfig::Audio(a) => (a.sample_rate, a.channel_config, a.profile.unwrap_or(2) as u8),
            CodecConfig::Video(_) => (0, 0, 0),
        };
        if is_video && self.pcr_pid.is_none() {
            self.pcr_pid = Some(pid);
        }
        self.tracks.push(TsTrack {
            pid,
            mime,
            stream_type,
            extra: Vec::new(),
            sample_rate,
            channel_config,
            aac_profile,
            seen_first_sample: false,
        });
        Ok((index + 1) as u32)
    }

    fn start_stream(&mut self) -> Result<Vec<Packet>> {
        if self.tracks.is_empty() {
            return Err(StreamkitError::Unconfigured("no streams added".into()));
        }
        if self.pcr_pid.is_none() {
            // audio-only program: PCR rides on the first audio PID.
            self.pcr_pid = self.tracks.first().map(|t| t.pid);
        }
        self.started = true;
        self.stopped = false;
        Ok(self.build_psi())
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

        if frame.payload.is_empty() && !frame.is_codec_config {
            return Err(StreamkitError::BadParameter("zero-length payload".into()));
        }

        if frame.is_codec_config {
            let payload: &[u8] = frame.payload.as_ref();
            let track = &mut self.tracks[index];
            match track.mime {
                Mime::H264 | Mime::H265 => {
                    track.extra = split_nal_units(payload)
                        .into_iter()
                        .map(|n| n.to_vec())
                        .collect();
                }
                _ => track.extra = vec![payload.to_vec()],
            }
            return Ok(Vec::new());
        }

        // Store codec config carried on the first keyframe, if present.
        if !frame.extra.is_empty() {
            let track = &mut self.tracks[index];
            if track.extra.is_empty() {
                track.extra = frame.extra.clone();
            }
        }

        let is_video = self.tracks[index].mime.is_video();
        if is_video && !self.tracks[index].seen_first_sample && !frame.is_key {
            return Err(StreamkitError::MuxerInternal(
                "first video frame on a track must be a keyframe".into(),
            ));
        }
        self.tracks[index].seen_first_sample = true;

        let pts_90k = crate::clock::rescale(frame.pts_us, crate::clock::TimeBase::MICROS, crate::clock::TimeBase::MPEGTS_90K);
        let dts_90k = crate::clock::rescale(frame.dts_us, crate::clock::TimeBase::MICROS, crate::clock::TimeBase::MPEGTS_90K);
        let has_dts = frame.dts_us != frame.pts_us;

        let mime = self.tracks[index].mime;
        let es_payload = match mime {
            Mime::H264 | Mime::H265 => Self::normalize_avc_hevc_payload(&self.tracks[index], &frame),
            Mime::Aac => {
                let track = &self.tracks[index];
                adts::build_adts(track.sample_rate, track.channel_config, track.aac_profile, frame.payload.as_ref())?
            }
            Mime::Opus => frame.payload.as_ref().to_vec(),
        };

        let stream_id: u8 = if is_video { 0xE0 } else { 0xC0 };
        let pes = build_pes(stream_id, pts_90k, if has_dts { Some(dts_90k) } else { None }, &es_payload);

        let pid = self.tracks[index].pid;
        let is_pcr_pid = self.pcr_pid == Some(pid);
        let want_pcr = is_pcr_pid
            && (frame.is_key
                || self
                    .last_pcr_write_us
                    .map(|last| frame.pts_us - last >= self.config.pcr_interval_ms as i64 * 1000)
                    .unwrap_or(true));

        let mut out = Vec::new();
        if self.psi_due() {
            out.extend(self.build_psi());
        }

        let pcr_27m = if want_pcr {
            self.last_pcr_write_us = Some(frame.pts_us);
            Some((pts_90k as i64).max(0) as u64 * 300)
        } else {
            None
        };

        let packets = packetize_pes(
            pid,
            &pes,
            pcr_27m,
            frame.is_key && is_video,
            &mut self.continuity,
        );
        for pkt in packets {
            out.push(Packet::new(Payload::Owned(pkt), frame.pts_us, if is_video { PacketKind::Video } else { PacketKind::Audio }));
        }
        Ok(out)
    }

    fn stop_stream(&mut self) -> Result<Vec<Packet>> {
        self.stopped = true;
        self.started = false;
        // No trailing table burst required; spec only asks for null padding
        // up to packet alignment, which every written packet already
        // satisfies since each TS packet is exactly 188 bytes.
        Ok(Vec::new())
    }
}

fn build_psi_packet(
    pid: u16,
    table_id: u8,
    id_field: u16,
    version: u8,
    section_body: &[u8],
    continuity: u8,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TS_PACKET_SIZE);
    buf.push(SYNC_BYTE);
    let pusi_and_pid = 0x4000u16 | (pid & 0x1FFF);
    buf.extend_from_slice(&pusi_and_pid.to_be_bytes());
    buf.push(0x10 | (continuity & 0x0F)); // no scrambling, payload only, continuity counter

    buf.push(0); // pointer_field
    buf.push(table_id);

    let mut section = Vec::new();
    section.extend_from_slice(&id_field.to_be_bytes());
    section.push(0xC0 | ((version & 0x1F) << 1) | 0x01); // reserved + version + current_next_indicator=1
    section.push(0); // section_number
    section.push(0); // last_section_number
    section.extend_from_slice(section_body);

    let section_length = section.len() + 4; // + CRC
    let length_field = 0xB000u16 | (section_length as u16 & 0x0FFF);
    buf.extend_from_slice(&length_field.to_be_bytes());
    buf.extend_from_slice(&section);

    let crc = crc32_mpeg2(&buf[5..]);
    buf.extend_from_slice(&crc.to_be_bytes());

    while buf.len() < TS_PACKET_SIZE {
        buf.push(0xFF);
    }
    buf.truncate(TS_PACKET_SIZE);
    buf
}

/// Build a PES packet with a standard 5/10-byte MPEG-2 timestamp field.
fn build_pes(stream_id: u8, pts_90k: i64, dts_90k: Option<i64>, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 19);
    out.extend_from_slice(&[0, 0, 1]); // packet_start_code_prefix
    out.push(stream_id);

    let pts_dts_flags: u8 = if dts_90k.is_some() { 0b11 } else { 0b10 };
    let header_data_len = if dts_90k.is_some() { 10 } else { 5 };
    let pes_header_len = 3 + header_data_len; // flags byte + header_data_length byte + header_data_len

    let pes_packet_len = payload.len() + pes_header_len;
    if pes_packet_len <= 0xFFFF {
        out.extend_from_slice(&(pes_packet_len as u16).to_be_bytes());
    } else {
        out.extend_from_slice(&0u16.to_be_bytes()); // unbounded, allowed for video
    }

    out.push(0x80); // '10' marker + flags (no scrambling/priority/alignment/copyright/original)
    out.push((pts_dts_flags << 6) | 0x00); // PTS_DTS_flags, other flags = 0
    out.push(header_data_len as u8);

    write_pts_dts(&mut out, pts_90k, dts_90k);

    out.extend_from_slice(payload);
    out
}

fn write_pts_dts(out: &mut Vec<u8>, pts_90k: i64, dts_90k: Option<i64>) {
    let prefix_pts: u8 = if dts_90k.is_some() { 0b0011 } else { 0b0010 };
    write_timestamp_field(out, prefix_pts, pts_90k);
    if let Some(dts) = dts_90k {
        write_timestamp_field(out, 0b0001, dts);
    }
}

/// Encode a 33-bit 90 kHz timestamp into the standard 5-byte MPEG-2 PES
/// field with the given 4-bit prefix nibble. No sign extension: the value
/// is masked to 33 bits so PTS wraparound at 2^33 ticks degrades gracefully
/// instead of producing a negative field.
fn write_timestamp_field(out: &mut Vec<u8>, prefix: u8, ts_90k: i64) {
    let ts = (ts_90k as u64) & 0x1_FFFF_FFFF; // 33 bits, no sign extension
    let b1 = (prefix << 4) | (((ts >> 30) & 0x07) as u8) << 1 | 1;
    let b2 = ((ts >> 22) & 0xFF) as u8;
    let b3 = ((((ts >> 15) & 0x7F) as u8) << 1) | 1;
    let b4 = ((ts >> 7) & 0xFF) as u8;
    let b5 = (((ts & 0x7F) as u8) << 1) | 1;
    out.extend_from_slice(&[b1, b2, b3, b4, b5]);
}

/// Segment a PES packet across 188-byte TS packets, setting PUSI on the
/// first, adding an adaptation field (PCR and/or stuffing) as needed, and
/// incrementing the per-PID continuity counter on every packet carrying
/// payload.
fn packetize_pes(
    pid: u16,
    pes: &[u8],
    pcr_27m: Option<u64>,
    random_access: bool,
    continuity: &mut HashMap<u16, u8>,
) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();
    let mut offset = 0usize;
    let mut first = true;

    while offset < pes.len() || first {
        let mut buf = Vec::with_capacity(TS_PACKET_SIZE);
        buf.push(SYNC_BYTE);
        let pusi = first;
        let pusi_bit = if pusi { 0x4000u16 } else { 0 };
        buf.extend_from_slice(&(pusi_bit | (pid & 0x1FFF)).to_be_bytes());

        let counter = continuity.entry(pid).or_insert(0);
        let cc = *counter;
        *counter = (*counter + 1) & 0x0F;

        let want_adaptation = first && (pcr_27m.is_some() || random_access);
        let remaining_payload = pes.len() - offset;
        let header_len = 4usize;

        if want_adaptation {
            let mut adaptation = Vec::new();
            let mut flags = 0u8;
            if random_access {
                flags |= 0x40; // random_access_indicator
            }
            if pcr_27m.is_some() {
                flags |= 0x10; // PCR_flag
            }
            adaptation.push(flags);
            if let Some(pcr) = pcr_27m {
                write_pcr(&mut adaptation, pcr);
            }

            let max_payload_with_af = TS_PACKET_SIZE - header_len - 1 - adaptation.len();
            let take = remaining_payload.min(max_payload_with_af);
            let stuffing = max_payload_with_af - take;
            let adaptation_field_length = adaptation.len() + stuffing;

            buf.push(0x30 | cc); // adaptation + payload
            buf.push(adaptation_field_length as u8);
            buf.extend_from_slice(&adaptation);
            for _ in 0..stuffing {
                buf.push(0xFF);
            }
            buf.extend_from_slice(&pes[offset..offset + take]);
            offset += take;
        } else {
            let max_payload = TS_PACKET_SIZE - header_len;
            let take = remaining_payload.min(max_payload);
            let need_stuffing = take < max_payload;
            if need_stuffing {
                let stuffing = max_payload - take;
                let adaptation_field_length = stuffing.saturating_sub(1);
                buf.push(0x30 | cc);
                if stuffing >= 1 {
                    buf.push(adaptation_field_length as u8);
                    if adaptation_field_length > 0 {
                        buf.push(0x00); // flags, no PCR/random access
                        for _ in 0..adaptation_field_length - 1 {
                            buf.push(0xFF);
                        }
                    }
                } else {
                    // no room at all for adaptation_field_length byte; unreachable
                    // given max_payload - take >= 1 here, kept for clarity.
                }
                buf.extend_from_slice(&pes[offset..offset + take]);
            } else {
                buf.push(0x10 | cc); // payload only
                buf.extend_from_slice(&pes[offset..offset + take]);
            }
            offset += take;
        }

        while buf.len() < TS_PACKET_SIZE {
            buf.push(0xFF);
        }
        buf.truncate(TS_PACKET_SIZE);
        packets.push(buf);
        first = false;
        if offset >= pes.len() {
            break;
        }
    }

    packets
}

fn write_pcr(out: &mut Vec<u8>, pcr_27m: u64) {
    let base = (pcr_27m / 300) & 0x1_FFFF_FFFF; // 33 bits, 90kHz
    let ext = (pcr_27m % 300) & 0x1FF; // 9 bits
    let b1 = (base >> 25) as u8;
    let b2 = (base >> 17) as u8;
    let b3 = (base >> 9) as u8;
    let b4 = (base >> 1) as u8;
    let b5 = (((base & 1) as u8) << 7) | 0x7E | ((ext >> 8) as u8 & 0x01);
    let b6 = (ext & 0xFF) as u8;
    out.extend_from_slice(&[b1, b2, b3, b4, b5, b6]);
}

/// CRC-32/MPEG-2: polynomial 0x04C11DB7, init 0xFFFFFFFF, no reflection, no
/// final XOR. Used for PSI section CRCs.
fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            if crc & 0x8000_0000 != 0 {
                crc = (crc << 1) ^ 0x04C1_1DB7;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AudioConfig, Resolution, VideoConfig};

    fn video_config() -> CodecConfig {
        CodecConfig::Video(VideoConfig {
            mime: Mime::H264,
            start_bitrate: 2_000_000,
            resolution: Resolution { w: 1920, h: 1080 },
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
    fn crc32_mpeg2_matches_known_vector() {
        // CRC-32/MPEG-2 of the ASCII bytes "123456789" is 0x0376E6E7.
        assert_eq!(crc32_mpeg2(b"123456789"), 0x0376_E6E7);
    }

    #[test]
    fn all_packets_are_188_bytes_and_start_with_sync() {
        let mut muxer = TsMuxer::new(TsMuxerConfig::default());
        let vid = muxer.add_stream(video_config()).unwrap();
        muxer.add_stream(audio_config()).unwrap();

        let mut all_packets = muxer.start_stream().unwrap();
        let frame = Frame::new(vid, Mime::H264, Payload::Owned(vec![0x65, 1, 2, 3]), 0, true);
        all_packets.extend(muxer.write(vid, frame).unwrap());
        all_packets.extend(muxer.stop_stream().unwrap());

        for pkt in &all_packets {
            let data: &[u8] = pkt.payload.as_ref();
            assert_eq!(data.len(), TS_PACKET_SIZE);
            assert_eq!(data[0], SYNC_BYTE);
        }
    }

    #[test]
    fn continuity_counter_increments_per_pid() {
        let mut muxer = TsMuxer::new(TsMuxerConfig::default());
        let vid = muxer.add_stream(video_config()).unwrap();
        let _ = muxer.start_stream().unwrap();

        let f1 = Frame::new(vid, Mime::H264, Payload::Owned(vec![0x65; 10]), 0, true);
        let f2 = Frame::new(vid, Mime::H264, Payload::Owned(vec![0x41; 10]), 33_000, false);
        let pkts1 = muxer.write(vid, f1).unwrap();
        let pkts2 = muxer.write(vid, f2).unwrap();

        let first_cc = pkts1[0].payload.as_ref()[3] & 0x0F;
        let second_cc = pkts2[0].payload.as_ref()[3] & 0x0F;
        assert_eq!((first_cc + 1) & 0x0F, second_cc);
    }

    #[test]
    fn non_keyframe_first_video_frame_is_rejected() {
        let mut muxer = TsMuxer::new(TsMuxerConfig::default());
        let vid = muxer.add_stream(video_config()).unwrap();
        let _ = muxer.start_stream().unwrap();
        let frame = Frame::new(vid, Mime::H264, Payload::Owned(vec![0x41; 10]), 0, false);
        assert!(muxer.write(vid, frame).is_err());
    }

    #[test]
    fn zero_length_payload_is_bad_parameter() {
        let mut muxer = TsMuxer::new(TsMuxerConfig::default());
        let vid = muxer.add_stream(video_config()).unwrap();
        let _ = muxer.start_stream().unwrap();
        let frame = Frame::new(vid, Mime::H264, Payload::Owned(vec![]), 0, true);
        assert!(matches!(
            muxer.write(vid, frame),
            Err(StreamkitError::BadParameter(_))
        ));
    }

    #[test]
    fn write_before_start_stream_is_invalid_state() {
        let mut muxer = TsMuxer::new(TsMuxerConfig::default());
        let vid = muxer.add_stream(video_config()).unwrap();
        let frame = Frame::new(vid, Mime::H264, Payload::Owned(vec![1, 2, 3]), 0, true);
        assert!(matches!(
            muxer.write(vid, frame),
            Err(StreamkitError::InvalidState(_))
        ));
    }
}
