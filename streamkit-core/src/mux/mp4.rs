//! Fragmented MP4 (ISO-BMFF / CMAF-style) muxer: one init segment
//! (`ftyp`+`moov`) followed by a `moof`+`mdat` pair per media segment, and a
//! trailing `mfra` random-access index.

use crate::bitstream::h264::build_avc_decoder_config_record;
use crate::bitstream::h265::build_hevc_decoder_config_record;
use crate::bitstream::split_nal_units;
use crate::clock::{rescale, TimeBase};
use crate::error::{Result, StreamkitError};
use crate::model::{CodecConfig, Frame, Mime, Packet, PacketKind, Payload, SampleEntry, SegmentChunk};
use crate::mux::Muxer;

#[derive(Debug, Clone)]
pub struct Mp4MuxerConfig {
    pub segment_target_ms: u32,
    pub write_mfra: bool,
}

impl Default for Mp4MuxerConfig {
    fn default() -> Self {
        Mp4MuxerConfig {
            segment_target_ms: 1_000,
            write_mfra: true,
        }
    }
}

struct Mp4Track {
    track_id: u32,
    config: CodecConfig,
    timescale: u32,
    extra: Vec<Vec<u8>>,
    chunk: SegmentChunk,
    last_dts_ticks: Option<i64>,
    /// `dts`, in this track's own timescale, of the first sample currently
    /// buffered in `chunk`. Reset to `None` once the chunk is flushed.
    segment_first_dts_ticks: Option<i64>,
    seen_first_sample: bool,
    moof_offsets: Vec<(u64, i64)>, // (byte offset of moof, base decode time in track timescale)
}

impl Mp4Track {
    fn is_video(&self) -> bool {
        self.config.mime().is_video()
    }
}

pub struct Mp4Muxer {
    config: Mp4MuxerConfig,
    tracks: Vec<Mp4Track>,
    started: bool,
    stopped: bool,
    sequence_number: u32,
    byte_offset: u64,
    segment_open_us: Option<i64>,
}

impl Mp4Muxer {
    pub fn new(config: Mp4MuxerConfig) -> Self {
        Mp4Muxer {
            config,
            tracks: Vec::new(),
            started: false,
            stopped: false,
            sequence_number: 0,
            byte_offset: 0,
            segment_open_us: None,
        }
    }

    fn track_timescale(mime: Mime, config: &CodecConfig) -> u32 {
        match mime {
            Mime::H264 | Mime::H265 => 90_000,
            Mime::Aac | Mime::Opus => config.as_audio().map(|a| a.sample_rate).unwrap_or(48_000),
        }
    }

    fn build_init_segment(&self) -> Vec<u8> {
        let mut out = build_ftyp();
        out.extend(build_moov(&self.tracks));
        out
    }

    /// Flush every track's buffered chunk into one `moof` + `mdat` pair,
    /// returning it (or `None` if nothing is buffered).
    fn flush_segment(&mut self) -> Option<Vec<u8>> {
        let has_samples = self.tracks.iter().any(|t| !t.chunk.samples.is_empty());
        if !has_samples {
            return None;
        }

        self.sequence_number += 1;
        let moof_offset = self.byte_offset;

        // mdat data offset for the first track = size of moof box + 8 (mdat
        // header), known only after moof is built; each later track's
        // samples start after the previous tracks' bytes in mdat_payload, so
        // its data_offset is the first track's offset plus their lengths.
        let mut trafs = Vec::new();
        let mut mdat_payload = Vec::new();
        let mut track_base_times = Vec::new();

        for track in &self.tracks {
            if track.chunk.samples.is_empty() {
                continue;
            }
            track_base_times.push(track.segment_first_dts_ticks.unwrap_or(0).max(0));
        }

        // First pass: compute moof size using placeholder data_offset=0, then
        // rebuild with the real offset (trun's data_offset field is a fixed
        // 4 bytes, so box sizes don't change between passes).
        let mut base_idx = 0usize;
        for track in &self.tracks {
            if track.chunk.samples.is_empty() {
                continue;
            }
            let base_decode_time = track_base_times[base_idx];
            base_idx += 1;
            let traf = build_traf(track.track_id, base_decode_time, &track.chunk.samples, 0);
            trafs.push((track.track_id, traf));
            mdat_payload.extend_from_slice(&track.chunk.data);
        }

        let mfhd = build_full_box(b"mfhd", 0, 0, &self.sequence_number.to_be_bytes());
        let moof_body_provisional: Vec<u8> = trafs.iter().flat_map(|(_, t)| t.clone()).collect();
        let moof_provisional = build_box(b"moof", [mfhd.clone(), moof_body_provisional].concat());
        let mdat_base_offset = (moof_provisional.len() + 8) as i32;

        trafs.clear();
        base_idx = 0;
        let mut track_data_offset = mdat_base_offset;
        for track in &self.tracks {
            if track.chunk.samples.is_empty() {
                continue;
            }
            let base_decode_time = track_base_times[base_idx];
            base_idx += 1;
            let traf = build_traf(track.track_id, base_decode_time, &track.chunk.samples, track_data_offset);
            trafs.push((track.track_id, traf));
            track_data_offset += track.chunk.data.len() as i32;
        }
        let moof_body: Vec<u8> = trafs.into_iter().flat_map(|(_, t)| t).collect();
        let moof = build_box(b"moof", [mfhd, moof_body].concat());
        let mdat = build_box(b"mdat", mdat_payload);

        for track in &mut self.tracks {
            if !track.chunk.samples.is_empty() {
                track.moof_offsets.push((moof_offset, track.segment_first_dts_ticks.unwrap_or(0)));
            }
            track.chunk = SegmentChunk::default();
            track.segment_first_dts_ticks = None;
        }

        let mut out = Vec::with_capacity(moof.len() + mdat.len());
        self.byte_offset += (moof.len() + mdat.len()) as u64;
        out.extend(moof);
        out.extend(mdat);
        Some(out)
    }

    fn build_mfra(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for track in &self.tracks {
            if track.moof_offsets.is_empty() {
                continue;
            }
            let mut tfra_body = Vec::new();
            tfra_body.extend_from_slice(&track.track_id.to_be_bytes());
            tfra_body.extend_from_slice(&0x3Fu32.to_be_bytes()); // length_size fields, all 1 byte each (minus 1 => 0, packed into reserved(26)+3x2 bits = 0)
            tfra_body.extend_from_slice(&(track.moof_offsets.len() as u32).to_be_bytes());
            for (offset, time) in &track.moof_offsets {
                tfra_body.extend_from_slice(&(*time as u64).to_be_bytes());
                tfra_body.extend_from_slice(&offset.to_be_bytes());
                tfra_body.push(1); // traf_number
                tfra_body.push(1); // trun_number
                tfra_body.push(1); // sample_number
            }
            body.extend(build_full_box(b"tfra", 1, 0, &tfra_body));
        }
        let mfra_size_without_mfro = 8 + body.len() + 16;
        body.extend(build_box(b"mfro", (mfra_size_without_mfro as u32).to_be_bytes().to_vec()));
        build_box(b"mfra", body)
    }
}

impl Muxer for Mp4Muxer {
    fn add_stream(&mut self, config: CodecConfig) -> Result<u32> {
        if self.started {
            return Err(StreamkitError::InvalidState(
                "add_stream after start_stream".into(),
            ));
        }
        let mime = config.mime();
        let track_id = (self.tracks.len() + 1) as u32;
        let timescale = Self::track_timescale(mime, &config);
        self.tracks.push(Mp4Track {
            track_id,
            config,
            timescale,
            extra: Vec::new(),
            chunk: SegmentChunk::default(),
            last_dts_ticks: None,
            segment_first_dts_ticks: None,
            seen_first_sample: false,
            moof_offsets: Vec::new(),
        });
        Ok(track_id)
    }

    fn start_stream(&mut self) -> Result<Vec<Packet>> {
        if self.tracks.is_empty() {
            return Err(StreamkitError::Unconfigured("no streams added".into()));
        }
        self.started = true;
        self.stopped = false;
        let init = self.build_init_segment();
        self.byte_offset += init.len() as u64;
        Ok(vec![Packet::new(Payload::Owned(init), 0, PacketKind::Other)])
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
            track.extra = match track.config.mime() {
                Mime::H264 | Mime::H265 => split_nal_units(payload).into_iter().map(|n| n.to_vec()).collect(),
                _ => vec![payload.to_vec()],
            };
            return Ok(Vec::new());
        }

        if !frame.extra.is_empty() && self.tracks[index].extra.is_empty() {
            self.tracks[index].extra = frame.extra.clone();
        }

        let is_video = self.tracks[index].is_video();
        if is_video && !self.tracks[index].seen_first_sample && !frame.is_key {
            return Err(StreamkitError::MuxerInternal(
                "first video frame on a track must be a keyframe".into(),
            ));
        }
        if frame.payload.is_empty() {
            return Err(StreamkitError::BadParameter("zero-length payload".into()));
        }

        let timescale = self.tracks[index].timescale;
        let dts_ticks = rescale(frame.dts_us, TimeBase::MICROS, TimeBase::new(timescale as u64));
        let pts_ticks = rescale(frame.pts_us, TimeBase::MICROS, TimeBase::new(timescale as u64));

        if let Some(last) = self.tracks[index].last_dts_ticks {
            if dts_ticks <= last {
                return Err(StreamkitError::MuxerInternal(format!(
                    "non-monotonic dts on track {track_id}: {dts_ticks} <= {last}"
                )));
            }
        }
        let duration = self.tracks[index]
            .last_dts_ticks
            .map(|last| (dts_ticks - last) as u32)
            .unwrap_or(0);
        // The very first sample has no prior dts to derive a duration from;
        // backfill it once the second sample of the segment arrives.
        if duration > 0 {
            if let Some(last_entry) = self.tracks[index].chunk.samples.last_mut() {
                if last_entry.duration == 0 {
                    last_entry.duration = duration;
                }
            }
        }

        let mime = self.tracks[index].mime_of();
        let sample_bytes: Vec<u8> = match mime {
            Mime::H264 | Mime::H265 => build_avcc_sample(payload_ref(&frame), mime),
            _ => frame.payload.as_ref().to_vec(),
        };

        // Decide the segment boundary *before* appending this sample: a
        // keyframe reached at or after the target duration starts the next
        // segment, it does not close out the one it would otherwise join.
        let mut out = Vec::new();
        let due = self
            .segment_open_us
            .map(|start| frame.pts_us - start >= self.config.segment_target_ms as i64 * 1000)
            .unwrap_or(false);
        let has_video = self.tracks.iter().any(|t| t.is_video());
        let boundary_allowed = if has_video { is_video && frame.is_key } else { true };
        if due && boundary_allowed {
            if let Some(seg) = self.flush_segment() {
                out.push(Packet::new(Payload::Owned(seg), frame.pts_us, PacketKind::Other));
            }
            self.segment_open_us = Some(frame.pts_us);
        } else if self.segment_open_us.is_none() {
            self.segment_open_us = Some(frame.pts_us);
        }

        let composition_offset = (pts_ticks - dts_ticks) as i32;
        let track = &mut self.tracks[index];
        if track.chunk.samples.is_empty() {
            track.segment_first_dts_ticks = Some(dts_ticks);
        }
        track.chunk.samples.push(SampleEntry {
            duration: 0, // backfilled above by the *next* sample, or at segment flush
            size: sample_bytes.len() as u32,
            is_sync: frame.is_key,
            composition_offset,
        });
        track.chunk.data.extend_from_slice(&sample_bytes);
        track.last_dts_ticks = Some(dts_ticks);
        track.seen_first_sample = true;

        Ok(out)
    }

    fn stop_stream(&mut self) -> Result<Vec<Packet>> {
        let mut out = Vec::new();
        // Give every track's final sample a duration equal to its
        // predecessor's so `trun` never emits a bogus zero-duration sample.
        for track in &mut self.tracks {
            let fallback = track
                .chunk
                .samples
                .iter()
                .rev()
                .find(|s| s.duration > 0)
                .map(|s| s.duration)
                .unwrap_or(0);
            if let Some(last) = track.chunk.samples.last_mut() {
                if last.duration == 0 {
                    last.duration = fallback;
                }
            }
        }
        if let Some(seg) = self.flush_segment() {
            out.push(Packet::new(Payload::Owned(seg), 0, PacketKind::Other));
        }
        if self.config.write_mfra {
            let mfra = self.build_mfra();
            out.push(Packet::new(Payload::Owned(mfra), 0, PacketKind::Other));
        }
        self.started = false;
        self.stopped = true;
        Ok(out)
    }
}

impl Mp4Track {
    fn mime_of(&self) -> Mime {
        self.config.mime()
    }
}

fn payload_ref(frame: &Frame) -> &[u8] {
    frame.payload.as_ref()
}

/// Convert an Annex-B access unit into length-prefixed AVCC/HVCC form (the
/// only framing MP4 samples may use).
fn build_avcc_sample(annex_b: &[u8], _mime: Mime) -> Vec<u8> {
    let mut out = Vec::with_capacity(annex_b.len());
    for nal in split_nal_units(annex_b) {
        out.extend_from_slice(&(nal.len() as u32).to_be_bytes());
        out.extend_from_slice(nal);
    }
    if out.is_empty() {
        out.extend_from_slice(&(annex_b.len() as u32).to_be_bytes());
        out.extend_from_slice(annex_b);
    }
    out
}

fn build_box(typ: &[u8; 4], payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(typ);
    out.extend_from_slice(&payload);
    out
}

fn build_full_box(typ: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + 4);
    payload.push(version);
    payload.extend_from_slice(&flags.to_be_bytes()[1..4]);
    payload.extend_from_slice(body);
    build_box(typ, payload)
}

fn build_ftyp() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"isom"); // major_brand
    payload.extend_from_slice(&512u32.to_be_bytes()); // minor_version
    for brand in [b"isom", b"iso5", b"dash", b"mp41"] {
        payload.extend_from_slice(brand);
    }
    build_box(b"ftyp", payload)
}

fn identity_matrix() -> [u8; 36] {
    let mut m = [0u8; 36];
    m[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes()); // a = 1.0
    m[16..20].copy_from_slice(&0x0001_0000u32.to_be_bytes()); // d = 1.0
    m[32..36].copy_from_slice(&0x4000_0000u32.to_be_bytes()); // w = 1.0 (2.30 fixed)
    m
}

fn build_moov(tracks: &[Mp4Track]) -> Vec<u8> {
    let mut mvhd_body = Vec::new();
    mvhd_body.extend_from_slice(&0u32.to_be_bytes()); // creation_time
    mvhd_body.extend_from_slice(&0u32.to_be_bytes()); // modification_time
    mvhd_body.extend_from_slice(&1000u32.to_be_bytes()); // timescale: movie-level, arbitrary but conventional
    mvhd_body.extend_from_slice(&0u32.to_be_bytes()); // duration: unknown, fragmented
    mvhd_body.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate = 1.0
    mvhd_body.extend_from_slice(&0x0100u16.to_be_bytes()); // volume = 1.0
    mvhd_body.extend_from_slice(&[0u8; 10]); // reserved
    mvhd_body.extend_from_slice(&identity_matrix());
    mvhd_body.extend_from_slice(&[0u8; 24]); // pre_defined
    mvhd_body.extend_from_slice(&((tracks.len() + 1) as u32).to_be_bytes()); // next_track_ID
    let mvhd = build_full_box(b"mvhd", 0, 0, &mvhd_body);

    let mut body = mvhd;
    for track in tracks {
        body.extend(build_trak(track));
    }
    body.extend(build_mvex(tracks));

    build_box(b"moov", body)
}

fn build_trak(track: &Mp4Track) -> Vec<u8> {
    let is_video = track.is_video();

    let mut tkhd_body = Vec::new();
    tkhd_body.extend_from_slice(&0u32.to_be_bytes()); // creation_time
    tkhd_body.extend_from_slice(&0u32.to_be_bytes()); // modification_time
    tkhd_body.extend_from_slice(&track.track_id.to_be_bytes());
    tkhd_body.extend_from_slice(&0u32.to_be_bytes()); // reserved
    tkhd_body.extend_from_slice(&0u32.to_be_bytes()); // duration
    tkhd_body.extend_from_slice(&[0u8; 8]); // reserved
    tkhd_body.extend_from_slice(&0u16.to_be_bytes()); // layer
    tkhd_body.extend_from_slice(&0u16.to_be_bytes()); // alternate_group
    tkhd_body.extend_from_slice(&(if is_video { 0u16 } else { 0x0100u16 }).to_be_bytes()); // volume
    tkhd_body.extend_from_slice(&0u16.to_be_bytes()); // reserved
    tkhd_body.extend_from_slice(&identity_matrix());
    let (w, h) = track
        .config
        .as_video()
        .map(|v| (v.resolution.w, v.resolution.h))
        .unwrap_or((0, 0));
    tkhd_body.extend_from_slice(&((w as u32) << 16).to_be_bytes());
    tkhd_body.extend_from_slice(&((h as u32) << 16).to_be_bytes());
    let tkhd = build_full_box(b"tkhd", 0, 0x000007, &tkhd_body); // track_enabled|in_movie|in_preview

    let mut mdhd_body = Vec::new();
    mdhd_body.extend_from_slice(&0u32.to_be_bytes());
    mdhd_body.extend_from_slice(&0u32.to_be_bytes());
    mdhd_body.extend_from_slice(&track.timescale.to_be_bytes());
    mdhd_body.extend_from_slice(&0u32.to_be_bytes()); // duration
    mdhd_body.extend_from_slice(&0x55c4u16.to_be_bytes()); // language = "und"
    mdhd_body.extend_from_slice(&0u16.to_be_bytes());
    let mdhd = build_full_box(b"mdhd", 0, 0, &mdhd_body);

    let handler_type: &[u8; 4] = if is_video { b"vide" } else { b"soun" };
    let mut hdlr_body = Vec::new();
    hdlr_body.extend_from_slice(&0u32.to_be_bytes()); // pre_defined
    hdlr_body.extend_from_slice(handler_type);
    hdlr_body.extend_from_slice(&[0u8; 12]); // reserved
    hdlr_body.extend_from_slice(b"streamkit\0");
    let hdlr = build_full_box(b"hdlr", 0, 0, &hdlr_body);

    let media_header = if is_video {
        build_full_box(b"vmhd", 0, 1, &[0, 0, 0, 0, 0, 0, 0, 0])
    } else {
        build_full_box(b"smhd", 0, 0, &[0, 0, 0, 0])
    };

    let url = build_full_box(b"url ", 0, 1, &[]);
    let mut dref_body = Vec::new();
    dref_body.extend_from_slice(&1u32.to_be_bytes());
    dref_body.extend(url);
    let dref = build_full_box(b"dref", 0, 0, &dref_body);
    let dinf = build_box(b"dinf", dref);

    let stsd = build_stsd(track);
    let stts = build_full_box(b"stts", 0, 0, &0u32.to_be_bytes());
    let stsc = build_full_box(b"stsc", 0, 0, &0u32.to_be_bytes());
    let stsz = build_full_box(b"stsz", 0, 0, &[0u8; 8]); // sample_size=0, sample_count=0
    let co64 = build_full_box(b"co64", 0, 0, &0u32.to_be_bytes());

    let mut stbl_body = stsd;
    stbl_body.extend(stts);
    stbl_body.extend(stsc);
    stbl_body.extend(stsz);
    stbl_body.extend(co64);
    let stbl = build_box(b"stbl", stbl_body);

    let mut minf_body = media_header;
    minf_body.extend(dinf);
    minf_body.extend(stbl);
    let minf = build_box(b"minf", minf_body);

    let mut mdia_body = mdhd;
    mdia_body.extend(hdlr);
    mdia_body.extend(minf);
    let mdia = build_box(b"mdia", mdia_body);

    let mut trak_body = tkhd;
    trak_body.extend(mdia);
    build_box(b"trak", trak_body)
}

fn build_stsd(track: &Mp4Track) -> Vec<u8> {
    let sample_entry = match track.config.mime() {
        Mime::H264 => build_visual_sample_entry(b"avc1", track, build_avcc_box(track)),
        Mime::H265 => build_visual_sample_entry(b"hvc1", track, build_hvcc_box(track)),
        Mime::Aac => build_audio_sample_entry(b"mp4a", track, build_esds_box(track)),
        Mime::Opus => build_audio_sample_entry(b"Opus", track, build_dops_box(track)),
    };
    let mut body = Vec::new();
    body.extend_from_slice(&1u32.to_be_bytes()); // entry_count
    body.extend(sample_entry);
    build_full_box(b"stsd", 0, 0, &body)
}

fn build_avcc_box(track: &Mp4Track) -> Vec<u8> {
    let sps = track.extra.first().cloned().unwrap_or_default();
    let pps = track.extra.get(1).cloned().unwrap_or_default();
    let record = build_avc_decoder_config_record(&sps, &pps).unwrap_or_default();
    build_box(b"avcC", record)
}

fn build_hvcc_box(track: &Mp4Track) -> Vec<u8> {
    // VPS, SPS, PPS are expected in that order in `extra`.
    let vps = track.extra.first().cloned().unwrap_or_default();
    let sps = track.extra.get(1).cloned().unwrap_or_default();
    let pps = track.extra.get(2).cloned().unwrap_or_default();
    let record = build_hevc_decoder_config_record(&vps, &sps, &pps).unwrap_or_default();
    build_box(b"hvcC", record)
}

/// Minimal MPEG-4 `esds` box wrapping the AudioSpecificConfig as an ES
/// descriptor, per ISO/IEC 14496-1.
fn build_esds_box(track: &Mp4Track) -> Vec<u8> {
    let asc = track.extra.first().cloned().unwrap_or_default();

    let mut dec_specific_info = vec![0x05, asc.len() as u8];
    dec_specific_info.extend_from_slice(&asc);

    let mut dec_config_descr = vec![0x04, (13 + dec_specific_info.len()) as u8];
    dec_config_descr.push(0x40); // objectTypeIndication: MPEG-4 Audio
    dec_config_descr.push(0x15); // streamType=audio(5)<<2 | upStream=0 | reserved=1
    dec_config_descr.extend_from_slice(&[0, 0, 0]); // bufferSizeDB
    dec_config_descr.extend_from_slice(&(128_000u32).to_be_bytes()); // maxBitrate
    dec_config_descr.extend_from_slice(&(128_000u32).to_be_bytes()); // avgBitrate
    dec_config_descr.extend(dec_specific_info);

    let sl_config_descr = vec![0x06, 0x01, 0x02];

    let mut es_descr = vec![0x03, (3 + dec_config_descr.len() + sl_config_descr.len()) as u8];
    es_descr.extend_from_slice(&0u16.to_be_bytes()); // ES_ID
    es_descr.push(0); // flags
    es_descr.extend(dec_config_descr);
    es_descr.extend(sl_config_descr);

    build_full_box(b"esds", 0, 0, &es_descr)
}

/// `dOps` Opus-specific box per the "Encapsulation of Opus in ISO Base
/// Media File Format" community spec.
fn build_dops_box(track: &Mp4Track) -> Vec<u8> {
    let head = track.extra.first().cloned().unwrap_or_default();
    let (channel_count, pre_skip, input_sample_rate, output_gain) = if head.len() >= 19 {
        (
            head[9],
            u16::from_le_bytes([head[10], head[11]]),
            u32::from_le_bytes([head[12], head[13], head[14], head[15]]),
            i16::from_le_bytes([head[16], head[17]]),
        )
    } else {
        (2, 0, 48_000, 0)
    };
    let mut body = Vec::new();
    body.push(0); // Version
    body.push(channel_count);
    body.extend_from_slice(&pre_skip.to_be_bytes());
    body.extend_from_slice(&input_sample_rate.to_be_bytes());
    body.extend_from_slice(&output_gain.to_be_bytes());
    body.push(0); // ChannelMappingFamily = 0
    build_box(b"dOps", body)
}

fn build_visual_sample_entry(fourcc: &[u8; 4], track: &Mp4Track, config_box: Vec<u8>) -> Vec<u8> {
    let (w, h) = track
        .config
        .as_video()
        .map(|v| (v.resolution.w as u16, v.resolution.h as u16))
        .unwrap_or((0, 0));
    let mut body = Vec::new();
    body.extend_from_slice(&[0u8; 6]); // reserved
    body.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    body.extend_from_slice(&[0u8; 16]); // pre_defined + reserved + pre_defined[3]
    body.extend_from_slice(&w.to_be_bytes());
    body.extend_from_slice(&h.to_be_bytes());
    body.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // horizresolution = 72 dpi
    body.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // vertresolution = 72 dpi
    body.extend_from_slice(&0u32.to_be_bytes()); // reserved
    body.extend_from_slice(&1u16.to_be_bytes()); // frame_count
    body.extend_from_slice(&[0u8; 32]); // compressorname
    body.extend_from_slice(&0x0018u16.to_be_bytes()); // depth = 24
    body.extend_from_slice(&0xFFFFu16.to_be_bytes()); // pre_defined = -1
    body.extend(config_box);
    build_box(fourcc, body)
}

fn build_audio_sample_entry(fourcc: &[u8; 4], track: &Mp4Track, config_box: Vec<u8>) -> Vec<u8> {
    let (channel_count, sample_rate) = track
        .config
        .as_audio()
        .map(|a| (a.channel_config.max(1) as u16, a.sample_rate))
        .unwrap_or((2, 48_000));
    let mut body = Vec::new();
    body.extend_from_slice(&[0u8; 6]); // reserved
    body.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    body.extend_from_slice(&[0u8; 8]); // reserved (version/revision/vendor)
    body.extend_from_slice(&channel_count.to_be_bytes());
    body.extend_from_slice(&16u16.to_be_bytes()); // samplesize
    body.extend_from_slice(&[0u8; 4]); // pre_defined + reserved
    body.extend_from_slice(&((sample_rate.min(0xFFFF)) << 16).to_be_bytes());
    body.extend(config_box);
    build_box(fourcc, body)
}

fn build_mvex(tracks: &[Mp4Track]) -> Vec<u8> {
    let mut body = Vec::new();
    for track in tracks {
        let mut trex_body = Vec::new();
        trex_body.extend_from_slice(&track.track_id.to_be_bytes());
        trex_body.extend_from_slice(&1u32.to_be_bytes()); // default_sample_description_index
        trex_body.extend_from_slice(&0u32.to_be_bytes()); // default_sample_duration
        trex_body.extend_from_slice(&0u32.to_be_bytes()); // default_sample_size
        trex_body.extend_from_slice(&0u32.to_be_bytes()); // default_sample_flags
        body.extend(build_full_box(b"trex", 0, 0, &trex_body));
    }
    build_box(b"mvex", body)
}

/// Build one `traf` box (`tfhd` + `tfdt` + `trun`) for one track's buffered
/// samples. `data_offset` is `trun`'s offset from the start of the `moof`
/// box to this track's first sample byte inside the sibling `mdat`.
fn build_traf(track_id: u32, base_decode_time: i64, samples: &[SampleEntry], data_offset: i32) -> Vec<u8> {
    let tfhd_flags = 0x02_0000u32; // default-base-is-moof
    let mut tfhd_body = Vec::new();
    tfhd_body.extend_from_slice(&track_id.to_be_bytes());
    let tfhd = build_full_box(b"tfhd", 0, tfhd_flags, &tfhd_body);

    let mut tfdt_body = Vec::new();
    tfdt_body.extend_from_slice(&(base_decode_time.max(0) as u64).to_be_bytes());
    let tfdt = build_full_box(b"tfdt", 1, 0, &tfdt_body);

    let trun_flags: u32 = 0x000001 // data-offset-present
        | 0x000100 // sample-duration-present
        | 0x000200 // sample-size-present
        | 0x000400 // sample-flags-present
        | 0x000800; // sample-composition-time-offsets-present
    let mut trun_body = Vec::new();
    trun_body.extend_from_slice(&(samples.len() as u32).to_be_bytes());
    trun_body.extend_from_slice(&data_offset.to_be_bytes());
    for sample in samples {
        trun_body.extend_from_slice(&sample.duration.to_be_bytes());
        trun_body.extend_from_slice(&sample.size.to_be_bytes());
        trun_body.extend_from_slice(&sample_flags(sample.is_sync).to_be_bytes());
        trun_body.extend_from_slice(&sample.composition_offset.to_be_bytes());
    }
    let trun = build_full_box(b"trun", 1, trun_flags, &trun_body);

    let mut traf_body = tfhd;
    traf_body.extend(tfdt);
    traf_body.extend(trun);
    build_box(b"traf", traf_body)
}

fn sample_flags(is_sync: bool) -> u32 {
    if is_sync {
        0x0200_0000 // sample_depends_on=2 (not I-picture... actually 0 for keyframe)
    } else {
        0x0101_0000 // sample_depends_on=1, sample_is_non_sync_sample=1
    }
}
