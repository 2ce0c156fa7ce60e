//! Opus codec-specific-data (CSD) parsing: recognizes the `AOPUSHDR` /
//! `AOPUSDLY` / `AOPUSPRL` markers an encoder may emit and extracts the
//! `OpusHead` identification header.

use crate::error::BitstreamError;

pub const MAGIC_HDR: &[u8; 8] = b"AOPUSHDR";
pub const MAGIC_DLY: &[u8; 8] = b"AOPUSDLY";
pub const MAGIC_PRL: &[u8; 8] = b"AOPUSPRL";
const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusHead {
    pub channel_count: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
    pub channel_mapping_family: u8,
}

/// Parse a raw `OpusHead` identification header (the payload carried inside
/// an `AOPUSHDR`-tagged CSD segment, or produced directly by the encoder).
pub fn parse_opus_head(data: &[u8]) -> Result<OpusHead, BitstreamError> {
    if data.len() < 19 || &data[0..8] != OPUS_HEAD_MAGIC {
        return Err(BitstreamError::BadOpusCsd);
    }
    let channel_count = data[9];
    let pre_skip = u16::from_le_bytes([data[10], data[11]]);
    let input_sample_rate = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
    let output_gain = i16::from_le_bytes([data[16], data[17]]);
    let channel_mapping_family = data[18];
    Ok(OpusHead {
        channel_count,
        pre_skip,
        input_sample_rate,
        output_gain,
        channel_mapping_family,
    })
}

/// Parse one CSD segment possibly carrying the `AOPUSHDR`/`AOPUSDLY`/
/// `AOPUSPRL` marker prefix. Returns the identification header when the
/// segment is (or contains) an `OpusHead`.
pub fn parse_opus_csd_segment(segment: &[u8]) -> Result<Option<OpusHead>, BitstreamError> {
    if segment.len() >= 8 && &segment[0..8] == MAGIC_HDR {
        let inner = &segment[8..];
        return parse_opus_head(inner).map(Some);
    }
    if segment.len() >= 8 && (&segment[0..8] == MAGIC_DLY || &segment[0..8] == MAGIC_PRL) {
        return Ok(None);
    }
    if segment.len() >= 8 && &segment[0..8] == OPUS_HEAD_MAGIC {
        return parse_opus_head(segment).map(Some);
    }
    Ok(None)
}

/// Build a minimal `OpusHead` identification header byte buffer, the
/// reverse of `parse_opus_head`, used by the MP4 muxer to emit the decoder
/// config record and by tests to exercise the round-trip law.
pub fn build_opus_head(head: &OpusHead) -> Vec<u8> {
    let mut out = Vec::with_capacity(19);
    out.extend_from_slice(OPUS_HEAD_MAGIC);
    out.push(1); // version
    out.push(head.channel_count);
    out.extend_from_slice(&head.pre_skip.to_le_bytes());
    out.extend_from_slice(&head.input_sample_rate.to_le_bytes());
    out.extend_from_slice(&head.output_gain.to_le_bytes());
    out.push(head.channel_mapping_family);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_opus_head() {
        let head = OpusHead {
            channel_count: 2,
            pre_skip: 312,
            input_sample_rate: 48000,
            output_gain: 0,
            channel_mapping_family: 0,
        };
        let bytes = build_opus_head(&head);
        let parsed = parse_opus_head(&bytes).unwrap();
        assert_eq!(parsed, head);
    }

    #[test]
    fn recognizes_aopushdr_wrapper() {
        let head = OpusHead {
            channel_count: 1,
            pre_skip: 0,
            input_sample_rate: 48000,
            output_gain: 0,
            channel_mapping_family: 0,
        };
        let mut wrapped = MAGIC_HDR.to_vec();
        wrapped.extend_from_slice(&build_opus_head(&head));
        let parsed = parse_opus_csd_segment(&wrapped).unwrap();
        assert_eq!(parsed, Some(head));
    }

    #[test]
    fn delay_and_preroll_markers_yield_no_head() {
        assert_eq!(parse_opus_csd_segment(MAGIC_DLY).unwrap(), None);
        assert_eq!(parse_opus_csd_segment(MAGIC_PRL).unwrap(), None);
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(parse_opus_head(b"NOTOPUSHEAD12345678").is_err());
    }
}
