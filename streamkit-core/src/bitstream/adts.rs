//! ADTS (Audio Data Transport Stream) header build/parse, used to wrap AAC
//! access units for MPEG-TS.

use crate::error::BitstreamError;

/// Sample-rate lookup table index per ISO/IEC 13818-7, table 1.18.
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

pub fn sample_rate_index(sample_rate: u32) -> Option<u8> {
    SAMPLE_RATES.iter().position(|&r| r == sample_rate).map(|i| i as u8)
}

pub fn sample_rate_from_index(index: u8) -> Option<u32> {
    SAMPLE_RATES.get(index as usize).copied()
}

/// Logical contents of one ADTS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    pub profile: u8, // MPEG-4 object type minus 1 (AAC-LC = 1)
    pub sample_rate_index: u8,
    pub channel_config: u8,
    pub payload_length: usize,
}

/// Build the 7-byte ADTS header + payload for one AAC access unit.
/// `profile` is the AAC object type as sent by the encoder (AAC-LC = 2);
/// the ADTS field value is `profile - 1` per convention.
pub fn build_adts(sample_rate: u32, channel_config: u8, profile: u8, payload: &[u8]) -> Result<Vec<u8>, BitstreamError> {
    let sr_index = sample_rate_index(sample_rate).ok_or_else(|| {
        BitstreamError::UnsupportedProfile(format!("unsupported AAC sample rate {sample_rate}"))
    })?;
    let frame_length = payload.len() + 7;
    if frame_length > 0x1FFF {
        return Err(BitstreamError::TooShort {
            need: 0,
            got: frame_length,
        });
    }

    let mut header = [0u8; 7];
    header[0] = 0xFF;
    header[1] = 0xF1; // syncword tail=1111, MPEG-4=0, layer=00, protection_absent=1
    let profile_field = profile.saturating_sub(1).min(3);
    header[2] = (profile_field << 6) | (sr_index << 2) | ((channel_config >> 2) & 0x01);
    header[3] = ((channel_config & 0x03) << 6) | ((frame_length >> 11) as u8 & 0x03);
    header[4] = ((frame_length >> 3) & 0xFF) as u8;
    header[5] = (((frame_length & 0x07) as u8) << 5) | 0x1F; // buffer_fullness high bits = 0x7FF
    header[6] = 0xFC; // buffer_fullness low bits | number_of_raw_data_blocks=0

    let mut out = Vec::with_capacity(frame_length);
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Parse an ADTS-framed buffer, returning the header fields and the
/// payload-length they encode. Does not copy the payload.
pub fn parse_adts(data: &[u8]) -> Result<AdtsHeader, BitstreamError> {
    if data.len() < 7 {
        return Err(BitstreamError::TooShort {
            need: 7,
            got: data.len(),
        });
    }
    if data[0] != 0xFF || (data[1] & 0xF0) != 0xF0 {
        return Err(BitstreamError::NoStartCode);
    }
    let profile = (data[2] >> 6) & 0x03;
    let sr_index = (data[2] >> 2) & 0x0F;
    let channel_config = ((data[2] & 0x01) << 2) | ((data[3] >> 6) & 0x03);
    let frame_length = (((data[3] & 0x03) as usize) << 11)
        | ((data[4] as usize) << 3)
        | ((data[5] as usize) >> 5);
    let payload_length = frame_length.saturating_sub(7);

    Ok(AdtsHeader {
        profile: profile + 1,
        sample_rate_index: sr_index,
        channel_config,
        payload_length,
    })
}
