//! HEVC SPS parsing and `HEVCDecoderConfigurationRecord` construction.
//! Only the profile_tier_level / chroma / bit-depth fields the decoder
//! configuration record needs are extracted; full SPS semantics (short-term
//! reference picture sets, VUI, ...) are out of scope.

use crate::bitstream::h264::{strip_emulation_prevention, BitReader};
use crate::error::BitstreamError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcSpsInfo {
    pub general_profile_space: u8,
    pub general_tier_flag: u8,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    pub general_constraint_indicator_flags: u64,
    pub general_level_idc: u8,
    pub chroma_format_idc: u32,
    pub bit_depth_luma_minus8: u32,
    pub bit_depth_chroma_minus8: u32,
    /// Number of temporal sub-layers signaled by the profile_tier_level.
    pub max_sub_layers: u8,
}

fn parse_profile_tier_level(
    r: &mut BitReader,
    max_sub_layers_minus1: u8,
) -> Result<HevcSpsInfo, BitstreamError> {
    let general_profile_space = r.read_bits(2)? as u8;
    let general_tier_flag = r.read_bits(1)? as u8;
    let general_profile_idc = r.read_bits(5)? as u8;
    let general_profile_compatibility_flags = r.read_bits(32)?;
    // 48 bits of constraint indicator flags.
    let hi = r.read_bits(32)? as u64;
    let lo = r.read_bits(16)? as u64;
    let general_constraint_indicator_flags = (hi << 16) | lo;
    let general_level_idc = r.read_bits(8)? as u8;

    // Sub-layer profile/level present flags (we don't need their content,
    // just need to skip past them correctly).
    let mut sub_layer_profile_present = Vec::new();
    let mut sub_layer_level_present = Vec::new();
    for _ in 0..max_sub_layers_minus1 {
        sub_layer_profile_present.push(r.read_bit()? == 1);
        sub_layer_level_present.push(r.read_bit()? == 1);
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            let _reserved = r.read_bits(2)?;
        }
    }
    for i in 0..max_sub_layers_minus1 as usize {
        if sub_layer_profile_present[i] {
            let _profile_space = r.read_bits(2)?;
            let _tier_flag = r.read_bits(1)?;
            let _profile_idc = r.read_bits(5)?;
            let _compat_flags = r.read_bits(32)?;
            let _constraint_hi = r.read_bits(32)?;
            let _constraint_lo = r.read_bits(16)?;
        }
        if sub_layer_level_present[i] {
            let _level_idc = r.read_bits(8)?;
        }
    }

    Ok(HevcSpsInfo {
        general_profile_space,
        general_tier_flag,
        general_profile_idc,
        general_profile_compatibility_flags,
        general_constraint_indicator_flags,
        general_level_idc,
        chroma_format_idc: 1,
        bit_depth_luma_minus8: 0,
        bit_depth_chroma_minus8: 0,
        max_sub_layers: max_sub_layers_minus1 + 1,
    })
}

/// Parse an HEVC SPS NAL unit (2-byte NAL header included) for the fields
/// the decoder configuration record needs.
pub fn parse_sps(nal: &[u8]) -> Result<HevcSpsInfo, BitstreamError> {
    if nal.len() < 13 {
        return Err(BitstreamError::TooShort {
            need: 13,
            got: nal.len(),
        });
    }
    let rbsp = strip_emulation_prevention(&nal[2..]); // skip 2-byte NAL header
    let mut r = BitReader::new(&rbsp);

    let _sps_video_parameter_set_id = r.read_bits(4)?;
    let max_sub_layers_minus1 = r.read_bits(3)? as u8;
    let _temporal_id_nesting_flag = r.read_bit()?;

    let mut info = parse_profile_tier_level(&mut r, max_sub_layers_minus1)?;

    let _sps_seq_parameter_set_id = r.read_ue()?;
    let chroma_format_idc = r.read_ue()?;
    info.chroma_format_idc = chroma_format_idc;
    if chroma_format_idc == 3 {
        let _separate_colour_plane_flag = r.read_bit()?;
    }
    let _pic_width_in_luma_samples = r.read_ue()?;
    let _pic_height_in_luma_samples = r.read_ue()?;
    let conformance_window_flag = r.read_bit()?;
    if conformance_window_flag == 1 {
        let _left = r.read_ue()?;
        let _right = r.read_ue()?;
        let _top = r.read_ue()?;
        let _bottom = r.read_ue()?;
    }
    info.bit_depth_luma_minus8 = r.read_ue()?;
    info.bit_depth_chroma_minus8 = r.read_ue()?;

    Ok(info)
}

/// Build an `HEVCDecoderConfigurationRecord`. VPS/SPS/PPS (and optional
/// prefix/suffix SEI) are emitted as separate NAL-unit arrays in that order.
pub fn build_hevc_decoder_config_record(
    vps: &[u8],
    sps: &[u8],
    pps: &[u8],
) -> Result<Vec<u8>, BitstreamError> {
    let info = parse_sps(sps)?;

    let mut out = Vec::new();
    out.push(1); // configurationVersion
    let byte1 = (info.general_profile_space << 6)
        | (info.general_tier_flag << 5)
        | (info.general_profile_idc & 0x1f);
    out.push(byte1);
    out.extend_from_slice(&info.general_profile_compatibility_flags.to_be_bytes());
    // 48-bit constraint flags, big-endian.
    let constraint_bytes = info.general_constraint_indicator_flags.to_be_bytes();
    out.extend_from_slice(&constraint_bytes[2..8]);
    out.push(info.general_level_idc);
    out.extend_from_slice(&[0xf0, 0x00]); // reserved + min_spatial_segmentation_idc high nibble
    out.push(0xfc); // reserved + parallelismType
    out.push(0xfc | (info.chroma_format_idc as u8 & 0x03));
    out.push(0xf8 | (info.bit_depth_luma_minus8 as u8 & 0x07));
    out.push(0xf8 | (info.bit_depth_chroma_minus8 as u8 & 0x07));
    out.extend_from_slice(&[0x00, 0x00]); // avgFrameRate
    out.push((0 << 6) | (0 << 3) | (1 << 2) | 0x03); // constantFrameRate/numTemporalLayers/lengthSizeMinusOne=3

    let arrays: [(u8, &[u8]); 3] = [(32, vps), (33, sps), (34, pps)]; // VPS, SPS, PPS NAL types
    out.push(arrays.len() as u8);
    for (nal_type, nal) in arrays {
        out.push(0x80 | (nal_type & 0x3f)); // array_completeness=1, reserved=0, NAL_unit_type
        out.extend_from_slice(&1u16.to_be_bytes()); // numNalus
        out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
        out.extend_from_slice(nal);
    }

    Ok(out)
}
