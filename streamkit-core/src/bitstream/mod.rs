//! Bitstream helpers shared by the muxers: start-code handling, H.264/H.265
//! SPS parsing, ADTS header build/parse, and Opus CSD parsing.

pub mod adts;
pub mod h264;
pub mod h265;
pub mod opus;
pub mod start_code;

pub use start_code::{annex_b_slices, remove_start_code, start_code_size};
