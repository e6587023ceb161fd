//! Minimal ISOBMFF helpers: FourCC box walking and the Dolby Vision sample-entry
//! fix-up applied to HLS/fMP4 init segments.

mod box_utils;
pub mod dovi;

#[cfg(test)]
mod test_support;

pub use dovi::{FixReport, fix_init_segment, parse_profile, target_tag};
