//! Dolby Vision codec-box fix-up for fMP4 init segments.
//!
//! Sources that are remuxed with `-c:v copy` keep whatever FourCC the origin encoder wrote
//! into the `stsd` sample entry, most commonly `hev1`. Apple's AVPlayer only recognizes a
//! Dolby Vision elementary stream when the sample entry is tagged `dvhe` (profiles that carry
//! an HEVC base layer, e.g. 5 and 7) or `dvh1` (all other profiles). This module walks the
//! init segment's box tree and rewrites the FourCC in place.
//!
//! The rewrite never changes the size of the segment: only the 4 FourCC bytes of matching
//! sample entries are overwritten, so it can run directly against the file on disk.

use crate::box_utils::box_at;

const CONTAINER_BOXES: &[[u8; 4]] = &[*b"moov", *b"trak", *b"mdia", *b"minf", *b"stbl"];
const HEV1: [u8; 4] = *b"hev1";
const DVHE: [u8; 4] = *b"dvhe";
const DVH1: [u8; 4] = *b"dvh1";

/// Extract the integer Dolby Vision profile number from a profile string such as
/// `"dvhe.08"`, `"dvh1.05"`, or a bare `"8"`.
///
/// Returns `None` if no trailing digits can be parsed.
pub fn parse_profile(dv_profile: &str) -> Option<u8> {
    let digits: String = dv_profile
        .rsplit(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or_default()
        .chars()
        .rev()
        .collect();
    digits.parse().ok()
}

/// The sample-entry FourCC AVPlayer expects for a given Dolby Vision profile.
///
/// Profiles 5 and 7 carry no separate base layer description and use `dvhe`;
/// every other profile uses `dvh1`.
pub fn target_tag(dv_profile: &str) -> [u8; 4] {
    match parse_profile(dv_profile) {
        Some(5) | Some(7) => DVHE,
        _ => DVH1,
    }
}

/// Report describing how many sample entries were rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixReport {
    pub replaced: usize,
}

impl FixReport {
    pub fn changed(&self) -> bool {
        self.replaced > 0
    }
}

/// Rewrite every `hev1` video sample entry FourCC in `data` to the tag implied by
/// `dv_profile`. Idempotent: a second call on already-fixed data finds no more `hev1`
/// occurrences and reports zero replacements.
pub fn fix_init_segment(data: &mut [u8], dv_profile: &str) -> FixReport {
    let tag = target_tag(dv_profile);
    let mut report = FixReport::default();
    walk_and_fix(data, 0, data.len(), tag, &mut report);
    report
}

fn walk_and_fix(data: &mut [u8], start: usize, end: usize, tag: [u8; 4], report: &mut FixReport) {
    let mut offset = start;
    while offset < end {
        let Some(parsed) = box_at(data, offset, end) else {
            break;
        };

        if CONTAINER_BOXES.contains(&parsed.fourcc) {
            walk_and_fix(data, parsed.body_start, parsed.body_end, tag, report);
        } else if parsed.fourcc == *b"stsd" {
            fix_stsd(data, parsed.body_start, parsed.body_end, tag, report);
        }

        offset = parsed.end;
    }
}

/// `stsd` is a FullBox: 4 bytes (version + flags) + 4 bytes (entry_count),
/// followed by sample entry boxes.
fn fix_stsd(data: &mut [u8], start: usize, end: usize, tag: [u8; 4], report: &mut FixReport) {
    if end - start < 8 {
        return;
    }

    let entry_count = u32::from_be_bytes([data[start + 4], data[start + 5], data[start + 6], data[start + 7]]) as usize;
    let mut offset = start + 8;

    for _ in 0..entry_count {
        if offset + 8 > end {
            break;
        }

        let Some(parsed) = box_at(data, offset, end) else {
            break;
        };

        if parsed.fourcc == HEV1 {
            data[offset + 4..offset + 8].copy_from_slice(&tag);
            report.replaced += 1;
        }

        offset = parsed.end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::make_init_with_video_sample_entry;

    #[test]
    fn parses_profile_from_dotted_string() {
        assert_eq!(parse_profile("dvhe.05"), Some(5));
        assert_eq!(parse_profile("dvhe.08"), Some(8));
        assert_eq!(parse_profile("7"), Some(7));
        assert_eq!(parse_profile(""), None);
        assert_eq!(parse_profile("dvhe."), None);
    }

    #[test]
    fn profile_5_and_7_use_dvhe() {
        assert_eq!(target_tag("dvhe.05"), DVHE);
        assert_eq!(target_tag("dvhe.07"), DVHE);
    }

    #[test]
    fn other_profiles_use_dvh1() {
        assert_eq!(target_tag("dvhe.08"), DVH1);
        assert_eq!(target_tag("dvhe.04"), DVH1);
        assert_eq!(target_tag("unknown"), DVH1);
    }

    #[test]
    fn rewrites_hev1_to_dvh1_for_profile_8() {
        let mut init = make_init_with_video_sample_entry(1, *b"hev1").to_vec();
        let report = fix_init_segment(&mut init, "dvhe.08");
        assert_eq!(report.replaced, 1);
        assert!(!contains_fourcc(&init, &HEV1));
        assert!(contains_fourcc(&init, &DVH1));
    }

    #[test]
    fn rewrites_hev1_to_dvhe_for_profile_5() {
        let mut init = make_init_with_video_sample_entry(1, *b"hev1").to_vec();
        let report = fix_init_segment(&mut init, "dvhe.05");
        assert_eq!(report.replaced, 1);
        assert!(contains_fourcc(&init, &DVHE));
    }

    #[test]
    fn is_idempotent() {
        let mut init = make_init_with_video_sample_entry(1, *b"hev1").to_vec();
        let first = fix_init_segment(&mut init, "dvhe.08");
        let snapshot = init.clone();
        let second = fix_init_segment(&mut init, "dvhe.08");
        assert_eq!(first.replaced, 1);
        assert_eq!(second.replaced, 0);
        assert_eq!(init, snapshot);
    }

    #[test]
    fn leaves_non_hev1_entries_untouched() {
        let mut init = make_init_with_video_sample_entry(1, *b"avc1").to_vec();
        let report = fix_init_segment(&mut init, "dvhe.08");
        assert_eq!(report.replaced, 0);
        assert!(contains_fourcc(&init, b"avc1"));
    }

    fn contains_fourcc(data: &[u8], target: &[u8; 4]) -> bool {
        data.windows(4).any(|w| w == target)
    }
}
