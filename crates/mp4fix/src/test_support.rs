//! Minimal fMP4 box builders used only by this crate's own tests.

use bytes::Bytes;

const VISUAL_SAMPLE_ENTRY_HEADER: usize = 70;

pub(crate) fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let size = (8 + body.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
    out
}

pub(crate) fn make_full_box(fourcc: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + payload.len());
    body.push(version);
    body.push(((flags >> 16) & 0xFF) as u8);
    body.push(((flags >> 8) & 0xFF) as u8);
    body.push((flags & 0xFF) as u8);
    body.extend_from_slice(payload);
    make_box(fourcc, &body)
}

pub(crate) fn make_visual_sample_entry(fourcc: &[u8; 4]) -> Vec<u8> {
    let body_len = VISUAL_SAMPLE_ENTRY_HEADER;
    let total = 8 + body_len;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&[0u8; VISUAL_SAMPLE_ENTRY_HEADER]);
    out
}

/// Build a minimal `moov > trak > mdia > minf > stbl > stsd` tree with a single
/// video sample entry of the given FourCC, enough to exercise the fix-up walker.
pub(crate) fn make_init_with_video_sample_entry(track_id: u32, sample_entry: [u8; 4]) -> Bytes {
    let mut tkhd_payload = Vec::new();
    tkhd_payload.extend_from_slice(&0u32.to_be_bytes());
    tkhd_payload.extend_from_slice(&0u32.to_be_bytes());
    tkhd_payload.extend_from_slice(&track_id.to_be_bytes());
    tkhd_payload.extend_from_slice(&0u32.to_be_bytes());
    let tkhd = make_full_box(b"tkhd", 0, 0, &tkhd_payload);

    let sample_entry_box = make_visual_sample_entry(&sample_entry);

    let mut stsd_payload = Vec::new();
    stsd_payload.extend_from_slice(&1u32.to_be_bytes());
    stsd_payload.extend_from_slice(&sample_entry_box);
    let stsd = make_full_box(b"stsd", 0, 0, &stsd_payload);

    let stbl = make_box(b"stbl", &stsd);
    let minf = make_box(b"minf", &stbl);
    let mdia = make_box(b"mdia", &minf);

    let mut trak_body = Vec::new();
    trak_body.extend_from_slice(&tkhd);
    trak_body.extend_from_slice(&mdia);
    let trak = make_box(b"trak", &trak_body);

    let moov = make_box(b"moov", &trak);
    Bytes::from(moov)
}
