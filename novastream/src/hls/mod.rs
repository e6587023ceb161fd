//! HLS session manager (C5): per-session arena directory, child transcoder
//! supervision, playlist/segment serving, Dolby Vision codec-box fix-up, background
//! GC.

mod session;

pub use session::{
    CreateSessionRequest, HlsManager, HlsSessionSummary, SegmentContent, SubtitleTrackSummary,
};
