//! Shared helpers used by more than one component (currently: child-process
//! supervision, reused by the HLS transcoder and the subtitle extractor).

pub mod process;
