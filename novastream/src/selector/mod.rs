//! Track selector (C2): scores audio/subtitle streams against user preferences.

use crate::domain::{AudioStreamInfo, SubtitleMode, SubtitleStreamInfo};

const COMMENTARY_PHRASES: &[&str] = &[
    "commentary",
    "director's commentary",
    "directors commentary",
    "audio commentary",
    "cast commentary",
    "crew commentary",
    "isolated score",
    "music only",
    "score only",
];

const NATIVE_AUDIO_CODECS: &[&str] = &["aac", "ac3", "eac3"];
const COMPATIBLE_AUDIO_CODECS: &[&str] = &["aac", "ac3", "eac3", "mp3"];
const HIGH_BITRATE_AUDIO_CODECS: &[&str] = &["truehd", "mlp"];
const NATIVE_VIDEO_CODECS: &[&str] = &["h264", "avc", "avc1", "hevc", "h265", "hvc1", "hev1"];

fn normalize(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// Case-insensitive, whitespace-trimmed, bidirectional substring containment.
/// Empty inputs never match.
fn loose_contains(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

fn language_matches(stream_language: &str, stream_title: &str, preferred: &str) -> bool {
    if preferred.trim().is_empty() {
        return false;
    }
    loose_contains(stream_language, preferred) || loose_contains(stream_title, preferred)
}

fn is_commentary(title: &str) -> bool {
    let title = normalize(title);
    if title.is_empty() {
        return false;
    }
    COMMENTARY_PHRASES.iter().any(|p| title.contains(p))
}

fn is_sdh(title: &str) -> bool {
    let title = normalize(title);
    ["sdh", "deaf", "hard of hearing"]
        .iter()
        .any(|p| title.contains(p))
}

fn is_signs(title: &str) -> bool {
    let title = normalize(title);
    title.contains("sign") || title.contains("song")
}

fn is_dubtitle(title: &str) -> bool {
    normalize(title).contains("dubtitle")
}

fn is_full_subs(title: &str) -> bool {
    normalize(title).contains("full sub")
}

fn is_forced(stream: &SubtitleStreamInfo) -> bool {
    stream.is_forced || normalize(&stream.title).contains("forced")
}

/// Selects an audio track index via a six-pass search; returns -1 when
/// no stream qualifies.
pub fn select_audio(streams: &[AudioStreamInfo], preferred_language: &str) -> i64 {
    let matches_lang = |s: &&AudioStreamInfo| language_matches(&s.language, &s.title, preferred_language);

    for allow_commentary in [false, true] {
        // Pass 1: compatible codec.
        if let Some(s) = streams.iter().find(|s| {
            matches_lang(s)
                && COMPATIBLE_AUDIO_CODECS.contains(&normalize(&s.codec_name).as_str())
                && (allow_commentary || !is_commentary(&s.title))
        }) {
            return s.index as i64;
        }
        // Pass 2: anything except high-bitrate lossless.
        if let Some(s) = streams.iter().find(|s| {
            matches_lang(s)
                && !HIGH_BITRATE_AUDIO_CODECS.contains(&normalize(&s.codec_name).as_str())
                && (allow_commentary || !is_commentary(&s.title))
        }) {
            return s.index as i64;
        }
        // Pass 3: high-bitrate lossless.
        if let Some(s) = streams.iter().find(|s| {
            matches_lang(s)
                && HIGH_BITRATE_AUDIO_CODECS.contains(&normalize(&s.codec_name).as_str())
                && (allow_commentary || !is_commentary(&s.title))
        }) {
            return s.index as i64;
        }
    }

    -1
}

/// Selects a subtitle track index per the mode-dependent rules below.
pub fn select_subtitle(
    streams: &[SubtitleStreamInfo],
    preferred_language: &str,
    mode: SubtitleMode,
    selected_audio_language: &str,
) -> i64 {
    match mode {
        SubtitleMode::Off => -1,
        SubtitleMode::ForcedOnly => streams
            .iter()
            .filter(|s| is_forced(s))
            .find(|s| language_matches(&s.language, &s.title, preferred_language))
            .map(|s| s.index as i64)
            .unwrap_or(-1),
        SubtitleMode::On => select_subtitle_on(streams, preferred_language, selected_audio_language),
    }
}

fn select_subtitle_on(
    streams: &[SubtitleStreamInfo],
    preferred_language: &str,
    selected_audio_language: &str,
) -> i64 {
    let language_matched: Vec<&SubtitleStreamInfo> = streams
        .iter()
        .filter(|s| !is_forced(s) && language_matches(&s.language, &s.title, preferred_language))
        .collect();

    // 1. SDH and not signs.
    if let Some(s) = language_matched
        .iter()
        .find(|s| is_sdh(&s.title) && !is_signs(&s.title))
    {
        return s.index as i64;
    }

    let audio_matches_subtitle_language = !selected_audio_language.trim().is_empty()
        && language_matched
            .iter()
            .any(|s| loose_contains(&s.language, selected_audio_language));

    // 2. Dubtitle vs full/plain ordering flips depending on whether the subtitle
    // language already matches the selected audio language.
    let dubtitle = language_matched.iter().find(|s| is_dubtitle(&s.title));
    let full_or_plain = language_matched
        .iter()
        .find(|s| !is_dubtitle(&s.title) && !is_sdh(&s.title) && !is_signs(&s.title));

    if audio_matches_subtitle_language {
        if let Some(s) = dubtitle {
            return s.index as i64;
        }
        if let Some(s) = full_or_plain {
            return s.index as i64;
        }
    } else {
        if let Some(s) = full_or_plain {
            return s.index as i64;
        }
        if let Some(s) = dubtitle {
            return s.index as i64;
        }
    }

    // 3. Any non-signs, non-forced track.
    if let Some(s) = language_matched.iter().find(|s| !is_signs(&s.title)) {
        return s.index as i64;
    }

    // 4. Signs/songs.
    if let Some(s) = language_matched.iter().find(|s| is_signs(&s.title)) {
        return s.index as i64;
    }

    // 5. Fallback to a forced language match.
    streams
        .iter()
        .filter(|s| is_forced(s))
        .find(|s| language_matches(&s.language, &s.title, preferred_language))
        .map(|s| s.index as i64)
        .unwrap_or(-1)
}

/// Whether the client can decode `codec_name` natively for video without transcode.
pub fn is_native_video_codec(codec_name: &str) -> bool {
    NATIVE_VIDEO_CODECS.contains(&normalize(codec_name).as_str())
}

/// Whether the client can decode `codec_name` natively for audio without transcode.
pub fn is_native_audio_codec(codec_name: &str) -> bool {
    NATIVE_AUDIO_CODECS.contains(&normalize(codec_name).as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(index: i32, codec: &str, lang: &str, title: &str) -> AudioStreamInfo {
        AudioStreamInfo {
            index,
            codec_name: codec.to_string(),
            language: lang.to_string(),
            title: title.to_string(),
            is_default: false,
        }
    }

    fn sub(index: i32, lang: &str, title: &str, forced: bool) -> SubtitleStreamInfo {
        SubtitleStreamInfo {
            index,
            codec_name: "subrip".to_string(),
            language: lang.to_string(),
            title: title.to_string(),
            is_forced: forced,
            is_default: false,
        }
    }

    #[test]
    fn empty_audio_list_returns_negative_one() {
        assert_eq!(select_audio(&[], "eng"), -1);
    }

    #[test]
    fn s6_commentary_is_skipped_for_compatible_codec_match() {
        let streams = vec![
            audio(1, "truehd", "eng", "Main"),
            audio(2, "ac3", "eng", "Commentary"),
            audio(3, "eac3", "eng", "Main"),
        ];
        assert_eq!(select_audio(&streams, "eng"), 3);
    }

    #[test]
    fn falls_back_to_commentary_when_nothing_else_matches() {
        let streams = vec![audio(1, "ac3", "eng", "Commentary")];
        assert_eq!(select_audio(&streams, "eng"), 1);
    }

    #[test]
    fn off_mode_always_returns_negative_one() {
        let streams = vec![sub(1, "eng", "English", false)];
        assert_eq!(
            select_subtitle(&streams, "eng", SubtitleMode::Off, "eng"),
            -1
        );
    }

    #[test]
    fn forced_only_requires_forced_flag_or_title() {
        let streams = vec![
            sub(1, "eng", "English", false),
            sub(2, "eng", "English Forced", false),
        ];
        assert_eq!(
            select_subtitle(&streams, "eng", SubtitleMode::ForcedOnly, "eng"),
            2
        );
    }

    #[test]
    fn s7_foreign_audio_prefers_full_over_signs() {
        let streams = vec![
            sub(1, "eng", "English Full", false),
            sub(2, "eng", "English Signs", false),
        ];
        assert_eq!(
            select_subtitle(&streams, "en", SubtitleMode::On, "jpn"),
            1
        );
    }

    #[test]
    fn sdh_beats_full_subs_when_not_signs() {
        let streams = vec![
            sub(1, "eng", "English Full", false),
            sub(2, "eng", "English SDH", false),
        ];
        assert_eq!(select_subtitle(&streams, "eng", SubtitleMode::On, "eng"), 2);
    }

    #[test]
    fn same_language_audio_prefers_dubtitle_over_plain() {
        let streams = vec![
            sub(1, "eng", "English", false),
            sub(2, "eng", "English Dubtitle", false),
        ];
        assert_eq!(select_subtitle(&streams, "eng", SubtitleMode::On, "eng"), 2);
    }

    #[test]
    fn native_codec_predicates() {
        assert!(is_native_video_codec("HEVC"));
        assert!(is_native_audio_codec("aac"));
        assert!(!is_native_video_codec("vp9"));
        assert!(!is_native_audio_codec("flac"));
    }
}
