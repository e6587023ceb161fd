//! Stream-state index (C9): computes per-title watch state from three pre-fetched
//! histories in three linear passes. Pure, side-effect-free, never persisted.

use std::collections::HashMap;

use crate::domain::{WatchState, WatchStateEntry};

/// A single watch-history record: the title was explicitly marked watched.
#[derive(Debug, Clone)]
pub struct WatchHistoryEntry {
    pub item_id: String,
    pub watched: bool,
}

/// A continue-watching record for a series: per-episode watched flags.
#[derive(Debug, Clone)]
pub struct ContinueWatchingEntry {
    pub item_id: String,
    pub season: u32,
    pub episode_watched: bool,
}

/// A playback-progress record: percentage complete for a movie, or an episode
/// watched/partially-watched signal for a series.
#[derive(Debug, Clone)]
pub struct PlaybackProgressEntry {
    pub item_id: String,
    pub percent_watched: f64,
    pub is_series: bool,
    pub total_episodes: u32,
    pub watched_episodes: u32,
}

/// Builds a `WatchStateIndex` (itemId → `WatchStateEntry`) from three independent,
/// already-in-memory collections. Deterministic and order-independent: the result
/// is the same regardless of input ordering within each collection.
pub fn build_watch_state_index(
    watch_history: &[WatchHistoryEntry],
    continue_watching: &[ContinueWatchingEntry],
    playback_progress: &[PlaybackProgressEntry],
) -> HashMap<String, WatchStateEntry> {
    let mut marked_watched: HashMap<&str, bool> = HashMap::new();
    for entry in watch_history {
        let slot = marked_watched.entry(&entry.item_id).or_insert(false);
        *slot = *slot || entry.watched;
    }

    let mut has_watched_non_special: HashMap<&str, bool> = HashMap::new();
    for entry in continue_watching {
        if entry.season == 0 {
            continue;
        }
        let slot = has_watched_non_special.entry(&entry.item_id).or_insert(false);
        *slot = *slot || entry.episode_watched;
    }

    let mut index = HashMap::new();
    for entry in playback_progress {
        let marked = marked_watched.get(entry.item_id.as_str()).copied().unwrap_or(false);
        let has_watched_episode = has_watched_non_special
            .get(entry.item_id.as_str())
            .copied()
            .unwrap_or(false);

        let computed = if entry.is_series {
            series_state(entry, marked, has_watched_episode)
        } else {
            movie_state(entry, marked)
        };

        index
            .entry(entry.item_id.clone())
            .and_modify(|existing: &mut WatchStateEntry| {
                *existing = merge(existing.clone(), computed.clone());
            })
            .or_insert(computed);
    }

    index
}

fn movie_state(entry: &PlaybackProgressEntry, marked: bool) -> WatchStateEntry {
    let state = if marked || entry.percent_watched >= 90.0 {
        WatchState::Complete
    } else if entry.percent_watched > 0.0 {
        WatchState::Partial
    } else {
        WatchState::None
    };
    WatchStateEntry {
        state,
        unwatched_count: None,
    }
}

fn series_state(entry: &PlaybackProgressEntry, marked: bool, has_watched_episode: bool) -> WatchStateEntry {
    let complete = marked || (entry.total_episodes > 0 && entry.watched_episodes >= entry.total_episodes);
    let partial = has_watched_episode || entry.watched_episodes > 0;

    let state = if complete {
        WatchState::Complete
    } else if partial {
        WatchState::Partial
    } else {
        WatchState::None
    };

    let unwatched_count = if entry.total_episodes > 0 {
        Some(entry.total_episodes.saturating_sub(entry.watched_episodes))
    } else {
        None
    };

    WatchStateEntry {
        state,
        unwatched_count,
    }
}

/// When multiple progress rows exist for the same item, the more "watched" state
/// wins (`Complete` > `Partial` > `None`) and unwatched counts are taken from
/// whichever entry reported `Complete`/`Partial`, matching the "three linear
/// passes" pure-builder model: later input order must not change the output.
fn merge(a: WatchStateEntry, b: WatchStateEntry) -> WatchStateEntry {
    fn rank(s: WatchState) -> u8 {
        match s {
            WatchState::None => 0,
            WatchState::Partial => 1,
            WatchState::Complete => 2,
        }
    }
    if rank(b.state) >= rank(a.state) { b } else { a }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movie_marked_watched_is_complete() {
        let history = [WatchHistoryEntry {
            item_id: "m1".to_string(),
            watched: true,
        }];
        let progress = [PlaybackProgressEntry {
            item_id: "m1".to_string(),
            percent_watched: 0.0,
            is_series: false,
            total_episodes: 0,
            watched_episodes: 0,
        }];
        let index = build_watch_state_index(&history, &[], &progress);
        assert_eq!(index["m1"].state, WatchState::Complete);
    }

    #[test]
    fn movie_ninety_percent_is_complete() {
        let progress = [PlaybackProgressEntry {
            item_id: "m2".to_string(),
            percent_watched: 90.0,
            is_series: false,
            total_episodes: 0,
            watched_episodes: 0,
        }];
        let index = build_watch_state_index(&[], &[], &progress);
        assert_eq!(index["m2"].state, WatchState::Complete);
    }

    #[test]
    fn movie_partial_progress_is_partial() {
        let progress = [PlaybackProgressEntry {
            item_id: "m3".to_string(),
            percent_watched: 42.0,
            is_series: false,
            total_episodes: 0,
            watched_episodes: 0,
        }];
        let index = build_watch_state_index(&[], &[], &progress);
        assert_eq!(index["m3"].state, WatchState::Partial);
    }

    #[test]
    fn series_all_episodes_watched_is_complete() {
        let progress = [PlaybackProgressEntry {
            item_id: "s1".to_string(),
            percent_watched: 0.0,
            is_series: true,
            total_episodes: 10,
            watched_episodes: 10,
        }];
        let index = build_watch_state_index(&[], &[], &progress);
        assert_eq!(index["s1"].state, WatchState::Complete);
        assert_eq!(index["s1"].unwatched_count, Some(0));
    }

    #[test]
    fn series_with_any_watched_non_special_episode_is_at_least_partial() {
        let continue_watching = [ContinueWatchingEntry {
            item_id: "s2".to_string(),
            season: 1,
            episode_watched: true,
        }];
        let progress = [PlaybackProgressEntry {
            item_id: "s2".to_string(),
            percent_watched: 0.0,
            is_series: true,
            total_episodes: 10,
            watched_episodes: 0,
        }];
        let index = build_watch_state_index(&[], &continue_watching, &progress);
        assert_eq!(index["s2"].state, WatchState::Partial);
    }

    #[test]
    fn specials_do_not_count_toward_watched_episodes() {
        let continue_watching = [ContinueWatchingEntry {
            item_id: "s3".to_string(),
            season: 0,
            episode_watched: true,
        }];
        let progress = [PlaybackProgressEntry {
            item_id: "s3".to_string(),
            percent_watched: 0.0,
            is_series: true,
            total_episodes: 10,
            watched_episodes: 0,
        }];
        let index = build_watch_state_index(&[], &continue_watching, &progress);
        assert_eq!(index["s3"].state, WatchState::None);
    }

    #[test]
    fn order_independent_across_input_permutations() {
        let history = vec![
            WatchHistoryEntry { item_id: "a".to_string(), watched: true },
            WatchHistoryEntry { item_id: "b".to_string(), watched: false },
        ];
        let progress = vec![
            PlaybackProgressEntry { item_id: "a".to_string(), percent_watched: 0.0, is_series: false, total_episodes: 0, watched_episodes: 0 },
            PlaybackProgressEntry { item_id: "b".to_string(), percent_watched: 10.0, is_series: false, total_episodes: 0, watched_episodes: 0 },
        ];

        let forward = build_watch_state_index(&history, &[], &progress);

        let mut history_rev = history.clone();
        history_rev.reverse();
        let mut progress_rev = progress.clone();
        progress_rev.reverse();
        let reversed = build_watch_state_index(&history_rev, &[], &progress_rev);

        assert_eq!(forward["a"].state, reversed["a"].state);
        assert_eq!(forward["b"].state, reversed["b"].state);
    }
}
