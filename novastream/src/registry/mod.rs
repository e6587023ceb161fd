//! Stream registry (C3): an in-memory set of live streams with atomic byte/activity
//! counters and state derived at read time. Grounded on the DashMap-keyed registry
//! idiom used for stream state elsewhere in the corpus, generalized to hold atomics
//! directly so the IO writer wrapper never needs the registry lock on the hot path.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use utoipa::ToSchema;

use crate::config::RegistrySettings;

fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Converts an internal epoch-nanosecond timestamp into the RFC3339 form exposed
/// on the wire.
fn nanos_to_datetime(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(nanos.div_euclid(1_000_000_000), nanos.rem_euclid(1_000_000_000) as u32)
        .unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap())
}

/// Shared counters a caller writes into directly on every chunk transferred.
#[derive(Debug, Default)]
pub struct StreamCounters {
    pub bytes_streamed: AtomicU64,
    pub last_activity_ns: AtomicI64,
}

impl StreamCounters {
    /// Records `bytes` transferred and refreshes the activity timestamp. Called
    /// directly by IO writer wrappers (the direct proxy, HLS segment server)
    /// without taking the registry lock.
    pub fn touch(&self, bytes: u64) {
        self.bytes_streamed.fetch_add(bytes, Ordering::Relaxed);
        self.last_activity_ns.store(now_nanos(), Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct RegistryEntry {
    path: String,
    filename: String,
    client_ip: String,
    profile_id: String,
    profile_name: String,
    started_at: i64,
    content_length: Option<u64>,
    range_start: Option<u64>,
    range_end: Option<u64>,
    method: String,
    user_agent: String,
    counters: Arc<StreamCounters>,
}

/// A point-in-time, owned copy of a tracked stream's state.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrackedStreamSnapshot {
    pub id: u64,
    pub path: String,
    pub filename: String,
    pub client_ip: String,
    pub profile_id: String,
    pub profile_name: String,
    #[schema(value_type = String, format = "date-time")]
    pub started_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub last_activity_at: DateTime<Utc>,
    pub bytes_streamed: u64,
    pub content_length: Option<u64>,
    pub range_start: Option<u64>,
    pub range_end: Option<u64>,
    pub method: String,
    pub user_agent: String,
    pub is_paused: bool,
}

/// Parameters describing a newly started transfer.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub path: String,
    pub filename: String,
    pub client_ip: String,
    pub profile_id: String,
    pub profile_name: String,
    pub content_length: Option<u64>,
    pub range_start: Option<u64>,
    pub range_end: Option<u64>,
    pub method: String,
    pub user_agent: String,
}

/// The live-stream registry. No background work: every derived field (paused,
/// hidden) is computed from the atomic counters at snapshot time.
pub struct StreamRegistry {
    entries: DashMap<u64, RegistryEntry>,
    next_id: AtomicU64,
    settings: RegistrySettings,
}

impl StreamRegistry {
    pub fn new(settings: RegistrySettings) -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
            settings,
        }
    }

    /// Registers a new transfer, returning its id and the counters the caller should
    /// update directly as bytes are written.
    pub fn start(&self, request: StartRequest) -> (u64, Arc<StreamCounters>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let counters = Arc::new(StreamCounters::default());
        counters.last_activity_ns.store(now_nanos(), Ordering::Relaxed);

        self.entries.insert(
            id,
            RegistryEntry {
                path: request.path,
                filename: request.filename,
                client_ip: request.client_ip,
                profile_id: request.profile_id,
                profile_name: request.profile_name,
                started_at: now_nanos(),
                content_length: request.content_length,
                range_start: request.range_start,
                range_end: request.range_end,
                method: request.method,
                user_agent: request.user_agent,
                counters: counters.clone(),
            },
        );

        (id, counters)
    }

    /// Records `bytes` transferred and refreshes the activity timestamp.
    pub fn update(&self, id: u64, bytes: u64) {
        if let Some(entry) = self.entries.get(&id) {
            entry.counters.touch(bytes);
        }
    }

    /// Removes the tracked entry. Idempotent.
    pub fn end(&self, id: u64) {
        self.entries.remove(&id);
    }

    /// Returns snapshots of all entries not yet past the hide threshold, sorted by
    /// `started_at` (oldest first) for stable operator-facing listings.
    pub fn snapshot(&self) -> Vec<TrackedStreamSnapshot> {
        let now = now_nanos();
        let hide_threshold_ns = self.settings.hide_threshold().as_nanos() as i64;
        let pause_threshold_ns = self.settings.pause_threshold().as_nanos() as i64;

        let mut snapshots: Vec<(i64, TrackedStreamSnapshot)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let last_activity_at = entry.counters.last_activity_ns.load(Ordering::Relaxed);
                if now - last_activity_at > hide_threshold_ns {
                    return None;
                }
                Some((
                    entry.started_at,
                    TrackedStreamSnapshot {
                        id: *entry.key(),
                        path: entry.path.clone(),
                        filename: entry.filename.clone(),
                        client_ip: entry.client_ip.clone(),
                        profile_id: entry.profile_id.clone(),
                        profile_name: entry.profile_name.clone(),
                        started_at: nanos_to_datetime(entry.started_at),
                        last_activity_at: nanos_to_datetime(last_activity_at),
                        bytes_streamed: entry.counters.bytes_streamed.load(Ordering::Relaxed),
                        content_length: entry.content_length,
                        range_start: entry.range_start,
                        range_end: entry.range_end,
                        method: entry.method.clone(),
                        user_agent: entry.user_agent.clone(),
                        is_paused: now - last_activity_at > pause_threshold_ns,
                    },
                ))
            })
            .collect();

        snapshots.sort_by_key(|(started_at_ns, _)| *started_at_ns);
        snapshots.into_iter().map(|(_, snapshot)| snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn start_update_end_roundtrip() {
        let registry = StreamRegistry::new(RegistrySettings::default());
        let (id, counters) = registry.start(StartRequest {
            path: "/movies/a.mkv".to_string(),
            ..Default::default()
        });
        counters.bytes_streamed.store(0, Ordering::Relaxed);
        registry.update(id, 4096);

        let snap = registry.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].bytes_streamed, 4096);
        assert!(!snap[0].is_paused);

        registry.end(id);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn is_paused_after_threshold_elapses() {
        let mut settings = RegistrySettings::default();
        settings.pause_threshold_secs = 0;
        let registry = StreamRegistry::new(settings);
        let (_, counters) = registry.start(StartRequest::default());
        counters
            .last_activity_ns
            .store(now_nanos() - Duration::from_secs(1).as_nanos() as i64, Ordering::Relaxed);

        let snap = registry.snapshot();
        assert!(snap[0].is_paused);
    }

    #[test]
    fn hidden_past_hide_threshold_is_excluded_from_snapshot() {
        let mut settings = RegistrySettings::default();
        settings.hide_threshold_secs = 0;
        let registry = StreamRegistry::new(settings);
        let (_, counters) = registry.start(StartRequest::default());
        counters
            .last_activity_ns
            .store(now_nanos() - Duration::from_secs(1).as_nanos() as i64, Ordering::Relaxed);

        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn ids_are_monotonic() {
        let registry = StreamRegistry::new(RegistrySettings::default());
        let (id1, _) = registry.start(StartRequest::default());
        let (id2, _) = registry.start(StartRequest::default());
        assert!(id2 > id1);
    }

    #[test]
    fn snapshot_is_sorted_by_started_at_regardless_of_internal_map_order() {
        let registry = StreamRegistry::new(RegistrySettings::default());
        let (first_id, _) = registry.start(StartRequest {
            path: "/movies/first.mkv".to_string(),
            ..Default::default()
        });
        let (_, _) = registry.start(StartRequest {
            path: "/movies/second.mkv".to_string(),
            ..Default::default()
        });

        let snap = registry.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap[0].started_at <= snap[1].started_at);
        assert_eq!(snap[0].id, first_id);
    }
}
