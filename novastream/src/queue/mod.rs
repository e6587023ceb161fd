//! Resolve queue (C8): a single-producer/many-worker bounded queue with per-item
//! state. Grounded on the corpus's DashMap-backed job-store idiom (monotonic ids,
//! tagged-enum state, worker pool draining a channel), simplified to the in-memory,
//! non-persistent case NovaStream needs — no adaptive scaling, no database.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::QueueSettings;
use crate::domain::{HealthStatus, PlaybackCandidate, PlaybackResolution};
use crate::error::{Error, Result};

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Tagged-enum queue state: forbids impossible combinations like `ready` with no
/// resolution.
#[derive(Debug, Clone)]
pub enum QueueState {
    Queued,
    Processing,
    Ready(PlaybackResolution),
    Failed(String),
}

impl QueueState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueState::Ready(_) | QueueState::Failed(_))
    }
}

#[derive(Debug, Clone)]
struct QueueItem {
    candidate: PlaybackCandidate,
    state: QueueState,
    created_at: i64,
    updated_at: i64,
}

/// A resolver function invoked by queue workers to actually resolve a candidate.
/// Boxed so the queue doesn't need to be generic over the resolver's concrete type.
pub type Resolver =
    Arc<dyn Fn(PlaybackCandidate) -> futures::future::BoxFuture<'static, Result<PlaybackResolution>> + Send + Sync>;

/// Asynchronous job store for candidates that cannot be resolved synchronously.
pub struct ResolveQueue {
    items: Arc<DashMap<i64, QueueItem>>,
    next_id: AtomicI64,
    sender: mpsc::UnboundedSender<i64>,
    settings: QueueSettings,
}

impl ResolveQueue {
    /// Spawns `worker_count` workers draining the internal channel. `resolver` is
    /// shared across all workers.
    pub fn spawn(settings: QueueSettings, resolver: Resolver) -> Arc<Self> {
        let items: Arc<DashMap<i64, QueueItem>> = Arc::new(DashMap::new());
        let (sender, receiver) = mpsc::unbounded_channel::<i64>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let queue = Arc::new(Self {
            items: items.clone(),
            next_id: AtomicI64::new(1),
            sender,
            settings,
        });

        for _ in 0..queue.settings.worker_count.max(1) {
            let items = items.clone();
            let receiver = receiver.clone();
            let resolver = resolver.clone();
            tokio::spawn(async move {
                loop {
                    let id = {
                        let mut rx = receiver.lock().await;
                        match rx.recv().await {
                            Some(id) => id,
                            None => return,
                        }
                    };

                    if let Some(mut entry) = items.get_mut(&id) {
                        entry.state = QueueState::Processing;
                        entry.updated_at = now_millis();
                    }

                    let candidate = match items.get(&id) {
                        Some(entry) => entry.candidate.clone(),
                        None => continue,
                    };

                    let outcome = resolver(candidate).await;

                    if let Some(mut entry) = items.get_mut(&id) {
                        entry.state = match outcome {
                            Ok(resolution) => QueueState::Ready(resolution),
                            Err(e) => {
                                warn!(queue_id = id, error = %e, "resolve queue item failed");
                                QueueState::Failed(e.to_string())
                            }
                        };
                        entry.updated_at = now_millis();
                    }
                }
            });
        }

        queue.spawn_gc();
        queue
    }

    fn spawn_gc(self: &Arc<Self>) {
        let items = self.items.clone();
        let ttl = self.settings.status_ttl();
        let interval = Duration::from_secs(60).min(ttl);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            loop {
                ticker.tick().await;
                let now = now_millis();
                let ttl_ms = ttl.as_millis() as i64;
                items.retain(|_, item| {
                    !item.state.is_terminal() || now - item.updated_at <= ttl_ms
                });
            }
        });
    }

    /// Enqueues `candidate`, returning its monotonic queue id.
    pub fn submit(&self, candidate: PlaybackCandidate) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = now_millis();
        self.items.insert(
            id,
            QueueItem {
                candidate,
                state: QueueState::Queued,
                created_at: now,
                updated_at: now,
            },
        );
        let _ = self.sender.send(id);
        id
    }

    /// Returns the current resolution for `id`. Distinguishes "not found" from a
    /// terminal `failed` state so pollers can decide retry-vs-give-up.
    pub fn status(&self, id: i64) -> Result<PlaybackResolution> {
        let item = self
            .items
            .get(&id)
            .ok_or_else(|| Error::not_found("queue item", id.to_string()))?;

        Ok(match &item.state {
            QueueState::Queued => PlaybackResolution {
                queue_id: Some(id),
                content_url: String::new(),
                health_status: HealthStatus::Queued,
            },
            QueueState::Processing => PlaybackResolution {
                queue_id: Some(id),
                content_url: String::new(),
                health_status: HealthStatus::Processing,
            },
            QueueState::Ready(resolution) => resolution.clone(),
            QueueState::Failed(message) => {
                return Err(Error::health_failed(message.clone()));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ServiceKind;

    fn candidate(id: &str) -> PlaybackCandidate {
        PlaybackCandidate {
            id: id.to_string(),
            title: "Test".to_string(),
            size: 0,
            service: ServiceKind::Debrid,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn s4_happy_path_reaches_ready() {
        let resolver: Resolver = Arc::new(|c: PlaybackCandidate| {
            Box::pin(async move { Ok(PlaybackResolution::cached(format!("https://cdn/{}", c.id))) })
        });
        let queue = ResolveQueue::spawn(QueueSettings::default(), resolver);

        let id = queue.submit(candidate("abc"));
        let mut last = None;
        for _ in 0..200 {
            let status = queue.status(id).unwrap();
            if status.health_status == HealthStatus::Cached {
                last = Some(status);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let resolution = last.expect("queue item should have resolved");
        assert_eq!(resolution.content_url, "https://cdn/abc");
    }

    #[tokio::test]
    async fn s5_failure_reports_health_failed_error() {
        let resolver: Resolver = Arc::new(|_| {
            Box::pin(async move { Err(Error::upstream_failed("no healthy source")) })
        });
        let queue = ResolveQueue::spawn(QueueSettings::default(), resolver);
        let id = queue.submit(candidate("xyz"));

        let mut result = None;
        for _ in 0..200 {
            match queue.status(id) {
                Err(e) => {
                    result = Some(e);
                    break;
                }
                Ok(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        assert!(matches!(result, Some(Error::HealthFailed(_))));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let resolver: Resolver = Arc::new(|c| Box::pin(async move { Ok(PlaybackResolution::cached(c.id)) }));
        let queue = ResolveQueue::spawn(QueueSettings::default(), resolver);
        assert!(matches!(queue.status(999), Err(Error::NotFound { .. })));
    }
}
