//! Playback resolver (C7): turns an indexer candidate into a playable URL, either
//! synchronously (cached providers) or via the resolve queue (C8).

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesOrdered, StreamExt};

use crate::domain::{HealthStatus, PlaybackCandidate, PlaybackResolution, PlaybackResolutionItem};
use crate::error::{Error, Result};
use crate::queue::ResolveQueue;

const MAX_BATCH_EPISODES: usize = 100;

/// A provider-specific synchronous availability check. Returns `Ok(Some(resolution))`
/// when the candidate is immediately playable (e.g. cached debrid), `Ok(None)` when
/// it must go through the queue, and `Err` when the check itself failed.
pub type AvailabilityCheck = Arc<
    dyn Fn(PlaybackCandidate) -> BoxFuture<'static, Result<Option<PlaybackResolution>>> + Send + Sync,
>;

pub struct PlaybackResolver {
    queue: Arc<ResolveQueue>,
    availability_check: AvailabilityCheck,
}

impl PlaybackResolver {
    pub fn new(queue: Arc<ResolveQueue>, availability_check: AvailabilityCheck) -> Self {
        Self {
            queue,
            availability_check,
        }
    }

    /// Resolves a single candidate: synchronously if a cached path is available,
    /// otherwise by enqueueing it in C8.
    pub async fn resolve(&self, candidate: PlaybackCandidate) -> Result<PlaybackResolution> {
        match (self.availability_check)(candidate.clone()).await {
            Ok(Some(resolution)) => Ok(resolution),
            Ok(None) => Ok(PlaybackResolution::queued(self.queue.submit(candidate))),
            Err(_) => Ok(PlaybackResolution::queued(self.queue.submit(candidate))),
        }
    }

    /// Resolves up to `MAX_BATCH_EPISODES` candidates concurrently, preserving
    /// input order. Individual failures surface as a per-item error string with a
    /// null resolution rather than failing the whole batch (spec §4.7).
    pub async fn resolve_batch(
        &self,
        candidates: Vec<PlaybackCandidate>,
    ) -> Result<Vec<PlaybackResolutionItem>> {
        if candidates.is_empty() || candidates.len() > MAX_BATCH_EPISODES {
            return Err(Error::bad_input(format!(
                "resolveBatch requires 1..={MAX_BATCH_EPISODES} episodes, got {}",
                candidates.len()
            )));
        }

        let mut futures = FuturesOrdered::new();
        for candidate in candidates {
            futures.push_back(async move {
                match self.resolve(candidate).await {
                    Ok(resolution) => PlaybackResolutionItem::ok(resolution),
                    Err(e) => PlaybackResolutionItem::err(e.to_string()),
                }
            });
        }

        Ok(futures.collect().await)
    }

    /// Polls the queue for `queue_id`'s current resolution.
    pub fn queue_status(&self, queue_id: i64) -> Result<PlaybackResolution> {
        self.queue.status(queue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSettings;
    use crate::domain::ServiceKind;
    use crate::queue::Resolver;

    fn candidate(id: &str) -> PlaybackCandidate {
        PlaybackCandidate {
            id: id.to_string(),
            title: "Test".to_string(),
            size: 0,
            service: ServiceKind::Debrid,
            extra: Default::default(),
        }
    }

    fn build_resolver(cached: bool) -> PlaybackResolver {
        let worker_resolver: Resolver =
            Arc::new(|c| Box::pin(async move { Ok(PlaybackResolution::cached(c.id)) }));
        let queue = ResolveQueue::spawn(QueueSettings::default(), worker_resolver);

        let availability_check: AvailabilityCheck = if cached {
            Arc::new(|c| Box::pin(async move { Ok(Some(PlaybackResolution::cached(c.id))) }))
        } else {
            Arc::new(|_| Box::pin(async move { Ok(None) }))
        };

        PlaybackResolver::new(queue, availability_check)
    }

    #[tokio::test]
    async fn cached_candidate_resolves_synchronously() {
        let resolver = build_resolver(true);
        let resolution = resolver.resolve(candidate("a")).await.unwrap();
        assert_eq!(resolution.health_status, HealthStatus::Cached);
        assert!(resolution.queue_id.is_none());
    }

    #[tokio::test]
    async fn uncached_candidate_is_queued() {
        let resolver = build_resolver(false);
        let resolution = resolver.resolve(candidate("a")).await.unwrap();
        assert_eq!(resolution.health_status, HealthStatus::Queued);
        assert!(resolution.queue_id.is_some());
    }

    #[tokio::test]
    async fn s5_batch_preserves_order_and_count() {
        let resolver = build_resolver(true);
        let candidates = vec![candidate("a"), candidate("b"), candidate("c")];
        let results = resolver.resolve_batch(candidates).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].resolution.as_ref().unwrap().content_url, "a");
        assert_eq!(results[2].resolution.as_ref().unwrap().content_url, "c");
    }

    #[tokio::test]
    async fn empty_batch_is_bad_input() {
        let resolver = build_resolver(true);
        let err = resolver.resolve_batch(vec![]).await.unwrap_err();
        assert!(matches!(err, Error::BadInput(_)));
    }

    #[tokio::test]
    async fn oversized_batch_is_bad_input() {
        let resolver = build_resolver(true);
        let candidates: Vec<_> = (0..101).map(|i| candidate(&i.to_string())).collect();
        let err = resolver.resolve_batch(candidates).await.unwrap_err();
        assert!(matches!(err, Error::BadInput(_)));
    }
}
