use std::sync::Arc;

use novastream::api::{ApiServer, AppState};
use novastream::config::Settings;
use novastream::domain::{HealthStatus, PlaybackResolution};
use novastream::hls::HlsManager;
use novastream::logging::init_logging;
use novastream::queue::{ResolveQueue, Resolver};
use novastream::registry::StreamRegistry;
use novastream::resolver::{AvailabilityCheck, PlaybackResolver};
use novastream::subtitles::SubtitleManager;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging(None)?;

    let settings = Settings::load()?;

    let registry = Arc::new(StreamRegistry::new(settings.registry.clone()));
    let subtitles = Arc::new(SubtitleManager::new(&settings.hls, settings.external.clone()));
    let hls = HlsManager::new(
        settings.hls.clone(),
        settings.external.clone(),
        subtitles.clone(),
    )
    .await?;

    // The candidate's own service availability check and the queue's resolution
    // worker are both external collaborators (the debrid/Usenet providers
    // themselves are out of scope here). This plugs in the simplest
    // contract-compatible implementation: an HTTP reachability probe against the
    // candidate's id (treated as a URL), leaving real provider-specific logic to
    // be supplied by whatever wires this core up to a concrete catalog.
    let availability_check: AvailabilityCheck = Arc::new(|candidate| {
        Box::pin(async move {
            match reqwest::Client::new().head(candidate.id.as_str()).send().await {
                Ok(resp) if resp.status().is_success() => {
                    Ok(Some(PlaybackResolution {
                        queue_id: None,
                        content_url: candidate.id,
                        health_status: HealthStatus::Cached,
                    }))
                }
                _ => Ok(None),
            }
        })
    });

    let worker_resolver: Resolver = Arc::new(|candidate| {
        Box::pin(async move {
            match reqwest::Client::new().head(candidate.id.as_str()).send().await {
                Ok(resp) if resp.status().is_success() => Ok(PlaybackResolution {
                    queue_id: None,
                    content_url: candidate.id,
                    health_status: HealthStatus::Healthy,
                }),
                Ok(resp) => Err(novastream::error::Error::health_failed(format!(
                    "provider returned {}",
                    resp.status()
                ))),
                Err(e) => Err(novastream::error::Error::upstream_failed(e.to_string())),
            }
        })
    });

    let queue = ResolveQueue::spawn(settings.queue.clone(), worker_resolver);
    let resolver = Arc::new(PlaybackResolver::new(queue.clone(), availability_check));

    let state = AppState::new(registry, hls.clone(), subtitles.clone(), resolver, queue);
    let server = ApiServer::new(settings.api.clone(), state);
    let cancel_token = server.cancel_token();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        cancel_token.cancel();
    });

    let run_result = server.run().await;

    hls.shutdown().await;
    subtitles.shutdown().await;

    run_result?;
    Ok(())
}
