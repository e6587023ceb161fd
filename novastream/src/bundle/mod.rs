//! Bundle orchestrators (C10): fan out a startup/details request into concurrent
//! sub-fetches with partial-failure tolerance.
//!
//! Grounded on the corpus's structured-concurrency aggregation idiom: a task group
//! runs every sub-fetch independently, each writing its own slot, rather than
//! sharing mutable state across tasks. Here that's modeled with per-slot
//! `tokio::spawn` + `JoinSet`, since every sub-task result is independent and we
//! don't need sibling tasks to observe one another's partial progress.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::warn;

/// A single named sub-fetch: its label (for logging) and the future producing a
/// value of `T`, which callers normalize to a "safe default" on timeout/error.
pub struct SubFetch<T> {
    pub label: &'static str,
    pub future: BoxFuture<'static, anyhow::Result<T>>,
    pub timeout: Duration,
}

/// Runs every sub-fetch concurrently, logging and substituting a default value for
/// any that times out or errors, so the overall bundle is always assembled. Results
/// are returned in the same order as `fetches` was given.
pub async fn fan_out<T>(fetches: Vec<SubFetch<T>>) -> Vec<T>
where
    T: Default + Send + 'static,
{
    let mut set = JoinSet::new();
    for (index, fetch) in fetches.into_iter().enumerate() {
        set.spawn(async move {
            let label = fetch.label;
            let outcome = tokio::time::timeout(fetch.timeout, fetch.future).await;
            let value = match outcome {
                Ok(Ok(value)) => value,
                Ok(Err(e)) => {
                    warn!(sub_fetch = label, error = %e, "bundle sub-fetch failed, substituting default");
                    T::default()
                }
                Err(_) => {
                    warn!(sub_fetch = label, "bundle sub-fetch timed out, substituting default");
                    T::default()
                }
            };
            (index, value)
        });
    }

    let mut results: Vec<Option<T>> = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, value)) => {
                if results.len() <= index {
                    results.resize_with(index + 1, || None);
                }
                results[index] = Some(value);
            }
            Err(e) => warn!(error = %e, "bundle sub-fetch task panicked"),
        }
    }

    results.into_iter().map(Option::unwrap_or_default).collect()
}

/// A title's home-shelf fields, with heavy per-country/trailer/credit/rating data
/// stripped for the startup bundle.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StartupTitle {
    pub id: String,
    pub name: String,
    pub poster_url: String,
    pub year: Option<u32>,
}

/// Strips the heavy fields a details view needs but a home shelf never renders.
pub fn strip_for_startup(full: DetailsTitle) -> StartupTitle {
    StartupTitle {
        id: full.id,
        name: full.name,
        poster_url: full.poster_url,
        year: full.year,
    }
}

/// The full title record as used by the details bundle; includes the heavy fields
/// startup strips away.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DetailsTitle {
    pub id: String,
    pub name: String,
    pub poster_url: String,
    pub year: Option<u32>,
    pub releases_by_country: Vec<String>,
    pub trailers: Vec<String>,
    pub credits: Vec<String>,
    pub ratings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_sub_fetch_is_substituted_with_default() {
        let fetches = vec![
            SubFetch {
                label: "continue-watching",
                future: Box::pin(async { Ok::<Vec<String>, anyhow::Error>(vec!["a".to_string()]) }),
                timeout: Duration::from_secs(1),
            },
            SubFetch {
                label: "recommendations",
                future: Box::pin(async { Err::<Vec<String>, anyhow::Error>(anyhow::anyhow!("boom")) }),
                timeout: Duration::from_secs(1),
            },
        ];

        let results = fan_out(fetches).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r == &vec!["a".to_string()]));
        assert!(results.iter().any(|r| r.is_empty()));
    }

    #[tokio::test]
    async fn timed_out_sub_fetch_is_substituted_with_default() {
        let fetches = vec![SubFetch {
            label: "slow",
            future: Box::pin(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<u32, anyhow::Error>(42)
            }),
            timeout: Duration::from_millis(10),
        }];

        let results = fan_out(fetches).await;
        assert_eq!(results, vec![0]);
    }

    #[test]
    fn startup_strips_heavy_fields() {
        let details = DetailsTitle {
            id: "t1".to_string(),
            name: "Movie".to_string(),
            poster_url: "https://img".to_string(),
            year: Some(2020),
            releases_by_country: vec!["US".to_string()],
            trailers: vec!["yt".to_string()],
            credits: vec!["actor".to_string()],
            ratings: vec!["PG-13".to_string()],
        };
        let startup = strip_for_startup(details);
        assert_eq!(startup.id, "t1");
        assert_eq!(startup.year, Some(2020));
    }
}
