//! Concurrent provider fan-out with a global deadline
//!
//! Every adapter runs on its own task. Results are collected until either all
//! tasks finish or the deadline fires; tasks still running at that point are
//! detached and their results discarded. The merged order depends only on
//! adapter priority and registration order, never on completion order.

use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::models::{CandidateSource, MediaPath};
use crate::sources::ProviderAdapter;

/// Merged output of one fan-out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub candidates: Vec<CandidateSource>,
    /// Origin of the highest-priority adapter that returned anything
    pub base_url: Option<String>,
    pub completed: usize,
    pub timed_out: usize,
}

/// One adapter's finished contribution
#[derive(Debug, Clone)]
pub struct AdapterResult {
    pub priority: i32,
    pub registration: usize,
    pub origin: String,
    pub candidates: Vec<CandidateSource>,
}

pub struct SourceAggregator {
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    deadline: Duration,
}

impl SourceAggregator {
    /// Adapters are kept in registration order; that order breaks priority ties
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>, deadline: Duration) -> Self {
        Self { adapters, deadline }
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub async fn aggregate(&self, path: &MediaPath) -> Aggregate {
        let started = Instant::now();
        let mut pending: FuturesUnordered<_> = self
            .adapters
            .iter()
            .enumerate()
            .map(|(registration, adapter)| {
                let adapter = Arc::clone(adapter);
                let path = *path;
                let handle = tokio::spawn(async move { adapter.resolve(&path).await });
                async move { (registration, handle.await) }
            })
            .collect();

        let mut finished: Vec<AdapterResult> = Vec::with_capacity(self.adapters.len());
        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((registration, Ok(candidates))) => {
                        let adapter = &self.adapters[registration];
                        finished.push(AdapterResult {
                            priority: adapter.priority(),
                            registration,
                            origin: adapter.origin().to_string(),
                            candidates,
                        });
                    }
                    Some((registration, Err(e))) => {
                        warn!(
                            provider = self.adapters[registration].name(),
                            "Provider task aborted: {}", e
                        );
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        media = %path,
                        pending = pending.len(),
                        "Aggregation deadline reached, continuing with partial results"
                    );
                    break;
                }
            }
        }

        let timed_out = pending.len();
        // Dropping the join handles detaches the slow tasks.
        drop(pending);

        let completed = finished.len();
        let mut aggregate = merge_results(finished);
        aggregate.completed = completed;
        aggregate.timed_out = timed_out;

        info!(
            media = %path,
            candidates = aggregate.candidates.len(),
            completed,
            timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Aggregated provider candidates"
        );
        aggregate
    }
}

/// Order results by (priority, registration), flatten, and number them from 1
pub fn merge_results(mut results: Vec<AdapterResult>) -> Aggregate {
    results.sort_by_key(|r| (r.priority, r.registration));

    let base_url = results
        .iter()
        .find(|r| !r.candidates.is_empty())
        .map(|r| r.origin.clone());

    let candidates: Vec<CandidateSource> = results
        .into_iter()
        .flat_map(|r| r.candidates)
        .enumerate()
        .map(|(index, mut candidate)| {
            candidate.id = index as u32 + 1;
            candidate
        })
        .collect();

    debug!(count = candidates.len(), base_url = ?base_url, "Merged candidates");
    Aggregate {
        candidates,
        base_url,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourceResult;
    use crate::models::SourceKind;
    use async_trait::async_trait;
    use tracing_test::traced_test;

    struct Delayed {
        name: &'static str,
        priority: i32,
        delay: Duration,
        labels: Vec<&'static str>,
    }

    #[async_trait]
    impl ProviderAdapter for Delayed {
        fn name(&self) -> &str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn origin(&self) -> &str {
            match self.name {
                "a" => "https://a.example",
                "b" => "https://b.example",
                _ => "https://other.example",
            }
        }
        async fn fetch_candidates(&self, _path: &MediaPath) -> SourceResult<Vec<CandidateSource>> {
            tokio::time::sleep(self.delay).await;
            Ok(self
                .labels
                .iter()
                .map(|label| {
                    CandidateSource::new(self.name, self.origin(), SourceKind::Manifest, format!("https://{label}"))
                        .with_label(*label)
                })
                .collect())
        }
    }

    fn adapter(
        name: &'static str,
        priority: i32,
        delay_ms: u64,
        labels: Vec<&'static str>,
    ) -> Arc<dyn ProviderAdapter> {
        Arc::new(Delayed {
            name,
            priority,
            delay: Duration::from_millis(delay_ms),
            labels,
        })
    }

    #[tokio::test]
    async fn test_merge_is_independent_of_completion_order() {
        // b (priority 2) finishes long before a (priority 1)
        let aggregator = SourceAggregator::new(
            vec![
                adapter("b", 2, 0, vec!["b1"]),
                adapter("a", 1, 60, vec!["a1", "a2"]),
            ],
            Duration::from_secs(5),
        );

        let aggregate = aggregator.aggregate(&MediaPath::movie(550)).await;
        let labels: Vec<(&str, u32)> = aggregate
            .candidates
            .iter()
            .map(|c| (c.label.as_str(), c.id))
            .collect();
        assert_eq!(labels, vec![("a1", 1), ("a2", 2), ("b1", 3)]);
        assert_eq!(aggregate.base_url.as_deref(), Some("https://a.example"));
        assert_eq!(aggregate.completed, 2);
    }

    #[tokio::test]
    async fn test_priority_ties_keep_registration_order() {
        let aggregator = SourceAggregator::new(
            vec![
                adapter("x", 1, 30, vec!["x1"]),
                adapter("y", 1, 0, vec!["y1"]),
            ],
            Duration::from_secs(5),
        );
        let aggregate = aggregator.aggregate(&MediaPath::movie(1)).await;
        let labels: Vec<&str> = aggregate.candidates.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["x1", "y1"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_deadline_returns_partial_results() {
        let aggregator = SourceAggregator::new(
            vec![
                adapter("a", 1, 5_000, vec!["slow"]),
                adapter("b", 2, 0, vec!["fast"]),
            ],
            Duration::from_millis(100),
        );

        let started = Instant::now();
        let aggregate = aggregator.aggregate(&MediaPath::movie(550)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(aggregate.candidates.len(), 1);
        assert_eq!(aggregate.candidates[0].label, "fast");
        assert_eq!(aggregate.candidates[0].id, 1);
        assert_eq!(aggregate.base_url.as_deref(), Some("https://b.example"));
        assert_eq!(aggregate.timed_out, 1);
        assert!(logs_contain("Aggregation deadline reached"));
    }

    #[tokio::test]
    async fn test_nothing_in_time_is_empty_not_error() {
        let aggregator = SourceAggregator::new(
            vec![adapter("a", 1, 5_000, vec!["slow"])],
            Duration::from_millis(20),
        );
        let aggregate = aggregator.aggregate(&MediaPath::movie(550)).await;
        assert!(aggregate.candidates.is_empty());
        assert_eq!(aggregate.base_url, None);
    }

    #[test]
    fn test_base_url_skips_empty_high_priority_results() {
        let aggregate = merge_results(vec![
            AdapterResult {
                priority: 0,
                registration: 0,
                origin: "https://empty.example".into(),
                candidates: vec![],
            },
            AdapterResult {
                priority: 5,
                registration: 1,
                origin: "https://full.example".into(),
                candidates: vec![CandidateSource::new(
                    "full",
                    "https://full.example",
                    SourceKind::File,
                    "https://full.example/a.mp4",
                )],
            },
        ]);
        assert_eq!(aggregate.base_url.as_deref(), Some("https://full.example"));
        assert_eq!(aggregate.candidates[0].id, 1);
    }
}
