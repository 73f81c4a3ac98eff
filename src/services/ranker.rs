//! Reachability probing and ordering
//!
//! Ranking is binary: a candidate either answered its probe with 200 or it
//! did not. Latency and quality are not considered.

use futures::future::join_all;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::AggregationConfig;
use crate::errors::AppResult;
use crate::models::{RankedSource, ResolvedSource};
use crate::utils::{HttpClientFactory, UrlUtils};

/// Probe status recorded for network errors and timeouts
pub const UNREACHABLE: u16 = 0;

/// Probe status assumed for candidates that are not probed
pub const ASSUMED_AVAILABLE: u16 = 200;

pub struct AvailabilityRanker {
    client: Client,
    probe_timeout: Duration,
    /// Public base URL of this service; URLs under it are local
    local_base: String,
}

impl AvailabilityRanker {
    pub fn new(
        config: &AggregationConfig,
        http: &HttpClientFactory,
        local_base: impl Into<String>,
    ) -> AppResult<Self> {
        Ok(Self::with_client(
            http.fetch_client(config.probe_timeout)?,
            config.probe_timeout,
            local_base,
        ))
    }

    pub fn with_client(client: Client, probe_timeout: Duration, local_base: impl Into<String>) -> Self {
        Self {
            client,
            probe_timeout,
            local_base: local_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn is_local(&self, url: &str) -> bool {
        url.starts_with('/') || (!self.local_base.is_empty() && url.starts_with(&self.local_base))
    }

    /// HEAD the candidate, returning its status or [`UNREACHABLE`]
    pub async fn probe(&self, resolved: &ResolvedSource) -> u16 {
        if resolved.candidate.needs_proxy || self.is_local(&resolved.url) {
            return ASSUMED_AVAILABLE;
        }

        let mut request = self.client.head(&resolved.url);
        for (name, value) in &resolved.candidate.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let status = match tokio::time::timeout(self.probe_timeout, request.send()).await {
            Ok(Ok(response)) => response.status().as_u16(),
            Ok(Err(e)) => {
                debug!(id = resolved.candidate.id, "Probe failed: {}", e.without_url());
                UNREACHABLE
            }
            Err(_) => {
                debug!(id = resolved.candidate.id, "Probe timed out");
                UNREACHABLE
            }
        };
        debug!(
            id = resolved.candidate.id,
            url = %UrlUtils::obfuscate_credentials(&resolved.url),
            status,
            "Probed candidate"
        );
        status
    }

    pub async fn rank(&self, resolved: Vec<ResolvedSource>) -> Vec<RankedSource> {
        let statuses = join_all(resolved.iter().map(|r| self.probe(r))).await;
        order_by_availability(resolved, statuses)
    }
}

/// Stable sort: every 200 first, everything else after, discovery order kept within each group
pub fn order_by_availability(resolved: Vec<ResolvedSource>, statuses: Vec<u16>) -> Vec<RankedSource> {
    let mut ranked: Vec<RankedSource> = resolved
        .into_iter()
        .zip(statuses)
        .map(|(resolved, probe_status)| RankedSource {
            resolved,
            probe_status,
            rank: 0,
        })
        .collect();

    ranked.sort_by_key(|r| r.probe_status != 200);
    for (rank, source) in ranked.iter_mut().enumerate() {
        source.rank = rank;
    }
    ranked
}
