//! Resolution entry point
//!
//! Runs the full pipeline for one media path: aggregate, resolve, rank, then
//! wrap every surviving URL in a signed relay reference. Nothing is cached;
//! every call resolves from scratch.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::aggregator::SourceAggregator;
use super::ranker::AvailabilityRanker;
use super::resolver::SourceResolver;
use crate::models::{MediaPath, RankedSource, SourceEntry, SourceResponse, SubtitleTrack};
use crate::sources::{MetadataLookup, SubtitleLookup};
use crate::utils::UrlProtector;

pub struct SourceService {
    aggregator: SourceAggregator,
    resolver: SourceResolver,
    ranker: AvailabilityRanker,
    protector: Arc<UrlProtector>,
    metadata: Arc<dyn MetadataLookup>,
    subtitles: Arc<dyn SubtitleLookup>,
    relay_endpoint: String,
}

impl SourceService {
    pub fn new(
        aggregator: SourceAggregator,
        resolver: SourceResolver,
        ranker: AvailabilityRanker,
        protector: Arc<UrlProtector>,
        metadata: Arc<dyn MetadataLookup>,
        subtitles: Arc<dyn SubtitleLookup>,
        relay_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            aggregator,
            resolver,
            ranker,
            protector,
            metadata,
            subtitles,
            relay_endpoint: relay_endpoint.into(),
        }
    }

    pub fn provider_count(&self) -> usize {
        self.aggregator.adapter_count()
    }

    pub async fn sources_for(&self, path: &MediaPath) -> SourceResponse {
        let started = Instant::now();
        let aggregate = self.aggregator.aggregate(path).await;
        let base_url = aggregate.base_url.clone();

        let pipeline = async {
            let resolved = self.resolver.resolve_all(aggregate.candidates).await;
            debug!(media = %path, resolved = resolved.len(), "Resolved candidates");
            self.ranker.rank(resolved).await
        };
        let (ranked, tracks) = tokio::join!(pipeline, self.subtitle_tracks(path));

        let sources: Vec<SourceEntry> = ranked.into_iter().map(|r| self.to_entry(r)).collect();
        info!(
            media = %path,
            sources = sources.len(),
            available = sources.iter().filter(|s| s.available).count(),
            tracks = tracks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Resolved media sources"
        );

        SourceResponse {
            sources,
            base_url,
            tracks,
        }
    }

    async fn subtitle_tracks(&self, path: &MediaPath) -> Vec<SubtitleTrack> {
        if !self.subtitles.enabled() {
            return Vec::new();
        }
        let imdb_id = match self.metadata.lookup(path.kind, path.id).await {
            Ok(metadata) => metadata.imdb_id,
            Err(e) => {
                debug!(media = %path, "Metadata unavailable for subtitles: {}", e);
                None
            }
        };
        self.subtitles.tracks(path, imdb_id.as_deref()).await
    }

    fn to_entry(&self, ranked: RankedSource) -> SourceEntry {
        let available = ranked.is_available();
        let RankedSource { resolved, .. } = ranked;
        let candidate = resolved.candidate;
        let headers = (!candidate.headers.is_empty()).then_some(&candidate.headers);
        let url = self
            .protector
            .protect(&resolved.url, headers)
            .to_relay_url(&self.relay_endpoint);

        SourceEntry {
            id: candidate.id,
            provider: candidate.provider.clone(),
            label: candidate.label.clone(),
            quality: candidate.quality.clone(),
            kind: resolved.kind,
            url,
            language: candidate.language.clone(),
            available,
        }
    }
}
