//! Provider adapter and collaborator trait definitions
//!
//! Adapters are registered as trait objects in a priority-ordered list. The
//! metadata and subtitle collaborators sit behind traits so tests and
//! alternative backends can be swapped in.

use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

use crate::errors::SourceResult;
use crate::models::{CandidateSource, MediaKind, MediaMetadata, MediaPath, SubtitleTrack};

/// One upstream provider family
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Unique provider name, used as the candidate's provider tag
    fn name(&self) -> &str;

    /// Lower values are listed first after merging
    fn priority(&self) -> i32;

    /// `scheme://host` of the provider, used as Referer while resolving
    fn origin(&self) -> &str;

    /// Fetch candidates, propagating any failure
    async fn fetch_candidates(&self, path: &MediaPath) -> SourceResult<Vec<CandidateSource>>;

    /// Fetch candidates, reducing every failure to an empty list
    async fn resolve(&self, path: &MediaPath) -> Vec<CandidateSource> {
        let started = Instant::now();
        match self.fetch_candidates(path).await {
            Ok(candidates) => {
                debug!(
                    provider = self.name(),
                    media = %path,
                    count = candidates.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Provider returned candidates"
                );
                candidates
            }
            Err(e) => {
                warn!(provider = self.name(), media = %path, "Provider failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Maps internal numeric ids to external identifiers
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn lookup(&self, kind: MediaKind, id: u64) -> SourceResult<MediaMetadata>;
}

/// Supplies subtitle tracks for a media path; never fails
#[async_trait]
pub trait SubtitleLookup: Send + Sync {
    /// Whether lookups can return anything at all
    fn enabled(&self) -> bool {
        true
    }

    async fn tracks(&self, path: &MediaPath, imdb_id: Option<&str>) -> Vec<SubtitleTrack>;
}

/// Subtitle lookup used when no subtitle service is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSubtitles;

#[async_trait]
impl SubtitleLookup for NoSubtitles {
    fn enabled(&self) -> bool {
        false
    }

    async fn tracks(&self, _path: &MediaPath, _imdb_id: Option<&str>) -> Vec<SubtitleTrack> {
        Vec::new()
    }
}

/// Substitute `{kind}`, `{id}`, `{imdb_id}`, `{season}` and `{episode}` in a path template.
///
/// For movies every path segment mentioning `{season}` or `{episode}` is
/// dropped, so one template serves both kinds.
pub fn render_template(template: &str, path: &MediaPath, imdb_id: Option<&str>) -> String {
    let (route, query) = match template.split_once('?') {
        Some((route, query)) => (route, Some(query)),
        None => (template, None),
    };

    let keep = |part: &&str| {
        path.kind == MediaKind::Tv || !(part.contains("{season}") || part.contains("{episode}"))
    };
    let route = route.split('/').filter(keep).collect::<Vec<_>>().join("/");
    let query = query.map(|q| q.split('&').filter(keep).collect::<Vec<_>>().join("&"));

    let rendered = match query {
        Some(q) if !q.is_empty() => format!("{route}?{q}"),
        _ => route,
    };

    rendered
        .replace("{kind}", path.kind.as_str())
        .replace("{id}", &path.id.to_string())
        .replace("{imdb_id}", imdb_id.unwrap_or_default())
        .replace("{season}", &path.season_or_default().to_string())
        .replace("{episode}", &path.episode_or_default().to_string())
}
