//! Core data types flowing through aggregation, resolution and ranking.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Tv => "tv",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(Self::Movie),
            "tv" => Ok(Self::Tv),
            other => Err(AppError::validation(format!(
                "unknown media kind '{other}', expected 'movie' or 'tv'"
            ))),
        }
    }
}

/// Canonical media path: `movie/<id>` or `tv/<id>/<season>/<episode>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaPath {
    pub kind: MediaKind,
    pub id: u64,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

impl MediaPath {
    pub fn movie(id: u64) -> Self {
        Self {
            kind: MediaKind::Movie,
            id,
            season: None,
            episode: None,
        }
    }

    pub fn episode(id: u64, season: u32, episode: u32) -> Self {
        Self {
            kind: MediaKind::Tv,
            id,
            season: Some(season),
            episode: Some(episode),
        }
    }

    /// Build a path from already-split parts.
    ///
    /// TV paths without season/episode default to S1E1; movie paths must not carry them.
    pub fn from_parts(
        kind: MediaKind,
        id: u64,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> Result<Self, AppError> {
        match kind {
            MediaKind::Movie => {
                if season.is_some() || episode.is_some() {
                    return Err(AppError::validation(
                        "movie paths do not take season or episode",
                    ));
                }
                Ok(Self::movie(id))
            }
            MediaKind::Tv => Ok(Self::episode(id, season.unwrap_or(1), episode.unwrap_or(1))),
        }
    }

    pub fn season_or_default(&self) -> u32 {
        self.season.unwrap_or(1)
    }

    pub fn episode_or_default(&self) -> u32 {
        self.episode.unwrap_or(1)
    }
}

impl fmt::Display for MediaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.season, self.episode) {
            (Some(season), Some(episode)) => {
                write!(f, "{}/{}/{}/{}", self.kind, self.id, season, episode)
            }
            _ => write!(f, "{}/{}", self.kind, self.id),
        }
    }
}

impl FromStr for MediaPath {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim_matches('/').split('/').collect();
        fn parse_number<T: FromStr>(value: &str, field: &str) -> Result<T, AppError> {
            value
                .parse::<T>()
                .map_err(|_| AppError::validation(format!("{field} must be a positive integer")))
        }

        let (kind, id, season, episode) = match parts.as_slice() {
            [kind, id] => (kind.parse()?, parse_number::<u64>(id, "id")?, None, None),
            [kind, id, season, episode] => (
                kind.parse()?,
                parse_number::<u64>(id, "id")?,
                Some(parse_number::<u32>(season, "season")?),
                Some(parse_number::<u32>(episode, "episode")?),
            ),
            _ => {
                return Err(AppError::validation(
                    "media path must be <movie|tv>/<id>[/<season>/<episode>]",
                ));
            }
        };

        Self::from_parts(kind, id, season, episode)
    }
}

/// What a candidate's reference points at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// HLS playlist
    Manifest,
    /// Progressive media file
    File,
    /// Page or token that still has to be resolved
    Embed,
}

impl SourceKind {
    /// Guess the kind of a URL from its path extension
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".m3u8") || path.ends_with(".m3u") {
            Self::Manifest
        } else if [".mp4", ".mkv", ".webm", ".m4v"]
            .iter()
            .any(|ext| path.ends_with(ext))
        {
            Self::File
        } else {
            Self::Embed
        }
    }
}

/// One provider's offer of a stream for a media path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateSource {
    pub provider: String,
    pub label: String,
    pub quality: String,
    pub kind: SourceKind,
    pub reference: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    pub needs_proxy: bool,
    pub language: String,
    /// Provider origin, used as Referer while resolving
    pub origin: String,
    /// Zero until the aggregator assigns the merged sequence
    pub id: u32,
}

impl CandidateSource {
    pub fn new(
        provider: impl Into<String>,
        origin: impl Into<String>,
        kind: SourceKind,
        reference: impl Into<String>,
    ) -> Self {
        let provider = provider.into();
        Self {
            label: provider.clone(),
            provider,
            quality: "auto".to_string(),
            kind,
            reference: reference.into(),
            headers: HashMap::new(),
            needs_proxy: true,
            language: "en".to_string(),
            origin: origin.into(),
            id: 0,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_needs_proxy(mut self, needs_proxy: bool) -> Self {
        self.needs_proxy = needs_proxy;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSource {
    pub candidate: CandidateSource,
    pub url: String,
    pub kind: SourceKind,
    pub depth: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedSource {
    pub resolved: ResolvedSource,
    /// HTTP status of the availability probe, 0 for network failure
    pub probe_status: u16,
    pub rank: usize,
}

impl RankedSource {
    pub fn is_available(&self) -> bool {
        self.probe_status == 200
    }
}

/// Subtitle track offered alongside the sources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubtitleTrack {
    pub label: String,
    pub language: String,
    pub url: String,
}

/// Source entry as returned to clients; `url` is always a relay URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceEntry {
    pub id: u32,
    pub provider: String,
    pub label: String,
    pub quality: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub url: String,
    pub language: String,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceResponse {
    pub sources: Vec<SourceEntry>,
    pub base_url: Option<String>,
    pub tracks: Vec<SubtitleTrack>,
}

/// External identifiers for a media item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub imdb_id: Option<String>,
    pub year: Option<u16>,
}
