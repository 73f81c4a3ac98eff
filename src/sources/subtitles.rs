//! HTTP subtitle collaborator

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use super::traits::SubtitleLookup;
use crate::config::SubtitleConfig;
use crate::errors::AppResult;
use crate::models::{MediaKind, MediaPath, SubtitleTrack};
use crate::utils::HttpClientFactory;

#[derive(Debug, Deserialize)]
struct TrackEntry {
    #[serde(alias = "display", alias = "name")]
    label: Option<String>,
    #[serde(alias = "lang")]
    language: Option<String>,
    #[serde(alias = "file")]
    url: String,
}

pub struct HttpSubtitleLookup {
    client: Client,
    base_url: String,
}

impl HttpSubtitleLookup {
    pub fn new(base_url: &str, config: &SubtitleConfig, factory: &HttpClientFactory) -> AppResult<Self> {
        Ok(Self {
            client: factory.fetch_client(config.timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SubtitleLookup for HttpSubtitleLookup {
    async fn tracks(&self, path: &MediaPath, imdb_id: Option<&str>) -> Vec<SubtitleTrack> {
        let mut query = vec![("tmdb_id", path.id.to_string())];
        if let Some(imdb_id) = imdb_id {
            query.push(("imdb_id", imdb_id.to_string()));
        }
        if path.kind == MediaKind::Tv {
            query.push(("season", path.season_or_default().to_string()));
            query.push(("episode", path.episode_or_default().to_string()));
        }

        let response = match self
            .client
            .get(format!("{}/subtitles", self.base_url))
            .query(&query)
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(response) => response,
            Err(e) => {
                warn!(media = %path, "Subtitle lookup failed: {}", e.without_url());
                return Vec::new();
            }
        };

        match response.json::<Vec<TrackEntry>>().await {
            Ok(entries) => entries
                .into_iter()
                .filter(|entry| entry.url.starts_with("http"))
                .map(|entry| {
                    let language = entry.language.unwrap_or_else(|| "und".to_string());
                    SubtitleTrack {
                        label: entry.label.unwrap_or_else(|| language.clone()),
                        language,
                        url: entry.url,
                    }
                })
                .collect(),
            Err(e) => {
                warn!(media = %path, "Subtitle response was not understood: {}", e.without_url());
                Vec::new()
            }
        }
    }
}
