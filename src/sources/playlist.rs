//! Playlist-generator provider
//!
//! Builds a deterministic manifest URL from the configured template. No
//! network I/O happens here; reachability is left to the relay.

use async_trait::async_trait;
use std::collections::HashMap;

use super::traits::{ProviderAdapter, render_template};
use crate::config::ProviderConfig;
use crate::errors::{SourceError, SourceResult};
use crate::models::{CandidateSource, MediaPath, SourceKind};
use crate::utils::UrlUtils;

pub const DEFAULT_PLAYLIST_TEMPLATE: &str = "/{kind}/{id}/{season}/{episode}/index.m3u8";

pub struct PlaylistAdapter {
    name: String,
    priority: i32,
    base_url: String,
    origin: String,
    template: String,
    language: String,
    needs_proxy: bool,
    headers: HashMap<String, String>,
}

impl PlaylistAdapter {
    pub fn from_config(config: &ProviderConfig) -> SourceResult<Self> {
        let origin = UrlUtils::origin(&config.base_url)
            .ok_or_else(|| SourceError::parse(&config.name, "base_url is not an http(s) URL"))?;
        Ok(Self {
            name: config.name.clone(),
            priority: config.priority,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            origin,
            template: config
                .template
                .clone()
                .unwrap_or_else(|| DEFAULT_PLAYLIST_TEMPLATE.to_string()),
            language: config.language.clone(),
            needs_proxy: config.needs_proxy,
            headers: config.headers.clone(),
        })
    }

    fn playlist_url(&self, path: &MediaPath) -> String {
        let rendered = render_template(&self.template, path, None);
        if UrlUtils::is_http_url(&rendered) {
            rendered
        } else {
            format!("{}/{}", self.base_url, rendered.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl ProviderAdapter for PlaylistAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn origin(&self) -> &str {
        &self.origin
    }

    async fn fetch_candidates(&self, path: &MediaPath) -> SourceResult<Vec<CandidateSource>> {
        let candidate =
            CandidateSource::new(&self.name, &self.origin, SourceKind::Manifest, self.playlist_url(path))
                .with_quality("auto")
                .with_language(&self.language)
                .with_needs_proxy(self.needs_proxy)
                .with_headers(self.headers.clone());
        Ok(vec![candidate])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;

    fn config(template: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            name: "alpha".into(),
            kind: ProviderKind::Playlist,
            priority: 1,
            base_url: "https://alpha.example/".into(),
            enabled: true,
            template: template.map(str::to_string),
            shared_secret: None,
            needs_proxy: true,
            language: "en".into(),
            headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_builds_movie_and_episode_urls() {
        let adapter = PlaylistAdapter::from_config(&config(None)).unwrap();

        let movie = adapter.resolve(&MediaPath::movie(550)).await;
        assert_eq!(movie.len(), 1);
        assert_eq!(movie[0].reference, "https://alpha.example/movie/550/index.m3u8");
        assert_eq!(movie[0].kind, SourceKind::Manifest);
        assert_eq!(movie[0].origin, "https://alpha.example");

        let episode = adapter.resolve(&MediaPath::episode(1399, 1, 2)).await;
        assert_eq!(episode[0].reference, "https://alpha.example/tv/1399/1/2/index.m3u8");
    }

    #[tokio::test]
    async fn test_absolute_template_is_used_verbatim() {
        let adapter =
            PlaylistAdapter::from_config(&config(Some("https://cdn.alpha.example/p/{id}.m3u8")))
                .unwrap();
        let movie = adapter.resolve(&MediaPath::movie(7)).await;
        assert_eq!(movie[0].reference, "https://cdn.alpha.example/p/7.m3u8");
    }

    #[test]
    fn test_rejects_non_http_base() {
        let mut bad = config(None);
        bad.base_url = "alpha.example".into();
        assert!(PlaylistAdapter::from_config(&bad).is_err());
    }
}
