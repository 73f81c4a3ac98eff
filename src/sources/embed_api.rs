//! JSON API provider keyed by IMDb id
//!
//! The internal numeric id is translated through the metadata collaborator,
//! then the provider's API returns a list of stream entries. Entries may hold
//! direct media URLs, embed pages or tokens issued by this service; anything
//! that is not directly playable is left for the resolver.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::traits::{MetadataLookup, ProviderAdapter, render_template};
use crate::config::ProviderConfig;
use crate::errors::{AppResult, SourceError, SourceResult};
use crate::models::{CandidateSource, MediaPath, SourceKind};
use crate::utils::{HttpClientFactory, TOKEN_MARKER, UrlUtils};

pub const DEFAULT_EMBED_API_TEMPLATE: &str = "/api/{kind}/{imdb_id}?season={season}&episode={episode}";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiResponse {
    Wrapped { sources: Vec<ApiEntry> },
    Bare(Vec<ApiEntry>),
}

#[derive(Debug, Deserialize)]
struct ApiEntry {
    #[serde(alias = "file", alias = "link", alias = "stream")]
    url: String,
    #[serde(default, alias = "name", alias = "server")]
    label: Option<String>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default, rename = "type")]
    entry_type: Option<String>,
    #[serde(default, alias = "lang")]
    language: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl ApiEntry {
    fn kind(&self) -> SourceKind {
        if self.url.starts_with(TOKEN_MARKER) {
            return SourceKind::Embed;
        }
        match self.entry_type.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("hls" | "m3u8" | "manifest") => SourceKind::Manifest,
            Some("mp4" | "file" | "video") => SourceKind::File,
            Some("embed" | "iframe") => SourceKind::Embed,
            _ => SourceKind::from_url(&self.url),
        }
    }
}

pub struct EmbedApiAdapter {
    name: String,
    priority: i32,
    base_url: Url,
    origin: String,
    template: String,
    language: String,
    needs_proxy: bool,
    headers: HashMap<String, String>,
    client: Client,
    metadata: Arc<dyn MetadataLookup>,
}

impl EmbedApiAdapter {
    pub fn from_config(
        config: &ProviderConfig,
        client: Client,
        metadata: Arc<dyn MetadataLookup>,
    ) -> AppResult<Self> {
        let base_url = UrlUtils::parse_http(&config.base_url).ok_or_else(|| {
            SourceError::parse(&config.name, "base_url is not an http(s) URL")
        })?;
        Ok(Self {
            name: config.name.clone(),
            priority: config.priority,
            origin: base_url.origin().ascii_serialization(),
            base_url,
            template: config
                .template
                .clone()
                .unwrap_or_else(|| DEFAULT_EMBED_API_TEMPLATE.to_string()),
            language: config.language.clone(),
            needs_proxy: config.needs_proxy,
            headers: config.headers.clone(),
            client,
            metadata,
        })
    }

    /// Convenience for wiring from a factory
    pub fn build(
        config: &ProviderConfig,
        factory: &HttpClientFactory,
        timeout: std::time::Duration,
        metadata: Arc<dyn MetadataLookup>,
    ) -> AppResult<Self> {
        Self::from_config(config, factory.fetch_client(timeout)?, metadata)
    }

    fn candidate_from(&self, entry: ApiEntry, index: usize) -> Option<CandidateSource> {
        let kind = entry.kind();
        let reference = if entry.url.starts_with(TOKEN_MARKER) {
            entry.url
        } else {
            UrlUtils::resolve(&self.base_url, &entry.url)?.to_string()
        };

        let mut headers = self.headers.clone();
        headers.extend(entry.headers);

        Some(
            CandidateSource::new(&self.name, &self.origin, kind, reference)
                .with_label(
                    entry
                        .label
                        .unwrap_or_else(|| format!("{} {}", self.name, index + 1)),
                )
                .with_quality(entry.quality.unwrap_or_else(|| "auto".to_string()))
                .with_language(entry.language.unwrap_or_else(|| self.language.clone()))
                .with_headers(headers)
                .with_needs_proxy(self.needs_proxy),
        )
    }
}

#[async_trait]
impl ProviderAdapter for EmbedApiAdapter {
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
        let metadata = self.metadata.lookup(path.kind, path.id).await?;
        let imdb_id = metadata.imdb_id.ok_or_else(|| SourceError::MissingExternalId {
            kind: path.kind.to_string(),
            id: path.id,
        })?;

        let api_path = render_template(&self.template, path, Some(&imdb_id));
        let api_url = UrlUtils::resolve(&self.base_url, &api_path)
            .ok_or_else(|| SourceError::parse(&self.name, "template produced an invalid URL"))?;
        debug!(
            provider = %self.name,
            url = %UrlUtils::obfuscate_credentials(api_url.as_str()),
            "Querying provider API"
        );

        let response = self
            .client
            .get(api_url)
            .header(reqwest::header::REFERER, format!("{}/", self.origin))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(&self.name, e))?;
        if !response.status().is_success() {
            return Err(SourceError::Http {
                status: response.status().as_u16(),
                provider: self.name.clone(),
            });
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| SourceError::parse(&self.name, e.without_url().to_string()))?;
        let entries = match body {
            ApiResponse::Wrapped { sources } => sources,
            ApiResponse::Bare(entries) => entries,
        };

        Ok(entries
            .into_iter()
            .filter(|entry| !entry.url.trim().is_empty())
            .enumerate()
            .filter_map(|(index, entry)| self.candidate_from(entry, index))
            .collect())
    }
}
