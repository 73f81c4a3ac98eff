//! Provider adapter factory
//!
//! Builds the priority-ordered adapter registry from the `[[providers]]`
//! configuration table. New provider families are added here without
//! touching the aggregator.

use std::sync::Arc;
use tracing::{info, warn};

use super::embed_api::EmbedApiAdapter;
use super::key_exchange::KeyExchangeAdapter;
use super::metadata::TmdbMetadataClient;
use super::playlist::PlaylistAdapter;
use super::subtitles::HttpSubtitleLookup;
use super::traits::{MetadataLookup, NoSubtitles, ProviderAdapter, SubtitleLookup};
use crate::config::{Config, ProviderConfig, ProviderKind};
use crate::errors::AppResult;
use crate::utils::HttpClientFactory;

pub struct ProviderFactory;

impl ProviderFactory {
    /// Create one adapter for a provider entry
    pub fn create_adapter(
        provider: &ProviderConfig,
        config: &Config,
        http: &HttpClientFactory,
        metadata: &Arc<dyn MetadataLookup>,
    ) -> AppResult<Arc<dyn ProviderAdapter>> {
        let timeout = config.aggregation.embed_fetch_timeout;
        let adapter: Arc<dyn ProviderAdapter> = match provider.kind {
            ProviderKind::Playlist => Arc::new(PlaylistAdapter::from_config(provider)?),
            ProviderKind::EmbedApi => Arc::new(EmbedApiAdapter::build(
                provider,
                http,
                timeout,
                Arc::clone(metadata),
            )?),
            ProviderKind::KeyExchange => Arc::new(KeyExchangeAdapter::from_config(
                provider,
                http.fetch_client(timeout)?,
            )?),
        };
        Ok(adapter)
    }

    /// Create every enabled adapter, in configuration order
    ///
    /// A provider whose entry is invalid is skipped with a warning so one bad
    /// entry cannot take the whole service down.
    pub fn create_adapters(
        config: &Config,
        http: &HttpClientFactory,
        metadata: &Arc<dyn MetadataLookup>,
    ) -> Vec<Arc<dyn ProviderAdapter>> {
        let mut adapters = Vec::new();
        for provider in config.providers.iter().filter(|p| p.enabled) {
            match Self::create_adapter(provider, config, http, metadata) {
                Ok(adapter) => {
                    info!(
                        provider = %provider.name,
                        kind = ?provider.kind,
                        priority = provider.priority,
                        "Registered provider"
                    );
                    adapters.push(adapter);
                }
                Err(e) => warn!(provider = %provider.name, "Skipping provider: {}", e),
            }
        }
        if adapters.is_empty() {
            warn!("No providers are enabled; every lookup will return an empty source list");
        }
        adapters
    }

    pub fn create_metadata(
        config: &Config,
        http: &HttpClientFactory,
    ) -> AppResult<Arc<dyn MetadataLookup>> {
        Ok(Arc::new(TmdbMetadataClient::new(&config.metadata, http)?))
    }

    pub fn create_subtitles(
        config: &Config,
        http: &HttpClientFactory,
    ) -> AppResult<Arc<dyn SubtitleLookup>> {
        match config.subtitles.base_url.as_deref() {
            Some(base_url) if !base_url.trim().is_empty() => Ok(Arc::new(
                HttpSubtitleLookup::new(base_url, &config.subtitles, http)?,
            )),
            _ => Ok(Arc::new(NoSubtitles)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provider(name: &str, kind: ProviderKind, enabled: bool) -> ProviderConfig {
        ProviderConfig {
            name: name.into(),
            kind,
            priority: 0,
            base_url: format!("https://{name}.example"),
            enabled,
            template: None,
            shared_secret: None,
            needs_proxy: true,
            language: "en".into(),
            headers: HashMap::new(),
        }
    }

    #[test]
    fn test_skips_disabled_and_invalid_providers() {
        let mut config = Config::default();
        config.providers = vec![
            provider("alpha", ProviderKind::Playlist, true),
            provider("beta", ProviderKind::EmbedApi, false),
            // key exchange without a secret cannot be built
            provider("gamma", ProviderKind::KeyExchange, true),
            provider("delta", ProviderKind::EmbedApi, true),
        ];
        let http = HttpClientFactory::new("test");
        let metadata = ProviderFactory::create_metadata(&config, &http).unwrap();

        let adapters = ProviderFactory::create_adapters(&config, &http, &metadata);
        let names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["alpha", "delta"]);
    }
}
