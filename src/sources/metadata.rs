//! TMDB-compatible metadata collaborator
//!
//! Only the external-id mapping is used: `/{kind}/{id}?append_to_response=external_ids`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::traits::MetadataLookup;
use crate::config::MetadataConfig;
use crate::errors::{AppResult, SourceError, SourceResult};
use crate::models::{MediaKind, MediaMetadata};
use crate::utils::HttpClientFactory;

const SERVICE_NAME: &str = "metadata";

#[derive(Debug, Deserialize)]
struct ExternalIds {
    imdb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    title: Option<String>,
    name: Option<String>,
    imdb_id: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    external_ids: Option<ExternalIds>,
}

impl DetailsResponse {
    fn into_metadata(self) -> MediaMetadata {
        let imdb_id = self
            .external_ids
            .and_then(|ids| ids.imdb_id)
            .or(self.imdb_id)
            .filter(|id| !id.trim().is_empty());
        let year = self
            .release_date
            .or(self.first_air_date)
            .and_then(|date| date.get(..4).and_then(|y| y.parse().ok()));
        MediaMetadata {
            title: self.title.or(self.name),
            imdb_id,
            year,
        }
    }
}

pub struct TmdbMetadataClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl TmdbMetadataClient {
    pub fn new(config: &MetadataConfig, factory: &HttpClientFactory) -> AppResult<Self> {
        Ok(Self {
            client: factory.fetch_client(config.timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl MetadataLookup for TmdbMetadataClient {
    async fn lookup(&self, kind: MediaKind, id: u64) -> SourceResult<MediaMetadata> {
        let url = format!("{}/{}/{}", self.base_url, kind, id);
        let mut request = self
            .client
            .get(&url)
            .query(&[("append_to_response", "external_ids")]);
        if let Some(key) = &self.api_key {
            request = request.query(&[("api_key", key.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(SERVICE_NAME, e))?;
        if !response.status().is_success() {
            return Err(SourceError::Http {
                status: response.status().as_u16(),
                provider: SERVICE_NAME.to_string(),
            });
        }

        let details: DetailsResponse = response
            .json()
            .await
            .map_err(|e| SourceError::parse(SERVICE_NAME, e.without_url().to_string()))?;
        let metadata = details.into_metadata();
        debug!(kind = %kind, id, imdb_id = ?metadata.imdb_id, "Resolved media metadata");
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TmdbMetadataClient {
        let config = MetadataConfig {
            base_url: server.uri(),
            api_key: Some("k".into()),
            timeout: Duration::from_secs(2),
        };
        TmdbMetadataClient::new(&config, &HttpClientFactory::new("test")).unwrap()
    }

    #[tokio::test]
    async fn test_movie_lookup_reads_external_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movie/550"))
            .and(query_param("append_to_response", "external_ids"))
            .and(query_param("api_key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "title": "Fight Club",
                "release_date": "1999-10-15",
                "external_ids": { "imdb_id": "tt0137523" }
            })))
            .mount(&server)
            .await;

        let metadata = client(&server).lookup(MediaKind::Movie, 550).await.unwrap();
        assert_eq!(metadata.imdb_id.as_deref(), Some("tt0137523"));
        assert_eq!(metadata.title.as_deref(), Some("Fight Club"));
        assert_eq!(metadata.year, Some(1999));
    }

    #[tokio::test]
    async fn test_missing_item_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = client(&server).lookup(MediaKind::Tv, 1).await;
        assert!(matches!(result, Err(SourceError::Http { status: 404, .. })));
    }
}
