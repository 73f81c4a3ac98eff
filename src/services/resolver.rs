//! Embed and token resolution
//!
//! Turns a candidate's reference into a directly playable URL. Direct media
//! URLs pass straight through; tokens issued by this service are decoded;
//! everything else is fetched as an embed page and scanned, following nested
//! references until a playable URL turns up or the depth bound is hit.

use futures::future::join_all;
use regex::Regex;
use reqwest::{Client, header};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::{AggregationConfig, defaults::MAX_RESOLVE_DEPTH};
use crate::errors::{AppError, AppResult, RelayError, RelayResult};
use crate::models::{CandidateSource, ResolvedSource, SourceKind};
use crate::utils::{HttpClientFactory, UrlProtector, UrlUtils, url_protector::TOKEN_PATTERN};

/// Embed pages larger than this are truncated before scanning
const MAX_EMBED_BODY: usize = 2 * 1024 * 1024;

struct Patterns {
    token: Regex,
    nested_token: Regex,
    media_url: Regex,
    iframe: Regex,
    location: Regex,
    refresh: Regex,
}

impl Patterns {
    fn compile() -> AppResult<Self> {
        let build = |pattern: &str| {
            Regex::new(pattern).map_err(|e| AppError::internal(format!("invalid resolver pattern: {e}")))
        };
        Ok(Self {
            token: build(&format!("^{TOKEN_PATTERN}$"))?,
            nested_token: build(&format!(r#"(?:^|["'\s=/?&])({TOKEN_PATTERN})"#))?,
            media_url: build(r#"https?://[^\s"'<>\\]+?\.(?:m3u8|mp4)(?:\?[^\s"'<>\\]*)?"#)?,
            iframe: build(r#"(?i)<iframe[^>]+?src\s*=\s*["']([^"']+)["']"#)?,
            location: build(
                r#"(?:window\.|document\.)?location(?:\.href)?\s*(?:=|\.replace\(|\.assign\()\s*["']([^"']+)["']"#,
            )?,
            refresh: build(r#"(?i)<meta[^>]+http-equiv\s*=\s*["']?refresh["']?[^>]*content\s*=\s*["'][^"']*?url\s*=\s*([^"'>\s]+)"#)?,
        })
    }
}

/// What one scan of an embed page produced
#[derive(Debug, PartialEq)]
enum PageScan {
    /// The page itself is a manifest
    Manifest,
    /// A playable media URL was found in the page
    Media(String),
    /// A reference that needs another hop
    Nested(String),
    Nothing,
}

pub struct SourceResolver {
    client: Client,
    resolve_timeout: Duration,
    max_depth: u8,
    patterns: Patterns,
}

impl SourceResolver {
    pub fn new(config: &AggregationConfig, http: &HttpClientFactory) -> AppResult<Self> {
        Self::with_client(
            http.fetch_client(config.embed_fetch_timeout)?,
            config.resolve_timeout,
            config.max_resolve_depth,
        )
    }

    pub fn with_client(client: Client, resolve_timeout: Duration, max_depth: u8) -> AppResult<Self> {
        Ok(Self {
            client,
            resolve_timeout,
            max_depth: max_depth.min(MAX_RESOLVE_DEPTH),
            patterns: Patterns::compile()?,
        })
    }

    /// Resolve a batch concurrently; unresolved candidates are dropped
    pub async fn resolve_all(&self, candidates: Vec<CandidateSource>) -> Vec<ResolvedSource> {
        let attempts = candidates.into_iter().map(|candidate| async move {
            let id = candidate.id;
            let provider = candidate.provider.clone();
            match tokio::time::timeout(self.resolve_timeout, self.resolve(candidate)).await {
                Ok(Ok(resolved)) => Some(resolved),
                Ok(Err(e)) => {
                    debug!(id, provider = %provider, "Dropping unresolved candidate: {}", e);
                    None
                }
                Err(_) => {
                    debug!(id, provider = %provider, "Candidate resolution timed out");
                    None
                }
            }
        });
        join_all(attempts).await.into_iter().flatten().collect()
    }

    /// Resolve one candidate, following nested references up to the depth bound
    pub async fn resolve(&self, candidate: CandidateSource) -> RelayResult<ResolvedSource> {
        let mut reference = candidate.reference.trim().to_string();
        let mut kind = candidate.kind;
        let mut referer = candidate.origin.clone();
        let mut depth: u8 = 0;

        loop {
            if self.patterns.token.is_match(&reference) {
                reference = UrlProtector::deobfuscate(&reference).ok_or(RelayError::DecodeFailed)?;
                kind = SourceKind::from_url(&reference);
                depth = self.next_depth(depth)?;
                continue;
            }

            let url = UrlUtils::parse_http(&reference).ok_or(RelayError::ResolutionFailed)?;

            if matches!(kind, SourceKind::Manifest | SourceKind::File) {
                return Ok(ResolvedSource {
                    candidate,
                    url: url.to_string(),
                    kind,
                    depth,
                });
            }

            let (page_url, scan) = self.scan_page(url, &referer, &candidate).await?;
            match scan {
                PageScan::Manifest => {
                    return Ok(ResolvedSource {
                        candidate,
                        url: page_url.to_string(),
                        kind: SourceKind::Manifest,
                        depth,
                    });
                }
                PageScan::Media(found) => {
                    let kind = SourceKind::from_url(&found);
                    return Ok(ResolvedSource {
                        candidate,
                        url: found,
                        kind,
                        depth,
                    });
                }
                PageScan::Nested(next) => {
                    depth = self.next_depth(depth)?;
                    referer = page_url.origin().ascii_serialization();
                    kind = SourceKind::from_url(&next);
                    reference = next;
                }
                PageScan::Nothing => return Err(RelayError::ResolutionFailed),
            }
        }
    }

    fn next_depth(&self, depth: u8) -> RelayResult<u8> {
        let next = depth.saturating_add(1);
        if next > self.max_depth {
            debug!(max_depth = self.max_depth, "Resolution depth exhausted");
            return Err(RelayError::ResolutionFailed);
        }
        Ok(next)
    }

    async fn scan_page(
        &self,
        url: Url,
        referer: &str,
        candidate: &CandidateSource,
    ) -> RelayResult<(Url, PageScan)> {
        debug!(
            provider = %candidate.provider,
            url = %UrlUtils::obfuscate_credentials(url.as_str()),
            "Fetching embed page"
        );

        let mut request = self
            .client
            .get(url)
            .header(header::REFERER, format!("{}/", referer.trim_end_matches('/')))
            .header(header::ACCEPT, "text/html,application/json,*/*;q=0.8");
        for (name, value) in &candidate.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            debug!(provider = %candidate.provider, "Embed fetch failed: {}", e.without_url());
            RelayError::UpstreamUnavailable
        })?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            debug!(provider = %candidate.provider, status, "Embed fetch rejected");
            return Err(RelayError::UpstreamRejected { status });
        }

        let page_url = response.url().clone();
        let bytes = response.bytes().await.map_err(|_| RelayError::ResolutionFailed)?;
        let body = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_EMBED_BODY)]);

        Ok((page_url.clone(), self.scan_body(&page_url, &body)))
    }

    fn scan_body(&self, page_url: &Url, body: &str) -> PageScan {
        if body.trim_start_matches('\u{feff}').trim_start().starts_with("#EXTM3U") {
            return PageScan::Manifest;
        }

        // JSON bodies escape slashes
        let text = body.replace("\\/", "/");

        if let Some(found) = self.patterns.media_url.find(&text) {
            return PageScan::Media(found.as_str().to_string());
        }

        if let Some(token) = self.patterns.nested_token.captures(&text).and_then(|c| c.get(1)) {
            return PageScan::Nested(token.as_str().to_string());
        }

        for pattern in [&self.patterns.iframe, &self.patterns.location, &self.patterns.refresh] {
            if let Some(target) = pattern.captures(&text).and_then(|c| c.get(1)) {
                let target = target.as_str().replace("&amp;", "&");
                if let Some(next) = UrlUtils::resolve(page_url, &target)
                    && matches!(next.scheme(), "http" | "https")
                {
                    return PageScan::Nested(next.to_string());
                }
            }
        }

        PageScan::Nothing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver() -> SourceResolver {
        SourceResolver::with_client(Client::new(), Duration::from_secs(5), 5).unwrap()
    }

    fn embed(reference: impl Into<String>, origin: &str) -> CandidateSource {
        CandidateSource::new("beta", origin, SourceKind::Embed, reference)
    }

    #[tokio::test]
    async fn test_direct_reference_passes_through_at_depth_zero() {
        let candidate = CandidateSource::new(
            "alpha",
            "https://alpha.example",
            SourceKind::Manifest,
            "https://cdn.alpha.example/550/index.m3u8",
        );
        let resolved = resolver().resolve(candidate).await.unwrap();
        assert_eq!(resolved.url, "https://cdn.alpha.example/550/index.m3u8");
        assert_eq!(resolved.depth, 0);
    }

    #[tokio::test]
    async fn test_token_is_decoded() {
        let token = UrlProtector::obfuscate("https://cdn.example.com/v/movie.mp4");
        let resolved = resolver().resolve(embed(token, "https://beta.example")).await.unwrap();
        assert_eq!(resolved.url, "https://cdn.example.com/v/movie.mp4");
        assert_eq!(resolved.kind, SourceKind::File);
        assert_eq!(resolved.depth, 1);
    }

    #[tokio::test]
    async fn test_malformed_token_fails_decode() {
        let result = resolver().resolve(embed("sr_____", "https://beta.example")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_page_scan_finds_media_url_with_origin_referer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/embed/550"))
            .and(header_is("referer", "https://beta.example/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<script>var player = {"file":"https:\/\/cdn.beta.example\/hls\/550\/master.m3u8?t=1"};</script>"#,
            ))
            .mount(&server)
            .await;

        let resolved = resolver()
            .resolve(embed(format!("{}/embed/550", server.uri()), "https://beta.example"))
            .await
            .unwrap();
        assert_eq!(resolved.url, "https://cdn.beta.example/hls/550/master.m3u8?t=1");
        assert_eq!(resolved.kind, SourceKind::Manifest);
        assert_eq!(resolved.depth, 0);
    }

    #[tokio::test]
    async fn test_manifest_body_means_fetched_url_is_the_answer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/play"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXT-X-VERSION:3\n"))
            .mount(&server)
            .await;

        let url = format!("{}/play", server.uri());
        let resolved = resolver().resolve(embed(url.clone(), "https://beta.example")).await.unwrap();
        assert_eq!(resolved.url, url);
        assert_eq!(resolved.kind, SourceKind::Manifest);
    }

    #[tokio::test]
    async fn test_follows_iframe_to_nested_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/outer"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<iframe width="100%" src="/inner?id=5"></iframe>"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/inner"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"sources: [{file: "https://cdn.example.com/v.mp4"}]"#),
            )
            .mount(&server)
            .await;

        let resolved = resolver()
            .resolve(embed(format!("{}/outer", server.uri()), "https://beta.example"))
            .await
            .unwrap();
        assert_eq!(resolved.url, "https://cdn.example.com/v.mp4");
        assert_eq!(resolved.depth, 1);
    }

    #[tokio::test]
    async fn test_self_referencing_page_stops_at_depth_bound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<script>window.location.href = "/loop";</script>"#),
            )
            .expect(6)
            .mount(&server)
            .await;

        let result = resolver()
            .resolve(embed(format!("{}/loop", server.uri()), "https://beta.example"))
            .await;
        assert_eq!(result, Err(RelayError::ResolutionFailed));
    }

    #[tokio::test]
    async fn test_rejected_embed_page_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = resolver()
            .resolve(embed(format!("{}/gone", server.uri()), "https://beta.example"))
            .await;
        assert_eq!(result, Err(RelayError::UpstreamRejected { status: 404 }));
    }

    #[test]
    fn test_configured_depth_is_capped() {
        let deep = SourceResolver::with_client(Client::new(), Duration::from_secs(5), 50).unwrap();
        assert_eq!(deep.max_depth, 5);
        let shallow = SourceResolver::with_client(Client::new(), Duration::from_secs(5), 2).unwrap();
        assert_eq!(shallow.max_depth, 2);
    }

    #[tokio::test]
    async fn test_resolve_all_drops_only_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut direct = CandidateSource::new(
            "alpha",
            "https://alpha.example",
            SourceKind::Manifest,
            "https://cdn.alpha.example/a.m3u8",
        );
        direct.id = 1;
        let mut broken = embed(format!("{}/missing", server.uri()), "https://beta.example");
        broken.id = 2;

        let resolved = resolver().resolve_all(vec![direct, broken]).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].candidate.id, 1);
    }

    #[test]
    fn test_scan_body_meta_refresh() {
        let base = Url::parse("https://embed.example/a/page").unwrap();
        let scan = resolver().scan_body(
            &base,
            r#"<meta http-equiv="refresh" content="0; url=https://embed.example/next">"#,
        );
        assert_eq!(scan, PageScan::Nested("https://embed.example/next".to_string()));
    }
}
