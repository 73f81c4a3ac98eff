//! Signed streaming relay
//!
//! Admits a signed relay URL, fetches the upstream behind it with bounded
//! retries, rewrites manifests and streams everything else straight through.
//! The relay holds no per-request state beyond the retry loop.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{StreamExt, stream};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::headers::HeaderPolicy;
use super::manifest::{MANIFEST_CONTENT_TYPE, ManifestRewriteContext, ManifestRewriter, is_manifest};
use super::retry::{AttemptOutcome, RetryDecision, RetryPolicy, RetryState};
use crate::config::Config;
use crate::errors::{AppResult, RelayError, RelayResult};
use crate::utils::{HttpClientFactory, UrlProtector, UrlUtils};

/// Manifests larger than this are refused rather than buffered
const MAX_MANIFEST_BYTES: usize = 8 * 1024 * 1024;

/// Upstream response headers passed through to the client
const PASSTHROUGH_HEADERS: [header::HeaderName; 8] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::ACCEPT_RANGES,
    header::ETAG,
    header::LAST_MODIFIED,
    header::EXPIRES,
    header::CACHE_CONTROL,
];

const EXPOSED_HEADERS: &str = "Content-Length, Content-Range, Accept-Ranges, Content-Type";

/// Inbound relay query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayQuery {
    pub d: Option<String>,
    pub s: Option<String>,
    pub headers: Option<String>,
}

/// A request that passed admission control
#[derive(Debug, Clone, PartialEq)]
pub struct AdmittedRequest {
    pub target: Url,
    pub header_bundle: Option<HashMap<String, String>>,
}

pub struct RelayService {
    client: Client,
    protector: Arc<UrlProtector>,
    header_policy: HeaderPolicy,
    retry_policy: RetryPolicy,
    rewriter: ManifestRewriter,
    attempt_timeout: Duration,
    relay_endpoint: String,
    allowed_origins: Vec<String>,
    development_mode: bool,
    manifest_cache_control: HeaderValue,
}

impl RelayService {
    pub fn new(
        config: &Config,
        http: &HttpClientFactory,
        protector: Arc<UrlProtector>,
        relay_endpoint: impl Into<String>,
    ) -> AppResult<Self> {
        let manifest_cache_control = HeaderValue::from_str(&format!(
            "public, max-age={}, stale-while-revalidate={}",
            config.relay.manifest_max_age, config.relay.manifest_stale_while_revalidate
        ))
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"));

        Ok(Self {
            client: http.relay_client()?,
            header_policy: HeaderPolicy::from_config(&config.relay)?,
            retry_policy: RetryPolicy::from_config(&config.relay),
            rewriter: ManifestRewriter::new(Arc::clone(&protector))?,
            protector,
            attempt_timeout: config.relay.attempt_timeout,
            relay_endpoint: relay_endpoint.into(),
            allowed_origins: config.web.allowed_origins.clone(),
            development_mode: config.web.development_mode,
            manifest_cache_control,
        })
    }

    pub fn relay_endpoint(&self) -> &str {
        &self.relay_endpoint
    }

    /// Wrap an upstream URL as a relay URL
    pub fn relay_url_for(&self, url: &str, bundle: Option<&HashMap<String, String>>) -> String {
        self.protector
            .protect(url, bundle)
            .to_relay_url(&self.relay_endpoint)
    }

    /// Origin/Referer allow-list check
    ///
    /// Only development mode skips the check. Otherwise the Origin host (or
    /// the Referer host when Origin is absent) must match an entry, so an
    /// empty allow-list admits nobody.
    pub fn check_origin(&self, request_headers: &HeaderMap) -> RelayResult<()> {
        if self.development_mode {
            return Ok(());
        }

        let host = [header::ORIGIN, header::REFERER]
            .iter()
            .filter_map(|name| request_headers.get(name))
            .filter_map(|value| value.to_str().ok())
            .find_map(UrlUtils::host);

        match host {
            Some(host)
                if self
                    .allowed_origins
                    .iter()
                    .any(|allowed| UrlUtils::host_matches(&host, allowed)) =>
            {
                Ok(())
            }
            _ => Err(RelayError::forbidden("Forbidden origin")),
        }
    }

    pub fn admit(&self, query: &RelayQuery, request_headers: &HeaderMap) -> RelayResult<AdmittedRequest> {
        self.check_origin(request_headers)?;

        let (payload, signature) = match (query.d.as_deref(), query.s.as_deref()) {
            (Some(d), Some(s)) if !d.is_empty() && !s.is_empty() => (d, s),
            _ => return Err(RelayError::bad_request("Missing payload or signature")),
        };

        if !self.protector.verify(payload, signature) {
            return Err(RelayError::forbidden("Invalid signature"));
        }

        let target = UrlProtector::deobfuscate(payload)
            .and_then(|url| UrlUtils::parse_http(&url))
            .ok_or(RelayError::bad_request("Invalid target"))?;

        let header_bundle = match query.headers.as_deref().filter(|h| !h.is_empty()) {
            Some(bundle) => Some(
                UrlProtector::decode_header_bundle(bundle)
                    .ok_or(RelayError::bad_request("Malformed header bundle"))?,
            ),
            None => None,
        };

        Ok(AdmittedRequest {
            target,
            header_bundle,
        })
    }

    /// Fetch the upstream, retrying per the retry policy
    pub async fn fetch(
        &self,
        target: &Url,
        header_bundle: Option<&HashMap<String, String>>,
        range: Option<&HeaderValue>,
    ) -> RelayResult<reqwest::Response> {
        let mut state = RetryState::new();

        loop {
            let mut headers = self.header_policy.build(target, header_bundle, range);
            if state.strip_origin() {
                headers.remove(header::ORIGIN);
            }
            let origin_sent = headers.contains_key(header::ORIGIN);

            let request = self.client.get(target.clone()).headers(headers);
            let (response, outcome) =
                match tokio::time::timeout(self.attempt_timeout, request.send()).await {
                    Ok(Ok(response)) => {
                        let status = response.status().as_u16();
                        (Some(response), AttemptOutcome::Status(status))
                    }
                    Ok(Err(e)) => {
                        debug!(attempt = state.attempt(), "Upstream request failed: {}", e.without_url());
                        (None, AttemptOutcome::NetworkError)
                    }
                    Err(_) => {
                        debug!(attempt = state.attempt(), "Upstream attempt timed out");
                        (None, AttemptOutcome::NetworkError)
                    }
                };

            let attempt = state.attempt();
            match state.decide(&self.retry_policy, outcome, origin_sent) {
                RetryDecision::Deliver => {
                    return response.ok_or(RelayError::UpstreamUnavailable);
                }
                RetryDecision::Retry(delay) => {
                    debug!(
                        attempt,
                        outcome = ?outcome,
                        strip_origin = state.strip_origin(),
                        delay_ms = delay.as_millis() as u64,
                        "Retrying upstream"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                RetryDecision::Fail(error) => {
                    warn!(
                        attempts = attempt,
                        last_status = ?state.last_status(),
                        "Upstream fetch failed: {}", error
                    );
                    return Err(error);
                }
            }
        }
    }

    /// Handle one relay request end to end
    pub async fn relay(&self, query: &RelayQuery, request_headers: &HeaderMap) -> Response {
        let started = Instant::now();
        let admitted = match self.admit(query, request_headers) {
            Ok(admitted) => admitted,
            Err(e) => {
                info!(status = e.status_code().as_u16(), reason = %e, "Relay request rejected");
                return e.into_response();
            }
        };

        debug!(
            upstream = %UrlUtils::obfuscate_credentials(admitted.target.as_str()),
            "Relaying upstream"
        );

        let range = request_headers.get(header::RANGE);
        let response = match self
            .fetch(&admitted.target, admitted.header_bundle.as_ref(), range)
            .await
        {
            Ok(response) => response,
            Err(e) => return e.into_response(),
        };

        let status = response.status();
        let result = if status.is_redirection() {
            self.redirect_response(&admitted, response)
        } else {
            self.stream_response(&admitted, response).await
        };

        let response = result.unwrap_or_else(IntoResponse::into_response);
        debug!(
            status = response.status().as_u16(),
            upstream_status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Relay response ready"
        );
        response
    }

    fn redirect_response(
        &self,
        admitted: &AdmittedRequest,
        upstream: reqwest::Response,
    ) -> RelayResult<Response> {
        let location = upstream
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| UrlUtils::resolve(&admitted.target, location))
            .filter(|url| matches!(url.scheme(), "http" | "https"));

        let Some(location) = location else {
            return Ok(passthrough(upstream.status(), upstream.headers(), Body::empty()));
        };

        let relayed = self.relay_url_for(location.as_str(), admitted.header_bundle.as_ref());
        debug!(
            location = %UrlUtils::obfuscate_credentials(location.as_str()),
            "Re-protecting upstream redirect"
        );
        Response::builder()
            .status(StatusCode::FOUND)
            .header(header::LOCATION, relayed)
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .header(header::CACHE_CONTROL, "no-store")
            .body(Body::empty())
            .map_err(|_| RelayError::UpstreamUnavailable)
    }

    async fn stream_response(
        &self,
        admitted: &AdmittedRequest,
        upstream: reqwest::Response,
    ) -> RelayResult<Response> {
        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();
        let content_type = upstream_headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body_stream = upstream.bytes_stream();

        if !status.is_success() {
            return Ok(passthrough(status, &upstream_headers, Body::from_stream(body_stream)));
        }

        // Peek the first chunk so manifests served under odd content types are caught
        let first_chunk = match body_stream.next().await {
            Some(Ok(chunk)) => Some(chunk),
            Some(Err(e)) => {
                debug!("Upstream body failed before first chunk: {}", e.without_url());
                return Err(RelayError::UpstreamUnavailable);
            }
            None => None,
        };

        let first_bytes = first_chunk.as_deref().unwrap_or_default();
        if is_manifest(&admitted.target, content_type.as_deref(), first_bytes) {
            let mut body = first_chunk.map(|c| c.to_vec()).unwrap_or_default();
            while let Some(chunk) = body_stream.next().await {
                let chunk = chunk.map_err(|_| RelayError::UpstreamUnavailable)?;
                if body.len() + chunk.len() > MAX_MANIFEST_BYTES {
                    warn!("Upstream manifest exceeds size limit");
                    return Err(RelayError::UpstreamUnavailable);
                }
                body.extend_from_slice(&chunk);
            }
            return Ok(self.manifest_response(status, admitted, &body));
        }

        let rest = stream::iter(first_chunk.map(Ok::<Bytes, reqwest::Error>)).chain(body_stream);
        Ok(passthrough(status, &upstream_headers, Body::from_stream(rest)))
    }

    fn manifest_response(&self, status: StatusCode, admitted: &AdmittedRequest, body: &[u8]) -> Response {
        let text = String::from_utf8_lossy(body);
        let context = ManifestRewriteContext {
            manifest_url: &admitted.target,
            header_bundle: admitted.header_bundle.as_ref(),
            relay_endpoint: &self.relay_endpoint,
        };
        let rewritten = self.rewriter.rewrite(&text, &context);

        let mut response = (status, rewritten).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(MANIFEST_CONTENT_TYPE));
        headers.insert(header::CACHE_CONTROL, self.manifest_cache_control.clone());
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        apply_cors(headers);
        response
    }
}

/// Copy the safelisted upstream headers onto a streamed body
fn passthrough(status: StatusCode, upstream_headers: &HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for name in PASSTHROUGH_HEADERS.iter() {
        if let Some(value) = upstream_headers.get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
    apply_cors(headers);
    response
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
}

/// Response to a CORS preflight on the relay
pub fn preflight_response() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, HEAD, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Range, Content-Type, Origin, Accept"),
            (header::ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(allowed: Vec<&str>, development_mode: bool) -> RelayService {
        let mut config = Config::default();
        config.web.allowed_origins = allowed.into_iter().map(str::to_string).collect();
        config.web.development_mode = development_mode;
        let protector = Arc::new(UrlProtector::new("secret", 16).unwrap());
        RelayService::new(
            &config,
            &HttpClientFactory::new("test"),
            protector,
            "http://relay.local/api/v1/relay",
        )
        .unwrap()
    }

    fn signed_query(service: &RelayService, url: &str) -> RelayQuery {
        let protected = service.protector.protect(url, None);
        RelayQuery {
            d: Some(protected.payload),
            s: Some(protected.signature),
            headers: None,
        }
    }

    fn with_origin(origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_str(origin).unwrap());
        headers
    }

    #[test]
    fn test_admits_valid_request() {
        let service = service(vec!["example.com"], false);
        let query = signed_query(&service, "https://cdn.example.net/a.m3u8");
        let admitted = service.admit(&query, &with_origin("https://www.example.com")).unwrap();
        assert_eq!(admitted.target.as_str(), "https://cdn.example.net/a.m3u8");
        assert_eq!(admitted.header_bundle, None);
    }

    #[test]
    fn test_rejections_are_distinct() {
        let service = service(vec!["example.com"], false);
        let origin = with_origin("https://example.com");

        let missing = service.admit(&RelayQuery::default(), &origin).unwrap_err();
        assert_eq!(missing, RelayError::bad_request("Missing payload or signature"));

        let mut tampered = signed_query(&service, "https://cdn.example.net/a.m3u8");
        tampered.s = Some("0".repeat(16));
        assert_eq!(
            service.admit(&tampered, &origin).unwrap_err(),
            RelayError::forbidden("Invalid signature")
        );

        let not_http = signed_query(&service, "ftp://cdn.example.net/a.m3u8");
        assert_eq!(
            service.admit(&not_http, &origin).unwrap_err(),
            RelayError::bad_request("Invalid target")
        );

        let mut bad_bundle = signed_query(&service, "https://cdn.example.net/a.m3u8");
        bad_bundle.headers = Some("!!".to_string());
        assert_eq!(
            service.admit(&bad_bundle, &origin).unwrap_err(),
            RelayError::bad_request("Malformed header bundle")
        );

        let valid = signed_query(&service, "https://cdn.example.net/a.m3u8");
        assert_eq!(
            service.admit(&valid, &with_origin("https://evil.net")).unwrap_err(),
            RelayError::forbidden("Forbidden origin")
        );
        assert_eq!(
            service.admit(&valid, &HeaderMap::new()).unwrap_err(),
            RelayError::forbidden("Forbidden origin")
        );
    }

    #[test]
    fn test_rejection_text_never_contains_upstream() {
        let service = service(vec!["example.com"], false);
        let query = signed_query(&service, "ftp://secret-cdn.example.net/a.m3u8");
        let error = service.admit(&query, &with_origin("https://example.com")).unwrap_err();
        assert!(!error.client_message().contains("secret-cdn"));
    }

    #[test]
    fn test_referer_used_when_origin_absent_and_dev_mode_skips_check() {
        let service_strict = service(vec!["example.com"], false);
        let mut headers = HeaderMap::new();
        headers.insert(header::REFERER, HeaderValue::from_static("https://app.example.com/watch/550"));
        assert!(service_strict.check_origin(&headers).is_ok());

        let dev = service(vec!["example.com"], true);
        assert!(dev.check_origin(&with_origin("https://evil.net")).is_ok());
    }

    #[test]
    fn test_empty_allow_list_admits_nobody_outside_development() {
        let strict = service(vec![], false);
        assert_eq!(
            strict.check_origin(&with_origin("https://evil.net")).unwrap_err(),
            RelayError::forbidden("Forbidden origin")
        );
        assert!(strict.check_origin(&HeaderMap::new()).is_err());

        let dev = service(vec![], true);
        assert!(dev.check_origin(&with_origin("https://evil.net")).is_ok());
        assert!(dev.check_origin(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_preflight() {
        let response = preflight_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, HEAD, OPTIONS"
        );
    }
}
