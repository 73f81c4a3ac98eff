//! HLS manifest detection and rewriting
//!
//! Every reference in a relayed manifest is turned into a signed relay URL so
//! segments, keys and variant playlists travel the same protected path as the
//! manifest itself. Attribute rewriting is regex based and only touches
//! `URI="..."`-style values on tag lines.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use super::RELAY_PATH;
use crate::errors::{AppError, AppResult};
use crate::utils::{UrlProtector, UrlUtils};

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

const MANIFEST_SIGNATURE: &str = "#EXTM3U";

/// Everything needed to rewrite one fetched manifest
#[derive(Debug, Clone)]
pub struct ManifestRewriteContext<'a> {
    /// Final URL the manifest was fetched from
    pub manifest_url: &'a Url,
    /// Header bundle to carry into every rewritten reference
    pub header_bundle: Option<&'a HashMap<String, String>>,
    /// Absolute relay endpoint, e.g. `https://host/api/v1/relay`
    pub relay_endpoint: &'a str,
}

impl ManifestRewriteContext<'_> {
    pub fn origin(&self) -> String {
        self.manifest_url.origin().ascii_serialization()
    }

    /// The fetched URL with its last path segment and trailing slash removed
    pub fn directory(&self) -> Url {
        manifest_directory(self.manifest_url)
    }
}

pub fn manifest_directory(url: &Url) -> Url {
    let mut directory = url.clone();
    directory.set_query(None);
    directory.set_fragment(None);
    if let Ok(mut segments) = directory.path_segments_mut() {
        segments.pop().pop_if_empty();
    }
    directory
}

/// Decide whether an upstream response is a manifest
pub fn is_manifest(url: &Url, content_type: Option<&str>, first_bytes: &[u8]) -> bool {
    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        return true;
    }
    if let Some(content_type) = content_type {
        let content_type = content_type.to_ascii_lowercase();
        if content_type.contains("mpegurl") {
            return true;
        }
    }
    sniff_manifest(first_bytes)
}

pub fn sniff_manifest(first_bytes: &[u8]) -> bool {
    let bytes = first_bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(first_bytes);
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..].starts_with(MANIFEST_SIGNATURE.as_bytes())
}

pub struct ManifestRewriter {
    protector: Arc<UrlProtector>,
    attribute: Regex,
}

impl ManifestRewriter {
    pub fn new(protector: Arc<UrlProtector>) -> AppResult<Self> {
        let attribute = Regex::new(r#"([A-Z0-9-]*(?:URI|URL))="([^"]*)""#)
            .map_err(|e| AppError::internal(format!("invalid manifest attribute pattern: {e}")))?;
        Ok(Self {
            protector,
            attribute,
        })
    }

    pub fn rewrite(&self, body: &str, context: &ManifestRewriteContext<'_>) -> String {
        let directory = context.directory();
        let mut output = String::with_capacity(body.len() * 2);

        for line in body.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                output.push_str(line);
            } else if trimmed.starts_with('#') {
                let rewritten = self.attribute.replace_all(line, |caps: &Captures<'_>| {
                    let value = &caps[2];
                    match self.relay_reference(value, &directory, context) {
                        Some(relayed) => format!("{}=\"{}\"", &caps[1], relayed),
                        None => caps[0].to_string(),
                    }
                });
                output.push_str(&rewritten);
            } else {
                match self.relay_reference(trimmed, &directory, context) {
                    Some(relayed) => output.push_str(&relayed),
                    None => output.push_str(line),
                }
            }
            output.push('\n');
        }

        output
    }

    /// Resolve a reference and wrap it; `None` leaves the reference untouched
    fn relay_reference(
        &self,
        reference: &str,
        directory: &Url,
        context: &ManifestRewriteContext<'_>,
    ) -> Option<String> {
        let absolute = resolve_reference(reference, directory, context)?;
        Some(
            self.protector
                .protect(&absolute, context.header_bundle)
                .to_relay_url(context.relay_endpoint),
        )
    }
}

/// Apply the manifest reference rules; `None` for references that stay as they are
pub fn resolve_reference(
    reference: &str,
    directory: &Url,
    context: &ManifestRewriteContext<'_>,
) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty()
        || reference.starts_with('#')
        || reference.starts_with("data:")
        || reference.starts_with("blob:")
        || reference.starts_with(context.relay_endpoint)
        || reference.starts_with(RELAY_PATH)
    {
        return None;
    }

    if let Some(rest) = reference.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if UrlUtils::is_http_url(reference) {
        return Some(reference.to_string());
    }
    if reference.starts_with('/') {
        return Some(format!("{}{}", context.origin(), reference));
    }
    if reference.contains("://") {
        // Some other scheme (skd://, etc.); players handle these themselves
        return None;
    }
    directory.join(reference).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const RELAY: &str = "http://relay.local/api/v1/relay";

    fn rewriter() -> ManifestRewriter {
        ManifestRewriter::new(Arc::new(UrlProtector::new("secret", 16).unwrap())).unwrap()
    }

    fn decode(relay_url: &str) -> String {
        let parsed = Url::parse(relay_url).unwrap();
        let payload = parsed
            .query_pairs()
            .find(|(k, _)| k == "d")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        UrlProtector::deobfuscate(&payload).unwrap()
    }

    #[rstest]
    #[case("segment001.ts", "https://h/a/segment001.ts")]
    #[case("/root/seg.ts", "https://h/root/seg.ts")]
    #[case("//cdn.example.com/seg.ts", "https://cdn.example.com/seg.ts")]
    #[case("https://other.example/seg.ts?x=1", "https://other.example/seg.ts?x=1")]
    fn test_reference_resolution(#[case] reference: &str, #[case] expected: &str) {
        let manifest_url = Url::parse("https://h/a/b/index.m3u8").unwrap();
        let context = ManifestRewriteContext {
            manifest_url: &manifest_url,
            header_bundle: None,
            relay_endpoint: RELAY,
        };
        let resolved = resolve_reference(reference, &context.directory(), &context);
        assert_eq!(resolved.as_deref(), Some(expected));
    }

    #[rstest]
    #[case("data:text/plain;base64,AAAA")]
    #[case("blob:https://h/123")]
    #[case("#fragment")]
    #[case("http://relay.local/api/v1/relay?d=sr_x&s=y")]
    #[case("/api/v1/relay?d=sr_x&s=y")]
    #[case("skd://key-id")]
    fn test_untouched_references(#[case] reference: &str) {
        let manifest_url = Url::parse("https://h/a/b/index.m3u8").unwrap();
        let context = ManifestRewriteContext {
            manifest_url: &manifest_url,
            header_bundle: None,
            relay_endpoint: RELAY,
        };
        assert_eq!(resolve_reference(reference, &context.directory(), &context), None);
    }

    #[test]
    fn test_rewrites_segments_and_key_uri_only() {
        let manifest_url = Url::parse("https://h/a/b/index.m3u8").unwrap();
        let context = ManifestRewriteContext {
            manifest_url: &manifest_url,
            header_bundle: None,
            relay_endpoint: RELAY,
        };
        let body = "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n#EXTINF:4.0,\nsegment001.ts\n";
        let output = rewriter().rewrite(body, &context);
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert!(lines[1].starts_with("#EXT-X-KEY:METHOD=AES-128,URI=\"http://relay.local/api/v1/relay?d="));
        let key_url = lines[1]
            .split("URI=\"")
            .nth(1)
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap();
        assert_eq!(decode(key_url), "https://h/a/key.bin");
        assert_eq!(lines[2], "#EXTINF:4.0,");
        assert_eq!(decode(lines[3]), "https://h/a/segment001.ts");
        assert!(!output.contains("segment001.ts\n"));
    }

    #[test]
    fn test_display_attributes_untouched_and_bundle_carried() {
        let manifest_url = Url::parse("https://h/master.m3u8").unwrap();
        let mut bundle = HashMap::new();
        bundle.insert("Referer".to_string(), "https://player.example/".to_string());
        let context = ManifestRewriteContext {
            manifest_url: &manifest_url,
            header_bundle: Some(&bundle),
            relay_endpoint: RELAY,
        };
        let body = "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",URI=\"audio/en.m3u8\"\n";
        let output = rewriter().rewrite(body, &context);
        assert!(output.contains("GROUP-ID=\"aud\""));
        assert!(output.contains("NAME=\"English\""));
        assert!(output.contains("&headers="));
        assert!(!output.contains("audio/en.m3u8"));
    }

    #[rstest]
    #[case("https://h/x/index.m3u8", None, b"" as &[u8], true)]
    #[case("https://h/x/playlist", Some("application/x-mpegURL"), b"", true)]
    #[case("https://h/x/playlist", Some("text/plain"), b"\xEF\xBB\xBF #EXTM3U\n", true)]
    #[case("https://h/x/seg.ts", Some("video/mp2t"), b"\x47\x40\x00", false)]
    fn test_manifest_detection(
        #[case] url: &str,
        #[case] content_type: Option<&str>,
        #[case] first_bytes: &[u8],
        #[case] expected: bool,
    ) {
        assert_eq!(is_manifest(&Url::parse(url).unwrap(), content_type, first_bytes), expected);
    }
}
