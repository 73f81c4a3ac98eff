//! URL utilities for consistent URL handling

use url::Url;

/// URL utilities for consistent URL handling
pub struct UrlUtils;

impl UrlUtils {
    /// Parse a URL and require an http or https scheme with a host
    ///
    /// ```rust
    /// use stream_relay::utils::url::UrlUtils;
    ///
    /// assert!(UrlUtils::parse_http("https://example.com/a").is_some());
    /// assert!(UrlUtils::parse_http("ftp://example.com/a").is_none());
    /// assert!(UrlUtils::parse_http("/relative").is_none());
    /// ```
    pub fn parse_http(url: &str) -> Option<Url> {
        let parsed = Url::parse(url).ok()?;
        match parsed.scheme() {
            "http" | "https" if parsed.host_str().is_some() => Some(parsed),
            _ => None,
        }
    }

    pub fn is_http_url(url: &str) -> bool {
        Self::parse_http(url).is_some()
    }

    /// `scheme://host[:port]` of a URL, without trailing slash
    pub fn origin(url: &str) -> Option<String> {
        let parsed = Self::parse_http(url)?;
        Some(parsed.origin().ascii_serialization())
    }

    pub fn host(url: &str) -> Option<String> {
        Self::parse_http(url).and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }

    /// Does `host` equal `allowed` or sit underneath it as a subdomain
    pub fn host_matches(host: &str, allowed: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let allowed = allowed
            .trim()
            .trim_start_matches("*.")
            .trim_end_matches('.')
            .to_ascii_lowercase();
        if allowed.is_empty() {
            return false;
        }
        host == allowed || host.ends_with(&format!(".{allowed}"))
    }

    /// Resolve a possibly-relative reference against an absolute base
    ///
    /// Protocol-relative references are forced to https.
    pub fn resolve(base: &Url, reference: &str) -> Option<Url> {
        let reference = reference.trim();
        if let Some(rest) = reference.strip_prefix("//") {
            return Url::parse(&format!("https://{rest}")).ok();
        }
        base.join(reference).ok()
    }

    /// Mask credentials and sensitive query values for logging
    pub fn obfuscate_credentials(url: &str) -> String {
        use regex::Regex;

        let mut obfuscated = url.to_string();

        if let Ok(parsed) = Url::parse(url)
            && (!parsed.username().is_empty() || parsed.password().is_some())
        {
            let mut new_url = parsed.clone();
            let _ = new_url.set_username("****");
            let _ = new_url.set_password(Some("****"));
            obfuscated = new_url.to_string();
        }

        let sensitive_params = [
            "username", "password", "user", "pass", "pwd", "token", "key", "sig", "signature",
        ];

        for param in &sensitive_params {
            let pattern = format!(r"(?i)([?&]{}=)[^&]*", regex::escape(param));
            if let Ok(re) = Regex::new(&pattern) {
                obfuscated = re.replace_all(&obfuscated, "${1}****").to_string();
            }
        }

        obfuscated
    }
}
