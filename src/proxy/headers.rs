//! Upstream request header synthesis
//!
//! Every upstream request looks like it came from a browser. Referer/Origin
//! come from, in order of precedence: the header bundle carried in the relay
//! URL, a configured host family, or the upstream's own origin.

use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use tracing::debug;
use url::Url;

use crate::config::RelayConfig;
use crate::errors::{AppError, AppResult};

const ACCEPT: &str = "*/*";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

#[derive(Debug, Clone)]
struct HostFamily {
    name: String,
    pattern: Regex,
    referer: String,
    origin: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    user_agent: String,
    families: Vec<HostFamily>,
}

impl HeaderPolicy {
    pub fn from_config(config: &RelayConfig) -> AppResult<Self> {
        let families = config
            .header_families
            .iter()
            .map(|family| {
                let pattern = Regex::new(&family.host_pattern).map_err(|e| {
                    AppError::configuration(format!(
                        "header family '{}' has an invalid host_pattern: {e}",
                        family.name
                    ))
                })?;
                Ok(HostFamily {
                    name: family.name.clone(),
                    pattern,
                    referer: family.referer.clone(),
                    origin: family.origin.clone(),
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            user_agent: config.user_agent.clone(),
            families,
        })
    }

    /// Referer and Origin a host family demands, if the host belongs to one
    pub fn family_headers(&self, host: &str) -> Option<(String, String)> {
        let family = self.families.iter().find(|f| f.pattern.is_match(host))?;
        let origin = family.origin.clone().unwrap_or_else(|| {
            Url::parse(&family.referer)
                .map(|u| u.origin().ascii_serialization())
                .unwrap_or_else(|_| family.referer.trim_end_matches('/').to_string())
        });
        debug!(family = %family.name, host, "Matched upstream header family");
        Some((family.referer.clone(), origin))
    }

    /// Build the header set for one upstream request
    pub fn build(
        &self,
        target: &Url,
        bundle: Option<&HashMap<String, String>>,
        range: Option<&HeaderValue>,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, header::USER_AGENT, &self.user_agent);
        insert(&mut headers, header::ACCEPT, ACCEPT);
        insert(&mut headers, header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE);
        insert(&mut headers, header::CONNECTION, "keep-alive");
        insert(&mut headers, header::CACHE_CONTROL, "no-cache");
        if let Some(range) = range {
            headers.insert(header::RANGE, range.clone());
        }

        match bundle.filter(|b| !b.is_empty()) {
            Some(bundle) => {
                for (name, value) in bundle {
                    if let (Ok(name), Ok(value)) = (
                        HeaderName::from_bytes(name.as_bytes()),
                        HeaderValue::from_str(value),
                    ) {
                        headers.insert(name, value);
                    }
                }
            }
            None => {
                let (referer, origin) = target
                    .host_str()
                    .and_then(|host| self.family_headers(host))
                    .unwrap_or_else(|| {
                        let origin = target.origin().ascii_serialization();
                        (format!("{origin}/"), origin)
                    });
                insert(&mut headers, header::REFERER, &referer);
                insert(&mut headers, header::ORIGIN, &origin);
            }
        }

        headers
    }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
