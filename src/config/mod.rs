use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

pub mod defaults;
pub mod duration_serde;

use defaults::*;
use duration_serde::duration;

/// Prefix for environment overrides, e.g. `STREAM_RELAY_RELAY__SIGNING_SECRET`
pub const ENV_PREFIX: &str = "STREAM_RELAY_";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub subtitles: SubtitleConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public base URL clients reach this service on; relay URLs are built from it
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Hosts permitted to embed the relay (exact host or any subdomain of it)
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Skips the origin allow-list entirely
    #[serde(default)]
    pub development_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// HMAC key for relay URL signatures; a random one is generated when empty
    #[serde(default)]
    pub signing_secret: String,
    #[serde(default = "default_signature_length")]
    pub signature_length: usize,
    #[serde(default = "default_attempt_timeout", with = "duration")]
    pub attempt_timeout: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before retry `n` is `n * backoff_step`
    #[serde(default = "default_backoff_step", with = "duration")]
    pub backoff_step: Duration,
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_manifest_max_age")]
    pub manifest_max_age: u32,
    #[serde(default = "default_manifest_stale")]
    pub manifest_stale_while_revalidate: u32,
    #[serde(default)]
    pub header_families: Vec<HeaderFamily>,
}

/// Upstream hosts that demand a specific Referer/Origin pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderFamily {
    pub name: String,
    /// Regular expression matched against the upstream hostname
    pub host_pattern: String,
    pub referer: String,
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Hard bound on the parallel adapter fan-out
    #[serde(default = "default_aggregation_deadline", with = "duration")]
    pub deadline: Duration,
    /// Per-candidate bound for embed resolution
    #[serde(default = "default_resolve_timeout", with = "duration")]
    pub resolve_timeout: Duration,
    #[serde(default = "default_embed_fetch_timeout", with = "duration")]
    pub embed_fetch_timeout: Duration,
    #[serde(default = "default_max_resolve_depth")]
    pub max_resolve_depth: u8,
    #[serde(default = "default_probe_timeout", with = "duration")]
    pub probe_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_metadata_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_collaborator_timeout", with = "duration")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleConfig {
    /// Subtitle search endpoint; subtitles are skipped when unset
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_collaborator_timeout", with = "duration")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Builds a manifest URL straight from a template
    Playlist,
    /// Looks up the IMDb id, then asks a JSON API for stream entries
    EmbedApi,
    /// Negotiates a session key, then decrypts the stream payload
    KeyExchange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    /// Lower runs first in the merged list
    #[serde(default)]
    pub priority: i32,
    pub base_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Path template with `{kind}`, `{id}`, `{imdb_id}`, `{season}` and `{episode}`
    #[serde(default)]
    pub template: Option<String>,
    /// Pre-shared secret for key exchange providers
    #[serde(default)]
    pub shared_secret: Option<String>,
    #[serde(default = "default_needs_proxy")]
    pub needs_proxy: bool,
    #[serde(default = "default_provider_language")]
    pub language: String,
    /// Extra headers the provider's media hosts require
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_signature_length() -> usize {
    DEFAULT_SIGNATURE_LENGTH
}

fn default_attempt_timeout() -> Duration {
    Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS)
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_step() -> Duration {
    Duration::from_secs(DEFAULT_BACKOFF_STEP_SECS)
}

fn default_retryable_statuses() -> Vec<u16> {
    DEFAULT_RETRYABLE_STATUSES.to_vec()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_manifest_max_age() -> u32 {
    DEFAULT_MANIFEST_MAX_AGE_SECS
}

fn default_manifest_stale() -> u32 {
    DEFAULT_MANIFEST_STALE_SECS
}

fn default_aggregation_deadline() -> Duration {
    Duration::from_secs(DEFAULT_AGGREGATION_DEADLINE_SECS)
}

fn default_resolve_timeout() -> Duration {
    Duration::from_secs(DEFAULT_RESOLVE_TIMEOUT_SECS)
}

fn default_embed_fetch_timeout() -> Duration {
    Duration::from_secs(DEFAULT_EMBED_FETCH_TIMEOUT_SECS)
}

fn default_max_resolve_depth() -> u8 {
    DEFAULT_MAX_RESOLVE_DEPTH
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS)
}

fn default_metadata_base_url() -> String {
    DEFAULT_METADATA_BASE_URL.to_string()
}

fn default_collaborator_timeout() -> Duration {
    Duration::from_secs(DEFAULT_COLLABORATOR_TIMEOUT_SECS)
}

fn default_enabled() -> bool {
    true
}

fn default_needs_proxy() -> bool {
    true
}

fn default_provider_language() -> String {
    DEFAULT_PROVIDER_LANGUAGE.to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            allowed_origins: Vec::new(),
            development_mode: false,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            signature_length: default_signature_length(),
            attempt_timeout: default_attempt_timeout(),
            max_attempts: default_max_attempts(),
            backoff_step: default_backoff_step(),
            retryable_statuses: default_retryable_statuses(),
            user_agent: default_user_agent(),
            manifest_max_age: default_manifest_max_age(),
            manifest_stale_while_revalidate: default_manifest_stale(),
            header_families: Vec::new(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            deadline: default_aggregation_deadline(),
            resolve_timeout: default_resolve_timeout(),
            embed_fetch_timeout: default_embed_fetch_timeout(),
            max_resolve_depth: default_max_resolve_depth(),
            probe_timeout: default_probe_timeout(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            base_url: default_metadata_base_url(),
            api_key: None,
            timeout: default_collaborator_timeout(),
        }
    }
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: default_collaborator_timeout(),
        }
    }
}

impl Config {
    /// Load configuration layered as defaults, then the TOML file, then environment.
    ///
    /// A missing file is created with the default configuration first.
    pub fn load_from_file(config_file: &str) -> Result<Self> {
        if !std::path::Path::new(config_file).exists() {
            let contents = toml::to_string_pretty(&Self::default())?;
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file);
        }

        let mut config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.ensure_signing_secret();
        config.validate()?;
        Ok(config)
    }

    /// Fill in a process-local secret when none was configured.
    ///
    /// Relay URLs issued under a generated secret stop verifying on restart.
    pub fn ensure_signing_secret(&mut self) {
        if self.relay.signing_secret.trim().is_empty() {
            warn!(
                "No relay signing secret configured; generating an ephemeral one. Set {}RELAY__SIGNING_SECRET to keep relay URLs valid across restarts",
                ENV_PREFIX
            );
            self.relay.signing_secret = format!(
                "{}{}",
                uuid::Uuid::new_v4().simple(),
                uuid::Uuid::new_v4().simple()
            );
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_RELAY_ATTEMPTS).contains(&self.relay.max_attempts) {
            anyhow::bail!("relay.max_attempts must be between 1 and {}", MAX_RELAY_ATTEMPTS);
        }
        if self.aggregation.max_resolve_depth > MAX_RESOLVE_DEPTH {
            anyhow::bail!("aggregation.max_resolve_depth must be at most {}", MAX_RESOLVE_DEPTH);
        }
        if self.web.allowed_origins.is_empty() && !self.web.development_mode {
            anyhow::bail!(
                "web.allowed_origins is empty; list the player origins or enable web.development_mode"
            );
        }
        if !(8..=64).contains(&self.relay.signature_length) {
            anyhow::bail!("relay.signature_length must be between 8 and 64");
        }
        if url::Url::parse(&self.web.base_url).is_err() {
            anyhow::bail!("web.base_url is not a valid URL: {}", self.web.base_url);
        }
        for family in &self.relay.header_families {
            if regex::Regex::new(&family.host_pattern).is_err() {
                anyhow::bail!(
                    "header family '{}' has an invalid host_pattern",
                    family.name
                );
            }
        }
        for provider in &self.providers {
            if provider.kind == ProviderKind::KeyExchange && provider.shared_secret.is_none() {
                anyhow::bail!(
                    "provider '{}' uses key exchange but has no shared_secret",
                    provider.name
                );
            }
        }
        Ok(())
    }
}
