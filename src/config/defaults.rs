/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Web server defaults
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

// Relay defaults
pub const DEFAULT_SIGNATURE_LENGTH: usize = 16;
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const MAX_RELAY_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_STEP_SECS: u64 = 1;
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 4] = [502, 503, 504, 522];
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
pub const DEFAULT_MANIFEST_MAX_AGE_SECS: u32 = 5;
pub const DEFAULT_MANIFEST_STALE_SECS: u32 = 30;

// Aggregation defaults
pub const DEFAULT_AGGREGATION_DEADLINE_SECS: u64 = 25;
pub const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 12;
pub const DEFAULT_EMBED_FETCH_TIMEOUT_SECS: u64 = 8;
pub const DEFAULT_MAX_RESOLVE_DEPTH: u8 = 5;
pub const MAX_RESOLVE_DEPTH: u8 = 5;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 3;

// Collaborator defaults
pub const DEFAULT_METADATA_BASE_URL: &str = "https://api.themoviedb.org/3";
pub const DEFAULT_COLLABORATOR_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PROVIDER_LANGUAGE: &str = "en";
