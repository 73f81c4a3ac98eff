//! Streaming proxy relay
//!
//! - [`headers`]: browser-like upstream headers and host families
//! - [`retry`]: the bounded retry state machine
//! - [`manifest`]: manifest detection and reference rewriting
//! - [`relay`]: admission, fetching and response shaping

pub mod headers;
pub mod manifest;
pub mod relay;
pub mod retry;

pub use relay::{RelayQuery, RelayService};

/// Path the relay is mounted on
pub const RELAY_PATH: &str = "/api/v1/relay";

/// Absolute relay endpoint for a public base URL
pub fn relay_endpoint(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), RELAY_PATH)
}
