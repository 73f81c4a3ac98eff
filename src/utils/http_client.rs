//! HTTP Client Factory
//!
//! Centralizes reqwest client construction so every component gets the same
//! user agent and connect timeout, and the relay gets redirect handling turned off.

use reqwest::{Client, redirect};
use std::time::Duration;

use crate::errors::{AppError, AppResult};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_FOLLOWED_REDIRECTS: usize = 5;

#[derive(Clone, Debug)]
pub struct HttpClientFactory {
    user_agent: String,
    connect_timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Client for the relay: redirects are surfaced, never followed
    ///
    /// No total timeout is set; per-attempt bounds are applied by the caller
    /// and only cover the wait for response headers, not the streamed body.
    pub fn relay_client(&self) -> AppResult<Client> {
        Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(self.connect_timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create relay HTTP client: {e}")))
    }

    /// Client for provider APIs, embed pages and probes
    pub fn fetch_client(&self, timeout: Duration) -> AppResult<Client> {
        Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(self.connect_timeout.min(timeout))
            .timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_FOLLOWED_REDIRECTS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))
    }
}
