//! Encrypted key-exchange provider
//!
//! Protocol:
//!
//! 1. `GET {base}/session` returns `{ "key": <blob> }`, the session key
//!    encrypted under the pre-shared secret.
//! 2. `GET {base}{template}` returns `{ "streams": [{ "payload": <blob>, ... }] }`
//!    where each payload is a stream URL encrypted under the session key.
//!
//! A blob is standard base64 of `nonce (12 bytes) || AES-256-GCM ciphertext`.
//! The pre-shared secret is stretched to a key with SHA-256.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::traits::{ProviderAdapter, render_template};
use crate::config::ProviderConfig;
use crate::errors::{AppError, AppResult, SourceError, SourceResult};
use crate::models::{CandidateSource, MediaPath, SourceKind};
use crate::utils::UrlUtils;

/// AES-256-GCM nonce size (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

pub const DEFAULT_KEY_EXCHANGE_TEMPLATE: &str = "/streams/{kind}/{id}/{season}/{episode}";

#[derive(Debug, Deserialize)]
struct SessionResponse {
    key: String,
    #[serde(default)]
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    streams: Vec<EncryptedStream>,
}

#[derive(Debug, Deserialize)]
struct EncryptedStream {
    payload: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default, alias = "lang")]
    language: Option<String>,
}

/// Decrypt a `nonce || ciphertext` blob
pub fn decrypt_blob(cipher: &Aes256Gcm, blob: &str) -> Result<Vec<u8>, String> {
    let combined = STANDARD
        .decode(blob.trim())
        .map_err(|e| format!("invalid base64: {e}"))?;
    if combined.len() <= NONCE_SIZE {
        return Err("payload too short".to_string());
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| "authentication failed (wrong key or corrupted data)".to_string())
}

fn cipher_from_key(key_bytes: &[u8]) -> Option<Aes256Gcm> {
    (key_bytes.len() == 32).then(|| Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key_bytes)))
}

pub struct KeyExchangeAdapter {
    name: String,
    priority: i32,
    base_url: String,
    origin: String,
    template: String,
    language: String,
    needs_proxy: bool,
    headers: HashMap<String, String>,
    client: Client,
    shared_cipher: Aes256Gcm,
}

impl KeyExchangeAdapter {
    pub fn from_config(config: &ProviderConfig, client: Client) -> AppResult<Self> {
        let origin = UrlUtils::origin(&config.base_url).ok_or_else(|| {
            AppError::configuration(format!("provider '{}' base_url is not http(s)", config.name))
        })?;
        let secret = config.shared_secret.as_deref().ok_or_else(|| {
            AppError::configuration(format!("provider '{}' has no shared_secret", config.name))
        })?;
        let derived = Sha256::digest(secret.as_bytes());
        let shared_cipher = Aes256Gcm::new(&derived);

        Ok(Self {
            name: config.name.clone(),
            priority: config.priority,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            origin,
            template: config
                .template
                .clone()
                .unwrap_or_else(|| DEFAULT_KEY_EXCHANGE_TEMPLATE.to_string()),
            language: config.language.clone(),
            needs_proxy: config.needs_proxy,
            headers: config.headers.clone(),
            client,
            shared_cipher,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        session: Option<&str>,
    ) -> SourceResult<T> {
        let mut request = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, format!("{}/", self.origin))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(session) = session {
            request = request.header("X-Session", session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::from_reqwest(&self.name, e))?;
        if !response.status().is_success() {
            return Err(SourceError::Http {
                status: response.status().as_u16(),
                provider: self.name.clone(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| SourceError::parse(&self.name, e.without_url().to_string()))
    }

    async fn session_cipher(&self) -> SourceResult<(Aes256Gcm, Option<String>)> {
        let session: SessionResponse = self
            .get_json(&format!("{}/session", self.base_url), None)
            .await?;
        let key = decrypt_blob(&self.shared_cipher, &session.key)
            .map_err(|e| SourceError::decryption(&self.name, format!("session key: {e}")))?;
        let cipher = cipher_from_key(&key).ok_or_else(|| {
            SourceError::decryption(&self.name, format!("session key has {} bytes", key.len()))
        })?;
        Ok((cipher, session.session))
    }
}

#[async_trait]
impl ProviderAdapter for KeyExchangeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn origin(&self) -> &str {
        &self.origin
    }

    async fn fetch_candidates(&self, path: &MediaPath) -> SourceResult<Vec<CandidateSource>> {
        let (cipher, session) = self.session_cipher().await?;

        let streams_url = format!(
            "{}/{}",
            self.base_url,
            render_template(&self.template, path, None).trim_start_matches('/')
        );
        let streams: StreamsResponse = self.get_json(&streams_url, session.as_deref()).await?;
        let total = streams.streams.len();

        let candidates: Vec<CandidateSource> = streams
            .streams
            .into_iter()
            .enumerate()
            .filter_map(|(index, stream)| {
                let url = match decrypt_blob(&cipher, &stream.payload)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()))
                {
                    Ok(url) if UrlUtils::is_http_url(&url) => url,
                    Ok(_) => {
                        warn!(provider = %self.name, index, "Decrypted payload is not an http(s) URL");
                        return None;
                    }
                    Err(e) => {
                        warn!(provider = %self.name, index, "Dropping stream: {}", e);
                        return None;
                    }
                };
                Some(
                    CandidateSource::new(&self.name, &self.origin, SourceKind::from_url(&url), url)
                        .with_label(
                            stream
                                .label
                                .unwrap_or_else(|| format!("{} {}", self.name, index + 1)),
                        )
                        .with_quality(stream.quality.unwrap_or_else(|| "auto".to_string()))
                        .with_language(stream.language.unwrap_or_else(|| self.language.clone()))
                        .with_headers(self.headers.clone())
                        .with_needs_proxy(self.needs_proxy),
                )
            })
            .collect();

        debug!(
            provider = %self.name,
            decrypted = candidates.len(),
            total,
            "Decrypted provider streams"
        );
        Ok(candidates)
    }
}
