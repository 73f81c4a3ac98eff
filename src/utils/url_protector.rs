//! Reversible URL obfuscation and HMAC signing for relay URLs.
//!
//! A relay URL carries three query parameters:
//!
//! - `d`: the obfuscated upstream URL (`sr_` + base64url of the reversed URL)
//! - `s`: a truncated hex HMAC-SHA256 of `d`
//! - `headers` (optional): base64url JSON object of upstream request headers
//!
//! Obfuscation is not confidentiality; the signature is what stops the relay
//! being used as an open proxy.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Prefix identifying tokens issued by this service
pub const TOKEN_MARKER: &str = "sr_";

/// Pattern a string must match to be treated as one of our tokens
pub const TOKEN_PATTERN: &str = r"sr_[A-Za-z0-9_-]+";

/// Signed relay reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedUrl {
    pub payload: String,
    pub signature: String,
    pub headers: Option<String>,
}

impl ProtectedUrl {
    /// Render against the relay endpoint, e.g. `https://host/api/v1/relay`
    pub fn to_relay_url(&self, relay_endpoint: &str) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair("d", &self.payload);
        query.append_pair("s", &self.signature);
        if let Some(headers) = &self.headers {
            query.append_pair("headers", headers);
        }
        format!("{}?{}", relay_endpoint, query.finish())
    }
}

#[derive(Clone)]
pub struct UrlProtector {
    mac: HmacSha256,
    signature_length: usize,
}

impl std::fmt::Debug for UrlProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlProtector")
            .field("signature_length", &self.signature_length)
            .finish_non_exhaustive()
    }
}

impl UrlProtector {
    pub fn new(secret: impl AsRef<[u8]>, signature_length: usize) -> AppResult<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(AppError::configuration("relay signing secret is empty"));
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| AppError::configuration(format!("invalid signing secret: {e}")))?;
        Ok(Self {
            mac,
            signature_length: signature_length.clamp(8, 64),
        })
    }

    /// Reverse, base64url-encode and prefix with the token marker
    pub fn obfuscate(url: &str) -> String {
        let reversed: String = url.chars().rev().collect();
        format!("{}{}", TOKEN_MARKER, URL_SAFE_NO_PAD.encode(reversed.as_bytes()))
    }

    /// Inverse of [`obfuscate`](Self::obfuscate); `None` for anything malformed
    pub fn deobfuscate(token: &str) -> Option<String> {
        let encoded = token.strip_prefix(TOKEN_MARKER)?;
        if encoded.is_empty() {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()?;
        let reversed = String::from_utf8(bytes).ok()?;
        Some(reversed.chars().rev().collect())
    }

    pub fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let mut signature = hex::encode(mac.finalize().into_bytes());
        signature.truncate(self.signature_length);
        signature
    }

    pub fn verify(&self, payload: &str, signature: &str) -> bool {
        let expected = self.sign(payload);
        expected.len() == signature.len()
            && bool::from(expected.as_bytes().ct_eq(signature.as_bytes()))
    }

    pub fn protect(&self, url: &str, headers: Option<&HashMap<String, String>>) -> ProtectedUrl {
        let payload = Self::obfuscate(url);
        let signature = self.sign(&payload);
        ProtectedUrl {
            payload,
            signature,
            headers: headers
                .filter(|h| !h.is_empty())
                .map(Self::encode_header_bundle),
        }
    }

    /// Encode headers as base64url JSON; keys are sorted so output is stable
    pub fn encode_header_bundle(headers: &HashMap<String, String>) -> String {
        let ordered: BTreeMap<&String, &String> = headers.iter().collect();
        let json = serde_json::to_string(&ordered).unwrap_or_else(|_| "{}".to_string());
        URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    pub fn decode_header_bundle(bundle: &str) -> Option<HashMap<String, String>> {
        let bytes = URL_SAFE_NO_PAD.decode(bundle.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn protector() -> UrlProtector {
        UrlProtector::new("test-secret", 16).unwrap()
    }

    #[rstest]
    #[case("https://cdn.example.com/a/b/index.m3u8")]
    #[case("https://h/seg?x=1&y=ä")]
    fn test_obfuscate_round_trip(#[case] url: &str) {
        let token = UrlProtector::obfuscate(url);
        assert!(token.starts_with(TOKEN_MARKER));
        assert_eq!(UrlProtector::deobfuscate(&token).as_deref(), Some(url));
    }

    #[rstest]
    #[case("plain-text")]
    #[case("sr_")]
    #[case("sr_!!!not-base64!!!")]
    #[case("sr_/w")]
    fn test_deobfuscate_rejects_malformed(#[case] token: &str) {
        assert_eq!(UrlProtector::deobfuscate(token), None);
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let protector = protector();
        let payload = UrlProtector::obfuscate("https://cdn.example.com/index.m3u8");
        let signature = protector.sign(&payload);
        assert_eq!(signature.len(), 16);
        assert!(protector.verify(&payload, &signature));
    }

    #[test]
    fn test_any_flipped_bit_fails_verification() {
        let protector = protector();
        let payload = UrlProtector::obfuscate("https://cdn.example.com/index.m3u8");
        let signature = protector.sign(&payload);

        for index in 0..signature.len() {
            for bit in 0..8u8 {
                let mut bytes = signature.clone().into_bytes();
                bytes[index] ^= 1 << bit;
                let tampered = String::from_utf8_lossy(&bytes).into_owned();
                assert!(
                    !protector.verify(&payload, &tampered),
                    "flip at {index}:{bit} verified"
                );
            }
        }
    }

    #[test]
    fn test_verify_rejects_other_secret_and_truncation() {
        let payload = UrlProtector::obfuscate("https://cdn.example.com/x.ts");
        let signature = protector().sign(&payload);
        let other = UrlProtector::new("other-secret", 16).unwrap();
        assert!(!other.verify(&payload, &signature));
        assert!(!protector().verify(&payload, &signature[..8]));
        assert!(!protector().verify(&payload, ""));
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        assert!(UrlProtector::new("", 16).is_err());
    }

    #[test]
    fn test_header_bundle_round_trip() {
        let mut headers = HashMap::new();
        headers.insert("Referer".to_string(), "https://player.example/".to_string());
        headers.insert("Origin".to_string(), "https://player.example".to_string());
        let bundle = UrlProtector::encode_header_bundle(&headers);
        assert_eq!(UrlProtector::decode_header_bundle(&bundle), Some(headers));
        assert_eq!(UrlProtector::decode_header_bundle("%%%"), None);
        assert_eq!(
            UrlProtector::decode_header_bundle(&URL_SAFE_NO_PAD.encode("[1,2]")),
            None
        );
    }

    #[test]
    fn test_protect_renders_relay_url() {
        let protector = protector();
        let protected = protector.protect("https://cdn.example.com/index.m3u8", None);
        let rendered = protected.to_relay_url("http://localhost:8080/api/v1/relay");
        assert!(rendered.starts_with("http://localhost:8080/api/v1/relay?d=sr_"));
        assert!(rendered.contains(&format!("&s={}", protected.signature)));
        assert!(!rendered.contains("headers="));
        assert!(!rendered.contains("cdn.example.com"));
    }
}
