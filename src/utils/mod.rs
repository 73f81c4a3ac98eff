//! Utility modules shared across the service

pub mod http_client;
pub mod url;
pub mod url_protector;

pub use http_client::HttpClientFactory;
pub use url::UrlUtils;
pub use url_protector::{ProtectedUrl, TOKEN_MARKER, UrlProtector};
