//! HTTP request handlers
//!
//! Handlers stay thin: extract, delegate to a service on [`AppState`], shape
//! the response.
//!
//! [`AppState`]: super::AppState

pub mod health;
pub mod relay;
pub mod sources;
