//! Centralized error handling for the stream relay
//!
//! # Error Categories
//!
//! - **Source Errors**: provider adapter failures, always absorbed by the adapter
//! - **Relay Errors**: admission, upstream and retry failures surfaced to clients
//! - **Application Errors**: configuration, validation and internal failures
//!
//! # Usage
//!
//! ```rust
//! use stream_relay::errors::{AppError, AppResult};
//!
//! fn example_function() -> AppResult<String> {
//!     Err(AppError::validation("bad input"))
//! }
//! assert!(example_function().is_err());
//! ```

pub mod types;

pub use types::*;

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Convenience type alias for adapter-internal Results
pub type SourceResult<T> = Result<T, SourceError>;

/// Convenience type alias for relay Results
pub type RelayResult<T> = Result<T, RelayError>;
