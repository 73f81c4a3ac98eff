//! Provider adapters and external collaborators
//!
//! Each provider family implements [`ProviderAdapter`]; [`ProviderFactory`]
//! turns the `[[providers]]` configuration into a registry of trait objects.

pub mod embed_api;
pub mod factory;
pub mod key_exchange;
pub mod metadata;
pub mod playlist;
pub mod subtitles;
pub mod traits;

pub use factory::ProviderFactory;
pub use traits::{MetadataLookup, NoSubtitles, ProviderAdapter, SubtitleLookup, render_template};
