//! Source lookup handlers
//!
//! `GET /api/v1/sources/{kind}/{id}` and
//! `GET /api/v1/sources/{kind}/{id}/{season}/{episode}`.
//!
//! Lookups never fail because providers fail: an unresolvable title is a
//! successful response with an empty `sources` list. Only a malformed path
//! is an error.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::{MediaKind, MediaPath};
use crate::web::{
    AppState,
    responses::{handle_error, ok},
};

pub async fn get_sources(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Response {
    match parse_media_path(&kind, &id, None, None) {
        Ok(path) => lookup(&state, path).await,
        Err(e) => handle_error(e),
    }
}

pub async fn get_episode_sources(
    State(state): State<AppState>,
    Path((kind, id, season, episode)): Path<(String, String, String, String)>,
) -> Response {
    match parse_media_path(&kind, &id, Some(&season), Some(&episode)) {
        Ok(path) => lookup(&state, path).await,
        Err(e) => handle_error(e),
    }
}

async fn lookup(state: &AppState, path: MediaPath) -> Response {
    debug!(media = %path, "Source lookup");
    let response = state.source_service.sources_for(&path).await;
    ok(response).into_response()
}

/// Parse raw path segments
///
/// Segments are taken as strings so a non-numeric id produces the API's
/// JSON error envelope instead of axum's plain-text path rejection.
pub fn parse_media_path(
    kind: &str,
    id: &str,
    season: Option<&str>,
    episode: Option<&str>,
) -> AppResult<MediaPath> {
    let kind: MediaKind = kind.parse()?;
    let id: u64 = id
        .parse()
        .map_err(|_| AppError::validation(format!("Invalid media id '{id}'")))?;
    let season = season.map(|s| parse_number("season", s)).transpose()?;
    let episode = episode.map(|e| parse_number("episode", e)).transpose()?;
    MediaPath::from_parts(kind, id, season, episode)
}

fn parse_number(field: &str, value: &str) -> AppResult<u32> {
    value
        .parse()
        .map_err(|_| AppError::validation(format!("Invalid {field} '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_parse_movie() {
        let path = parse_media_path("movie", "550", None, None).unwrap();
        assert_eq!(path, MediaPath::movie(550));
    }

    #[test]
    fn test_parse_episode() {
        let path = parse_media_path("tv", "1399", Some("2"), Some("5")).unwrap();
        assert_eq!(path, MediaPath::episode(1399, 2, 5));
    }

    #[rstest]
    #[case("anime", "1", None, None)]
    #[case("movie", "abc", None, None)]
    #[case("tv", "1", Some("x"), Some("1"))]
    #[case("movie", "550", Some("1"), Some("1"))]
    fn test_rejects_malformed(
        #[case] kind: &str,
        #[case] id: &str,
        #[case] season: Option<&str>,
        #[case] episode: Option<&str>,
    ) {
        assert!(parse_media_path(kind, id, season, episode).is_err());
    }
}
