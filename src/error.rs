// =============================================================================
// Feed error taxonomy
// =============================================================================
//
// Four failure classes cover the whole service:
//   InvalidSymbol     — unknown symbol key (caller error, 400)
//   MalformedQuote    — non-numeric / non-finite sheet cell (upstream, 502)
//   SourceUnavailable — transient provider/network failure (upstream, 502)
//   StoreUnavailable  — persistence failure (internal, 500)
//
// Scheduler-side errors are caught per symbol and logged; API-side errors
// surface as a JSON `{error}` envelope via IntoResponse.
// =============================================================================

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug)]
pub enum FeedError {
    /// The requested symbol has no row mapping in the configuration.
    InvalidSymbol(String),
    /// A sheet cell could not be parsed into a finite number.
    MalformedQuote(String),
    /// The sheet provider could not be reached or returned a bad response.
    SourceUnavailable(String),
    /// The local store rejected a read or write.
    StoreUnavailable(String),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSymbol(sym) => write!(f, "invalid_symbol: {sym}"),
            Self::MalformedQuote(msg) => write!(f, "malformed_quote: {msg}"),
            Self::SourceUnavailable(msg) => write!(f, "source_unavailable: {msg}"),
            Self::StoreUnavailable(msg) => write!(f, "store_unavailable: {msg}"),
        }
    }
}

impl std::error::Error for FeedError {}

impl IntoResponse for FeedError {
    fn into_response(self) -> Response {
        let (status, error_str) = match &self {
            Self::InvalidSymbol(sym) => {
                (StatusCode::BAD_REQUEST, format!("invalid symbol: {sym}"))
            }
            Self::MalformedQuote(msg) => {
                (StatusCode::BAD_GATEWAY, format!("malformed quote: {msg}"))
            }
            Self::SourceUnavailable(msg) => {
                (StatusCode::BAD_GATEWAY, format!("source unavailable: {msg}"))
            }
            Self::StoreUnavailable(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("store unavailable: {msg}"),
            ),
        };

        let body = json!({ "error": error_str });
        (status, axum::Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for FeedError {
    fn from(e: rusqlite::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(e: reqwest::Error) -> Self {
        Self::SourceUnavailable(e.to_string())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_symbol_maps_to_400() {
        let resp = FeedError::InvalidSymbol("nope".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_failure_maps_to_500() {
        let resp = FeedError::StoreUnavailable("disk full".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn upstream_failures_map_to_502() {
        let resp = FeedError::SourceUnavailable("timeout".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = FeedError::MalformedQuote("empty cell".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn display_includes_class_and_detail() {
        let e = FeedError::InvalidSymbol("xyz".into());
        assert_eq!(e.to_string(), "invalid_symbol: xyz");
    }
}
