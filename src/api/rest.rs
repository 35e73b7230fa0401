// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Read-only query façade over the snapshot store plus two pass-through
// routes that hit the sheet directly (/current-price, /live-candle). The
// dashboard is an external collaborator; CORS is configured permissively for
// it.
//
// Unknown symbols are rejected with 400 before any store or source access.
// Store failures surface as a JSON `{error}` envelope with status 500.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::app_state::AppState;
use crate::error::FeedError;
use crate::market::derive;
use crate::sheets::SnapshotSource;
use crate::types::Candle;

/// Symbol queried when the client omits the parameter, matching the feed's
/// historical default.
const DEFAULT_SYMBOL: &str = "ivoire";

// =============================================================================
// Shared handler context
// =============================================================================

/// State handed to every handler: the shared app state plus the snapshot
/// source (generic so tests can drive the pass-through routes with a stub).
pub struct ApiContext<S> {
    pub state: Arc<AppState>,
    pub source: Arc<S>,
}

impl<S> Clone for ApiContext<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            source: self.source.clone(),
        }
    }
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full API router with CORS middleware and shared state.
pub fn router<S>(ctx: ApiContext<S>) -> Router
where
    S: SnapshotSource + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/candles", get(candles::<S>))
        .route("/latest-value", get(latest_value::<S>))
        .route("/current-price", get(current_price::<S>))
        .route("/live-candle", get(live_candle::<S>))
        .route("/health", get(health::<S>))
        .route("/ws", get(crate::api::ws::ws_handler::<S>))
        .layer(cors)
        .with_state(ctx)
}

// =============================================================================
// Query parameters
// =============================================================================

#[derive(Deserialize)]
struct SymbolQuery {
    symbol: Option<String>,
}

impl SymbolQuery {
    /// Resolve the requested symbol (lowercased, defaulted) and reject
    /// anything without a row mapping.
    fn resolve(&self, state: &AppState) -> Result<String, FeedError> {
        let symbol = self
            .symbol
            .as_deref()
            .unwrap_or(DEFAULT_SYMBOL)
            .to_lowercase();

        if state.config.row_for(&symbol).is_none() {
            return Err(FeedError::InvalidSymbol(symbol));
        }
        Ok(symbol)
    }
}

// =============================================================================
// Candle history
// =============================================================================

/// Candle as the chart library consumes it: unix-seconds time plus OHLC.
#[derive(Debug, Clone, Serialize)]
struct CandleResponse {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

impl From<Candle> for CandleResponse {
    fn from(c: Candle) -> Self {
        Self {
            time: c.time.timestamp(),
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
        }
    }
}

async fn candles<S>(
    State(ctx): State<ApiContext<S>>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<Vec<CandleResponse>>, FeedError>
where
    S: SnapshotSource,
{
    let symbol = query.resolve(&ctx.state)?;

    let candles = ctx.state.store.candles(&symbol)?;
    debug!(symbol = %symbol, count = candles.len(), "candle history served");

    Ok(Json(candles.into_iter().map(Into::into).collect()))
}

// =============================================================================
// Value history
// =============================================================================

/// Parallel-array shape the dashboard's line chart consumes, ascending by
/// timestamp.
#[derive(Debug, Clone, Serialize)]
struct ValueHistoryResponse {
    history: Vec<f64>,
    timestamps: Vec<String>,
}

async fn latest_value<S>(
    State(ctx): State<ApiContext<S>>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<ValueHistoryResponse>, FeedError>
where
    S: SnapshotSource,
{
    let symbol = query.resolve(&ctx.state)?;

    let points = ctx.state.store.value_history(&symbol)?;
    let mut history = Vec::with_capacity(points.len());
    let mut timestamps = Vec::with_capacity(points.len());
    for point in points {
        history.push(point.value);
        timestamps.push(point.timestamp.to_rfc3339());
    }

    Ok(Json(ValueHistoryResponse {
        history,
        timestamps,
    }))
}

// =============================================================================
// Pass-through routes (read the sheet, nothing persisted)
// =============================================================================

#[derive(Debug, Clone, Serialize)]
struct CurrentPriceResponse {
    price: f64,
}

async fn current_price<S>(
    State(ctx): State<ApiContext<S>>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<CurrentPriceResponse>, FeedError>
where
    S: SnapshotSource,
{
    // The spot price lives in one fixed cell, but the symbol is still
    // validated so unknown keys get a 400 like every other route.
    query.resolve(&ctx.state)?;

    let price = ctx.source.current_price().await?;
    Ok(Json(CurrentPriceResponse { price }))
}

#[derive(Debug, Clone, Serialize)]
struct LiveCandleResponse {
    candles: Vec<CandleResponse>,
}

/// Fetch the symbol's quote and derive a candle on demand, without touching
/// the store.
async fn live_candle<S>(
    State(ctx): State<ApiContext<S>>,
    Query(query): Query<SymbolQuery>,
) -> Result<Json<LiveCandleResponse>, FeedError>
where
    S: SnapshotSource,
{
    let symbol = query.resolve(&ctx.state)?;

    let quote = ctx.source.fetch(&symbol).await?;
    let candle = derive(&quote, chrono::Utc::now());

    Ok(Json(LiveCandleResponse {
        candles: vec![candle.into()],
    }))
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    passes_completed: u64,
    server_time: i64,
}

async fn health<S>(State(ctx): State<ApiContext<S>>) -> Json<HealthResponse>
where
    S: SnapshotSource,
{
    Json(HealthResponse {
        status: "ok",
        uptime_secs: ctx.state.start_time.elapsed().as_secs(),
        passes_completed: ctx.state.pass_count(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::RuntimeConfig;
    use crate::store::SnapshotStore;
    use crate::types::RawQuote;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::TimeZone;
    use tower::util::ServiceExt;

    /// Stub source: every symbol quotes {open 10, close 12, variation 1}.
    struct StubSource;

    impl SnapshotSource for StubSource {
        async fn fetch(&self, _symbol: &str) -> Result<RawQuote, FeedError> {
            Ok(RawQuote {
                open: 10.0,
                close: 12.0,
                variation: 1.0,
            })
        }

        async fn current_price(&self) -> Result<f64, FeedError> {
            Ok(3.5)
        }
    }

    fn test_router() -> (Arc<AppState>, Router) {
        let store = SnapshotStore::open_in_memory(10, 10).unwrap();
        let state = Arc::new(AppState::new(RuntimeConfig::default(), store));
        let router = router(ApiContext {
            state: state.clone(),
            source: Arc::new(StubSource),
        });
        (state, router)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap();
        (status, body)
    }

    #[tokio::test]
    async fn unknown_symbol_is_rejected_with_400() {
        let (_state, router) = test_router();
        let (status, body) = get_json(router, "/candles?symbol=unknown").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("unknown"));
    }

    #[tokio::test]
    async fn candles_empty_series_is_an_empty_array() {
        let (_state, router) = test_router();
        let (status, body) = get_json(router, "/candles?symbol=ivoire").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn candles_serve_stored_rows_oldest_first() {
        let (state, router) = test_router();
        let t0 = chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        for (i, close) in [10.0, 11.0, 12.0].iter().enumerate() {
            let candle = Candle {
                time: t0 + chrono::Duration::seconds(i as i64 * 60),
                open: close - 1.0,
                high: close + 0.5,
                low: close - 1.5,
                close: *close,
            };
            state.store.append_candle_if_changed("ivoire", &candle).unwrap();
        }

        let (status, body) = get_json(router, "/candles?symbol=ivoire").await;
        assert_eq!(status, StatusCode::OK);

        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["time"].as_i64().unwrap(), 1_700_000_000);
        assert!((rows[2]["close"].as_f64().unwrap() - 12.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn latest_value_returns_parallel_arrays() {
        let (state, router) = test_router();
        let t0 = chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        state.store.append_value_if_changed("ssv", 1.0, t0).unwrap();
        state
            .store
            .append_value_if_changed("ssv", 2.0, t0 + chrono::Duration::seconds(60))
            .unwrap();

        let (status, body) = get_json(router, "/latest-value?symbol=ssv").await;
        assert_eq!(status, StatusCode::OK);

        let history = body["history"].as_array().unwrap();
        let timestamps = body["timestamps"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(timestamps.len(), 2);
        assert!((history[0].as_f64().unwrap() - 1.0).abs() < f64::EPSILON);
        assert!((history[1].as_f64().unwrap() - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn missing_symbol_defaults_to_ivoire() {
        let (_state, router) = test_router();
        let (status, _body) = get_json(router, "/candles").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn current_price_reads_the_source() {
        let (_state, router) = test_router();
        let (status, body) = get_json(router, "/current-price?symbol=ivoire").await;

        assert_eq!(status, StatusCode::OK);
        assert!((body["price"].as_f64().unwrap() - 3.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn live_candle_derives_without_persisting() {
        let (state, router) = test_router();
        let (status, body) = get_json(router, "/live-candle?symbol=ivoire").await;

        assert_eq!(status, StatusCode::OK);
        let candle = &body["candles"][0];
        assert!((candle["high"].as_f64().unwrap() - 12.5).abs() < f64::EPSILON);
        assert!((candle["low"].as_f64().unwrap() - 9.5).abs() < f64::EPSILON);

        // Nothing was written to the store.
        assert!(state.store.candles("ivoire").unwrap().is_empty());
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (_state, router) = test_router();
        let (status, body) = get_json(router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["passes_completed"].as_u64().unwrap(), 0);
    }
}
