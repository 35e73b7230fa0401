// =============================================================================
// Quotewatch — Main Entry Point
// =============================================================================
//
// Polls a spreadsheet-backed price feed near every minute boundary, persists
// change-gated snapshots into SQLite, and serves candle/value history plus a
// newData push channel to browser dashboards.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod error;
mod market;
mod publisher;
mod runtime_config;
mod scheduler;
mod sheets;
mod store;
mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::ApiContext;
use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;
use crate::scheduler::SystemClock;
use crate::sheets::SheetsClient;
use crate::store::SnapshotStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("quotewatch starting up");

    let config_path =
        std::env::var("QUOTEWATCH_CONFIG").unwrap_or_else(|_| "quotewatch.json".into());
    let mut config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override symbols from env if available ("name:row,name:row").
    if let Ok(raw) = std::env::var("QUOTEWATCH_SYMBOLS") {
        let parsed = parse_symbol_overrides(&raw);
        if parsed.is_empty() {
            warn!(raw = %raw, "QUOTEWATCH_SYMBOLS set but no valid entries — keeping config");
        } else {
            config.symbols = parsed;
        }
    }
    if let Ok(addr) = std::env::var("QUOTEWATCH_BIND_ADDR") {
        config.bind_addr = addr;
    }

    info!(
        symbols = ?config.symbols.keys().collect::<Vec<_>>(),
        sheet = %config.sheet_name,
        "configured tracked symbols"
    );

    let api_key = std::env::var("GOOGLE_SHEETS_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        warn!("GOOGLE_SHEETS_API_KEY is not set — sheet fetches will fail until it is provided");
    }

    // ── 2. Open the store & build shared state ───────────────────────────
    let store = SnapshotStore::open(
        &config.db_path,
        config.candle_retention,
        config.value_retention,
    )?;

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, store));
    let source = SheetsClient::new(&state.config, api_key);

    // ── 3. Spawn the sync scheduler ──────────────────────────────────────
    {
        let state = state.clone();
        let source = source.clone();
        tokio::spawn(async move {
            scheduler::run_sync_loop(state, source, SystemClock).await;
        });
    }

    // ── 4. Start the API server ──────────────────────────────────────────
    let app = api::router(ApiContext {
        state: state.clone(),
        source: Arc::new(source),
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "API server failed");
        }
    });

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping");

    info!(passes = state.pass_count(), "quotewatch shut down complete");
    Ok(())
}

/// Parse the `QUOTEWATCH_SYMBOLS` override ("name:row,name:row"). Malformed
/// entries are skipped with a warning.
fn parse_symbol_overrides(raw: &str) -> BTreeMap<String, u32> {
    let mut symbols = BTreeMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once(':').and_then(|(name, row)| {
            let name = name.trim().to_lowercase();
            let row: u32 = row.trim().parse().ok()?;
            (!name.is_empty()).then_some((name, row))
        }) {
            Some((name, row)) => {
                symbols.insert(name, row);
            }
            None => warn!(entry = %entry, "ignoring malformed symbol override"),
        }
    }
    symbols
}

// =============================================================================
// Tests
// =============================================================================
