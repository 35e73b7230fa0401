// =============================================================================
// Runtime Configuration — feed settings with atomic save
// =============================================================================
//
// Central configuration for the quotewatch service: the symbol → sheet-row
// mapping, retention caps, the sync trigger window, and I/O coordinates.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_spreadsheet_id() -> String {
    "1z_WrDvVdBD6Krz1KOpW0xcHhxP5GG4DlAWPtzJCxXxg".to_string()
}

fn default_sheet_name() -> String {
    "Indice Token".to_string()
}

/// The observed symbol → sheet-row mapping. Symbols are fixed at startup;
/// nothing creates or destroys them at runtime.
fn default_symbols() -> BTreeMap<String, u32> {
    [
        ("ivoire", 2),
        ("armoirie", 3),
        ("ssv", 4),
        ("ssc", 5),
        ("crn", 6),
        ("lyx", 7),
        ("qrn", 8),
    ]
    .into_iter()
    .map(|(sym, row)| (sym.to_string(), row))
    .collect()
}

fn default_current_price_cell() -> String {
    "H2".to_string()
}

fn default_candle_retention() -> usize {
    550
}

fn default_value_retention() -> usize {
    1000
}

fn default_window_start_sec() -> u32 {
    59
}

fn default_window_end_sec() -> u32 {
    4
}

fn default_poll_period_ms() -> u64 {
    1000
}

fn default_db_path() -> String {
    "db/history.db".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the quotewatch service.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly. The struct is immutable after startup —
/// there are no runtime control endpoints that mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Sheet coordinates --------------------------------------------------

    /// Google Sheets spreadsheet ID to poll.
    #[serde(default = "default_spreadsheet_id")]
    pub spreadsheet_id: String,

    /// Name of the tab holding the quote rows.
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,

    /// Symbol → sheet-row mapping. The quote for a symbol lives in columns
    /// C..F of its row.
    #[serde(default = "default_symbols")]
    pub symbols: BTreeMap<String, u32>,

    /// Fixed cell holding the single spot price, shared by all symbols.
    #[serde(default = "default_current_price_cell")]
    pub current_price_cell: String,

    // --- Retention ----------------------------------------------------------

    /// Maximum candles retained per symbol; oldest rows beyond this are
    /// deleted after every insert.
    #[serde(default = "default_candle_retention")]
    pub candle_retention: usize,

    /// Maximum value-history points retained per symbol.
    #[serde(default = "default_value_retention")]
    pub value_retention: usize,

    // --- Scheduling ---------------------------------------------------------

    /// First second-of-minute (inclusive) of the sync trigger window.
    #[serde(default = "default_window_start_sec")]
    pub window_start_sec: u32,

    /// Last second-of-minute (inclusive) of the sync trigger window. May be
    /// smaller than `window_start_sec`, in which case the window wraps the
    /// minute boundary (the default 59..=4 does).
    #[serde(default = "default_window_end_sec")]
    pub window_end_sec: u32,

    /// Scheduler tick period in milliseconds.
    #[serde(default = "default_poll_period_ms")]
    pub poll_period_ms: u64,

    // --- I/O ----------------------------------------------------------------

    /// Path of the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: default_spreadsheet_id(),
            sheet_name: default_sheet_name(),
            symbols: default_symbols(),
            current_price_cell: default_current_price_cell(),
            candle_retention: default_candle_retention(),
            value_retention: default_value_retention(),
            window_start_sec: default_window_start_sec(),
            window_end_sec: default_window_end_sec(),
            poll_period_ms: default_poll_period_ms(),
            db_path: default_db_path(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = config.symbols.len(),
            sheet = %config.sheet_name,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Look up the sheet row for a symbol.
    pub fn row_for(&self, symbol: &str) -> Option<u32> {
        self.symbols.get(symbol).copied()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbols.len(), 7);
        assert_eq!(cfg.row_for("ivoire"), Some(2));
        assert_eq!(cfg.row_for("qrn"), Some(8));
        assert_eq!(cfg.row_for("unknown"), None);
        assert_eq!(cfg.candle_retention, 550);
        assert_eq!(cfg.value_retention, 1000);
        assert_eq!(cfg.window_start_sec, 59);
        assert_eq!(cfg.window_end_sec, 4);
        assert_eq!(cfg.poll_period_ms, 1000);
        assert_eq!(cfg.sheet_name, "Indice Token");
        assert_eq!(cfg.current_price_cell, "H2");
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbols.len(), 7);
        assert_eq!(cfg.candle_retention, 550);
        assert_eq!(cfg.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": { "btc": 12 }, "value_retention": 25 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.row_for("btc"), Some(12));
        assert_eq!(cfg.row_for("ivoire"), None);
        assert_eq!(cfg.value_retention, 25);
        assert_eq!(cfg.candle_retention, 550);
        assert_eq!(cfg.window_start_sec, 59);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.candle_retention, cfg2.candle_retention);
        assert_eq!(cfg.window_end_sec, cfg2.window_end_sec);
    }
}
