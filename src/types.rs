// =============================================================================
// Shared types used across the quotewatch feed service
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw quote read from the sheet for a single symbol. Transient — never
/// persisted directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawQuote {
    pub open: f64,
    pub close: f64,
    pub variation: f64,
}

/// A synthesized OHLC candle. `high`/`low` are reconstructed from the quote's
/// variation since the sheet only exposes open/close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// A sampled raw value with its capture time, independent of candle
/// derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuePoint {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Push notification emitted when a value-history insert occurs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub symbol: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Result of a change-gated append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new row was written (and retention enforced).
    Inserted,
    /// The value matched the newest stored row; nothing was written.
    Skipped,
}

impl AppendOutcome {
    pub fn inserted(self) -> bool {
        self == Self::Inserted
    }
}

/// Which of the two per-symbol series a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    Candles,
    ValueHistory,
}

impl std::fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Candles => write!(f, "candles"),
            Self::ValueHistory => write!(f, "value_history"),
        }
    }
}
