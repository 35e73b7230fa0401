// =============================================================================
// Candle derivation
// =============================================================================
//
// The sheet exposes only open, close, and a variation figure per symbol, so
// high/low are synthesized: half the absolute variation is added above the
// body and subtracted below it. Pure and deterministic — identical inputs
// always produce identical candles.
// =============================================================================

use chrono::{DateTime, Utc};

use crate::types::{Candle, RawQuote};

/// Derive an OHLC candle from a raw quote at capture time `now`.
///
/// Invariants: `high >= max(open, close)` and `low <= min(open, close)`.
/// The caller guarantees finite quote fields (enforced at parse time by the
/// snapshot source).
pub fn derive(quote: &RawQuote, now: DateTime<Utc>) -> Candle {
    let body_top = quote.open.max(quote.close);
    let body_bottom = quote.open.min(quote.close);
    let wick = quote.variation.abs() / 2.0;

    Candle {
        time: now,
        open: quote.open,
        high: body_top + wick,
        low: body_bottom - wick,
        close: quote.close,
    }
}

// =============================================================================
// Tests
// =============================================================================
