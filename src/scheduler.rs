// =============================================================================
// Sync scheduler — window-gated spreadsheet reconciliation
// =============================================================================
//
// A 1-second tick inspects the wall-clock second-of-minute. While that second
// falls inside the trigger window (default 59..=4, wrapping the minute
// boundary) the scheduler is WindowActive and runs one full sync pass per
// tick; outside the window it is Idle and does nothing.
//
// The window deliberately tolerates provider/clock jitter around the minute
// boundary, so the pass can fire several times per window. The change-gated
// store absorbs the redundancy — do not collapse the window to a single
// firing.
//
// Every per-symbol failure is caught here: logged, recorded on the error
// ring, and the pass moves on to the next symbol. The loop itself never
// terminates because of a symbol error.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::error::FeedError;
use crate::market::derive;
use crate::sheets::SnapshotSource;
use crate::types::{AppendOutcome, ChangeEvent};

// =============================================================================
// Clock abstraction
// =============================================================================

/// Wall-clock seam so tests can inject synthetic timestamps instead of
/// sleeping through real minute boundaries.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// =============================================================================
// Trigger window
// =============================================================================

/// Inclusive seconds-of-minute window that gates the sync pass. When
/// `start_sec > end_sec` the window wraps the minute boundary
/// (59..=4 covers seconds 59, 0, 1, 2, 3, 4).
#[derive(Debug, Clone, Copy)]
pub struct TriggerWindow {
    pub start_sec: u32,
    pub end_sec: u32,
}

impl TriggerWindow {
    pub fn contains(&self, sec: u32) -> bool {
        if self.start_sec <= self.end_sec {
            (self.start_sec..=self.end_sec).contains(&sec)
        } else {
            sec >= self.start_sec || sec <= self.end_sec
        }
    }
}

/// Scheduler state across ticks. Purely observational — transitions are
/// logged so operators can see window activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Idle,
    WindowActive,
}

// =============================================================================
// Pass results
// =============================================================================

/// Summary of one full sync pass over all symbols.
#[derive(Debug, Default)]
pub struct PassSummary {
    pub symbols_processed: usize,
    pub candles_inserted: usize,
    pub values_inserted: usize,
    pub failures: usize,
}

/// What happened for one symbol during a pass.
#[derive(Debug, Clone, Copy)]
struct SymbolOutcome {
    candle_inserted: bool,
    value_inserted: bool,
}

// =============================================================================
// Loop
// =============================================================================

/// Drive the scheduler forever. Spawned once from main.
pub async fn run_sync_loop<S, C>(state: Arc<AppState>, source: S, clock: C)
where
    S: SnapshotSource,
    C: Clock,
{
    let window = TriggerWindow {
        start_sec: state.config.window_start_sec,
        end_sec: state.config.window_end_sec,
    };
    let period = std::time::Duration::from_millis(state.config.poll_period_ms);

    info!(
        window_start = window.start_sec,
        window_end = window.end_sec,
        period_ms = state.config.poll_period_ms,
        symbols = state.config.symbols.len(),
        "sync scheduler starting"
    );

    let mut interval = tokio::time::interval(period);
    let mut sched_state = SchedulerState::Idle;

    loop {
        interval.tick().await;

        let sec = clock.now().second();
        if window.contains(sec) {
            if sched_state == SchedulerState::Idle {
                sched_state = SchedulerState::WindowActive;
                debug!(sec, "sync window opened");
            }

            let summary = sync_pass(&state, &source, &clock).await;
            state.record_pass();

            debug!(
                symbols = summary.symbols_processed,
                candles = summary.candles_inserted,
                values = summary.values_inserted,
                failures = summary.failures,
                "sync pass completed"
            );
        } else if sched_state == SchedulerState::WindowActive {
            sched_state = SchedulerState::Idle;
            debug!(sec, "sync window closed");
        }
    }
}

// =============================================================================
// Pass
// =============================================================================

/// Run one sync pass over every configured symbol. A symbol's failure is
/// logged and recorded; the pass continues with the remaining symbols.
pub async fn sync_pass<S, C>(state: &AppState, source: &S, clock: &C) -> PassSummary
where
    S: SnapshotSource,
    C: Clock,
{
    let mut summary = PassSummary::default();

    for symbol in state.config.symbols.keys() {
        summary.symbols_processed += 1;

        match sync_symbol(state, source, clock, symbol).await {
            Ok(outcome) => {
                if outcome.candle_inserted {
                    summary.candles_inserted += 1;
                }
                if outcome.value_inserted {
                    summary.values_inserted += 1;
                }
            }
            Err(e) => {
                summary.failures += 1;
                warn!(symbol = %symbol, error = %e, "sync failed for symbol — continuing");
                state.push_error(symbol, e.to_string());
            }
        }
    }

    summary
}

/// Fetch, derive, and write one symbol. Publishes a [`ChangeEvent`] if and
/// only if the value-history insert occurred.
async fn sync_symbol<S, C>(
    state: &AppState,
    source: &S,
    clock: &C,
    symbol: &str,
) -> Result<SymbolOutcome, FeedError>
where
    S: SnapshotSource,
    C: Clock,
{
    let quote = source.fetch(symbol).await?;
    let now = clock.now();

    let candle = derive(&quote, now);
    let candle_outcome = state.store.append_candle_if_changed(symbol, &candle)?;

    // The value gate compares the raw close independently of the candle gate.
    let value_outcome = state
        .store
        .append_value_if_changed(symbol, quote.close, now)?;

    if value_outcome == AppendOutcome::Inserted {
        let receivers = state.publisher.publish(ChangeEvent {
            symbol: symbol.to_string(),
            value: quote.close,
            timestamp: now,
        });
        info!(
            symbol = %symbol,
            value = quote.close,
            receivers,
            "value updated — change event published"
        );
    }

    Ok(SymbolOutcome {
        candle_inserted: candle_outcome.inserted(),
        value_inserted: value_outcome.inserted(),
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
    use chrono::TimeZone;
    use std::collections::{BTreeMap, HashMap, HashSet};

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    /// Stub source: fixed quotes per symbol, with an optional failure set.
    struct StubSource {
        quotes: HashMap<String, RawQuote>,
        failing: HashSet<String>,
    }

    impl StubSource {
        fn new(quotes: &[(&str, f64)]) -> Self {
            Self {
                quotes: quotes
                    .iter()
                    .map(|(sym, close)| {
                        (
                            sym.to_string(),
                            RawQuote {
                                open: close - 1.0,
                                close: *close,
                                variation: 1.0,
                            },
                        )
                    })
                    .collect(),
                failing: HashSet::new(),
            }
        }

        fn failing(mut self, symbol: &str) -> Self {
            self.failing.insert(symbol.to_string());
            self
        }
    }

    impl SnapshotSource for StubSource {
        async fn fetch(&self, symbol: &str) -> Result<RawQuote, FeedError> {
            if self.failing.contains(symbol) {
                return Err(FeedError::SourceUnavailable("stub outage".into()));
            }
            self.quotes
                .get(symbol)
                .copied()
                .ok_or_else(|| FeedError::InvalidSymbol(symbol.to_string()))
        }

        async fn current_price(&self) -> Result<f64, FeedError> {
            Ok(1.0)
        }
    }

    fn state_with_symbols(symbols: &[(&str, u32)]) -> AppState {
        let mut config = RuntimeConfig::default();
        config.symbols = symbols
            .iter()
            .map(|(sym, row)| (sym.to_string(), *row))
            .collect::<BTreeMap<_, _>>();
        let store = SnapshotStore::open_in_memory(10, 10).unwrap();
        AppState::new(config, store)
    }

    fn clock() -> FixedClock {
        FixedClock(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    #[test]
    fn window_wraps_the_minute_boundary() {
        let window = TriggerWindow {
            start_sec: 59,
            end_sec: 4,
        };
        for sec in [59, 0, 1, 2, 3, 4] {
            assert!(window.contains(sec), "second {sec} should trigger");
        }
        for sec in [5, 30, 58] {
            assert!(!window.contains(sec), "second {sec} should not trigger");
        }
    }

    #[test]
    fn window_without_wraparound() {
        let window = TriggerWindow {
            start_sec: 10,
            end_sec: 20,
        };
        assert!(window.contains(10));
        assert!(window.contains(15));
        assert!(window.contains(20));
        assert!(!window.contains(9));
        assert!(!window.contains(21));
        assert!(!window.contains(0));
    }

    #[tokio::test]
    async fn one_symbol_failure_does_not_block_the_rest() {
        let state = state_with_symbols(&[("alpha", 2), ("beta", 3)]);
        let source = StubSource::new(&[("alpha", 10.0), ("beta", 20.0)]).failing("alpha");

        let summary = sync_pass(&state, &source, &clock()).await;

        assert_eq!(summary.symbols_processed, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.values_inserted, 1);

        // beta was written despite alpha's outage.
        let latest = state.store.latest_value("beta").unwrap().unwrap();
        assert!((latest.value - 20.0).abs() < f64::EPSILON);
        assert!(state.store.latest_value("alpha").unwrap().is_none());

        // The failure landed on the error ring.
        assert_eq!(state.recent_errors.read().len(), 1);
        assert_eq!(state.recent_errors.read()[0].symbol, "alpha");
    }

    #[tokio::test]
    async fn change_event_published_iff_value_inserted() {
        let state = state_with_symbols(&[("ivoire", 2)]);
        let source = StubSource::new(&[("ivoire", 42.0)]);
        let mut rx = state.publisher.subscribe();

        // First pass inserts and publishes.
        let summary = sync_pass(&state, &source, &clock()).await;
        assert_eq!(summary.values_inserted, 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.symbol, "ivoire");
        assert!((event.value - 42.0).abs() < f64::EPSILON);

        // Second identical pass: dedup skips, nothing published.
        let summary = sync_pass(&state, &source, &clock()).await;
        assert_eq!(summary.values_inserted, 0);
        assert_eq!(summary.candles_inserted, 0);
        assert!(rx.try_recv().is_err());

        // Exactly one value point stored in total.
        assert_eq!(state.store.value_history("ivoire").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn candle_only_insert_does_not_publish() {
        let state = state_with_symbols(&[("ivoire", 2)]);
        let source = StubSource::new(&[("ivoire", 42.0)]);

        // Pre-seed the value series so its gate skips while the candle gate
        // still inserts.
        state
            .store
            .append_value_if_changed("ivoire", 42.0, clock().now())
            .unwrap();

        let mut rx = state.publisher.subscribe();
        let summary = sync_pass(&state, &source, &clock()).await;

        assert_eq!(summary.candles_inserted, 1);
        assert_eq!(summary.values_inserted, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn candle_is_derived_from_the_quote() {
        let state = state_with_symbols(&[("ivoire", 2)]);
        let source = StubSource::new(&[("ivoire", 12.0)]);

        sync_pass(&state, &source, &clock()).await;

        let candle = state.store.latest_candle("ivoire").unwrap().unwrap();
        // open = close - 1, variation = 1 from the stub.
        assert!((candle.open - 11.0).abs() < f64::EPSILON);
        assert!((candle.high - 12.5).abs() < f64::EPSILON);
        assert!((candle.low - 10.5).abs() < f64::EPSILON);
        assert_eq!(candle.time, clock().now());
    }
}
