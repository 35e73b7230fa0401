// =============================================================================
// Google Sheets REST client — read-only quote snapshots
// =============================================================================
//
// The sheet is the only upstream. Quotes for a symbol live in columns C..F of
// its configured row: C = open, D = close, E = variation. A separate fixed
// cell holds the single spot price. Cells arrive as strings and may use a
// comma decimal separator; parsing normalizes that and rejects anything
// non-finite.
//
// The API key is read from the environment at construction and sent as a
// query parameter; it is never logged.
// =============================================================================

use std::collections::BTreeMap;
use std::future::Future;

use tracing::{debug, instrument};

use crate::error::FeedError;
use crate::runtime_config::RuntimeConfig;
use crate::types::RawQuote;

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

/// Per-request timeout. A stalled fetch for one symbol must not wedge the
/// whole sync pass.
const FETCH_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// SnapshotSource trait
// =============================================================================

/// Read-only capability over the external quote provider. The scheduler and
/// the live-candle route depend on this seam rather than on the concrete
/// client, so tests can substitute a stub.
pub trait SnapshotSource: Send + Sync {
    /// Fetch the current raw quote for `symbol`.
    fn fetch(&self, symbol: &str) -> impl Future<Output = Result<RawQuote, FeedError>> + Send;

    /// Fetch the single spot price from its fixed cell.
    fn current_price(&self) -> impl Future<Output = Result<f64, FeedError>> + Send;
}

// =============================================================================
// SheetsClient
// =============================================================================

/// Google Sheets `values.get` client for one spreadsheet.
#[derive(Clone)]
pub struct SheetsClient {
    client: reqwest::Client,
    api_key: String,
    spreadsheet_id: String,
    sheet_name: String,
    symbols: BTreeMap<String, u32>,
    current_price_cell: String,
}

impl SheetsClient {
    /// Create a new `SheetsClient` from the runtime config and an API key.
    pub fn new(config: &RuntimeConfig, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        debug!(sheet = %config.sheet_name, "SheetsClient initialised");

        Self {
            client,
            api_key: api_key.into(),
            spreadsheet_id: config.spreadsheet_id.clone(),
            sheet_name: config.sheet_name.clone(),
            symbols: config.symbols.clone(),
            current_price_cell: config.current_price_cell.clone(),
        }
    }

    /// Build the `values.get` URL for an A1 range. Sheet names may contain
    /// spaces, which must be percent-encoded in the path segment.
    fn values_url(&self, range: &str) -> String {
        let full_range = format!("{}!{}", self.sheet_name, range).replace(' ', "%20");
        format!(
            "{SHEETS_BASE_URL}/v4/spreadsheets/{}/values/{}",
            self.spreadsheet_id, full_range
        )
    }

    /// GET one A1 range and return the first row of cells as strings.
    async fn get_row(&self, range: &str) -> Result<Vec<String>, FeedError> {
        let url = self.values_url(range);

        let resp = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::SourceUnavailable(format!(
                "sheets values.get returned {status} for range {range}"
            )));
        }

        let body: serde_json::Value = resp.json().await?;

        let cells = body["values"]
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(|row| row.as_array())
            .map(|row| {
                row.iter()
                    .map(|v| v.as_str().unwrap_or_default().to_string())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        debug!(range = %range, cells = cells.len(), "sheet range fetched");
        Ok(cells)
    }
}

impl SnapshotSource for SheetsClient {
    /// Fetch the raw quote row for `symbol` (`C{row}:F{row}`).
    #[instrument(skip(self), name = "sheets::fetch")]
    async fn fetch(&self, symbol: &str) -> Result<RawQuote, FeedError> {
        let row = self
            .symbols
            .get(symbol)
            .copied()
            .ok_or_else(|| FeedError::InvalidSymbol(symbol.to_string()))?;

        let range = format!("C{row}:F{row}");
        let cells = self.get_row(&range).await?;

        let open = parse_cell(cells.first().map(String::as_str), "open")?;
        let close = parse_cell(cells.get(1).map(String::as_str), "close")?;
        let variation = parse_cell(cells.get(2).map(String::as_str), "variation")?;

        Ok(RawQuote {
            open,
            close,
            variation,
        })
    }

    /// Fetch the spot price from the fixed configured cell.
    #[instrument(skip(self), name = "sheets::current_price")]
    async fn current_price(&self) -> Result<f64, FeedError> {
        let cell = self.current_price_cell.clone();
        let cells = self.get_row(&cell).await?;
        parse_cell(cells.first().map(String::as_str), "current_price")
    }
}

// =============================================================================
// Cell parsing
// =============================================================================

/// Parse one sheet cell into a finite f64.
///
/// Locale-formatted numbers use a comma decimal separator ("12,5"); the comma
/// is normalized to a dot before parsing. Missing, empty, unparseable, and
/// non-finite values all fail with `MalformedQuote`.
fn parse_cell(raw: Option<&str>, field: &str) -> Result<f64, FeedError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FeedError::MalformedQuote(format!("missing cell for {field}")))?;

    let normalized = raw.replace(',', ".");
    let value: f64 = normalized.parse().map_err(|_| {
        FeedError::MalformedQuote(format!("cell for {field} is not numeric: {raw:?}"))
    })?;

    if !value.is_finite() {
        return Err(FeedError::MalformedQuote(format!(
            "cell for {field} is not finite: {raw:?}"
        )));
    }

    Ok(value)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cell_plain_number() {
        assert!((parse_cell(Some("12.5"), "open").unwrap() - 12.5).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_cell_normalizes_comma_decimal() {
        assert!((parse_cell(Some("10,0"), "open").unwrap() - 10.0).abs() < f64::EPSILON);
        assert!((parse_cell(Some("0,25"), "variation").unwrap() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_cell_rejects_empty_and_missing() {
        assert!(matches!(
            parse_cell(Some(""), "close"),
            Err(FeedError::MalformedQuote(_))
        ));
        assert!(matches!(
            parse_cell(Some("   "), "close"),
            Err(FeedError::MalformedQuote(_))
        ));
        assert!(matches!(
            parse_cell(None, "close"),
            Err(FeedError::MalformedQuote(_))
        ));
    }

    #[test]
    fn parse_cell_rejects_non_numeric() {
        assert!(matches!(
            parse_cell(Some("N/A"), "open"),
            Err(FeedError::MalformedQuote(_))
        ));
    }

    #[test]
    fn parse_cell_rejects_non_finite() {
        assert!(matches!(
            parse_cell(Some("inf"), "open"),
            Err(FeedError::MalformedQuote(_))
        ));
        assert!(matches!(
            parse_cell(Some("NaN"), "open"),
            Err(FeedError::MalformedQuote(_))
        ));
    }

    #[test]
    fn values_url_encodes_sheet_name_spaces() {
        let config = RuntimeConfig::default();
        let client = SheetsClient::new(&config, "test-key");
        let url = client.values_url("C2:F2");
        assert!(url.contains("/values/Indice%20Token!C2:F2"));
        assert!(url.starts_with("https://sheets.googleapis.com/v4/spreadsheets/"));
    }

    #[tokio::test]
    async fn fetch_unknown_symbol_fails_before_any_request() {
        let config = RuntimeConfig::default();
        let client = SheetsClient::new(&config, "test-key");
        let err = client.fetch("not-a-symbol").await.unwrap_err();
        assert!(matches!(err, FeedError::InvalidSymbol(_)));
    }
}
