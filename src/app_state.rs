// =============================================================================
// Central application state
// =============================================================================
//
// The single shared context for the service: configuration, the snapshot
// store handle, and the change publisher. Constructed once in main and passed
// by `Arc` to the scheduler and the API router — there is no ambient
// singleton.
//
// Thread safety:
//   - Atomic counters for lock-free pass tracking.
//   - parking_lot::RwLock for the error ring.
//   - The store serializes its own connection internally.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::publisher::ChangePublisher;
use crate::runtime_config::RuntimeConfig;
use crate::store::SnapshotStore;

/// Maximum number of recent errors to retain for the health surface.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded error event from a sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Symbol being processed when the error occurred.
    pub symbol: String,
    /// Human-readable error message.
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Shared application state, passed as `Arc<AppState>` to every task.
pub struct AppState {
    /// Immutable after startup — the service has no control endpoints.
    pub config: RuntimeConfig,

    /// Process-wide store handle, opened once.
    pub store: SnapshotStore,

    /// Fan-out for value-history change events.
    pub publisher: ChangePublisher,

    /// Completed sync passes since startup.
    pub passes_completed: AtomicU64,

    /// Recent per-symbol sync errors, oldest evicted beyond the cap.
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    /// Instant the service started. Used for uptime reporting.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig, store: SnapshotStore) -> Self {
        Self {
            config,
            store,
            publisher: ChangePublisher::new(),
            passes_completed: AtomicU64::new(0),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    /// Record a completed sync pass.
    pub fn record_pass(&self) -> u64 {
        self.passes_completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn pass_count(&self) -> u64 {
        self.passes_completed.load(Ordering::SeqCst)
    }

    /// Record a per-symbol sync error. The ring is capped at
    /// [`MAX_RECENT_ERRORS`]; oldest entries are evicted when the limit is
    /// reached.
    pub fn push_error(&self, symbol: &str, message: String) {
        let record = ErrorRecord {
            symbol: symbol.to_string(),
            message,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
