pub mod client;

pub use client::{SheetsClient, SnapshotSource};
