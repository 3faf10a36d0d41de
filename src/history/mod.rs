//! Account transaction history
//!
//! This module owns the ordered local cache of an account's payments, the
//! synchronization engine that reconciles on-demand backfill pulls with live
//! pushes, and the paginated read API consumed by display layers.

/// Observer notifications and the fan-out hub
mod events;
/// The synchronizer and paginated read API
mod service;
/// Record, error and page types
mod types;

pub use events::HistoryEvent;
pub use service::TransactionHistory;
pub use types::*;

/// Number of records in one page of the read API.
pub const TRANSACTIONS_PER_PAGE: usize = 10;
