//! Types for the account transaction history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gateway::GatewayError;

/// Result code the ledger reports for a fully applied transaction.
pub const RESULT_SUCCESS: &str = "tesSUCCESS";
/// Transaction type that participates in history storage.
pub const KIND_PAYMENT: &str = "Payment";

/// A normalized account transaction.
///
/// Built once by the normalization layer and never mutated afterwards. The
/// raw wire payload is carried along for consumers that need fields the
/// normalized view does not surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
	/// Transaction hash, unique across the ledger.
	pub id: String,
	/// Ledger result code, e.g. `tesSUCCESS`.
	pub result: String,
	/// Transaction type as reported on the wire, e.g. `Payment`.
	pub kind: String,
	/// Payment fields, present only for payment transactions with a
	/// resolvable counterparty and amount.
	pub payment: Option<PaymentDetail>,
	/// When the transaction executed, converted from the ledger epoch.
	pub executed_at: Option<DateTime<Utc>>,
	/// The raw transaction payload as received from the remote.
	pub raw: serde_json::Value,
}

impl TransactionRecord {
	/// Whether the transaction was applied successfully.
	pub fn succeeded(&self) -> bool {
		self.result == RESULT_SUCCESS
	}

	/// Whether the transaction is a payment.
	pub fn is_payment(&self) -> bool {
		self.kind == KIND_PAYMENT
	}

	/// Whether the record belongs in the stored history view. The history is
	/// a payment ledger view, not a raw transaction log: only successful
	/// payments with resolved detail are kept.
	pub(crate) fn is_storable(&self) -> bool {
		self.is_payment() && self.succeeded() && self.payment.is_some()
	}
}

/// Normalized payment fields of a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetail {
	/// The other party of the payment relative to the synced account.
	pub counterparty: String,
	/// Whether the synced account sent or received the payment.
	pub direction: Direction,
	/// The delivered amount.
	pub amount: Amount,
}

/// Payment direction relative to the synced account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
	Sent,
	Received,
}

/// Payment amount as carried on the wire: native amounts are integer drop
/// strings, issued amounts are `{value, currency, issuer}` objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
	Native(String),
	Issued {
		value: String,
		currency: String,
		issuer: String,
	},
}

impl Amount {
	/// Issuer of the amount, absent for native currency.
	pub fn issuer(&self) -> Option<&str> {
		match self {
			Amount::Issued { issuer, .. } => Some(issuer),
			Amount::Native(_) => None,
		}
	}
}

/// Upper bound on the number of readable pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastPage {
	/// History is exhausted; this many pages exist.
	Known(u64),
	/// Older history may still be pulled on demand.
	Unbounded,
}

/// Error types for history reads
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
	#[error("remote fetch failed: {0}")]
	RemoteFetch(#[from] GatewayError),

	#[error("page {page} is out of range")]
	PageOutOfRange { page: u64 },

	#[error("history session closed")]
	SessionClosed,
}
