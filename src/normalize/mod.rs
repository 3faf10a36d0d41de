//! Normalization and enrichment of raw ledger transactions
//!
//! Raw transactions arrive as JSON from both the paged pull and the live
//! push. This module turns them into `TransactionRecord`s for the history
//! cache, rejecting transactions that do not involve the synced account, and
//! resolves the effective issuer for path-based payments.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;

use crate::history::{
	Amount, Direction, KIND_PAYMENT, PaymentDetail, TransactionRecord,
};

/// Seconds between the Unix epoch and the ledger epoch (2000-01-01T00:00:00Z).
const LEDGER_EPOCH_OFFSET: i64 = 946_684_800;

/// Normalize one raw transaction for the given account.
///
/// Returns `None` when the transaction does not involve the account or is
/// missing the fields every record needs (hash, type, result code). Payment
/// detail is resolved best-effort; a payment whose counterparty or amount
/// cannot be resolved still normalizes, with `payment` unset.
pub fn normalize(tx: &Value, meta: &Value, account: &str) -> Option<TransactionRecord> {
	let id = tx.get("hash")?.as_str()?.to_string();
	let kind = tx.get("TransactionType")?.as_str()?.to_string();
	let result = meta.get("TransactionResult")?.as_str()?.to_string();

	let sender = tx.get("Account").and_then(Value::as_str);
	let destination = tx.get("Destination").and_then(Value::as_str);
	if sender != Some(account) && destination != Some(account) {
		debug!("Transaction {} does not involve {}", id, account);
		return None;
	}

	let payment = if kind == KIND_PAYMENT {
		payment_detail(tx, account, sender, destination)
	} else {
		None
	};

	Some(TransactionRecord {
		id,
		result,
		kind,
		payment,
		executed_at: executed_at(tx),
		raw: tx.clone(),
	})
}

fn payment_detail(
	tx: &Value,
	account: &str,
	sender: Option<&str>,
	destination: Option<&str>,
) -> Option<PaymentDetail> {
	let destination = destination?;
	let direction = if sender == Some(account) {
		Direction::Sent
	} else {
		Direction::Received
	};
	let counterparty = match direction {
		Direction::Sent => destination,
		Direction::Received => sender?,
	};

	Some(PaymentDetail {
		counterparty: counterparty.to_string(),
		direction,
		amount: resolve_amount(tx, destination)?,
	})
}

fn resolve_amount(tx: &Value, destination: &str) -> Option<Amount> {
	let mut amount: Amount = serde_json::from_value(tx.get("Amount")?.clone()).ok()?;

	// A declared issuer equal to the destination means "any trusted issuer";
	// the issuer actually settled against is the one on the last hop of the
	// first path.
	if let Amount::Issued { issuer, .. } = &mut amount {
		if issuer == destination {
			if let Some(effective) = path_issuer(tx) {
				*issuer = effective;
			}
		}
	}

	Some(amount)
}

fn path_issuer(tx: &Value) -> Option<String> {
	tx.get("Paths")?
		.as_array()?
		.first()?
		.as_array()?
		.last()?
		.get("issuer")?
		.as_str()
		.map(str::to_string)
}

fn executed_at(tx: &Value) -> Option<DateTime<Utc>> {
	let stamp = tx.get("date")?.as_i64()?;
	Utc.timestamp_opt(LEDGER_EPOCH_OFFSET + stamp, 0).single()
}
