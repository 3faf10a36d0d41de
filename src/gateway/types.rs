//! Types for the remote ledger gateway

use serde::{Deserialize, Serialize};

/// One transaction as delivered by the paged `account_tx` pull.
///
/// The gateway does not interpret the transaction body; `tx` and `meta` are
/// passed through as raw JSON for the normalization layer to pick apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEnvelope {
	/// The submitted transaction fields.
	pub tx: serde_json::Value,
	/// The execution metadata recorded when the transaction was applied.
	#[serde(default)]
	pub meta: serde_json::Value,
	/// Whether the transaction is part of a validated ledger.
	#[serde(default)]
	pub validated: bool,
}

/// Result body of an `account_tx` call.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountTxResult {
	/// Transactions in descending recency order. An empty list means the
	/// account has no further history at the requested offset.
	#[serde(default)]
	pub transactions: Vec<TransactionEnvelope>,
}

/// Payload of one live `transaction` stream message.
#[derive(Debug, Clone)]
pub struct LiveTransaction {
	/// The transaction fields as reported by the stream.
	pub transaction: serde_json::Value,
	/// The execution metadata, when the stream includes it.
	pub meta: serde_json::Value,
}

/// Error types for gateway calls and subscriptions
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
	#[error("remote rpc error: {0}")]
	RpcError(String),

	#[error("no data returned")]
	NoData,

	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("subscription error: {0}")]
	SubscribeError(String),
}
