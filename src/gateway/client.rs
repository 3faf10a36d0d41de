//!
//! JSON-RPC client for the ledger gateway.
//!
//! This module provides an async client for the ledger's public API. Paged
//! history pulls go over HTTP JSON-RPC; live transaction pushes arrive over a
//! WebSocket subscription. All methods are async and designed for use with
//! Tokio.

use super::types::*;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info};

/// Ledger gateway client
#[derive(Clone)]
pub struct LedgerGatewayClient {
	/// The underlying HTTP client for JSON-RPC calls.
	http_client: Client,
	/// The base URL for the JSON-RPC HTTP endpoint.
	rpc_url: String,
	/// The WebSocket URL for real-time subscriptions.
	ws_url: String,
}

impl LedgerGatewayClient {
	/// Create a new gateway client.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP endpoint for JSON-RPC calls.
	/// * `ws_url` - The WebSocket endpoint for subscriptions.
	///
	/// # Returns
	/// A new `LedgerGatewayClient` instance.
	pub fn new(rpc_url: String, ws_url: String) -> Self {
		let http_client = Client::builder()
			.timeout(Duration::from_secs(30))
			.build()
			.expect("Failed to create HTTP client");

		Self {
			http_client,
			rpc_url,
			ws_url,
		}
	}

	/// Pull one page of an account's transaction history.
	///
	/// # Arguments
	/// * `account` - The ledger address whose history is being pulled.
	/// * `offset` - How many records to skip from the newest end.
	/// * `limit` - Maximum number of records to return.
	///
	/// # Returns
	/// Transactions in descending recency order. An empty page means the
	/// history is exhausted at this offset.
	pub async fn account_tx(
		&self,
		account: &str,
		offset: u64,
		limit: usize,
	) -> Result<Vec<TransactionEnvelope>, GatewayError> {
		let params = json!({
			"account": account,
			"ledger_index_min": -1,
			"ledger_index_max": -1,
			"descending": true,
			"offset": offset,
			"limit": limit,
		});

		let result = self.execute_rpc("account_tx", params).await?;
		let parsed: AccountTxResult = serde_json::from_value(result)?;

		debug!(
			"Pulled {} transaction(s) for {} at offset {}",
			parsed.transactions.len(),
			account,
			offset
		);
		Ok(parsed.transactions)
	}

	/// Subscribe to transactions touching an account as they are applied.
	///
	/// # Arguments
	/// * `account` - The ledger address to watch.
	///
	/// # Returns
	/// A pinned async stream of `LiveTransaction` results. Each item is
	/// either a transaction push or an error.
	///
	/// # Errors
	/// Returns `GatewayError` if the WebSocket connection or the subscribe
	/// handshake fails.
	pub async fn subscribe_transactions(
		&self,
		account: &str,
	) -> Result<
		std::pin::Pin<
			Box<dyn futures_util::Stream<Item = Result<LiveTransaction, GatewayError>> + Send>,
		>,
		GatewayError,
	> {
		debug!("Attempting WebSocket connection to: {}", self.ws_url);

		let (ws_stream, response) = connect_async(self.ws_url.as_str()).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		// Ask the gateway to push transactions affecting this account
		let subscribe_message = json!({
			"id": Self::request_id(),
			"command": "subscribe",
			"accounts": [account],
		});
		ws_sender
			.send(Message::Text(subscribe_message.to_string()))
			.await?;

		// Wait for the subscribe acknowledgement
		if let Some(msg) = ws_receiver.next().await {
			match msg? {
				Message::Text(text) => {
					let parsed: serde_json::Value = serde_json::from_str(&text)?;
					if parsed.get("status").and_then(|s| s.as_str()) != Some("success") {
						return Err(GatewayError::SubscribeError(
							"Subscription not acknowledged".to_string(),
						));
					}
				}
				_ => {
					return Err(GatewayError::SubscribeError(
						"Unexpected message type during handshake".to_string(),
					));
				}
			}
		}

		info!("Subscribed to live transactions for {}", account);

		// Return stream of transaction pushes
		let stream = ws_receiver.filter_map(|msg| async move {
			match msg {
				Ok(Message::Text(text)) => match serde_json::from_str::<serde_json::Value>(&text) {
					Ok(parsed) => {
						match parsed.get("type").and_then(|t| t.as_str()) {
							Some("transaction") => {
								let meta = parsed
									.get("meta")
									.cloned()
									.unwrap_or(serde_json::Value::Null);
								match parsed.get("transaction").cloned() {
									Some(transaction) => {
										Some(Ok(LiveTransaction { transaction, meta }))
									}
									None => Some(Err(GatewayError::NoData)),
								}
							}
							Some(other) => {
								debug!("Ignoring message type: {}", other);
								None // Skip server status and ledger close notices
							}
							None => Some(Err(GatewayError::RpcError(
								"Message missing type field".to_string(),
							))),
						}
					}
					Err(e) => Some(Err(GatewayError::JsonError(e))),
				},
				Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
				Ok(Message::Close(_)) => {
					debug!("Transaction subscription closed by the gateway");
					None
				}
				Ok(_) => Some(Err(GatewayError::RpcError(
					"Unexpected message type".to_string(),
				))),
				Err(e) => Some(Err(GatewayError::WebSocketError(e))),
			}
		});

		Ok(Box::pin(stream))
	}

	/// Execute a JSON-RPC call.
	///
	/// Transient transport failures are retried with exponential backoff;
	/// remote-reported errors are returned to the caller immediately.
	///
	/// # Arguments
	/// * `method` - The RPC method name.
	/// * `params` - The parameter object for the call.
	///
	/// # Returns
	/// The `result` body of the response, or a `GatewayError` if the request
	/// fails.
	pub async fn execute_rpc(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, GatewayError> {
		let request_body = json!({
			"id": Self::request_id(),
			"method": method,
			"params": [params],
		});

		let policy = ExponentialBackoff {
			max_elapsed_time: Some(Duration::from_secs(20)),
			..ExponentialBackoff::default()
		};

		let response_json = backoff::future::retry(policy, || async {
			let response = self
				.http_client
				.post(&self.rpc_url)
				.header("Content-Type", "application/json")
				.json(&request_body)
				.send()
				.await
				.map_err(|e| backoff::Error::transient(GatewayError::HttpError(e)))?;

			let status = response.status();
			if !status.is_success() {
				let err = GatewayError::RpcError(format!("HTTP error: {}", status));
				return Err(if status.is_server_error() {
					backoff::Error::transient(err)
				} else {
					backoff::Error::permanent(err)
				});
			}

			response
				.json::<serde_json::Value>()
				.await
				.map_err(|e| backoff::Error::transient(GatewayError::HttpError(e)))
		})
		.await?;

		let result = response_json
			.get("result")
			.cloned()
			.ok_or(GatewayError::NoData)?;

		if result.get("status").and_then(|s| s.as_str()) == Some("error") {
			let message = result
				.get("error_message")
				.or_else(|| result.get("error"))
				.and_then(|m| m.as_str())
				.unwrap_or("unknown remote error");
			error!("RPC {} failed: {}", method, message);
			return Err(GatewayError::RpcError(message.to_string()));
		}

		Ok(result)
	}

	/// Correlation id attached to outgoing requests.
	fn request_id() -> String {
		let mut id = [0u8; 8];
		rand::rng().fill(&mut id);
		hex::encode(id)
	}
}
