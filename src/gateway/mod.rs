//! Remote ledger gateway module
//!
//! This module provides the client and types for talking to the ledger's
//! public API: paged `account_tx` pulls over JSON-RPC and a WebSocket
//! subscription for transactions as they are applied. The history core
//! consumes it through the `HistorySource` trait so it can be driven by
//! scripted sources in tests.

use async_trait::async_trait;
use std::pin::Pin;

/// JSON-RPC and WebSocket client for the ledger gateway
mod client;
/// Type definitions for gateway payloads
mod types;

pub use client::LedgerGatewayClient;
pub use types::*;

/// Stream of live transaction pushes for a subscribed account.
pub type LiveStream =
	Pin<Box<dyn futures_util::Stream<Item = Result<LiveTransaction, GatewayError>> + Send>>;

/// Paged pull and live push surface of the remote ledger.
#[async_trait]
pub trait HistorySource: Send + Sync + 'static {
	/// Fetch one page of an account's history, newest first. An empty page
	/// signals that history is exhausted at the given offset.
	async fn fetch_page(
		&self,
		account: &str,
		offset: u64,
		limit: usize,
	) -> Result<Vec<TransactionEnvelope>, GatewayError>;

	/// Open the live push subscription for an account.
	async fn subscribe_live(&self, account: &str) -> Result<LiveStream, GatewayError>;
}

#[async_trait]
impl HistorySource for LedgerGatewayClient {
	async fn fetch_page(
		&self,
		account: &str,
		offset: u64,
		limit: usize,
	) -> Result<Vec<TransactionEnvelope>, GatewayError> {
		self.account_tx(account, offset, limit).await
	}

	async fn subscribe_live(&self, account: &str) -> Result<LiveStream, GatewayError> {
		self.subscribe_transactions(account).await
	}
}
