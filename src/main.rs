mod contacts;
mod gateway;
mod history;
mod normalize;
mod utils;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info};

use crate::contacts::InMemoryDirectory;
use crate::gateway::LedgerGatewayClient;
use crate::history::{Direction, HistoryEvent, LastPage, TransactionHistory};
use crate::utils::format_amount;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting transaction history synchronizer");

	let rpc_url =
		env::var("LEDGER_RPC_URL").unwrap_or_else(|_| "https://s1.ripple.com:51234".to_string());
	let ws_url = env::var("LEDGER_WS_URL").unwrap_or_else(|_| "wss://s1.ripple.com".to_string());
	let account = env::args()
		.nth(1)
		.or_else(|| env::var("LEDGER_ACCOUNT").ok())
		.unwrap_or_else(|| {
			error!("No account given; pass an address as the first argument");
			std::process::exit(2);
		});

	let client = Arc::new(LedgerGatewayClient::new(rpc_url, ws_url));
	info!("Created gateway client");

	let directory = Arc::new(InMemoryDirectory::new());
	let history = TransactionHistory::new(client, account.clone(), directory.clone());

	// Print live notifications as they arrive
	let mut events = history.subscribe();
	tokio::spawn(async move {
		loop {
			match events.recv().await {
				Ok(HistoryEvent::PaymentReceived(detail)) => {
					let direction = match detail.direction {
						Direction::Sent => "to",
						Direction::Received => "from",
					};
					info!(
						"New payment {} {}: {}",
						direction,
						detail.counterparty,
						format_amount(&detail.amount)
					);
				}
				Ok(HistoryEvent::HistoryChanged) => debug!("History updated"),
				Err(RecvError::Lagged(skipped)) => debug!("Skipped {} event(s)", skipped),
				Err(RecvError::Closed) => break,
			}
		}
	});

	let page = match history.page(1).await {
		Ok(page) => page,
		Err(e) => {
			error!("Failed to load history for {}: {}", account, e);
			return;
		}
	};

	info!("Loaded first page: {} transaction(s)", page.len());
	for record in &page {
		let when = record
			.executed_at
			.map(|t| t.to_rfc3339())
			.unwrap_or_else(|| "unknown time".to_string());
		if let Some(detail) = &record.payment {
			let direction = match detail.direction {
				Direction::Sent => "to",
				Direction::Received => "from",
			};
			info!(
				"{} {} {} {} [{}]",
				when,
				format_amount(&detail.amount),
				direction,
				detail.counterparty,
				record.id
			);
		}
	}

	match history.last_page().await {
		LastPage::Known(pages) => info!("History exhausted after {} page(s)", pages),
		LastPage::Unbounded => info!("More history available on demand"),
	}
	info!(
		"Address book now holds {} address(es); cached {} record(s)",
		directory.len(),
		history.cached_len().await
	);

	// Stay subscribed for a while so live payments show up.
	info!("Watching the live feed for 60 seconds");
	tokio::time::sleep(Duration::from_secs(60)).await;

	history.shutdown().await;
}
