//! Observer notifications emitted by the history service

use tokio::sync::broadcast;

use super::types::PaymentDetail;

/// Buffered events per subscriber before the oldest are dropped.
const EVENT_BUFFER: usize = 64;

/// Notifications emitted as the history changes.
#[derive(Debug, Clone)]
pub enum HistoryEvent {
	/// A successful payment arrived on the live feed.
	PaymentReceived(PaymentDetail),
	/// The history changed; cached pages may be stale.
	HistoryChanged,
}

/// Fan-out hub for history notifications.
///
/// Emission never blocks the write path: slow or absent subscribers lag and
/// lose old events instead of holding up ingestion.
pub struct Observers {
	sender: broadcast::Sender<HistoryEvent>,
}

impl Observers {
	pub fn new() -> Self {
		let (sender, _) = broadcast::channel(EVENT_BUFFER);
		Self { sender }
	}

	/// Register an observer for subsequent events.
	pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
		self.sender.subscribe()
	}

	pub fn payment_received(&self, detail: PaymentDetail) {
		let _ = self.sender.send(HistoryEvent::PaymentReceived(detail));
	}

	pub fn history_changed(&self) {
		let _ = self.sender.send(HistoryEvent::HistoryChanged);
	}
}
