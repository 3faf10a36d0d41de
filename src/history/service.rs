//!
//! Incremental transaction-history synchronizer.
//!
//! Maintains a newest-first cache of an account's payments, backfilling older
//! history from the remote gateway on demand while ingesting live pushes as
//! they arrive, and exposes the merged view through a paginated read API.
//! Backfill pulls and live pushes are reconciled through a single remote
//! offset coordinate: every pull advances the cursor by the number of raw
//! records returned, and every live push shifts it by one so later pulls do
//! not re-fetch a record the stream already delivered.

use std::collections::{HashSet, VecDeque};
use std::pin::pin;
use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::TRANSACTIONS_PER_PAGE;
use super::events::{HistoryEvent, Observers};
use super::types::{HistoryError, LastPage, TransactionRecord};
use crate::contacts::AddressDirectory;
use crate::gateway::{HistorySource, LiveStream, LiveTransaction};
use crate::normalize;

/// Lifecycle of the per-session sync state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Uninitialized,
	Initializing,
	Ready,
}

/// Mutable per-session unit. Cache, cursor and exhaustion flag live and die
/// together; all mutation happens under the service's state lock, which is
/// never held across a network await.
struct SessionState {
	phase: Phase,
	/// Normalized records, newest first.
	records: VecDeque<TransactionRecord>,
	/// Ids already stored, to keep the cache duplicate-free when the live
	/// stream and a pull deliver the same transaction.
	seen: HashSet<String>,
	/// Offset of the next pull into the remote's paged history.
	cursor: u64,
	/// Set once a pull comes back empty; never cleared within a session.
	exhausted: bool,
	/// Fencing token. Results of work started under an older epoch are
	/// discarded instead of applied.
	epoch: u64,
	live_task: Option<JoinHandle<()>>,
}

impl SessionState {
	fn new() -> Self {
		Self {
			phase: Phase::Uninitialized,
			records: VecDeque::new(),
			seen: HashSet::new(),
			cursor: 0,
			exhausted: false,
			epoch: 0,
			live_task: None,
		}
	}

	/// Clear the cache, cursor and exhaustion flag for a fresh session.
	fn reset(&mut self) {
		self.records.clear();
		self.seen.clear();
		self.cursor = 0;
		self.exhausted = false;
	}
}

/// Paginated transaction history for one ledger account.
///
/// Created per account session; dropping it (or calling [`shutdown`]) ends
/// the session. Reads initialize the session lazily on first use: the live
/// subscription is established exactly once and the cache resynchronizes
/// from offset zero.
///
/// [`shutdown`]: TransactionHistory::shutdown
pub struct TransactionHistory<S> {
	source: Arc<S>,
	account: String,
	page_size: usize,
	state: Mutex<SessionState>,
	/// Serializes pulls so concurrent page reads never request the same
	/// offset twice.
	backfill: Mutex<()>,
	/// Wakes readers that arrived while another one was initializing.
	init_done: Notify,
	observers: Observers,
	contacts: Arc<dyn AddressDirectory>,
	/// Handle the live forwarder uses to reach back into the service
	/// without keeping it alive.
	weak: Weak<TransactionHistory<S>>,
}

impl<S: HistorySource> TransactionHistory<S> {
	/// Create a history service with the default page size.
	pub fn new(
		source: Arc<S>,
		account: impl Into<String>,
		contacts: Arc<dyn AddressDirectory>,
	) -> Arc<Self> {
		Self::with_page_size(source, account, contacts, TRANSACTIONS_PER_PAGE)
	}

	pub fn with_page_size(
		source: Arc<S>,
		account: impl Into<String>,
		contacts: Arc<dyn AddressDirectory>,
		page_size: usize,
	) -> Arc<Self> {
		Arc::new_cyclic(|weak| Self {
			source,
			account: account.into(),
			page_size,
			state: Mutex::new(SessionState::new()),
			backfill: Mutex::new(()),
			init_done: Notify::new(),
			observers: Observers::new(),
			contacts,
			weak: weak.clone(),
		})
	}

	/// Register an observer for history notifications.
	pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
		self.observers.subscribe()
	}

	/// Read one page of history, 1-indexed, newest first.
	///
	/// Pulls older history from the remote until the requested page plus one
	/// page of lookahead is locally available, or history is exhausted. The
	/// extra page keeps the next read from paying a visible round trip.
	///
	/// # Errors
	/// `PageOutOfRange` when the page has no data, `RemoteFetch` when a pull
	/// fails, `SessionClosed` when the session was torn down mid-read. A
	/// fetch failure is never folded into an empty page.
	pub async fn page(&self, page_number: u64) -> Result<Vec<TransactionRecord>, HistoryError> {
		let epoch = self.ensure_ready().await?;
		if page_number == 0 {
			return Err(HistoryError::PageOutOfRange { page: page_number });
		}

		let needed = (page_number as usize)
			.saturating_add(1)
			.saturating_mul(self.page_size);
		loop {
			{
				let state = self.state.lock().await;
				if state.epoch != epoch {
					return Err(HistoryError::SessionClosed);
				}
				if state.exhausted || state.records.len() >= needed {
					break;
				}
			}
			self.request_next_batch(epoch).await?;
		}

		let state = self.state.lock().await;
		if state.epoch != epoch {
			return Err(HistoryError::SessionClosed);
		}
		let start = (page_number as usize - 1).saturating_mul(self.page_size);
		if state.records.len() <= start {
			return Err(HistoryError::PageOutOfRange { page: page_number });
		}
		Ok(state
			.records
			.iter()
			.skip(start)
			.take(self.page_size)
			.cloned()
			.collect())
	}

	/// Upper bound on the number of readable pages. Known only once the
	/// remote has confirmed exhaustion with an empty pull.
	pub async fn last_page(&self) -> LastPage {
		let state = self.state.lock().await;
		if state.exhausted {
			LastPage::Known(state.records.len().div_ceil(self.page_size) as u64)
		} else {
			LastPage::Unbounded
		}
	}

	/// Number of records currently cached locally.
	pub async fn cached_len(&self) -> usize {
		self.state.lock().await.records.len()
	}

	/// Tear down the current session: unsubscribe the live feed and discard
	/// the cache, cursor and exhaustion flag. Results of pulls still in
	/// flight are fenced out when they land. The next read starts a fresh
	/// session from offset zero.
	pub async fn shutdown(&self) {
		let mut state = self.state.lock().await;
		info!("Closing history session for {}", self.account);
		state.epoch += 1;
		state.phase = Phase::Uninitialized;
		if let Some(task) = state.live_task.take() {
			task.abort();
		}
		state.reset();
		drop(state);
		self.init_done.notify_waiters();
	}

	/// Bring the session to the ready state, initializing it on first use.
	/// Concurrent first callers observe a single initialization: one of them
	/// performs it while the rest wait for the phase to settle.
	///
	/// Returns the epoch of the ready session.
	async fn ensure_ready(&self) -> Result<u64, HistoryError> {
		loop {
			let mut state = self.state.lock().await;
			match state.phase {
				Phase::Ready => return Ok(state.epoch),
				Phase::Initializing => {
					let mut notified = pin!(self.init_done.notified());
					notified.as_mut().enable();
					drop(state);
					notified.await;
				}
				Phase::Uninitialized => {
					state.phase = Phase::Initializing;
					let epoch = state.epoch;
					drop(state);

					if let Err(e) = self.initialize(epoch).await {
						let mut state = self.state.lock().await;
						if state.epoch == epoch && state.phase == Phase::Initializing {
							state.phase = Phase::Uninitialized;
						}
						drop(state);
						self.init_done.notify_waiters();
						return Err(e);
					}
				}
			}
		}
	}

	/// Establish the live subscription and reset the session state.
	async fn initialize(&self, epoch: u64) -> Result<(), HistoryError> {
		info!("Initializing history session for {}", self.account);
		let stream = self.source.subscribe_live(&self.account).await?;

		let mut state = self.state.lock().await;
		if state.epoch != epoch {
			debug!("Discarding live subscription for a torn-down session");
			drop(state);
			self.init_done.notify_waiters();
			return Ok(());
		}
		state.reset();
		state.live_task = Some(self.spawn_live_forwarder(stream, epoch));
		state.phase = Phase::Ready;
		drop(state);
		self.init_done.notify_waiters();
		Ok(())
	}

	fn spawn_live_forwarder(&self, mut stream: LiveStream, epoch: u64) -> JoinHandle<()> {
		let weak = self.weak.clone();
		tokio::spawn(async move {
			while let Some(item) = stream.next().await {
				let Some(history) = weak.upgrade() else { break };
				match item {
					Ok(live) => history.on_live_transaction(epoch, live).await,
					Err(e) => warn!("Live subscription error: {}", e),
				}
			}
			debug!("Live subscription stream ended");
		})
	}

	/// Apply one live push. Runs independently of any in-flight pull; the
	/// state lock is only held for in-memory mutation.
	async fn on_live_transaction(&self, epoch: u64, live: LiveTransaction) {
		let record = normalize::normalize(&live.transaction, &live.meta, &self.account);

		let mut state = self.state.lock().await;
		if state.epoch != epoch {
			debug!("Dropping live transaction from a closed session");
			return;
		}

		// Every raw push occupies the newest remote offset, so the cursor
		// shifts even when the record is rejected below; otherwise the next
		// pull would re-fetch a record the stream already delivered.
		state.cursor += 1;

		let stored = match record {
			Some(record) if record.is_storable() && !state.seen.contains(&record.id) => {
				debug!("Inserting live transaction {} at the head", record.id);
				state.seen.insert(record.id.clone());
				self.note_payment_addresses(&record);
				let detail = record.payment.clone();
				state.records.push_front(record);
				detail
			}
			Some(record) => {
				debug!(
					"Live transaction {} not stored (type {}, result {})",
					record.id, record.kind, record.result
				);
				None
			}
			None => None,
		};
		drop(state);

		if let Some(detail) = stored {
			self.observers.payment_received(detail);
		}
		self.observers.history_changed();
	}

	/// Pull one page of older history and fold it into the cache. Pulls are
	/// single-flight; a pull that lands after the session was torn down is
	/// discarded without being applied.
	async fn request_next_batch(&self, epoch: u64) -> Result<(), HistoryError> {
		let _flight = self.backfill.lock().await;

		let offset = {
			let state = self.state.lock().await;
			if state.epoch != epoch || state.exhausted {
				return Ok(());
			}
			state.cursor
		};

		debug!(
			"Requesting history for {} at offset {} (limit {})",
			self.account, offset, self.page_size
		);
		let envelopes = self
			.source
			.fetch_page(&self.account, offset, self.page_size)
			.await?;

		let mut state = self.state.lock().await;
		if state.epoch != epoch {
			debug!("Discarding stale history page for offset {}", offset);
			return Ok(());
		}

		state.cursor += envelopes.len() as u64;
		if envelopes.is_empty() {
			info!(
				"History exhausted for {} after {} stored record(s)",
				self.account,
				state.records.len()
			);
			state.exhausted = true;
			return Ok(());
		}

		let mut appended = 0usize;
		for envelope in &envelopes {
			let Some(record) = normalize::normalize(&envelope.tx, &envelope.meta, &self.account)
			else {
				continue;
			};
			if !record.is_storable() || !state.seen.insert(record.id.clone()) {
				continue;
			}
			self.note_payment_addresses(&record);
			state.records.push_back(record);
			appended += 1;
		}
		debug!(
			"Applied history page: {} pulled, {} stored, cursor now {}",
			envelopes.len(),
			appended,
			state.cursor
		);
		Ok(())
	}

	/// Forward counterparty and issuer addresses to the address book.
	fn note_payment_addresses(&self, record: &TransactionRecord) {
		let Some(detail) = &record.payment else { return };
		self.contacts.note_address(&detail.counterparty);
		if let Some(issuer) = detail.amount.issuer() {
			self.contacts.note_address(issuer);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::contacts::InMemoryDirectory;
	use crate::gateway::{GatewayError, TransactionEnvelope};
	use async_trait::async_trait;
	use serde_json::{Value, json};
	use std::sync::Mutex as StdMutex;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tokio::sync::{Semaphore, mpsc};
	use tokio::task::yield_now;

	const ACCOUNT: &str = "gACCOUNT";
	const PEER: &str = "gPEER";
	const ISSUER: &str = "gISSUER";

	/// History source driven by a pre-scripted sequence of pages, with an
	/// mpsc-backed live feed. Once the script runs dry every pull returns an
	/// empty page. Optional semaphore gates let tests park a fetch or a
	/// subscribe mid-flight.
	struct ScriptedSource {
		pages: StdMutex<VecDeque<Vec<TransactionEnvelope>>>,
		fetches: AtomicUsize,
		subscriptions: AtomicUsize,
		live_sender: StdMutex<Option<mpsc::UnboundedSender<LiveTransaction>>>,
		fetch_gate: Option<Arc<Semaphore>>,
		subscribe_gate: Option<Arc<Semaphore>>,
	}

	impl ScriptedSource {
		fn new(pages: Vec<Vec<TransactionEnvelope>>) -> Arc<Self> {
			Self::with_gates(pages, None, None)
		}

		fn with_gates(
			pages: Vec<Vec<TransactionEnvelope>>,
			fetch_gate: Option<Arc<Semaphore>>,
			subscribe_gate: Option<Arc<Semaphore>>,
		) -> Arc<Self> {
			Arc::new(Self {
				pages: StdMutex::new(pages.into_iter().collect()),
				fetches: AtomicUsize::new(0),
				subscriptions: AtomicUsize::new(0),
				live_sender: StdMutex::new(None),
				fetch_gate,
				subscribe_gate,
			})
		}

		fn push_live(&self, transaction: Value, meta: Value) {
			self.live_sender
				.lock()
				.unwrap()
				.as_ref()
				.expect("no live subscription established")
				.send(LiveTransaction { transaction, meta })
				.expect("live stream dropped");
		}

		fn fetch_count(&self) -> usize {
			self.fetches.load(Ordering::SeqCst)
		}

		fn subscription_count(&self) -> usize {
			self.subscriptions.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl HistorySource for ScriptedSource {
		async fn fetch_page(
			&self,
			_account: &str,
			_offset: u64,
			_limit: usize,
		) -> Result<Vec<TransactionEnvelope>, GatewayError> {
			self.fetches.fetch_add(1, Ordering::SeqCst);
			if let Some(gate) = &self.fetch_gate {
				gate.acquire().await.expect("fetch gate closed").forget();
			}
			let mut pages = self.pages.lock().unwrap();
			Ok(pages.pop_front().unwrap_or_default())
		}

		async fn subscribe_live(&self, _account: &str) -> Result<LiveStream, GatewayError> {
			self.subscriptions.fetch_add(1, Ordering::SeqCst);
			if let Some(gate) = &self.subscribe_gate {
				gate.acquire().await.expect("subscribe gate closed").forget();
			}
			let (sender, receiver) = mpsc::unbounded_channel();
			*self.live_sender.lock().unwrap() = Some(sender);
			Ok(Box::pin(futures::stream::unfold(
				receiver,
				|mut receiver| async move { receiver.recv().await.map(|live| (Ok(live), receiver)) },
			)))
		}
	}

	/// Source whose pulls always fail.
	struct FailingSource;

	#[async_trait]
	impl HistorySource for FailingSource {
		async fn fetch_page(
			&self,
			_account: &str,
			_offset: u64,
			_limit: usize,
		) -> Result<Vec<TransactionEnvelope>, GatewayError> {
			Err(GatewayError::RpcError("remote unavailable".to_string()))
		}

		async fn subscribe_live(&self, _account: &str) -> Result<LiveStream, GatewayError> {
			Ok(Box::pin(futures::stream::pending()))
		}
	}

	/// Source whose subscription handshake always fails.
	struct SubscribeFailSource {
		attempts: AtomicUsize,
	}

	#[async_trait]
	impl HistorySource for SubscribeFailSource {
		async fn fetch_page(
			&self,
			_account: &str,
			_offset: u64,
			_limit: usize,
		) -> Result<Vec<TransactionEnvelope>, GatewayError> {
			Ok(Vec::new())
		}

		async fn subscribe_live(&self, _account: &str) -> Result<LiveStream, GatewayError> {
			self.attempts.fetch_add(1, Ordering::SeqCst);
			Err(GatewayError::SubscribeError(
				"handshake refused".to_string(),
			))
		}
	}

	fn success_meta() -> Value {
		json!({ "TransactionResult": "tesSUCCESS" })
	}

	fn payment_tx(id: &str) -> Value {
		json!({
			"hash": id,
			"TransactionType": "Payment",
			"Account": PEER,
			"Destination": ACCOUNT,
			"Amount": "1000000",
			"date": 489_000_000,
		})
	}

	fn envelope(id: &str) -> TransactionEnvelope {
		TransactionEnvelope {
			tx: payment_tx(id),
			meta: success_meta(),
			validated: true,
		}
	}

	fn envelopes(range: std::ops::Range<usize>) -> Vec<TransactionEnvelope> {
		range.map(|n| envelope(&format!("TX{n:04}"))).collect()
	}

	fn history(source: &Arc<ScriptedSource>) -> Arc<TransactionHistory<ScriptedSource>> {
		TransactionHistory::new(source.clone(), ACCOUNT, Arc::new(InMemoryDirectory::new()))
	}

	async fn await_history_changed(receiver: &mut broadcast::Receiver<HistoryEvent>) {
		loop {
			match receiver.recv().await.expect("event stream closed") {
				HistoryEvent::HistoryChanged => break,
				HistoryEvent::PaymentReceived(_) => {}
			}
		}
	}

	#[tokio::test]
	async fn pages_through_a_bounded_history() {
		// 25 records behind a page size of 10.
		let source = ScriptedSource::new(vec![
			envelopes(0..10),
			envelopes(10..20),
			envelopes(20..25),
		]);
		let history = history(&source);

		let first = history.page(1).await.unwrap();
		assert_eq!(first.len(), 10);
		assert_eq!(first[0].id, "TX0000");
		assert_eq!(first[9].id, "TX0009");

		let third = history.page(3).await.unwrap();
		assert_eq!(third.len(), 5);
		assert_eq!(third[0].id, "TX0020");
		assert_eq!(third[4].id, "TX0024");
		assert_eq!(history.last_page().await, LastPage::Known(3));

		assert!(matches!(
			history.page(4).await,
			Err(HistoryError::PageOutOfRange { page: 4 })
		));
	}

	#[tokio::test]
	async fn out_of_range_pages_issue_no_pulls_once_exhausted() {
		let source = ScriptedSource::new(vec![envelopes(0..10), envelopes(10..20), envelopes(20..25)]);
		let history = history(&source);

		history.page(3).await.unwrap();
		let pulls_at_exhaustion = source.fetch_count();

		for page in [4, 5, 100] {
			assert!(matches!(
				history.page(page).await,
				Err(HistoryError::PageOutOfRange { .. })
			));
		}
		assert_eq!(source.fetch_count(), pulls_at_exhaustion);
	}

	#[tokio::test]
	async fn page_zero_is_out_of_range() {
		let source = ScriptedSource::new(vec![envelopes(0..10)]);
		let history = history(&source);

		assert!(matches!(
			history.page(0).await,
			Err(HistoryError::PageOutOfRange { page: 0 })
		));
	}

	#[tokio::test]
	async fn reads_prefetch_one_extra_page_and_are_idempotent() {
		let source = ScriptedSource::new(vec![
			envelopes(0..10),
			envelopes(10..20),
			envelopes(20..30),
			envelopes(30..40),
		]);
		let history = history(&source);

		let first = history.page(1).await.unwrap();
		// Page 1 needs 10 records; one lookahead page makes it two pulls.
		assert_eq!(source.fetch_count(), 2);
		assert_eq!(history.cached_len().await, 20);

		let again = history.page(1).await.unwrap();
		assert_eq!(source.fetch_count(), 2);
		let first_ids: Vec<&str> = first.iter().map(|r| r.id.as_str()).collect();
		let again_ids: Vec<&str> = again.iter().map(|r| r.id.as_str()).collect();
		assert_eq!(first_ids, again_ids);
	}

	#[tokio::test]
	async fn cursor_counts_raw_pulls_and_raw_live_pushes() {
		let source = ScriptedSource::new(vec![envelopes(0..10), envelopes(10..17)]);
		let history = history(&source);
		let epoch = history.ensure_ready().await.unwrap();

		history.request_next_batch(epoch).await.unwrap();
		history.request_next_batch(epoch).await.unwrap();
		assert_eq!(history.state.lock().await.cursor, 17);

		let mut events = history.subscribe();

		source.push_live(payment_tx("LIVE1"), success_meta());
		await_history_changed(&mut events).await;

		// A push that does not involve the account is rejected by
		// normalization but still occupies a remote offset.
		source.push_live(
			json!({
				"hash": "ELSEWHERE",
				"TransactionType": "Payment",
				"Account": PEER,
				"Destination": "gTHIRDPARTY",
				"Amount": "1",
			}),
			success_meta(),
		);
		await_history_changed(&mut events).await;

		let state = history.state.lock().await;
		assert_eq!(state.cursor, 19);
		assert_eq!(state.records.len(), 18);
		assert_eq!(state.records.front().unwrap().id, "LIVE1");
	}

	#[tokio::test]
	async fn live_records_land_at_the_head_and_exhaustion_is_confirmed_by_an_empty_pull() {
		// 5 records behind a page size of 10.
		let source = ScriptedSource::new(vec![envelopes(0..5)]);
		let history = history(&source);
		let epoch = history.ensure_ready().await.unwrap();

		history.request_next_batch(epoch).await.unwrap();
		assert_eq!(history.cached_len().await, 5);
		assert_eq!(history.last_page().await, LastPage::Unbounded);

		let mut events = history.subscribe();
		source.push_live(payment_tx("LIVE1"), success_meta());
		await_history_changed(&mut events).await;

		{
			let state = history.state.lock().await;
			assert_eq!(state.records.len(), 6);
			assert_eq!(state.records.front().unwrap().id, "LIVE1");
			assert_eq!(state.cursor, 6);
		}
		assert_eq!(history.last_page().await, LastPage::Unbounded);

		history.request_next_batch(epoch).await.unwrap();
		assert_eq!(history.last_page().await, LastPage::Known(1));

		let page = history.page(1).await.unwrap();
		assert_eq!(page.len(), 6);
		assert_eq!(page[0].id, "LIVE1");
		assert_eq!(page[1].id, "TX0000");
	}

	#[tokio::test]
	async fn a_record_delivered_by_both_streams_is_stored_once() {
		let source = ScriptedSource::new(vec![vec![envelope("DUP1"), envelope("TX0001")]]);
		let history = history(&source);
		let epoch = history.ensure_ready().await.unwrap();

		let mut events = history.subscribe();
		source.push_live(payment_tx("DUP1"), success_meta());
		await_history_changed(&mut events).await;

		// The pull at the shifted offset still contains DUP1.
		history.request_next_batch(epoch).await.unwrap();

		let state = history.state.lock().await;
		let ids: Vec<&str> = state.records.iter().map(|r| r.id.as_str()).collect();
		assert_eq!(ids, vec!["DUP1", "TX0001"]);
		assert_eq!(state.cursor, 3);
	}

	#[tokio::test]
	async fn only_successful_payments_are_stored() {
		let trust_set = TransactionEnvelope {
			tx: json!({
				"hash": "TRUST1",
				"TransactionType": "TrustSet",
				"Account": ACCOUNT,
				"LimitAmount": { "value": "100", "currency": "USD", "issuer": ISSUER },
			}),
			meta: success_meta(),
			validated: true,
		};
		let failed_payment = TransactionEnvelope {
			tx: payment_tx("FAILED"),
			meta: json!({ "TransactionResult": "tecUNFUNDED" }),
			validated: true,
		};
		let source = ScriptedSource::new(vec![vec![trust_set, failed_payment, envelope("GOOD")]]);
		let history = history(&source);

		let page = history.page(1).await.unwrap();
		let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
		assert_eq!(ids, vec!["GOOD"]);

		// The excluded records still advanced the cursor.
		assert_eq!(history.state.lock().await.cursor, 3);
	}

	#[tokio::test]
	async fn pull_failures_propagate_to_the_reader() {
		let history = TransactionHistory::new(
			Arc::new(FailingSource),
			ACCOUNT,
			Arc::new(InMemoryDirectory::new()),
		);

		assert!(matches!(
			history.page(1).await,
			Err(HistoryError::RemoteFetch(_))
		));
	}

	#[tokio::test]
	async fn a_failed_initialization_can_be_retried() {
		let source = Arc::new(SubscribeFailSource {
			attempts: AtomicUsize::new(0),
		});
		let history =
			TransactionHistory::new(source.clone(), ACCOUNT, Arc::new(InMemoryDirectory::new()));

		assert!(history.page(1).await.is_err());
		assert!(history.page(1).await.is_err());
		assert_eq!(source.attempts.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn concurrent_first_reads_initialize_once() {
		let subscribe_gate = Arc::new(Semaphore::new(0));
		let source = ScriptedSource::with_gates(
			vec![envelopes(0..3)],
			None,
			Some(subscribe_gate.clone()),
		);
		let history = history(&source);

		let first = {
			let history = history.clone();
			tokio::spawn(async move { history.page(1).await })
		};
		let second = {
			let history = history.clone();
			tokio::spawn(async move { history.page(1).await })
		};

		while source.subscription_count() == 0 {
			yield_now().await;
		}
		// Let the second reader park on the in-progress initialization.
		for _ in 0..3 {
			yield_now().await;
		}
		subscribe_gate.add_permits(1);

		let first = first.await.unwrap().unwrap();
		let second = second.await.unwrap().unwrap();
		assert_eq!(source.subscription_count(), 1);
		assert_eq!(first.len(), 3);
		assert_eq!(second.len(), 3);
	}

	#[tokio::test]
	async fn teardown_fences_out_an_inflight_pull() {
		let fetch_gate = Arc::new(Semaphore::new(0));
		let source =
			ScriptedSource::with_gates(vec![envelopes(0..10)], Some(fetch_gate.clone()), None);
		let history = history(&source);

		let reader = {
			let history = history.clone();
			tokio::spawn(async move { history.page(1).await })
		};
		while source.fetch_count() == 0 {
			yield_now().await;
		}

		history.shutdown().await;
		fetch_gate.add_permits(1);

		assert!(matches!(
			reader.await.unwrap(),
			Err(HistoryError::SessionClosed)
		));
		{
			let state = history.state.lock().await;
			assert_eq!(state.records.len(), 0);
			assert_eq!(state.cursor, 0);
		}
		assert_eq!(source.fetch_count(), 1);

		// The next read starts a fresh session from offset zero; the script
		// is drained, so the first pull confirms exhaustion.
		fetch_gate.add_permits(10);
		assert!(matches!(
			history.page(1).await,
			Err(HistoryError::PageOutOfRange { page: 1 })
		));
		assert_eq!(source.subscription_count(), 2);
	}

	#[tokio::test]
	async fn live_payments_notify_observers_and_the_address_book() {
		let source = ScriptedSource::new(vec![]);
		let directory = Arc::new(InMemoryDirectory::new());
		let history = TransactionHistory::new(source.clone(), ACCOUNT, directory.clone());
		history.ensure_ready().await.unwrap();

		let mut events = history.subscribe();
		source.push_live(
			json!({
				"hash": "ISSUED1",
				"TransactionType": "Payment",
				"Account": PEER,
				"Destination": ACCOUNT,
				"Amount": { "value": "12.5", "currency": "USD", "issuer": ISSUER },
			}),
			success_meta(),
		);

		match events.recv().await.unwrap() {
			HistoryEvent::PaymentReceived(detail) => {
				assert_eq!(detail.counterparty, PEER);
				assert_eq!(detail.amount.issuer(), Some(ISSUER));
			}
			other => panic!("expected a payment notification, got {:?}", other),
		}
		assert!(matches!(
			events.recv().await.unwrap(),
			HistoryEvent::HistoryChanged
		));

		assert!(directory.contains(PEER));
		assert!(directory.contains(ISSUER));
	}
}
