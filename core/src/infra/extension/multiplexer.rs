//! Request/response correlation for one execution context
//!
//! Every request gets a fresh ID from a process-wide counter and a listener in the pending
//! table. A single router task drains the context's outgoing channel and hands each message to
//! the listener registered under its ID, detaching that listener on the terminal message.

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex, MutexGuard, PoisonError,
	},
};

use async_channel as chan;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{trace, warn};

use crate::Error;

use super::types::{ContextMessage, HostRequest, MessageKind, RequestId, RequestKind};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Draws the next ID from the process-wide, strictly increasing counter.
pub fn next_request_id() -> RequestId {
	NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

type PendingTable = Arc<Mutex<HashMap<RequestId, mpsc::UnboundedSender<MessageKind>>>>;

fn lock(
	pending: &PendingTable,
) -> MutexGuard<'_, HashMap<RequestId, mpsc::UnboundedSender<MessageKind>>> {
	// The table holds no invariants a panicking holder could break
	pending.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct Multiplexer {
	requests_tx: chan::Sender<HostRequest>,
	pending: PendingTable,
	router: JoinHandle<()>,
}

impl Multiplexer {
	/// Must be called from within a tokio runtime, the router runs as a task on it.
	pub fn new(
		requests_tx: chan::Sender<HostRequest>,
		messages_rx: chan::Receiver<ContextMessage>,
	) -> Self {
		let pending = PendingTable::default();
		let router = tokio::spawn(route_messages(messages_rx, Arc::clone(&pending)));

		Self {
			requests_tx,
			pending,
			router,
		}
	}

	pub async fn send(
		&self,
		kind: RequestKind,
		payload: Vec<u8>,
	) -> Result<ResponseStream, Error> {
		let id = next_request_id();
		let (responses_tx, responses_rx) = mpsc::unbounded_channel();

		// Listener goes in before the request leaves, so no reply can slip past it
		lock(&self.pending).insert(id, responses_tx);

		if self
			.requests_tx
			.send(HostRequest { id, kind, payload })
			.await
			.is_err()
		{
			lock(&self.pending).remove(&id);
			return Err(Error::Cancelled(id));
		}

		trace!(request_id = id, ?kind, "Request sent");

		Ok(ResponseStream {
			id,
			rx: responses_rx,
		})
	}

	/// Number of requests still waiting on a terminal message.
	pub fn pending_count(&self) -> usize {
		lock(&self.pending).len()
	}

	/// Stops accepting requests and abandons every pending one.
	pub fn close(&self) {
		self.requests_tx.close();
		self.router.abort();
		lock(&self.pending).clear();
	}
}

impl Drop for Multiplexer {
	fn drop(&mut self) {
		self.close();
	}
}

async fn route_messages(messages_rx: chan::Receiver<ContextMessage>, pending: PendingTable) {
	while let Ok(message) = messages_rx.recv().await {
		dispatch(&pending, message);
	}

	// The context is gone, nobody will ever answer what is left
	lock(&pending).clear();
}

fn dispatch(pending: &PendingTable, ContextMessage { id, kind }: ContextMessage) {
	let mut pending = lock(pending);

	let Some(listener) = pending.get(&id) else {
		warn!(request_id = id, "Dropping message for unknown request");
		return;
	};

	let is_terminal = kind.is_terminal();
	if listener.send(kind).is_err() || is_terminal {
		pending.remove(&id);
	}
}

/// Responses for one request, in the order the context emitted them.
#[derive(Debug)]
pub struct ResponseStream {
	id: RequestId,
	rx: mpsc::UnboundedReceiver<MessageKind>,
}

impl ResponseStream {
	#[must_use]
	pub const fn id(&self) -> RequestId {
		self.id
	}

	/// Next message for this request, or [`Error::Cancelled`] once the context is gone.
	pub async fn next(&mut self) -> Result<MessageKind, Error> {
		self.rx.recv().await.ok_or(Error::Cancelled(self.id))
	}
}
