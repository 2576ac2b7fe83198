//! Dispatcher: routes replies to waiting callers by job-id, and fans unsolicited
//! messages out to subscribers by message-type tag.
//!
//! Runs entirely on the session's single driver thread (see `session.rs`), so
//! the correlation map and subscriber table never need a lock of their own —
//! the driver thread is their only caller, matching the cooperative scheduling
//! model described for threaded emulation.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::time::{Duration, Instant};

use crate::error::RpcError;
use crate::message::{Message, MessageKind};

/// One outstanding RPC slot. Resolved by the driver thread either with the
/// matching response, a timeout, or a disconnect sentinel.
struct PendingSlot {
	reply_tx: Sender<Result<Message, RpcError>>,
	deadline: Option<Instant>,
}

/// Delivered to a subscriber on every frame matching its tag, or `Closed` once
/// when the session tears down.
#[derive(Debug, Clone)]
pub enum Delivered {
	Frame(Message),
	Closed,
}

struct Subscriber {
	tx: Sender<Delivered>,
}

/// Owns the correlation map and subscriber table for one session lifetime.
#[derive(Default)]
pub struct Dispatcher {
	pending: HashMap<u64, PendingSlot>,
	subscribers: HashMap<MessageKind, Vec<Subscriber>>,
}

impl Dispatcher {
	pub fn new() -> Self {
		Dispatcher::default()
	}

	/// Registers a pending slot for `job_id`, optionally expiring at `deadline`.
	pub fn register(&mut self, job_id: u64, reply_tx: Sender<Result<Message, RpcError>>, deadline: Option<Instant>) {
		self.pending.insert(job_id, PendingSlot { reply_tx, deadline });
	}

	/// Removes a pending slot without resolving it (used by explicit cancellation).
	pub fn cancel(&mut self, job_id: u64) {
		self.pending.remove(&job_id);
	}

	/// Subscribes to every frame whose tag matches `kind`.
	pub fn subscribe(&mut self, kind: MessageKind, tx: Sender<Delivered>) {
		self.subscribers.entry(kind).or_default().push(Subscriber { tx });
	}

	/// Drops expired pending slots, resolving each with `Timeout`.
	pub fn sweep_timeouts(&mut self, now: Instant) {
		let expired: Vec<u64> = self
			.pending
			.iter()
			.filter(|(_, slot)| slot.deadline.map(|d| now >= d).unwrap_or(false))
			.map(|(id, _)| *id)
			.collect();
		for job_id in expired {
			if let Some(slot) = self.pending.remove(&job_id) {
				let _ = slot.reply_tx.send(Err(RpcError::Timeout));
			}
		}
	}

	/// Routes one decoded message: to the matching pending slot if its
	/// `target_job_id` is set and known, otherwise fanned out to subscribers
	/// of its tag.
	pub fn dispatch(&mut self, message: Message) {
		if message.target_job_id != crate::message::INVALID_JOB_ID {
			if let Some(slot) = self.pending.remove(&message.target_job_id) {
				let _ = slot.reply_tx.send(Ok(message));
				return;
			}
		}
		if let Some(subs) = self.subscribers.get(&message.kind) {
			for sub in subs {
				// A blocked/disconnected subscriber must never stall the
				// others; send() on a full bounded channel would block, so
				// subscriber channels are expected to be unbounded or
				// otherwise non-blocking.
				let _ = sub.tx.send(Delivered::Frame(message.clone()));
			}
		}
	}

	/// Tears the dispatcher down: every pending slot sees `Disconnected`-style
	/// resolution (via `RpcError` mapped by the caller) and every subscriber
	/// sees one final `Closed` notification.
	pub fn close(&mut self) {
		for (_, slot) in self.pending.drain() {
			let _ = slot.reply_tx.send(Err(RpcError::Disconnected));
		}
		for (_, subs) in self.subscribers.drain() {
			for sub in subs {
				let _ = sub.tx.send(Delivered::Closed);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::mpsc::channel;
	use std::time::Duration;

	fn msg(kind: MessageKind, target_job_id: u64) -> Message {
		Message {
			kind,
			source_job_id: crate::message::INVALID_JOB_ID,
			target_job_id,
			steam_id: None,
			session_id: None,
			eresult: None,
			payload: vec![],
		}
	}

	#[test]
	fn routes_response_to_matching_pending_slot() {
		let mut dispatcher = Dispatcher::new();
		let (tx, rx) = channel();
		dispatcher.register(42, tx, None);
		dispatcher.dispatch(msg(MessageKind::Classic(751), 42));
		let result = rx.recv().unwrap();
		assert!(result.is_ok());
	}

	#[test]
	fn response_for_unknown_job_id_is_dropped_silently() {
		let mut dispatcher = Dispatcher::new();
		dispatcher.dispatch(msg(MessageKind::Classic(751), 999));
		// No panic, no registered slot to resolve: success is simply no-op.
	}

	#[test]
	fn fans_out_to_multiple_subscribers() {
		let mut dispatcher = Dispatcher::new();
		let (tx1, rx1) = channel();
		let (tx2, rx2) = channel();
		dispatcher.subscribe(MessageKind::Classic(766), tx1);
		dispatcher.subscribe(MessageKind::Classic(766), tx2);
		dispatcher.dispatch(msg(MessageKind::Classic(766), crate::message::INVALID_JOB_ID));
		assert!(matches!(rx1.recv().unwrap(), Delivered::Frame(_)));
		assert!(matches!(rx2.recv().unwrap(), Delivered::Frame(_)));
	}

	#[test]
	fn close_resolves_pending_as_disconnected_and_notifies_subscribers() {
		let mut dispatcher = Dispatcher::new();
		let (ptx, prx) = channel();
		let (stx, srx) = channel();
		dispatcher.register(1, ptx, None);
		dispatcher.subscribe(MessageKind::Classic(766), stx);
		dispatcher.close();
		assert!(matches!(prx.recv().unwrap(), Err(RpcError::Disconnected)));
		assert!(matches!(srx.recv().unwrap(), Delivered::Closed));
	}

	#[test]
	fn sweep_timeouts_resolves_expired_slots() {
		let mut dispatcher = Dispatcher::new();
		let (tx, rx) = channel();
		dispatcher.register(1, tx, Some(Instant::now() - Duration::from_secs(1)));
		dispatcher.sweep_timeouts(Instant::now());
		assert!(matches!(rx.recv().unwrap(), Err(RpcError::Timeout)));
	}

	#[test]
	fn out_of_order_responses_resolve_the_matching_job_id_each() {
		let mut dispatcher = Dispatcher::new();
		let mut receivers = Vec::new();
		for job_id in 1..=5u64 {
			let (tx, rx) = channel();
			dispatcher.register(job_id, tx, None);
			receivers.push((job_id, rx));
		}

		// Responses arrive in reverse order of the job IDs that were registered.
		for job_id in (1..=5u64).rev() {
			dispatcher.dispatch(msg(MessageKind::Classic(751), job_id));
		}

		for (job_id, rx) in receivers {
			let response = rx.recv().unwrap().unwrap();
			assert_eq!(response.target_job_id, job_id);
		}
	}
}
