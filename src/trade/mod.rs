//! Trade engine: polls `IEconService.GetTradeOffers`, diffs against the last
//! snapshot, and emits each trade transition exactly once.

pub mod types;

use std::collections::HashMap;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::confirmation::ConfirmationEngine;
use crate::error::{ConfirmationError, TradeError};
use crate::ratelimit::RateLimiter;
use crate::steamapi::SteamApiClient;
use types::{TradeEvent, TradeOffer, TradeState};

const HTTP_500_RETRY_DELAY: Duration = Duration::from_secs(15);
const CUTOFF_MARGIN: u64 = 3600;
const STEAMCOMMUNITY_HOST: &str = "steamcommunity.com";

fn unix_now() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn anyhow_to_trade_error(e: anyhow::Error) -> TradeError {
	match e.downcast::<reqwest::Error>() {
		Ok(reqwest_err) => TradeError::Http(reqwest_err),
		Err(e) => TradeError::SteamError(e.to_string()),
	}
}

/// The pure snapshot/diff half of the engine: no network, no clock besides
/// what's passed in, so it's exercised directly in tests without a live
/// `SteamApiClient`.
#[derive(Default)]
struct SnapshotDiffer {
	snapshot: HashMap<u64, TradeOffer>,
	bootstrapped: bool,
	replay_historical: bool,
}

impl SnapshotDiffer {
	fn new(replay_historical: bool) -> Self {
		SnapshotDiffer {
			snapshot: HashMap::new(),
			bootstrapped: false,
			replay_historical,
		}
	}

	/// Diffs `incoming` against the current snapshot and returns the events
	/// the transition produced. Does not mutate the snapshot; call
	/// [`SnapshotDiffer::absorb`] afterwards.
	fn diff(&self, incoming: &HashMap<u64, TradeOffer>, now: u64) -> Vec<TradeEvent> {
		let mut events = Vec::new();
		let is_bootstrap = !self.bootstrapped;

		for offer in incoming.values() {
			match self.snapshot.get(&offer.id) {
				None => {
					if let Some(before_id) = offer.countered_from {
						if let Some(before) = self.snapshot.get(&before_id) {
							if before.state == TradeState::Countered {
								events.push(TradeEvent::Counter(before.clone(), offer.clone()));
							}
						}
					}
					if is_bootstrap && offer.state.is_terminal() && !self.replay_historical {
						continue;
					}
					if offer.is_our_offer {
						events.push(TradeEvent::Send(offer.clone()));
					} else {
						events.push(TradeEvent::Receive(offer.clone()));
					}
				}
				Some(prev) => {
					if prev.state == offer.state {
						continue;
					}
					match offer.state {
						TradeState::Countered => {
							// The pairing event fires once the replacement offer
							// shows up (see the `None` branch above); a bare
							// Active -> Countered transition has no event of
							// its own.
						}
						TradeState::Accepted => events.push(TradeEvent::Accept(offer.clone())),
						TradeState::Declined => events.push(TradeEvent::Decline(offer.clone())),
						TradeState::Canceled | TradeState::CanceledBySecondFactor => {
							events.push(TradeEvent::Cancel(offer.clone()))
						}
						TradeState::Expired => events.push(TradeEvent::Expire(offer.clone())),
						_ => {}
					}
				}
			}
		}

		for (id, prev) in &self.snapshot {
			if incoming.contains_key(id) || prev.state.is_terminal() {
				continue;
			}
			if prev.has_expired(now) {
				events.push(TradeEvent::Expire(prev.clone()));
			}
			// else: retained unchanged, a poll-window artifact.
		}

		events
	}

	/// Replaces the snapshot with `incoming`, dropping offers that were
	/// terminal or expired as of `now` and retaining everything else
	/// (including poll-window artifacts not present in `incoming`).
	fn absorb(&mut self, incoming: HashMap<u64, TradeOffer>, now: u64) {
		let retained: Vec<TradeOffer> = self
			.snapshot
			.drain()
			.filter(|(id, prev)| !incoming.contains_key(id) && !prev.state.is_terminal() && !prev.has_expired(now))
			.map(|(_, offer)| offer)
			.collect();
		self.snapshot = incoming;
		for offer in retained {
			self.snapshot.insert(offer.id, offer);
		}
		self.bootstrapped = true;
	}
}

/// Owns the trade-offer snapshot and drives poll/diff/emit.
pub struct TradeEngine<'a> {
	api: &'a SteamApiClient,
	api_key: String,
	confirmations: Option<ConfirmationEngine<'a>>,
	limiter: &'a RateLimiter,
	differ: SnapshotDiffer,
	last_poll_time: u64,
	poll_interval: Duration,
	min_interval: Duration,
	max_interval: Duration,
}

impl<'a> TradeEngine<'a> {
	pub fn new(
		api: &'a SteamApiClient,
		api_key: String,
		confirmations: Option<ConfirmationEngine<'a>>,
		limiter: &'a RateLimiter,
		poll_interval_seconds: f64,
		poll_interval_max: f64,
		replay_historical: bool,
	) -> Self {
		TradeEngine {
			api,
			api_key,
			confirmations,
			limiter,
			differ: SnapshotDiffer::new(replay_historical),
			last_poll_time: 0,
			poll_interval: Duration::from_secs_f64(poll_interval_seconds.max(1.0)),
			min_interval: Duration::from_secs_f64(poll_interval_seconds.max(1.0)),
			max_interval: Duration::from_secs_f64(poll_interval_max),
		}
	}

	/// Runs the poll loop until `should_stop` returns `true`, invoking
	/// `on_event` for every event emitted by each poll. `should_stop` is
	/// checked between polls, not mid-poll.
	pub fn run(&mut self, mut on_event: impl FnMut(TradeEvent), should_stop: impl Fn() -> bool) {
		while !should_stop() {
			match self.poll_once() {
				Ok(events) => {
					if events.is_empty() {
						self.poll_interval = (self.poll_interval * 2).min(self.max_interval);
					} else {
						self.poll_interval = self.min_interval;
					}
					for event in events {
						on_event(event);
					}
					thread::sleep(self.poll_interval);
				}
				Err(e) => {
					warn!("trade poll failed, retrying once after a fixed delay: {}", e);
					thread::sleep(HTTP_500_RETRY_DELAY);
					match self.poll_once() {
						Ok(events) => {
							for event in events {
								on_event(event);
							}
						}
						Err(e) => warn!("trade poll retry also failed: {}", e),
					}
				}
			}
		}
	}

	/// Performs one poll, diffs it against the snapshot, and returns the
	/// events the transition produced. Does not sleep or retry; callers that
	/// want the full poll-loop behavior should use [`TradeEngine::run`].
	pub fn poll_once(&mut self) -> Result<Vec<TradeEvent>, TradeError> {
		self.limiter.acquire(STEAMCOMMUNITY_HOST);
		let now = unix_now();
		let cutoff = self.last_poll_time.saturating_sub(CUTOFF_MARGIN);
		let response = self
			.api
			.get_trade_offers(&self.api_key, cutoff)
			.map_err(anyhow_to_trade_error)?;

		let mut incoming: HashMap<u64, TradeOffer> = HashMap::new();
		for raw in response.trade_offers_sent.into_iter().chain(response.trade_offers_received) {
			let offer = TradeOffer::from(raw);
			incoming.insert(offer.id, offer);
		}

		let events = self.differ.diff(&incoming, now);

		if let Some(newest) = incoming.values().map(|o| o.time_updated).max() {
			self.last_poll_time = self.last_poll_time.max(newest);
		}
		self.differ.absorb(incoming, now);

		debug!("trade poll produced {} event(s)", events.len());
		Ok(events)
	}

	/// Accepts `trade`, resolving a mobile confirmation if Steam requires one.
	pub fn accept(&self, trade: &TradeOffer) -> Result<(), TradeError> {
		if trade.state.is_terminal() {
			return Err(TradeError::AlreadyClosed);
		}
		self.limiter.acquire(STEAMCOMMUNITY_HOST);
		let resp = self
			.api
			.accept_trade_offer(&trade.id.to_string())
			.map_err(anyhow_to_trade_error)?;
		if let Some(err) = resp.error {
			return Err(TradeError::SteamError(err));
		}
		if resp.needs_mobile_confirmation {
			let confirmations = self
				.confirmations
				.as_ref()
				.ok_or_else(|| TradeError::SteamError("offer needs confirmation but none is configured".to_string()))?;
			match confirmations.match_for_trade(trade.id)? {
				Some(conf) => confirmations.resolve(&conf, true)?,
				None => return Err(TradeError::Confirmation(ConfirmationError::NotFound(trade.id))),
			}
		}
		info!("accepted trade offer {}", trade.id);
		Ok(())
	}

	pub fn decline(&self, trade: &TradeOffer) -> Result<(), TradeError> {
		if trade.state.is_terminal() {
			return Err(TradeError::AlreadyClosed);
		}
		self.limiter.acquire(STEAMCOMMUNITY_HOST);
		let resp = self
			.api
			.decline_trade_offer(&trade.id.to_string())
			.map_err(anyhow_to_trade_error)?;
		if let Some(err) = resp.error {
			return Err(TradeError::SteamError(err));
		}
		Ok(())
	}

	pub fn cancel(&self, trade: &TradeOffer) -> Result<(), TradeError> {
		if trade.state.is_terminal() {
			return Err(TradeError::AlreadyClosed);
		}
		self.limiter.acquire(STEAMCOMMUNITY_HOST);
		let resp = self
			.api
			.cancel_trade_offer(&trade.id.to_string())
			.map_err(anyhow_to_trade_error)?;
		if let Some(err) = resp.error {
			return Err(TradeError::SteamError(err));
		}
		Ok(())
	}

	/// Counters `trade`, replacing it with a fresh offer carrying `items_to_give`/`items_to_receive`.
	pub fn counter(
		&self,
		trade: &TradeOffer,
		items_to_give: &[types::Asset],
		items_to_receive: &[types::Asset],
	) -> Result<(), TradeError> {
		if trade.state.is_terminal() {
			return Err(TradeError::AlreadyClosed);
		}
		self.limiter.acquire(STEAMCOMMUNITY_HOST);
		let resp = self
			.api
			.counter_trade_offer(
				&trade.id.to_string(),
				trade.accountid_other as u64,
				items_to_give,
				items_to_receive,
				"",
			)
			.map_err(anyhow_to_trade_error)?;
		if let Some(err) = resp.error {
			return Err(TradeError::SteamError(err));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn offer(id: u64, state: TradeState, is_our_offer: bool, countered_from: Option<u64>) -> TradeOffer {
		TradeOffer {
			id,
			accountid_other: 1,
			message: String::new(),
			state,
			items_to_give: vec![],
			items_to_receive: vec![],
			is_our_offer,
			time_created: 0,
			time_updated: 0,
			expiration_time: 0,
			countered_from,
		}
	}

	#[test]
	fn first_poll_emits_receive_for_a_non_terminal_offer() {
		let differ = SnapshotDiffer::new(false);
		let mut incoming = HashMap::new();
		incoming.insert(1, offer(1, TradeState::Active, false, None));
		let events = differ.diff(&incoming, 0);
		assert_eq!(events, vec![TradeEvent::Receive(offer(1, TradeState::Active, false, None))]);
	}

	#[test]
	fn first_poll_suppresses_already_terminal_offers_by_default() {
		let differ = SnapshotDiffer::new(false);
		let mut incoming = HashMap::new();
		incoming.insert(1, offer(1, TradeState::Accepted, false, None));
		let events = differ.diff(&incoming, 0);
		assert!(events.is_empty());
	}

	#[test]
	fn active_to_accepted_emits_exactly_one_accept_event() {
		let mut differ = SnapshotDiffer::new(false);
		differ.snapshot.insert(1, offer(1, TradeState::Active, false, None));
		differ.bootstrapped = true;
		let mut incoming = HashMap::new();
		incoming.insert(1, offer(1, TradeState::Accepted, false, None));
		let events = differ.diff(&incoming, 0);
		assert_eq!(events, vec![TradeEvent::Accept(offer(1, TradeState::Accepted, false, None))]);
	}

	#[test]
	fn replaying_an_identical_poll_emits_nothing_the_second_time() {
		let mut differ = SnapshotDiffer::new(false);
		let mut incoming = HashMap::new();
		incoming.insert(1, offer(1, TradeState::Active, false, None));
		differ.diff(&incoming, 0);
		differ.absorb(incoming.clone(), 0);
		let events = differ.diff(&incoming, 0);
		assert!(events.is_empty());
	}

	#[test]
	fn counter_pairs_the_old_and_new_offer_and_still_emits_receive() {
		let mut differ = SnapshotDiffer::new(false);
		differ.snapshot.insert(1, offer(1, TradeState::Countered, true, None));
		differ.bootstrapped = true;
		let mut incoming = HashMap::new();
		incoming.insert(2, offer(2, TradeState::Active, false, Some(1)));
		let events = differ.diff(&incoming, 0);
		assert_eq!(
			events,
			vec![
				TradeEvent::Counter(offer(1, TradeState::Countered, true, None), offer(2, TradeState::Active, false, Some(1))),
				TradeEvent::Receive(offer(2, TradeState::Active, false, Some(1))),
			]
		);
	}

	#[test]
	fn non_expired_missing_offer_is_retained_as_a_poll_window_artifact() {
		let mut differ = SnapshotDiffer::new(false);
		let mut active = offer(1, TradeState::Active, false, None);
		active.expiration_time = 1_000_000;
		differ.snapshot.insert(1, active);
		differ.bootstrapped = true;
		let events = differ.diff(&HashMap::new(), 0);
		assert!(events.is_empty());
		differ.absorb(HashMap::new(), 0);
		assert!(differ.snapshot.contains_key(&1));
	}

	#[test]
	fn expired_missing_offer_emits_expire_and_is_dropped() {
		let mut differ = SnapshotDiffer::new(false);
		let mut active = offer(1, TradeState::Active, false, None);
		active.expiration_time = 50;
		differ.snapshot.insert(1, active);
		differ.bootstrapped = true;
		let events = differ.diff(&HashMap::new(), 100);
		assert_eq!(events.len(), 1);
		assert!(matches!(events[0], TradeEvent::Expire(_)));
		differ.absorb(HashMap::new(), 100);
		assert!(!differ.snapshot.contains_key(&1));
	}
}
