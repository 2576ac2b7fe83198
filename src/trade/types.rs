//! Domain trade types, converted from the wire shapes in `api_responses.rs`.

use crate::api_responses::{RawAsset, RawTradeOffer};

/// Mirrors Steam's `ETradeOfferState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeState {
	Invalid,
	Active,
	Accepted,
	Countered,
	Expired,
	Canceled,
	Declined,
	InvalidItems,
	CreatedNeedsConfirmation,
	CanceledBySecondFactor,
	InEscrow,
	Unknown(u8),
}

impl TradeState {
	pub fn is_terminal(self) -> bool {
		!matches!(
			self,
			TradeState::Active | TradeState::CreatedNeedsConfirmation | TradeState::Unknown(_)
		)
	}
}

impl From<u8> for TradeState {
	fn from(value: u8) -> Self {
		match value {
			1 => TradeState::Invalid,
			2 => TradeState::Active,
			3 => TradeState::Accepted,
			4 => TradeState::Countered,
			5 => TradeState::Expired,
			6 => TradeState::Canceled,
			7 => TradeState::Declined,
			8 => TradeState::InvalidItems,
			9 => TradeState::CreatedNeedsConfirmation,
			10 => TradeState::CanceledBySecondFactor,
			11 => TradeState::InEscrow,
			other => TradeState::Unknown(other),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
	pub appid: u32,
	pub contextid: u64,
	pub assetid: u64,
	pub classid: u64,
	pub instanceid: u64,
	pub amount: u64,
}

impl From<RawAsset> for Asset {
	fn from(raw: RawAsset) -> Self {
		Asset {
			appid: raw.appid,
			contextid: raw.contextid,
			assetid: raw.assetid,
			classid: raw.classid,
			instanceid: raw.instanceid,
			amount: raw.amount,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeOffer {
	pub id: u64,
	pub accountid_other: u32,
	pub message: String,
	pub state: TradeState,
	pub items_to_give: Vec<Asset>,
	pub items_to_receive: Vec<Asset>,
	pub is_our_offer: bool,
	pub time_created: u64,
	pub time_updated: u64,
	pub expiration_time: u64,
	pub countered_from: Option<u64>,
}

impl TradeOffer {
	pub fn has_expired(&self, now: u64) -> bool {
		self.expiration_time != 0 && self.expiration_time <= now
	}
}

impl From<RawTradeOffer> for TradeOffer {
	fn from(raw: RawTradeOffer) -> Self {
		TradeOffer {
			id: raw.tradeofferid.parse().unwrap_or(0),
			accountid_other: raw.accountid_other,
			message: raw.message,
			state: TradeState::from(raw.trade_offer_state),
			items_to_give: raw.items_to_give.into_iter().map(Asset::from).collect(),
			items_to_receive: raw.items_to_receive.into_iter().map(Asset::from).collect(),
			is_our_offer: raw.is_our_offer,
			time_created: raw.time_created,
			time_updated: raw.time_updated,
			expiration_time: raw.expiration_time,
			countered_from: raw.trade_offer_id_countered.and_then(|s| s.parse().ok()),
		}
	}
}

/// Events the trade engine emits exactly once per offer/transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeEvent {
	Receive(TradeOffer),
	Send(TradeOffer),
	Accept(TradeOffer),
	Decline(TradeOffer),
	Cancel(TradeOffer),
	Expire(TradeOffer),
	/// `(before, after)`: the countered offer and the new offer it was replaced by.
	Counter(TradeOffer, TradeOffer),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn terminal_states_are_classified_correctly() {
		assert!(!TradeState::Active.is_terminal());
		assert!(!TradeState::CreatedNeedsConfirmation.is_terminal());
		assert!(TradeState::Accepted.is_terminal());
		assert!(TradeState::Declined.is_terminal());
		assert!(TradeState::Expired.is_terminal());
	}

	#[test]
	fn has_expired_respects_a_zero_expiration_time() {
		let mut offer = TradeOffer {
			id: 1,
			accountid_other: 2,
			message: String::new(),
			state: TradeState::Active,
			items_to_give: vec![],
			items_to_receive: vec![],
			is_our_offer: false,
			time_created: 0,
			time_updated: 0,
			expiration_time: 0,
			countered_from: None,
		};
		assert!(!offer.has_expired(9_999_999_999));
		offer.expiration_time = 100;
		assert!(offer.has_expired(100));
		assert!(!offer.has_expired(99));
	}
}
