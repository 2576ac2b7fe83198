//! Every knob enumerated in the spec's "Configuration options" section,
//! bundled into one plain-data struct with sane defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

bitflags::bitflags! {
	/// Selects which asynchronous event streams a [`crate::session::Session`] populates.
	#[derive(Default)]
	pub struct Intents: u32 {
		const FRIENDS = 0b0001;
		const CHAT = 0b0010;
		const TRADES = 0b0100;
		const PERSONAS = 0b1000;
		const ALL = Self::FRIENDS.bits | Self::CHAT.bits | Self::TRADES.bits | Self::PERSONAS.bits;
	}
}

impl Serialize for Intents {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_u32(self.bits())
	}
}

impl<'de> Deserialize<'de> for Intents {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let bits = u32::deserialize(deserializer)?;
		Ok(Intents::from_bits_truncate(bits))
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SteamGuardConfig {
	pub poll_interval_seconds: f64,
	pub poll_interval_max: f64,
	pub reconnect_base_seconds: f64,
	pub reconnect_cap_seconds: f64,
	pub kick_others_on_reconnect: bool,
	pub replay_historical_trades: bool,
	pub cm_cache_path: Option<PathBuf>,
	pub sentry_path: PathBuf,
	pub intents: Intents,
}

impl Default for SteamGuardConfig {
	fn default() -> Self {
		SteamGuardConfig {
			poll_interval_seconds: 5.0,
			poll_interval_max: 30.0,
			reconnect_base_seconds: 1.0,
			reconnect_cap_seconds: 60.0,
			kick_others_on_reconnect: true,
			replay_historical_trades: false,
			cm_cache_path: None,
			sentry_path: PathBuf::from("sentry.bin"),
			intents: Intents::ALL,
		}
	}
}

impl SteamGuardConfig {
	pub fn poll_interval_seconds(mut self, v: f64) -> Self {
		self.poll_interval_seconds = v.max(1.0);
		self
	}

	pub fn poll_interval_max(mut self, v: f64) -> Self {
		self.poll_interval_max = v;
		self
	}

	pub fn reconnect_base_seconds(mut self, v: f64) -> Self {
		self.reconnect_base_seconds = v;
		self
	}

	pub fn reconnect_cap_seconds(mut self, v: f64) -> Self {
		self.reconnect_cap_seconds = v;
		self
	}

	pub fn kick_others_on_reconnect(mut self, v: bool) -> Self {
		self.kick_others_on_reconnect = v;
		self
	}

	pub fn replay_historical_trades(mut self, v: bool) -> Self {
		self.replay_historical_trades = v;
		self
	}

	pub fn cm_cache_path(mut self, v: PathBuf) -> Self {
		self.cm_cache_path = Some(v);
		self
	}

	pub fn sentry_path(mut self, v: PathBuf) -> Self {
		self.sentry_path = v;
		self
	}

	pub fn intents(mut self, v: Intents) -> Self {
		self.intents = v;
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_match_spec() {
		let cfg = SteamGuardConfig::default();
		assert_eq!(cfg.poll_interval_seconds, 5.0);
		assert_eq!(cfg.poll_interval_max, 30.0);
		assert_eq!(cfg.reconnect_base_seconds, 1.0);
		assert_eq!(cfg.reconnect_cap_seconds, 60.0);
		assert!(cfg.kick_others_on_reconnect);
		assert!(!cfg.replay_historical_trades);
		assert!(cfg.cm_cache_path.is_none());
		assert_eq!(cfg.intents, Intents::ALL);
	}

	#[test]
	fn builder_overrides_apply() {
		let cfg = SteamGuardConfig::default()
			.poll_interval_seconds(2.0)
			.replay_historical_trades(true);
		assert_eq!(cfg.poll_interval_seconds, 2.0);
		assert!(cfg.replay_historical_trades);
	}
}
