//! Mobile confirmation engine: lists and resolves Steam Guard mobile
//! confirmations, computed the same way `steamapi.rs`'s existing
//! `get_confirmations`/`resolve_confirmation` endpoints expect.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::api_responses::RawConfirmation;
use crate::crypto::{confirmation_code, device_id};
use crate::error::ConfirmationError;
use crate::steamapi::SteamApiClient;

const TOTP_WINDOW: Duration = Duration::from_secs(30);

/// A pending mobile confirmation, as returned by `mobileconf/getlist`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
	pub id: String,
	pub nonce: String,
	pub kind: u32,
	pub creator_id: u64,
	pub headline: String,
}

impl From<RawConfirmation> for Confirmation {
	fn from(raw: RawConfirmation) -> Self {
		Confirmation {
			id: raw.id,
			nonce: raw.nonce,
			kind: raw.kind,
			creator_id: raw.creator_id.parse().unwrap_or(0),
			headline: raw.headline,
		}
	}
}

fn unix_now() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Everything needed to compute confirmation codes and address requests for
/// one account.
pub struct ConfirmationEngine<'a> {
	api: &'a SteamApiClient,
	identity_secret: String,
	steam_id: u64,
	device_id: String,
}

impl<'a> ConfirmationEngine<'a> {
	pub fn new(api: &'a SteamApiClient, steam_id: u64, identity_secret: String) -> Self {
		ConfirmationEngine {
			api,
			identity_secret,
			device_id: device_id(steam_id),
			steam_id,
		}
	}

	/// Lists every pending confirmation for the account.
	pub fn list(&self) -> Result<Vec<Confirmation>, ConfirmationError> {
		let now = unix_now();
		let code = confirmation_code(&self.identity_secret, "conf", now)?;
		let resp = self
			.api
			.get_confirmations(&self.device_id, self.steam_id, &code, now)
			.map_err(|_| ConfirmationError::ParseFailed)?;
		if !resp.success {
			return Err(ConfirmationError::ParseFailed);
		}
		Ok(resp.confirmations.into_iter().map(Confirmation::from).collect())
	}

	/// Finds the pending confirmation created for `trade_id`, if any.
	pub fn match_for_trade(&self, trade_id: u64) -> Result<Option<Confirmation>, ConfirmationError> {
		Ok(self.list()?.into_iter().find(|c| c.creator_id == trade_id))
	}

	/// Accepts or denies `confirmation`, retrying once after sleeping one
	/// TOTP window if Steam reports the code was replayed.
	pub fn resolve(&self, confirmation: &Confirmation, allow: bool) -> Result<(), ConfirmationError> {
		let op = if allow { "allow" } else { "cancel" };
		match self.try_resolve(confirmation, op) {
			Ok(()) => Ok(()),
			Err(ConfirmationError::Replayed) => {
				warn!("confirmation code was replayed, retrying after one TOTP window");
				thread::sleep(TOTP_WINDOW);
				self.try_resolve(confirmation, op)
			}
			Err(e) => Err(e),
		}
	}

	fn try_resolve(&self, confirmation: &Confirmation, op: &str) -> Result<(), ConfirmationError> {
		let now = unix_now();
		let code = confirmation_code(&self.identity_secret, op, now)?;
		let resp = self
			.api
			.resolve_confirmation(
				&self.device_id,
				self.steam_id,
				op,
				&code,
				now,
				&confirmation.id,
				&confirmation.nonce,
			)
			.map_err(|_| ConfirmationError::ParseFailed)?;
		if resp.success {
			debug!("resolved confirmation {} ({})", confirmation.id, op);
			return Ok(());
		}
		match resp.message.as_deref() {
			Some(msg) if msg.to_lowercase().contains("replayed") => Err(ConfirmationError::Replayed),
			_ => Err(ConfirmationError::ParseFailed),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn raw_confirmation_converts_creator_id_to_u64() {
		let raw = RawConfirmation {
			id: "1".to_string(),
			nonce: "abc".to_string(),
			kind: 2,
			creator_id: "9001".to_string(),
			type_name: String::new(),
			headline: String::new(),
		};
		let conf: Confirmation = raw.into();
		assert_eq!(conf.creator_id, 9001);
	}
}
