//! Bidirectional mapping between the 64-bit SteamID and its textual forms.
//!
//! Layout (MSB to LSB): `universe:8 | type:4 | instance:20 | account_id:32`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SteamIdError {
	#[error("steamid is zero, which is never valid")]
	Zero,
	#[error("could not parse steamid from {0:?}")]
	BadFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Universe {
	Invalid = 0,
	Public = 1,
	Beta = 2,
	Internal = 3,
	Dev = 4,
	Rc = 5,
}

impl Universe {
	fn from_u8(v: u8) -> Universe {
		match v {
			1 => Universe::Public,
			2 => Universe::Beta,
			3 => Universe::Internal,
			4 => Universe::Dev,
			5 => Universe::Rc,
			_ => Universe::Invalid,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AccountType {
	Invalid = 0,
	Individual = 1,
	Multiseat = 2,
	GameServer = 3,
	AnonGameServer = 4,
	Pending = 5,
	ContentServer = 6,
	Clan = 7,
	Chat = 8,
	ConsoleUser = 9,
	AnonUser = 10,
}

impl AccountType {
	fn from_u8(v: u8) -> AccountType {
		match v {
			1 => AccountType::Individual,
			2 => AccountType::Multiseat,
			3 => AccountType::GameServer,
			4 => AccountType::AnonGameServer,
			5 => AccountType::Pending,
			6 => AccountType::ContentServer,
			7 => AccountType::Clan,
			8 => AccountType::Chat,
			9 => AccountType::ConsoleUser,
			10 => AccountType::AnonUser,
			_ => AccountType::Invalid,
		}
	}

	/// The letter used in the `STEAM_` and `[X:...]` textual forms.
	fn letter(self) -> char {
		match self {
			AccountType::Invalid => 'I',
			AccountType::Individual => 'U',
			AccountType::Multiseat => 'M',
			AccountType::GameServer => 'G',
			AccountType::AnonGameServer => 'A',
			AccountType::Pending => 'P',
			AccountType::ContentServer => 'C',
			AccountType::Clan => 'g',
			AccountType::Chat => 'T',
			AccountType::ConsoleUser => 'L',
			AccountType::AnonUser => 'a',
		}
	}
}

const ACCOUNT_ID_MASK: u64 = 0xFFFF_FFFF;
const INSTANCE_MASK: u64 = 0xFFFFF;
const DEFAULT_DESKTOP_INSTANCE: u32 = 1;

/// A Steam 64-bit identifier. Equality and ordering are on the full 64-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SteamID(u64);

impl SteamID {
	pub fn from_u64(id: u64) -> Result<SteamID, SteamIdError> {
		if id == 0 {
			return Err(SteamIdError::Zero);
		}
		Ok(SteamID(id))
	}

	pub fn new(universe: Universe, account_type: AccountType, instance: u32, account_id: u32) -> SteamID {
		let raw = ((universe as u64) << 56)
			| ((account_type as u64) << 52)
			| (((instance as u64) & INSTANCE_MASK) << 32)
			| (account_id as u64);
		SteamID(raw)
	}

	pub fn individual(universe: Universe, account_id: u32) -> SteamID {
		SteamID::new(universe, AccountType::Individual, DEFAULT_DESKTOP_INSTANCE, account_id)
	}

	pub fn as_u64(self) -> u64 {
		self.0
	}

	pub fn universe(self) -> Universe {
		Universe::from_u8(((self.0 >> 56) & 0xFF) as u8)
	}

	pub fn account_type(self) -> AccountType {
		AccountType::from_u8(((self.0 >> 52) & 0xF) as u8)
	}

	pub fn instance(self) -> u32 {
		((self.0 >> 32) & INSTANCE_MASK) as u32
	}

	pub fn account_id(self) -> u32 {
		(self.0 & ACCOUNT_ID_MASK) as u32
	}

	/// Renders the legacy `STEAM_X:Y:Z` form.
	pub fn to_steam2(self) -> String {
		let account_id = self.account_id();
		format!(
			"STEAM_{}:{}:{}",
			self.universe() as u8,
			account_id & 1,
			account_id >> 1
		)
	}

	/// Renders the modern `[X:1:N]` "steam3" form.
	pub fn to_steam3(self) -> String {
		let instance_suffix = match self.account_type() {
			AccountType::Individual if self.instance() != DEFAULT_DESKTOP_INSTANCE => {
				format!(":{}", self.instance())
			}
			AccountType::Chat | AccountType::Clan | AccountType::AnonGameServer | AccountType::GameServer => {
				format!(":{}", self.instance())
			}
			_ => String::new(),
		};
		format!(
			"[{}:{}:{}{}]",
			self.account_type().letter(),
			self.universe() as u8,
			self.account_id(),
			instance_suffix
		)
	}

	pub fn profile_url(self) -> String {
		format!("https://steamcommunity.com/profiles/{}", self.0)
	}
}

impl fmt::Display for SteamID {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<SteamID> for u64 {
	fn from(id: SteamID) -> u64 {
		id.0
	}
}

impl TryFrom<u64> for SteamID {
	type Error = SteamIdError;

	fn try_from(value: u64) -> Result<Self, Self::Error> {
		SteamID::from_u64(value)
	}
}

impl FromStr for SteamID {
	type Err = SteamIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if let Some(rest) = s.strip_prefix("STEAM_") {
			return parse_steam2(rest, s);
		}
		if s.starts_with('[') && s.ends_with(']') {
			return parse_steam3(&s[1..s.len() - 1], s);
		}
		if let Ok(raw) = s.parse::<u64>() {
			return SteamID::from_u64(raw);
		}
		Err(SteamIdError::BadFormat(s.to_string()))
	}
}

fn parse_steam2(rest: &str, original: &str) -> Result<SteamID, SteamIdError> {
	// rest is "X:Y:Z"
	let parts: Vec<&str> = rest.split(':').collect();
	if parts.len() != 3 {
		return Err(SteamIdError::BadFormat(original.to_string()));
	}
	let universe: u8 = parts[0].parse().map_err(|_| SteamIdError::BadFormat(original.to_string()))?;
	let y: u32 = parts[1].parse().map_err(|_| SteamIdError::BadFormat(original.to_string()))?;
	let z: u32 = parts[2].parse().map_err(|_| SteamIdError::BadFormat(original.to_string()))?;
	if y > 1 {
		return Err(SteamIdError::BadFormat(original.to_string()));
	}
	let account_id = (z << 1) | y;
	// STEAM_0 is historically used to mean the public universe.
	let universe = if universe == 0 { 1 } else { universe };
	SteamID::from_u64(SteamID::new(Universe::from_u8(universe), AccountType::Individual, DEFAULT_DESKTOP_INSTANCE, account_id).0)
}

fn parse_steam3(inner: &str, original: &str) -> Result<SteamID, SteamIdError> {
	// inner is "X:U:N" or "X:U:N:I"
	let parts: Vec<&str> = inner.split(':').collect();
	if parts.len() < 3 {
		return Err(SteamIdError::BadFormat(original.to_string()));
	}
	let letter = parts[0].chars().next().ok_or_else(|| SteamIdError::BadFormat(original.to_string()))?;
	let universe: u8 = parts[1].parse().map_err(|_| SteamIdError::BadFormat(original.to_string()))?;
	let account_id: u32 = parts[2].parse().map_err(|_| SteamIdError::BadFormat(original.to_string()))?;
	let account_type = letter_to_account_type(letter).ok_or_else(|| SteamIdError::BadFormat(original.to_string()))?;
	let instance = if parts.len() >= 4 {
		parts[3].parse().map_err(|_| SteamIdError::BadFormat(original.to_string()))?
	} else {
		default_instance_for(account_type)
	};
	SteamID::from_u64(SteamID::new(Universe::from_u8(universe), account_type, instance, account_id).0)
}

fn default_instance_for(account_type: AccountType) -> u32 {
	match account_type {
		AccountType::Individual => DEFAULT_DESKTOP_INSTANCE,
		_ => 0,
	}
}

fn letter_to_account_type(letter: char) -> Option<AccountType> {
	Some(match letter {
		'I' => AccountType::Invalid,
		'U' => AccountType::Individual,
		'M' => AccountType::Multiseat,
		'G' => AccountType::GameServer,
		'A' => AccountType::AnonGameServer,
		'P' => AccountType::Pending,
		'C' => AccountType::ContentServer,
		'g' => AccountType::Clan,
		'T' | 'c' | 'L' => AccountType::Chat,
		'a' => AccountType::AnonUser,
		_ => return None,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_the_spec_example() {
		let id = SteamID::from_u64(76561198020145915).unwrap();
		assert_eq!(id.account_id(), 59880187);
		assert_eq!(id.to_steam2(), "STEAM_1:1:29940093");

		let parsed: SteamID = "STEAM_1:1:29940093".parse().unwrap();
		assert_eq!(parsed.as_u64(), 76561198020145915);
	}

	#[test]
	fn zero_is_never_valid() {
		assert_eq!(SteamID::from_u64(0), Err(SteamIdError::Zero));
	}

	#[test]
	fn steam3_round_trips() {
		let id = SteamID::individual(Universe::Public, 59880187);
		let rendered = id.to_steam3();
		assert_eq!(rendered, "[U:1:59880187]");
		let parsed: SteamID = rendered.parse().unwrap();
		assert_eq!(parsed, id);
	}

	#[test]
	fn raw_decimal_round_trips() {
		let parsed: SteamID = "76561198020145915".parse().unwrap();
		assert_eq!(parsed.as_u64(), 76561198020145915);
		assert_eq!(parsed.to_string(), "76561198020145915");
	}

	proptest::proptest! {
		#[test]
		fn arbitrary_account_ids_round_trip(account_id: u32) {
			let id = SteamID::individual(Universe::Public, account_id);
			let text = id.to_steam2();
			let parsed: SteamID = text.parse().unwrap();
			proptest::prop_assert_eq!(parsed, id);

			let text3 = id.to_steam3();
			let parsed3: SteamID = text3.parse().unwrap();
			proptest::prop_assert_eq!(parsed3, id);
		}
	}
}
