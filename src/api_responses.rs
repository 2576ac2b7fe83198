//! Request/response bodies for every Steam web endpoint this crate calls.
//!
//! Field shapes for the auth endpoints are unchanged from the teacher's own
//! `api_responses` module; the trade-offer and mobile-confirmation shapes are
//! new, grounded in the wire formats `steam-mobile`'s types module and
//! `rust-steam-tradeoffers`'s manager module already describe for the same
//! endpoints.

use serde::{Deserialize, Serialize};

/// Every Steam web API response is wrapped in a `{"response": ...}` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct SteamApiResponse<T> {
	pub response: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryTimeResponse {
	pub server_time: String,
	#[serde(default)]
	pub skew_tolerance_seconds: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RsaKeyResponse {
	pub success: bool,
	pub publickey_exp: String,
	pub publickey_mod: String,
	pub timestamp: String,
	#[serde(default)]
	pub token_gid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthData {
	pub oauth_token: String,
	pub steamid: String,
	pub wgtoken: String,
	pub wgtoken_secure: String,
	pub webcookie: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferParameters {
	pub steamid: String,
	pub token_secure: String,
	pub auth: String,
	pub webcookie: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
	#[serde(default)]
	pub success: bool,
	#[serde(default)]
	pub login_complete: bool,
	#[serde(default)]
	pub requires_twofactor: bool,
	#[serde(default)]
	pub message: String,
	#[serde(default)]
	pub emailauth_needed: bool,
	#[serde(default)]
	pub emaildomain: Option<String>,
	#[serde(default)]
	pub captcha_needed: bool,
	#[serde(default)]
	pub captcha_gid: Option<String>,
	pub oauth: Option<OAuthData>,
	pub transfer_urls: Option<Vec<String>>,
	pub transfer_parameters: Option<TransferParameters>,
}

/// `IEconService/GetTradeOffers/v1/` request parameters.
#[derive(Debug, Clone, Serialize)]
pub struct GetTradeOffersRequest {
	pub key: String,
	pub active_only: u8,
	pub historical_only: u8,
	pub get_sent_offers: u8,
	pub get_received_offers: u8,
	pub get_descriptions: u8,
	pub time_historical_cutoff: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GetTradeOffersResponse {
	#[serde(default)]
	pub trade_offers_sent: Vec<RawTradeOffer>,
	#[serde(default)]
	pub trade_offers_received: Vec<RawTradeOffer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAsset {
	pub appid: u32,
	#[serde(deserialize_with = "deserialize_stringly_u64")]
	pub contextid: u64,
	#[serde(deserialize_with = "deserialize_stringly_u64")]
	pub assetid: u64,
	#[serde(deserialize_with = "deserialize_stringly_u64")]
	pub classid: u64,
	#[serde(default, deserialize_with = "deserialize_stringly_u64")]
	pub instanceid: u64,
	#[serde(default = "default_amount", deserialize_with = "deserialize_stringly_u64")]
	pub amount: u64,
}

fn default_amount() -> u64 {
	1
}

fn deserialize_stringly_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
	D: serde::Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum StringOrU64 {
		String(String),
		U64(u64),
	}
	match StringOrU64::deserialize(deserializer)? {
		StringOrU64::String(s) => s.parse().map_err(serde::de::Error::custom),
		StringOrU64::U64(n) => Ok(n),
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTradeOffer {
	pub tradeofferid: String,
	pub accountid_other: u32,
	#[serde(default)]
	pub message: String,
	pub trade_offer_state: u8,
	#[serde(default)]
	pub items_to_give: Vec<RawAsset>,
	#[serde(default)]
	pub items_to_receive: Vec<RawAsset>,
	pub is_our_offer: bool,
	pub time_created: u64,
	pub time_updated: u64,
	#[serde(default)]
	pub expiration_time: u64,
	#[serde(default)]
	pub tradeid: Option<String>,
	#[serde(default)]
	pub trade_offer_id_countered: Option<String>,
	#[serde(default)]
	pub escrow_end_date: u64,
}

/// Response from `/tradeoffer/<id>/accept`, `/decline`, or `/cancel`. Steam
/// returns `{}` on success and `{"strError": "..."}` on failure for most of
/// these, so every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradeOfferActionResponse {
	#[serde(default)]
	pub tradeofferid: Option<String>,
	#[serde(default)]
	pub needs_mobile_confirmation: bool,
	#[serde(default)]
	pub needs_email_confirmation: bool,
	#[serde(rename = "strError", default)]
	pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawConfirmation {
	pub id: String,
	pub nonce: String,
	#[serde(rename = "type")]
	pub kind: u32,
	pub creator_id: String,
	#[serde(default)]
	pub type_name: String,
	#[serde(default)]
	pub headline: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmationListResponse {
	#[serde(default)]
	pub success: bool,
	#[serde(default)]
	pub message: Option<String>,
	#[serde(default, rename = "conf")]
	pub confirmations: Vec<RawConfirmation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmationAjaxOpResponse {
	#[serde(default)]
	pub success: bool,
	#[serde(default)]
	pub message: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn get_trade_offers_response_parses_string_asset_ids() {
		let json = r#"{
			"trade_offers_received": [{
				"tradeofferid": "123",
				"accountid_other": 456,
				"trade_offer_state": 2,
				"items_to_give": [],
				"items_to_receive": [{"appid": 730, "contextid": "2", "assetid": "99999", "classid": "111", "instanceid": "0"}],
				"is_our_offer": false,
				"time_created": 1700000000,
				"time_updated": 1700000000
			}]
		}"#;
		let resp: GetTradeOffersResponse = serde_json::from_str(json).unwrap();
		assert_eq!(resp.trade_offers_received.len(), 1);
		assert_eq!(resp.trade_offers_received[0].items_to_receive[0].assetid, 99999);
	}

	#[test]
	fn confirmation_list_response_parses() {
		let json = r#"{"success": true, "conf": [{"id": "1", "nonce": "abc", "type": 2, "creator_id": "999"}]}"#;
		let resp: ConfirmationListResponse = serde_json::from_str(json).unwrap();
		assert!(resp.success);
		assert_eq!(resp.confirmations[0].creator_id, "999");
	}
}
