use crate::api_responses::*;
use log::*;
use reqwest::{
	blocking::RequestBuilder,
	cookie::CookieStore,
	header::COOKIE,
	header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE},
	Url,
};
use secrecy::{CloneableSecret, DebugSecret, ExposeSecret, SerializableSecret};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::iter::FromIterator;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroize;

lazy_static! {
	static ref STEAM_COOKIE_URL: Url = "https://steamcommunity.com".parse::<Url>().unwrap();
	static ref STEAM_API_BASE: String = "https://api.steampowered.com".into();
}

#[derive(Debug, Clone, Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
pub struct Session {
	#[serde(rename = "SessionID")]
	pub session_id: String,
	#[serde(rename = "SteamLogin")]
	pub steam_login: String,
	#[serde(rename = "SteamLoginSecure")]
	pub steam_login_secure: String,
	#[serde(default, rename = "WebCookie")]
	pub web_cookie: Option<String>,
	#[serde(rename = "OAuthToken")]
	pub token: String,
	#[serde(rename = "SteamID")]
	pub steam_id: u64,
}

impl SerializableSecret for Session {}
impl CloneableSecret for Session {}
impl DebugSecret for Session {}

/// Queries Steam for the current time.
///
/// Endpoint: `/ITwoFactorService/QueryTime/v0001`
///
/// Example Response:
/// ```json
/// {
///   "response": {
///     "server_time": "1655768666",
///     "skew_tolerance_seconds": "60",
///     "large_time_jink": "86400",
///     "probe_frequency_seconds": 3600,
///     "adjusted_time_probe_frequency_seconds": 300,
///     "hint_probe_frequency_seconds": 60,
///     "sync_timeout": 60,
///     "try_again_seconds": 900,
///     "max_attempts": 3
///   }
/// }
/// ```
pub fn get_server_time() -> anyhow::Result<QueryTimeResponse> {
	let client = reqwest::blocking::Client::new();
	let resp = client
		.post("https://api.steampowered.com/ITwoFactorService/QueryTime/v0001")
		.body("steamid=0")
		.send()?;
	let resp: SteamApiResponse<QueryTimeResponse> = resp.json()?;

	return Ok(resp.response);
}

/// Provides raw access to the Steam API. Handles cookies, some deserialization, etc. to make it easier. It covers `ITwoFactorService` from the Steam web API, and some mobile app specific api endpoints.
#[derive(Debug)]
pub struct SteamApiClient {
	cookies: reqwest::cookie::Jar,
	client: reqwest::blocking::Client,
	pub session: Option<secrecy::Secret<Session>>,
}

impl SteamApiClient {
	pub fn new(session: Option<secrecy::Secret<Session>>) -> SteamApiClient {
		SteamApiClient {
			cookies: reqwest::cookie::Jar::default(),
			client: reqwest::blocking::ClientBuilder::new()
				.cookie_store(true)
				.user_agent("Mozilla/5.0 (Linux; U; Android 4.1.1; en-us; Google Nexus 4 - 4.1.1 - API 16 - 768x1280 Build/JRO03S) AppleWebKit/534.30 (KHTML, like Gecko) Version/4.0 Mobile Safari/534.30")
				.default_headers(HeaderMap::from_iter(hashmap! {
					HeaderName::from_str("X-Requested-With").expect("could not build default request headers") => HeaderValue::from_str("com.valvesoftware.android.steam.community").expect("could not build default request headers")
				}.into_iter()))
				.build()
				.unwrap(),
			session: session,
		}
	}

	fn build_session(&self, data: &OAuthData) -> Session {
		trace!("SteamApiClient::build_session");
		return Session {
			token: data.oauth_token.clone(),
			steam_id: data.steamid.parse().unwrap(),
			steam_login: format!("{}%7C%7C{}", data.steamid, data.wgtoken),
			steam_login_secure: format!("{}%7C%7C{}", data.steamid, data.wgtoken_secure),
			session_id: self
				.extract_session_id()
				.expect("failed to extract session id from cookies"),
			web_cookie: Some(data.webcookie.clone()),
		};
	}

	fn extract_session_id(&self) -> Option<String> {
		let cookies = self.cookies.cookies(&STEAM_COOKIE_URL).unwrap();
		let all_cookies = cookies.to_str().unwrap();
		for cookie in all_cookies
			.split(";")
			.map(|s| cookie::Cookie::parse(s).unwrap())
		{
			if cookie.name() == "sessionid" {
				return Some(cookie.value().into());
			}
		}
		return None;
	}

	pub fn save_cookies_from_response(&mut self, response: &reqwest::blocking::Response) {
		let set_cookie_iter = response.headers().get_all(SET_COOKIE);

		for c in set_cookie_iter {
			c.to_str()
				.into_iter()
				.for_each(|cookie_str| self.cookies.add_cookie_str(cookie_str, &STEAM_COOKIE_URL));
		}
	}

	pub fn request<U: reqwest::IntoUrl + std::fmt::Display>(
		&self,
		method: reqwest::Method,
		url: U,
	) -> RequestBuilder {
		trace!("making request: {} {}", method, url);
		self.cookies
			.add_cookie_str("mobileClientVersion=0 (2.1.3)", &STEAM_COOKIE_URL);
		self.cookies
			.add_cookie_str("mobileClient=android", &STEAM_COOKIE_URL);
		self.cookies
			.add_cookie_str("Steam_Language=english", &STEAM_COOKIE_URL);
		if let Some(session) = &self.session {
			self.cookies.add_cookie_str(
				format!("sessionid={}", session.expose_secret().session_id).as_str(),
				&STEAM_COOKIE_URL,
			);
		}

		self.client
			.request(method, url)
			.header(COOKIE, self.cookies.cookies(&STEAM_COOKIE_URL).unwrap())
	}

	pub fn get<U: reqwest::IntoUrl + std::fmt::Display>(&self, url: U) -> RequestBuilder {
		self.request(reqwest::Method::GET, url)
	}

	pub fn post<U: reqwest::IntoUrl + std::fmt::Display>(&self, url: U) -> RequestBuilder {
		self.request(reqwest::Method::POST, url)
	}

	/// Updates the cookie jar with the session cookies by pinging steam servers.
	pub fn update_session(&mut self) -> anyhow::Result<()> {
		trace!("SteamApiClient::update_session");

		let resp = self
			.get("https://steamcommunity.com/login?oauth_client_id=DE45CD61&oauth_scope=read_profile%20write_profile%20read_client%20write_client".parse::<Url>().unwrap())
			.send()?;
		self.save_cookies_from_response(&resp);
		trace!("{:?}", resp);

		trace!("cookies: {:?}", self.cookies);
		Ok(())
	}

	/// Endpoint: POST /login/dologin
	pub fn login(
		&mut self,
		username: String,
		encrypted_password: String,
		twofactor_code: String,
		email_code: String,
		captcha_gid: String,
		captcha_text: String,
		rsa_timestamp: String,
	) -> anyhow::Result<LoginResponse> {
		let params = hashmap! {
			"donotcache" => format!(
				"{}",
				SystemTime::now()
					.duration_since(UNIX_EPOCH)
					.unwrap()
					.as_secs()
					* 1000
			),
			"username" => username,
			"password" => encrypted_password,
			"twofactorcode" => twofactor_code,
			"emailauth" => email_code,
			"captchagid" => captcha_gid,
			"captcha_text" => captcha_text,
			"rsatimestamp" => rsa_timestamp,
			"remember_login" => "true".into(),
			"oauth_client_id" => "DE45CD61".into(),
			"oauth_scope" => "read_profile write_profile read_client write_client".into(),
		};

		let resp = self
			.post("https://steamcommunity.com/login/dologin")
			.form(&params)
			.send()?;
		self.save_cookies_from_response(&resp);
		let text = resp.text()?;
		trace!("raw login response: {}", text);

		let login_resp: LoginResponse = serde_json::from_str(text.as_str())?;

		if let Some(oauth) = &login_resp.oauth {
			self.session = Some(secrecy::Secret::new(self.build_session(&oauth)));
		}

		return Ok(login_resp);
	}

	/// A secondary step in the login flow. Does not seem to always be needed?
	/// Endpoints: provided by `login()`
	pub fn transfer_login(&mut self, login_resp: LoginResponse) -> anyhow::Result<OAuthData> {
		match (login_resp.transfer_urls, login_resp.transfer_parameters) {
			(Some(urls), Some(params)) => {
				debug!("received transfer parameters, relaying data...");
				for url in urls {
					trace!("posting transfer to {}", url);
					let resp = self.client.post(url).json(&params).send()?;
					self.save_cookies_from_response(&resp);
				}

				let oauth = OAuthData {
					oauth_token: params.auth,
					steamid: params.steamid.parse().unwrap(),
					wgtoken: params.token_secure.clone(), // guessing
					wgtoken_secure: params.token_secure,
					webcookie: params.webcookie,
				};
				self.session = Some(secrecy::Secret::new(self.build_session(&oauth)));
				return Ok(oauth);
			}
			(None, None) => {
				bail!("did not receive transfer_urls and transfer_parameters");
			}
			(_, None) => {
				bail!("did not receive transfer_parameters");
			}
			(None, _) => {
				bail!("did not receive transfer_urls");
			}
		}
	}

	/// Host: api.steampowered.com
	/// Endpoint: GET /IEconService/GetTradeOffers/v1/
	pub fn get_trade_offers(
		&self,
		api_key: &str,
		time_historical_cutoff: u64,
	) -> anyhow::Result<GetTradeOffersResponse> {
		let params = hashmap! {
			"key" => api_key.to_string(),
			"active_only" => "0".to_string(),
			"historical_only" => "0".to_string(),
			"get_sent_offers" => "1".to_string(),
			"get_received_offers" => "1".to_string(),
			"get_descriptions" => "0".to_string(),
			"time_historical_cutoff" => time_historical_cutoff.to_string(),
		};

		let resp = self
			.get(format!("{}/IEconService/GetTradeOffers/v1/", STEAM_API_BASE.to_string()))
			.query(&params)
			.send()?;
		let text = resp.text()?;
		trace!("raw get trade offers response: {}", text);

		let resp: SteamApiResponse<GetTradeOffersResponse> = serde_json::from_str(text.as_str())?;
		Ok(resp.response)
	}

	fn tradeoffer_action(&self, trade_offer_id: &str, action: &str) -> anyhow::Result<TradeOfferActionResponse> {
		ensure!(matches!(self.session, Some(_)));
		let params = hashmap! {
			"sessionid" => self.session.as_ref().unwrap().expose_secret().session_id.clone(),
			"tradeofferid" => trade_offer_id.to_string(),
		};

		let resp = self
			.post(format!("https://steamcommunity.com/tradeoffer/{}/{}", trade_offer_id, action))
			.form(&params)
			.send()?;
		let text = resp.text()?;
		trace!("raw {} response: {}", action, text);

		let resp: TradeOfferActionResponse = serde_json::from_str(text.as_str())?;
		Ok(resp)
	}

	/// Host: steamcommunity.com
	/// Endpoint: POST /tradeoffer/<id>/accept
	pub fn accept_trade_offer(&self, trade_offer_id: &str) -> anyhow::Result<TradeOfferActionResponse> {
		self.tradeoffer_action(trade_offer_id, "accept")
	}

	/// Host: steamcommunity.com
	/// Endpoint: POST /tradeoffer/<id>/decline
	pub fn decline_trade_offer(&self, trade_offer_id: &str) -> anyhow::Result<TradeOfferActionResponse> {
		self.tradeoffer_action(trade_offer_id, "decline")
	}

	/// Host: steamcommunity.com
	/// Endpoint: POST /tradeoffer/<id>/cancel
	pub fn cancel_trade_offer(&self, trade_offer_id: &str) -> anyhow::Result<TradeOfferActionResponse> {
		self.tradeoffer_action(trade_offer_id, "cancel")
	}

	/// Host: steamcommunity.com
	/// Endpoint: POST /tradeoffer/new/send
	pub fn counter_trade_offer(
		&self,
		trade_offer_id: &str,
		partner_steam_id: u64,
		items_to_give: &[crate::trade::types::Asset],
		items_to_receive: &[crate::trade::types::Asset],
		message: &str,
	) -> anyhow::Result<TradeOfferActionResponse> {
		ensure!(matches!(self.session, Some(_)));

		let to_json = |assets: &[crate::trade::types::Asset]| {
			Value::Array(
				assets
					.iter()
					.map(|a| {
						serde_json::json!({
							"appid": a.appid,
							"contextid": a.contextid.to_string(),
							"assetid": a.assetid.to_string(),
							"amount": a.amount.to_string(),
						})
					})
					.collect(),
			)
		};
		let trade_offer_json = serde_json::json!({
			"newversion": true,
			"version": 3,
			"me": {"assets": to_json(items_to_give), "currency": [], "ready": false},
			"them": {"assets": to_json(items_to_receive), "currency": [], "ready": false},
		});

		let params = hashmap! {
			"sessionid" => self.session.as_ref().unwrap().expose_secret().session_id.clone(),
			"serverid" => "1".to_string(),
			"partner" => partner_steam_id.to_string(),
			"tradeoffermessage" => message.to_string(),
			"json_tradeoffer" => trade_offer_json.to_string(),
			"trade_offer_create_params" => "{}".to_string(),
			"tradeofferid_countered" => trade_offer_id.to_string(),
		};

		let resp = self.post("https://steamcommunity.com/tradeoffer/new/send").form(&params).send()?;
		let text = resp.text()?;
		trace!("raw counter trade offer response: {}", text);

		let resp: TradeOfferActionResponse = serde_json::from_str(text.as_str())?;
		Ok(resp)
	}

	/// Host: steamcommunity.com
	/// Endpoint: GET /mobileconf/getlist
	pub fn get_confirmations(
		&self,
		device_id: &str,
		steam_id: u64,
		confirmation_hash: &str,
		time: u64,
	) -> anyhow::Result<ConfirmationListResponse> {
		let steam_id_str = steam_id.to_string();
		let time_str = time.to_string();
		let params = hashmap! {
			"p" => device_id,
			"a" => steam_id_str.as_str(),
			"k" => confirmation_hash,
			"t" => time_str.as_str(),
			"m" => "android",
			"tag" => "conf",
		};

		let resp = self
			.get("https://steamcommunity.com/mobileconf/getlist")
			.query(&params)
			.send()?;
		let text = resp.text()?;
		trace!("raw mobileconf/getlist response: {}", text);

		let resp: ConfirmationListResponse = serde_json::from_str(text.as_str())?;
		Ok(resp)
	}

	/// Host: steamcommunity.com
	/// Endpoint: GET /mobileconf/ajaxop
	pub fn resolve_confirmation(
		&self,
		device_id: &str,
		steam_id: u64,
		op: &str,
		confirmation_hash: &str,
		time: u64,
		conf_id: &str,
		conf_nonce: &str,
	) -> anyhow::Result<ConfirmationAjaxOpResponse> {
		let steam_id_str = steam_id.to_string();
		let time_str = time.to_string();
		let params = hashmap! {
			"op" => op,
			"p" => device_id,
			"a" => steam_id_str.as_str(),
			"k" => confirmation_hash,
			"t" => time_str.as_str(),
			"m" => "android",
			"cid" => conf_id,
			"ck" => conf_nonce,
		};

		let resp = self
			.get("https://steamcommunity.com/mobileconf/ajaxop")
			.query(&params)
			.send()?;
		let text = resp.text()?;
		trace!("raw mobileconf/ajaxop response: {}", text);

		let resp: ConfirmationAjaxOpResponse = serde_json::from_str(text.as_str())?;
		Ok(resp)
	}
}
