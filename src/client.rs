//! Top-level facade: wires the CM session, auth pipeline, unified RPC client,
//! and trade/confirmation engines into one handle an application can drive.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use log::info;

use crate::auth::{self, LogonDecoder, LogonEncoder, LogonOutcome, RsaKeyFetcher};
use crate::config::SteamGuardConfig;
use crate::confirmation::ConfirmationEngine;
use crate::crypto;
use crate::directory::{CmDirectory, HttpDiscoverySource};
use crate::error::AuthError;
use crate::ratelimit::RateLimiter;
use crate::rpc::RpcClient;
use crate::sentry::SentryStore;
use crate::session::{spawn_supervised_session, LifecycleEvent, SessionHandle, SessionOptions};
use crate::steamapi::SteamApiClient;
use crate::trade::TradeEngine;

fn unix_now() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

const WEB_API_DEFAULT_CAPACITY: f64 = 10.0;
const WEB_API_DEFAULT_REFILL_PER_SEC: f64 = 1.0;

/// Fetches the RSA public key for a username from `ISteamUserAuth`.
///
/// Owns a bare HTTP client rather than borrowing the session's
/// [`SteamApiClient`]: `GetPasswordRSAPublicKey` needs no cookies, and a
/// borrow would otherwise outlive the mutable access `login`/`transfer_login`
/// need on the same client during web-session minting.
#[derive(Default)]
pub struct WebRsaKeyFetcher {
	client: reqwest::blocking::Client,
}

impl RsaKeyFetcher for WebRsaKeyFetcher {
	fn fetch(&self, account_name: &str) -> Result<(String, String, String), AuthError> {
		let resp = self
			.client
			.get(format!(
				"https://api.steampowered.com/ISteamUserAuth/GetPasswordRSAPublicKey/v1/?account_name={}",
				account_name
			))
			.send()
			.map_err(|e| AuthError::Other(e.into()))?;
		let text = resp.text().map_err(|e| AuthError::Other(e.into()))?;
		let parsed: crate::api_responses::RsaKeyResponse =
			serde_json::from_str(&text).map_err(|e| AuthError::Other(e.into()))?;
		if !parsed.success {
			return Err(AuthError::InvalidCredentials);
		}
		Ok((parsed.publickey_mod, parsed.publickey_exp, parsed.timestamp))
	}
}

/// Everything needed to bring a [`Client`] up: the account, the two-factor
/// material, and the Steam-provided RSA key this build was configured with.
///
/// `universe_modulus_hex`/`universe_exponent_hex` are the fixed, published
/// Steam public-universe RSA key components used to wrap the CM channel key;
/// this crate does not bake in a value since none of its grounding material
/// carries the real bytes, so the consuming application supplies them
/// (typically hardcoded once, the same way SteamKit-derived clients do).
pub struct ClientConfig {
	pub account_name: String,
	pub password: String,
	pub shared_secret: Option<String>,
	pub identity_secret: Option<String>,
	pub api_key: String,
	pub universe_modulus_hex: String,
	pub universe_exponent_hex: String,
	pub guard: SteamGuardConfig,
}

/// A logged-in Steam client: CM session, web API, and the trade/confirmation
/// engines layered on top.
pub struct Client {
	pub session: SessionHandle,
	pub lifecycle: std::sync::mpsc::Receiver<LifecycleEvent>,
	pub rpc: RpcClient,
	pub api: SteamApiClient,
	pub web_rate_limiter: RateLimiter,
	steam_id: u64,
	identity_secret: Option<String>,
	api_key: String,
	guard: SteamGuardConfig,
}

impl Client {
	/// Connects to a CM endpoint, logs on, and mints a web session.
	///
	/// `logon_encoder`/`logon_decoder` bridge this crate's codec-agnostic auth
	/// pipeline to a concrete `ClientLogOn`/`ClientLogOnResponse` protobuf
	/// schema the caller supplies (see [`auth`] module docs).
	pub fn connect(
		config: ClientConfig,
		logon_encoder: &dyn LogonEncoder,
		logon_decoder: &dyn LogonDecoder,
	) -> Result<Self, AuthError> {
		let cell_id = 0;
		let http_client = reqwest::blocking::Client::new();
		let discovery = HttpDiscoverySource::new(http_client, cell_id);
		let directory = Arc::new(Mutex::new(CmDirectory::new(discovery, config.guard.cm_cache_path.clone())));

		let session_options = SessionOptions {
			universe_modulus_hex: config.universe_modulus_hex.clone(),
			universe_exponent_hex: config.universe_exponent_hex.clone(),
			reconnect_base: Duration::from_secs_f64(config.guard.reconnect_base_seconds),
			reconnect_cap: Duration::from_secs_f64(config.guard.reconnect_cap_seconds),
		};
		let (session, lifecycle) = spawn_supervised_session(directory, session_options);

		// The supervisor needs one `Ready` before any RPC stands a chance of
		// reaching an encrypted, logged-on transport.
		match lifecycle.recv() {
			Ok(LifecycleEvent::Ready) => {}
			_ => return Err(AuthError::Transport(crate::error::TransportError::Closed)),
		}

		let mut api = SteamApiClient::new(None);
		let sentry_store = SentryStore::load(&config.guard.sentry_path).unwrap_or_default();
		let sentry = sentry_store.get(&config.account_name);

		let rsa = WebRsaKeyFetcher::default();
		let outcome: LogonOutcome = auth::logon(
			&session,
			&rsa,
			logon_encoder,
			logon_decoder,
			&config.account_name,
			&config.password,
			config.shared_secret.as_deref(),
			sentry,
			Duration::from_secs(30),
		)?;
		session.set_heartbeat_interval(outcome.heartbeat_interval);
		info!("logged on as {} (steamid {})", config.account_name, outcome.steam_id);

		mint_web_session(&mut api, &rsa, &config)?;

		let rpc = RpcClient::new(session.clone());
		let web_rate_limiter = RateLimiter::new(WEB_API_DEFAULT_CAPACITY, WEB_API_DEFAULT_REFILL_PER_SEC);

		Ok(Client {
			session,
			lifecycle,
			rpc,
			api,
			web_rate_limiter,
			steam_id: outcome.steam_id,
			identity_secret: config.identity_secret,
			api_key: config.api_key,
			guard: config.guard,
		})
	}

	/// Builds a confirmation engine bound to this client's identity secret,
	/// if one was configured.
	pub fn confirmations(&self) -> Option<ConfirmationEngine<'_>> {
		self.identity_secret
			.clone()
			.map(|secret| ConfirmationEngine::new(&self.api, self.steam_id, secret))
	}

	/// Builds a trade engine bound to this client's web API and, if
	/// configured, its confirmation engine.
	pub fn trade_engine(&self) -> TradeEngine<'_> {
		TradeEngine::new(
			&self.api,
			self.api_key.clone(),
			self.confirmations(),
			&self.web_rate_limiter,
			self.guard.poll_interval_seconds,
			self.guard.poll_interval_max,
			self.guard.replay_historical_trades,
		)
	}

	pub fn shutdown(&self) {
		self.session.shutdown();
	}
}

/// Mints the `steamLogin`/`steamLoginSecure` cookies the web API and the
/// trade/confirmation engines ride on, per the auth pipeline's step 5.
///
/// Re-wraps the password under a freshly fetched web RSA key (the CM logon's
/// wrapped password isn't reusable here — it was encrypted for the CM
/// handshake's own key) and drives the teacher's existing
/// `login`/`transfer_login` dance, which populates `api.session` on success.
fn mint_web_session(api: &mut SteamApiClient, rsa: &dyn RsaKeyFetcher, config: &ClientConfig) -> Result<(), AuthError> {
	let (modulus_hex, exponent_hex, rsa_timestamp) = rsa.fetch(&config.account_name)?;
	let wrapped = crypto::wrap_password(&config.password, &modulus_hex, &exponent_hex).map_err(|e| AuthError::Other(e.into()))?;
	let encrypted_password = base64::encode(wrapped);
	let twofactor_code = match &config.shared_secret {
		Some(secret) => crypto::guard_code(secret, unix_now()).map_err(|e| AuthError::Other(e.into()))?,
		None => String::new(),
	};

	let login_resp = api
		.login(
			config.account_name.clone(),
			encrypted_password,
			twofactor_code,
			String::new(),
			String::new(),
			String::new(),
			rsa_timestamp,
		)
		.map_err(AuthError::Other)?;

	if login_resp.oauth.is_some() {
		return Ok(());
	}
	if login_resp.transfer_urls.is_some() {
		api.transfer_login(login_resp).map_err(AuthError::Other)?;
		return Ok(());
	}
	Err(AuthError::Other(anyhow!("web login returned neither oauth data nor transfer parameters")))
}
