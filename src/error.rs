//! Error taxonomy for the crate, grouped by failure kind rather than by module.
//!
//! Glue code that chains several fallible steps together uses `anyhow`, the
//! same way `steamapi.rs` always has; code a caller needs to match on returns
//! one of the enums below.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
	#[error("RSA modulus is too small ({0} bits, need at least 1024)")]
	ModulusTooSmall(usize),
	#[error("invalid hex in RSA key component")]
	InvalidHex(#[from] hex::FromHexError),
	#[error("invalid base64 secret")]
	InvalidBase64(#[from] base64::DecodeError),
	#[error("rsa operation failed: {0}")]
	Rsa(#[from] rsa::errors::Error),
	#[error("secret is empty")]
	EmptySecret,
	#[error("aes decrypt failed")]
	DecryptFailed,
}

#[derive(Error, Debug)]
pub enum DirectoryError {
	#[error("no CM endpoints available")]
	NoEndpointsAvailable,
	#[error("failed to fetch CM directory: {0}")]
	FetchFailed(#[from] anyhow::Error),
	#[error("io error persisting CM cache: {0}")]
	Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum TransportError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("frame magic mismatch")]
	BadMagic,
	#[error("frame exceeds maximum size ({0} bytes)")]
	FrameTooLarge(usize),
	#[error("decrypt failed")]
	DecryptFailed,
	#[error("connection closed")]
	Closed,
	#[error("send queue closed")]
	QueueClosed,
	#[error("endpoint carrier scheme {0:?} is not supported by this transport")]
	UnsupportedScheme(crate::directory::CmScheme),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
	#[error("malformed header")]
	MalformedHeader,
	#[error("unexpected message in handshake: {0}")]
	UnexpectedHandshake(&'static str),
	#[error("job id sequence exhausted")]
	JobIdOverflow,
	#[error("unknown EMsg {0} in a routed response")]
	UnknownEMsg(u32),
}

#[derive(Error, Debug)]
pub enum AuthError {
	#[error("unknown username")]
	InvalidCredentials,
	#[error("invalid password")]
	InvalidPassword,
	#[error("account is rate limited, try again later")]
	RateLimitExceeded,
	#[error("account is banned")]
	Banned,
	#[error("need an email Steam Guard code")]
	NeedEmailCode,
	#[error("need a two-factor Steam Guard code")]
	NeedTwoFactorCode,
	#[error("logged in elsewhere")]
	LoggedInElsewhere,
	#[error("transport error during auth: {0}")]
	Transport(#[from] TransportError),
	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum RpcError {
	#[error("call timed out")]
	Timeout,
	#[error("session disconnected before a response arrived")]
	Disconnected,
	#[error("remote returned a non-OK result: {0}")]
	ResultError(i32),
}

#[derive(Error, Debug)]
pub enum TradeError {
	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),
	#[error("steam returned an error for this offer: {0}")]
	SteamError(String),
	#[error("offer is already in a terminal state")]
	AlreadyClosed,
	#[error("offer {0} not found")]
	NotFound(u64),
	#[error(transparent)]
	Confirmation(#[from] ConfirmationError),
}

#[derive(Error, Debug)]
pub enum ConfirmationError {
	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),
	#[error("no confirmation matched trade {0}")]
	NotFound(u64),
	#[error("confirmation code was replayed and retries were exhausted")]
	Replayed,
	#[error("failed to parse confirmation list response")]
	ParseFailed,
	#[error(transparent)]
	Crypto(#[from] CryptoError),
}
