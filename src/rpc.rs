//! Unified RPC client: one `call`/`notify` pair over a [`SessionHandle`] for
//! every `IFooService.Bar#N` method, mirroring how Steam's unified messaging
//! layer addresses service methods by name rather than by classic EMsg.
//!
//! Request/response bodies stay opaque `Vec<u8>` here too, for the same
//! reason `auth.rs`'s logon bodies do: this crate has no protobuf compiler,
//! so encoding/decoding a specific service method's fields is the caller's
//! job.

use std::time::Duration;

use crate::error::RpcError;
use crate::message::MessageKind;
use crate::session::SessionHandle;

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Formats the wire name Steam's unified messaging uses for a service method,
/// e.g. `IEconService.GetTradeOffers#1`.
pub fn service_method_name(service: &str, method: &str, version: u32) -> String {
	format!("{}.{}#{}", service, method, version)
}

/// Thin wrapper over [`SessionHandle`] that speaks in service/method/version
/// terms instead of raw message kinds.
pub struct RpcClient {
	session: SessionHandle,
	default_timeout: Duration,
}

impl RpcClient {
	pub fn new(session: SessionHandle) -> Self {
		RpcClient {
			session,
			default_timeout: DEFAULT_RPC_TIMEOUT,
		}
	}

	pub fn with_default_timeout(session: SessionHandle, default_timeout: Duration) -> Self {
		RpcClient { session, default_timeout }
	}

	/// Calls `service.method#version`, returning the response body on
	/// `eresult == 1` (OK) and an error for anything else: a non-OK eresult
	/// surfaces as [`RpcError::ResultError`], same as a timeout or a
	/// disconnect surfaces as their own variants.
	pub fn call(
		&self,
		service: &str,
		method: &str,
		version: u32,
		request: Vec<u8>,
		timeout: Option<Duration>,
	) -> Result<Vec<u8>, RpcError> {
		let kind = MessageKind::Service(service_method_name(service, method, version));
		let response = self
			.session
			.call(kind, None, None, request, Some(timeout.unwrap_or(self.default_timeout)))?;
		match response.eresult {
			Some(eresult) if eresult != 1 => Err(RpcError::ResultError(eresult)),
			_ => Ok(response.payload),
		}
	}

	/// Sends `service.method#version` without waiting for a response.
	pub fn notify(&self, service: &str, method: &str, version: u32, request: Vec<u8>) {
		let kind = MessageKind::Service(service_method_name(service, method, version));
		self.session.send(kind, None, None, request);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn service_method_name_matches_the_wire_convention() {
		assert_eq!(
			service_method_name("IEconService", "GetTradeOffers", 1),
			"IEconService.GetTradeOffers#1"
		);
	}
}
