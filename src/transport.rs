//! Framed transport over a direct TCP socket: length-prefixed frames, the
//! channel-encrypt handshake, and post-handshake AES-CBC frame encryption.
//!
//! Frame shape mirrors the `steam-vent` net module: 4-byte little-endian
//! length, 4-byte `"VT01"` magic, then payload. `CmEndpoint` carries a
//! carrier scheme (`Tcp`/`WebSocket`); this core only ever dials `Tcp`
//! endpoints, and `connect` rejects anything else rather than silently
//! opening a raw socket to a websocket-only address.
//!
//! Outbound backpressure is the command channel's job, not this module's:
//! `session.rs` submits frames through a bounded channel, so a caller
//! suspends once the driver thread falls behind rather than this layer
//! buffering unboundedly.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use crate::crypto::{decrypt_frame, encrypt_frame};
use crate::directory::{CmEndpoint, CmScheme};
use crate::error::TransportError;

const MAGIC: [u8; 4] = *b"VT01";
const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Disconnected,
	Connecting,
	ChannelEncryptPending,
	Encrypted,
	LoggedOn,
	Disconnecting,
}

fn read_frame(stream: &mut impl Read) -> Result<Vec<u8>, TransportError> {
	let length = stream.read_u32::<LittleEndian>()? as usize;
	if length > MAX_FRAME_SIZE {
		return Err(TransportError::FrameTooLarge(length));
	}
	let mut magic = [0u8; 4];
	stream.read_exact(&mut magic)?;
	if magic != MAGIC {
		return Err(TransportError::BadMagic);
	}
	let mut payload = vec![0u8; length];
	stream.read_exact(&mut payload)?;
	Ok(payload)
}

fn write_frame(stream: &mut impl Write, payload: &[u8]) -> Result<(), TransportError> {
	stream.write_u32::<LittleEndian>(payload.len() as u32)?;
	stream.write_all(&MAGIC)?;
	stream.write_all(payload)?;
	stream.flush()?;
	Ok(())
}

/// A connected transport. Owns the raw socket and, once encrypted, the
/// session key used to wrap/unwrap every subsequent frame.
pub struct FramedTransport {
	stream: TcpStream,
	session_key: Option<[u8; 32]>,
	state: ConnectionState,
}

impl FramedTransport {
	pub fn connect(endpoint: &CmEndpoint) -> Result<Self, TransportError> {
		if endpoint.scheme != CmScheme::Tcp {
			return Err(TransportError::UnsupportedScheme(endpoint.scheme));
		}
		let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))?;
		stream.set_nodelay(true).ok();
		Ok(FramedTransport {
			stream,
			session_key: None,
			state: ConnectionState::Connecting,
		})
	}

	pub fn state(&self) -> ConnectionState {
		self.state
	}

	pub fn set_state(&mut self, state: ConnectionState) {
		self.state = state;
	}

	/// Installs the session key negotiated by the channel-encrypt handshake.
	/// All frames sent/received after this point are AES-CBC wrapped.
	pub fn install_session_key(&mut self, key: [u8; 32]) {
		self.session_key = Some(key);
		self.state = ConnectionState::Encrypted;
	}

	pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
		self.stream.set_read_timeout(timeout)?;
		Ok(())
	}

	/// Clones the underlying socket into an independent `FramedTransport` that
	/// shares the same (already-installed) session key, for use by a dedicated
	/// reader thread while this half keeps writing.
	pub fn try_clone_reader(&self) -> Result<FramedTransport, TransportError> {
		Ok(FramedTransport {
			stream: self.stream.try_clone()?,
			session_key: self.session_key,
			state: self.state,
		})
	}

	/// Reads and (if encrypted) decrypts one frame.
	pub fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
		let raw = read_frame(&mut self.stream)?;
		match &self.session_key {
			Some(key) => decrypt_frame(key, &raw).map_err(|_| TransportError::DecryptFailed),
			None => Ok(raw),
		}
	}

	/// Encrypts (if applicable) and writes one frame.
	pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
		match &self.session_key {
			Some(key) => write_frame(&mut self.stream, &encrypt_frame(key, payload)),
			None => write_frame(&mut self.stream, payload),
		}
	}

	pub fn shutdown(&mut self) {
		self.state = ConnectionState::Disconnecting;
		let _ = self.stream.shutdown(std::net::Shutdown::Both);
		self.state = ConnectionState::Disconnected;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[test]
	fn frame_round_trips_over_a_byte_buffer() {
		let mut buf = Vec::new();
		write_frame(&mut buf, b"hello").unwrap();
		let mut cursor = Cursor::new(buf);
		let payload = read_frame(&mut cursor).unwrap();
		assert_eq!(payload, b"hello");
	}

	#[test]
	fn bad_magic_is_rejected() {
		let mut buf = Vec::new();
		buf.write_u32::<LittleEndian>(5).unwrap();
		buf.extend_from_slice(b"XXXXhello");
		let mut cursor = Cursor::new(buf);
		let err = read_frame(&mut cursor);
		assert!(matches!(err, Err(TransportError::BadMagic)));
	}

	#[test]
	fn oversized_frame_is_rejected() {
		let mut buf = Vec::new();
		buf.write_u32::<LittleEndian>((MAX_FRAME_SIZE + 1) as u32).unwrap();
		let mut cursor = Cursor::new(buf);
		let err = read_frame(&mut cursor);
		assert!(matches!(err, Err(TransportError::FrameTooLarge(_))));
	}

	#[test]
	fn connect_rejects_a_websocket_scheme_endpoint() {
		let endpoint = CmEndpoint::with_scheme("cm1.example.com", 443, crate::directory::CmScheme::WebSocket);
		let err = FramedTransport::connect(&endpoint);
		assert!(matches!(err, Err(TransportError::UnsupportedScheme(_))));
	}
}
