//! Encoding and decoding of the three CM header shapes, plus the protobuf
//! `CMsgProtoBufHeader` fields the core actually reads or writes.
//!
//! Classic headers are fixed-width structs encoded with `byteorder`, the same
//! technique the `steam-vent` handshake code uses for `ChannelEncryptResponse`.
//! The protobuf header only ever carries a handful of known fields, so it is
//! hand-encoded with the standard protobuf wire primitives (varint and
//! length-delimited) instead of pulling in a schema compiler for a few ints
//! and a string.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::ProtocolError;

/// High bit of the wire `EMsg` u32 that marks protobuf framing.
pub const PROTO_MASK: u32 = 0x8000_0000;

pub const INVALID_JOB_ID: u64 = u64::MAX;

/// Monotonically increasing source-job-id allocator. Never yields 0 or
/// `INVALID_JOB_ID`.
#[derive(Debug, Default)]
pub struct JobIdAllocator {
	next: u64,
}

impl JobIdAllocator {
	pub fn new() -> Self {
		JobIdAllocator { next: 0 }
	}

	pub fn allocate(&mut self) -> Result<u64, ProtocolError> {
		loop {
			self.next = self.next.wrapping_add(1);
			if self.next == 0 || self.next == INVALID_JOB_ID {
				if self.next == 0 && self.next.wrapping_sub(1) == INVALID_JOB_ID {
					// We've wrapped the entire space without ever finding a
					// usable id; this can only happen after billions of
					// calls, but report it rather than loop forever.
					return Err(ProtocolError::JobIdOverflow);
				}
				continue;
			}
			return Ok(self.next);
		}
	}
}

/// The classic, non-protobuf header (`MsgHdr`): no steamid, just job ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgHdr {
	pub target_job_id: u64,
	pub source_job_id: u64,
}

impl MsgHdr {
	pub const ENCODED_LEN: usize = 16;

	pub fn decode(r: &mut impl Read) -> io::Result<Self> {
		Ok(MsgHdr {
			target_job_id: r.read_u64::<LittleEndian>()?,
			source_job_id: r.read_u64::<LittleEndian>()?,
		})
	}

	pub fn encode(&self, w: &mut impl Write) -> io::Result<()> {
		w.write_u64::<LittleEndian>(self.target_job_id)?;
		w.write_u64::<LittleEndian>(self.source_job_id)?;
		Ok(())
	}
}

/// The extended header used by a narrow set of classic opcodes: carries a
/// session id, steamid, and canary byte in addition to the job ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedMsgHdr {
	pub header_size: u8,
	pub header_version: u16,
	pub target_job_id: u64,
	pub source_job_id: u64,
	pub header_canary: u8,
	pub steam_id: u64,
	pub session_id: i32,
}

impl Default for ExtendedMsgHdr {
	fn default() -> Self {
		ExtendedMsgHdr {
			header_size: 36,
			header_version: 2,
			target_job_id: INVALID_JOB_ID,
			source_job_id: INVALID_JOB_ID,
			header_canary: 239,
			steam_id: 0,
			session_id: 0,
		}
	}
}

impl ExtendedMsgHdr {
	pub fn decode(r: &mut impl Read) -> io::Result<Self> {
		Ok(ExtendedMsgHdr {
			header_size: r.read_u8()?,
			header_version: r.read_u16::<LittleEndian>()?,
			target_job_id: r.read_u64::<LittleEndian>()?,
			source_job_id: r.read_u64::<LittleEndian>()?,
			header_canary: r.read_u8()?,
			steam_id: r.read_u64::<LittleEndian>()?,
			session_id: r.read_i32::<LittleEndian>()?,
		})
	}

	pub fn encode(&self, w: &mut impl Write) -> io::Result<()> {
		w.write_u8(self.header_size)?;
		w.write_u16::<LittleEndian>(self.header_version)?;
		w.write_u64::<LittleEndian>(self.target_job_id)?;
		w.write_u64::<LittleEndian>(self.source_job_id)?;
		w.write_u8(self.header_canary)?;
		w.write_u64::<LittleEndian>(self.steam_id)?;
		w.write_i32::<LittleEndian>(self.session_id)?;
		Ok(())
	}
}

/// The fields of `CMsgProtoBufHeader` this core reads or writes. Unknown
/// fields encountered on decode are skipped, not rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtoBufHeader {
	pub steam_id: Option<u64>,
	pub client_session_id: Option<i32>,
	pub source_job_id: Option<u64>,
	pub target_job_id: Option<u64>,
	pub target_job_name: Option<String>,
	pub eresult: Option<i32>,
	pub error_message: Option<String>,
}

mod field {
	pub const STEAM_ID: u32 = 1;
	pub const CLIENT_SESSION_ID: u32 = 3;
	pub const SOURCE_JOB_ID: u32 = 10;
	pub const TARGET_JOB_ID: u32 = 11;
	pub const TARGET_JOB_NAME: u32 = 12;
	pub const ERESULT: u32 = 13;
	pub const ERROR_MESSAGE: u32 = 15;
}

const WIRE_VARINT: u8 = 0;
const WIRE_LEN_DELIMITED: u8 = 2;

fn write_varint(w: &mut impl Write, mut value: u64) -> io::Result<()> {
	loop {
		let mut byte = (value & 0x7F) as u8;
		value >>= 7;
		if value != 0 {
			byte |= 0x80;
		}
		w.write_u8(byte)?;
		if value == 0 {
			break;
		}
	}
	Ok(())
}

fn read_varint(r: &mut impl Read) -> io::Result<u64> {
	let mut result: u64 = 0;
	let mut shift = 0;
	loop {
		let byte = r.read_u8()?;
		result |= ((byte & 0x7F) as u64) << shift;
		if byte & 0x80 == 0 {
			break;
		}
		shift += 7;
	}
	Ok(result)
}

fn write_tag(w: &mut impl Write, field_num: u32, wire_type: u8) -> io::Result<()> {
	write_varint(w, ((field_num as u64) << 3) | wire_type as u64)
}

fn write_varint_field(w: &mut impl Write, field_num: u32, value: u64) -> io::Result<()> {
	write_tag(w, field_num, WIRE_VARINT)?;
	write_varint(w, value)
}

fn write_string_field(w: &mut impl Write, field_num: u32, value: &str) -> io::Result<()> {
	write_tag(w, field_num, WIRE_LEN_DELIMITED)?;
	write_varint(w, value.len() as u64)?;
	w.write_all(value.as_bytes())
}

impl ProtoBufHeader {
	pub fn encode(&self) -> Vec<u8> {
		let mut buf = Vec::new();
		if let Some(v) = self.steam_id {
			write_varint_field(&mut buf, field::STEAM_ID, v).expect("writing to Vec never fails");
		}
		if let Some(v) = self.client_session_id {
			write_varint_field(&mut buf, field::CLIENT_SESSION_ID, v as u64).expect("writing to Vec never fails");
		}
		if let Some(v) = self.source_job_id {
			write_varint_field(&mut buf, field::SOURCE_JOB_ID, v).expect("writing to Vec never fails");
		}
		if let Some(v) = self.target_job_id {
			write_varint_field(&mut buf, field::TARGET_JOB_ID, v).expect("writing to Vec never fails");
		}
		if let Some(v) = &self.target_job_name {
			write_string_field(&mut buf, field::TARGET_JOB_NAME, v).expect("writing to Vec never fails");
		}
		if let Some(v) = self.eresult {
			write_varint_field(&mut buf, field::ERESULT, v as u64).expect("writing to Vec never fails");
		}
		if let Some(v) = &self.error_message {
			write_string_field(&mut buf, field::ERROR_MESSAGE, v).expect("writing to Vec never fails");
		}
		buf
	}

	pub fn decode(bytes: &[u8]) -> io::Result<Self> {
		let mut cursor = Cursor::new(bytes);
		let mut header = ProtoBufHeader::default();
		while (cursor.position() as usize) < bytes.len() {
			let tag = read_varint(&mut cursor)?;
			let field_num = (tag >> 3) as u32;
			let wire_type = (tag & 0x7) as u8;
			match wire_type {
				WIRE_VARINT => {
					let value = read_varint(&mut cursor)?;
					match field_num {
						field::STEAM_ID => header.steam_id = Some(value),
						field::CLIENT_SESSION_ID => header.client_session_id = Some(value as i32),
						field::SOURCE_JOB_ID => header.source_job_id = Some(value),
						field::TARGET_JOB_ID => header.target_job_id = Some(value),
						field::ERESULT => header.eresult = Some(value as i32),
						_ => {}
					}
				}
				WIRE_LEN_DELIMITED => {
					let len = read_varint(&mut cursor)? as usize;
					let mut data = vec![0u8; len];
					cursor.read_exact(&mut data)?;
					match field_num {
						field::TARGET_JOB_NAME => {
							header.target_job_name = Some(String::from_utf8_lossy(&data).into_owned())
						}
						field::ERROR_MESSAGE => {
							header.error_message = Some(String::from_utf8_lossy(&data).into_owned())
						}
						_ => {}
					}
				}
				_ => return Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported wire type")),
			}
		}
		Ok(header)
	}
}

/// Identifies a message by its wire-level tag: a classic opcode, a protobuf
/// opcode, or a unified-service job name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
	Classic(u32),
	Protobuf(u32),
	Service(String),
}

/// A fully decoded CM message: kind, correlation ids, and an opaque payload.
#[derive(Debug, Clone)]
pub struct Message {
	pub kind: MessageKind,
	pub source_job_id: u64,
	pub target_job_id: u64,
	pub steam_id: Option<u64>,
	pub session_id: Option<i32>,
	/// `CMsgProtoBufHeader.eresult`, when the wire header carried one. Always
	/// `None` for classic (non-protobuf) messages.
	pub eresult: Option<i32>,
	pub payload: Vec<u8>,
}

impl Message {
	/// Decodes the raw frame payload (post length+magic strip) into a
	/// [`Message`], dispatching on the high bit of the first `EMsg` word.
	pub fn decode(raw: &[u8]) -> Result<Message, ProtocolError> {
		if raw.len() < 4 {
			return Err(ProtocolError::MalformedHeader);
		}
		let mut cursor = Cursor::new(raw);
		let word = cursor
			.read_u32::<LittleEndian>()
			.map_err(|_| ProtocolError::MalformedHeader)?;
		let is_proto = word & PROTO_MASK != 0;
		let opcode = word & !PROTO_MASK;

		if is_proto {
			let header_len = cursor
				.read_u32::<LittleEndian>()
				.map_err(|_| ProtocolError::MalformedHeader)? as usize;
			let start = cursor.position() as usize;
			let end = start
				.checked_add(header_len)
				.filter(|&e| e <= raw.len())
				.ok_or(ProtocolError::MalformedHeader)?;
			let header = ProtoBufHeader::decode(&raw[start..end]).map_err(|_| ProtocolError::MalformedHeader)?;
			Ok(Message {
				kind: match header.target_job_name.clone() {
					Some(name) => MessageKind::Service(name),
					None => MessageKind::Protobuf(opcode),
				},
				source_job_id: header.source_job_id.unwrap_or(INVALID_JOB_ID),
				target_job_id: header.target_job_id.unwrap_or(INVALID_JOB_ID),
				steam_id: header.steam_id,
				session_id: header.client_session_id,
				eresult: header.eresult,
				payload: raw[end..].to_vec(),
			})
		} else {
			let hdr = MsgHdr::decode(&mut cursor).map_err(|_| ProtocolError::MalformedHeader)?;
			let start = cursor.position() as usize;
			Ok(Message {
				kind: MessageKind::Classic(opcode),
				source_job_id: hdr.source_job_id,
				target_job_id: hdr.target_job_id,
				steam_id: None,
				session_id: None,
				eresult: None,
				payload: raw[start..].to_vec(),
			})
		}
	}

	/// Encodes a message body back into a raw frame payload.
	pub fn encode(&self) -> io::Result<Vec<u8>> {
		let mut out = Vec::new();
		match &self.kind {
			MessageKind::Classic(opcode) => {
				out.write_u32::<LittleEndian>(*opcode)?;
				MsgHdr {
					target_job_id: self.target_job_id,
					source_job_id: self.source_job_id,
				}
				.encode(&mut out)?;
			}
			MessageKind::Protobuf(opcode) | MessageKind::Service(_) => {
				let opcode = match &self.kind {
					MessageKind::Protobuf(op) => *op,
					_ => 0,
				};
				out.write_u32::<LittleEndian>(opcode | PROTO_MASK)?;
				let header = ProtoBufHeader {
					steam_id: self.steam_id,
					client_session_id: self.session_id,
					source_job_id: if self.source_job_id == INVALID_JOB_ID {
						None
					} else {
						Some(self.source_job_id)
					},
					target_job_id: if self.target_job_id == INVALID_JOB_ID {
						None
					} else {
						Some(self.target_job_id)
					},
					target_job_name: match &self.kind {
						MessageKind::Service(name) => Some(name.clone()),
						_ => None,
					},
					eresult: self.eresult,
					error_message: None,
				};
				let encoded_header = header.encode();
				out.write_u32::<LittleEndian>(encoded_header.len() as u32)?;
				out.extend_from_slice(&encoded_header);
			}
		}
		out.extend_from_slice(&self.payload);
		Ok(out)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn job_id_allocator_never_yields_reserved_values() {
		let mut alloc = JobIdAllocator::new();
		for _ in 0..1000 {
			let id = alloc.allocate().unwrap();
			assert_ne!(id, 0);
			assert_ne!(id, INVALID_JOB_ID);
		}
	}

	#[test]
	fn protobuf_header_round_trips() {
		let header = ProtoBufHeader {
			steam_id: Some(76561198020145915),
			client_session_id: Some(42),
			source_job_id: Some(7),
			target_job_id: None,
			target_job_name: Some("IFriendMessagesService.SendMessage#1".to_string()),
			eresult: None,
			error_message: None,
		};
		let encoded = header.encode();
		let decoded = ProtoBufHeader::decode(&encoded).unwrap();
		assert_eq!(decoded, header);
	}

	#[test]
	fn classic_message_round_trips() {
		let msg = Message {
			kind: MessageKind::Classic(703),
			source_job_id: INVALID_JOB_ID,
			target_job_id: INVALID_JOB_ID,
			steam_id: None,
			session_id: None,
			eresult: None,
			payload: vec![1, 2, 3, 4],
		};
		let encoded = msg.encode().unwrap();
		let decoded = Message::decode(&encoded).unwrap();
		assert_eq!(decoded.kind, MessageKind::Classic(703));
		assert_eq!(decoded.payload, vec![1, 2, 3, 4]);
	}

	#[test]
	fn service_message_round_trips() {
		let msg = Message {
			kind: MessageKind::Service("IEconService.GetTradeOffers#1".to_string()),
			source_job_id: 9,
			target_job_id: INVALID_JOB_ID,
			steam_id: Some(1),
			session_id: Some(2),
			eresult: None,
			payload: b"proto-bytes".to_vec(),
		};
		let encoded = msg.encode().unwrap();
		let decoded = Message::decode(&encoded).unwrap();
		assert_eq!(decoded.kind, MessageKind::Service("IEconService.GetTradeOffers#1".to_string()));
		assert_eq!(decoded.source_job_id, 9);
		assert_eq!(decoded.payload, b"proto-bytes");
	}
}
