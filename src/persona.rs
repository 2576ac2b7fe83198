//! Friends-list and persona-state tracking: a thin read-only layer over the
//! dispatcher's subscription mechanism.
//!
//! `ClientPersonaState`/`ClientFriendsList` are Steam protobuf structs like
//! `ClientLogOn`; this crate decodes neither directly and instead hands the
//! raw payload to a caller-supplied [`PersonaDecoder`], the same seam
//! `auth.rs` uses for the logon response.

use std::sync::mpsc::Receiver;

use crate::dispatcher::Delivered;
use crate::message::MessageKind;
use crate::session::SessionHandle;

const CLIENT_PERSONA_STATE: u32 = 766;
const CLIENT_FRIENDS_LIST: u32 = 767;

/// One friend or group entry from a `ClientFriendsList` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendEntry {
	pub steam_id: u64,
	pub relationship: u32,
}

/// Fields this crate needs out of a decoded `ClientFriendsList`.
#[derive(Debug, Clone, Default)]
pub struct FriendsListUpdate {
	pub incremental: bool,
	pub friends: Vec<FriendEntry>,
}

/// Fields this crate needs out of a decoded `ClientPersonaState`.
#[derive(Debug, Clone, Default)]
pub struct PersonaStateUpdate {
	pub steam_id: u64,
	pub persona_name: Option<String>,
	pub status_flags: Option<u32>,
}

pub trait PersonaDecoder {
	fn decode_friends_list(&self, payload: &[u8]) -> Option<FriendsListUpdate>;
	fn decode_persona_state(&self, payload: &[u8]) -> Option<PersonaStateUpdate>;
}

/// An update surfaced by [`PersonaTracker`]: either a friends-list delta or a
/// persona-state change for one steamid, or session teardown.
#[derive(Debug, Clone)]
pub enum PersonaEvent {
	Friends(FriendsListUpdate),
	Persona(PersonaStateUpdate),
	Closed,
}

/// Subscribes to `ClientFriendsList`/`ClientPersonaState` frames and decodes
/// them as they arrive. Mirrors the trade/confirmation engines' pattern of a
/// thin struct wrapping a receiver rather than owning a background thread;
/// the caller drives `poll` from its own event loop.
pub struct PersonaTracker<'a> {
	decoder: &'a dyn PersonaDecoder,
	friends_rx: Receiver<Delivered>,
	persona_rx: Receiver<Delivered>,
}

impl<'a> PersonaTracker<'a> {
	pub fn subscribe(session: &SessionHandle, decoder: &'a dyn PersonaDecoder) -> Self {
		PersonaTracker {
			decoder,
			friends_rx: session.subscribe(MessageKind::Classic(CLIENT_FRIENDS_LIST)),
			persona_rx: session.subscribe(MessageKind::Classic(CLIENT_PERSONA_STATE)),
		}
	}

	/// Drains every frame currently buffered on either subscription,
	/// decoding each into a [`PersonaEvent`]. Frames the decoder can't make
	/// sense of are skipped rather than surfaced as an error: an unknown
	/// optional field in a persona update is not this crate's concern.
	pub fn poll(&self) -> Vec<PersonaEvent> {
		let mut events = Vec::new();
		while let Ok(delivered) = self.friends_rx.try_recv() {
			match delivered {
				Delivered::Frame(msg) => {
					if let Some(update) = self.decoder.decode_friends_list(&msg.payload) {
						events.push(PersonaEvent::Friends(update));
					}
				}
				Delivered::Closed => events.push(PersonaEvent::Closed),
			}
		}
		while let Ok(delivered) = self.persona_rx.try_recv() {
			match delivered {
				Delivered::Frame(msg) => {
					if let Some(update) = self.decoder.decode_persona_state(&msg.payload) {
						events.push(PersonaEvent::Persona(update));
					}
				}
				Delivered::Closed => events.push(PersonaEvent::Closed),
			}
		}
		events
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::{Message, MessageKind as Kind, INVALID_JOB_ID};
	use std::sync::mpsc::channel;

	struct EchoDecoder;
	impl PersonaDecoder for EchoDecoder {
		fn decode_friends_list(&self, payload: &[u8]) -> Option<FriendsListUpdate> {
			if payload.is_empty() {
				return None;
			}
			Some(FriendsListUpdate {
				incremental: true,
				friends: vec![FriendEntry { steam_id: payload[0] as u64, relationship: 3 }],
			})
		}
		fn decode_persona_state(&self, payload: &[u8]) -> Option<PersonaStateUpdate> {
			if payload.is_empty() {
				return None;
			}
			Some(PersonaStateUpdate { steam_id: payload[0] as u64, persona_name: None, status_flags: None })
		}
	}

	fn frame(kind: Kind, payload: Vec<u8>) -> Delivered {
		Delivered::Frame(Message {
			kind,
			source_job_id: INVALID_JOB_ID,
			target_job_id: INVALID_JOB_ID,
			steam_id: None,
			session_id: None,
			eresult: None,
			payload,
		})
	}

	#[test]
	fn decodes_friends_and_persona_frames_independently() {
		let decoder = EchoDecoder;
		let (friends_tx, friends_rx) = channel();
		let (persona_tx, persona_rx) = channel();
		let tracker = PersonaTracker { decoder: &decoder, friends_rx, persona_rx };

		friends_tx.send(frame(Kind::Classic(CLIENT_FRIENDS_LIST), vec![42])).unwrap();
		persona_tx.send(frame(Kind::Classic(CLIENT_PERSONA_STATE), vec![7])).unwrap();

		let events = tracker.poll();
		assert_eq!(events.len(), 2);
		assert!(events.iter().any(|e| matches!(e, PersonaEvent::Friends(u) if u.friends[0].steam_id == 42)));
		assert!(events.iter().any(|e| matches!(e, PersonaEvent::Persona(u) if u.steam_id == 7)));
	}

	#[test]
	fn closed_subscription_surfaces_as_closed_event() {
		let decoder = EchoDecoder;
		let (friends_tx, friends_rx) = channel();
		let (_persona_tx, persona_rx) = channel();
		let tracker = PersonaTracker { decoder: &decoder, friends_rx, persona_rx };

		friends_tx.send(Delivered::Closed).unwrap();
		let events = tracker.poll();
		assert!(matches!(events[0], PersonaEvent::Closed));
	}
}
