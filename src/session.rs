//! Session & reconnect: the threaded emulation of the spec's single-threaded
//! cooperative scheduler. A driver thread owns the dispatcher (correlation
//! map + subscriber table) exclusively; a reader thread feeds it decoded
//! frames, callers submit work through a channel, and a supervisor thread
//! wraps the whole connect/run/backoff cycle.

use std::sync::mpsc::{channel, sync_channel, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rand::Rng;

use crate::directory::{CmDirectory, CmEndpoint, DiscoverySource};
use crate::dispatcher::{Delivered, Dispatcher};
use crate::error::{RpcError, TransportError};
use crate::message::{JobIdAllocator, Message, MessageKind, INVALID_JOB_ID};
use crate::transport::{ConnectionState, FramedTransport};

const CHANNEL_ENCRYPT_REQUEST: u32 = 1303;
const CHANNEL_ENCRYPT_RESPONSE: u32 = 1304;
const CHANNEL_ENCRYPT_RESULT: u32 = 1305;
const CLIENT_HEART_BEAT: u32 = 703;
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(9);

/// Depth of the bounded outbound command queue: a caller's `call`/`send`
/// suspends once this many commands are queued ahead of the driver thread,
/// the backpressure the cooperative scheduler it emulates requires.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Lifecycle notifications for consumers that need to know when the session
/// drops and comes back, independent of any particular RPC or subscription.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
	Disconnected,
	Ready,
}

enum Command {
	Rpc {
		kind: MessageKind,
		steam_id: Option<u64>,
		session_id: Option<i32>,
		payload: Vec<u8>,
		reply_tx: Sender<Result<Message, RpcError>>,
		timeout: Option<Duration>,
	},
	Send {
		kind: MessageKind,
		steam_id: Option<u64>,
		session_id: Option<i32>,
		payload: Vec<u8>,
	},
	Subscribe {
		kind: MessageKind,
		tx: Sender<Delivered>,
	},
	SetHeartbeatInterval(Duration),
	Shutdown,
}

enum DriverEvent {
	Frame(Message),
	ReaderClosed,
}

/// A cloneable handle to a running session's driver thread.
#[derive(Clone)]
pub struct SessionHandle {
	cmd_tx: SyncSender<Command>,
}

impl SessionHandle {
	/// Issues an RPC: allocates a job id, registers a reply slot, sends the
	/// frame, and blocks until the response arrives, the timeout elapses, or
	/// the session disconnects.
	pub fn call(
		&self,
		kind: MessageKind,
		steam_id: Option<u64>,
		session_id: Option<i32>,
		payload: Vec<u8>,
		timeout: Option<Duration>,
	) -> Result<Message, RpcError> {
		let (reply_tx, reply_rx) = channel();
		self.cmd_tx
			.send(Command::Rpc {
				kind,
				steam_id,
				session_id,
				payload,
				reply_tx,
				timeout,
			})
			.map_err(|_| RpcError::Disconnected)?;
		reply_rx.recv().map_err(|_| RpcError::Disconnected)?
	}

	/// Sends a frame without expecting a correlated response (e.g. `ClientHeartBeat`).
	pub fn send(&self, kind: MessageKind, steam_id: Option<u64>, session_id: Option<i32>, payload: Vec<u8>) {
		let _ = self.cmd_tx.send(Command::Send {
			kind,
			steam_id,
			session_id,
			payload,
		});
	}

	/// Subscribes to every unsolicited frame matching `kind`.
	pub fn subscribe(&self, kind: MessageKind) -> Receiver<Delivered> {
		let (tx, rx) = channel();
		let _ = self.cmd_tx.send(Command::Subscribe { kind, tx });
		rx
	}

	pub fn set_heartbeat_interval(&self, interval: Duration) {
		let _ = self.cmd_tx.send(Command::SetHeartbeatInterval(interval));
	}

	pub fn shutdown(&self) {
		let _ = self.cmd_tx.send(Command::Shutdown);
	}
}

/// Performs the `ChannelEncryptRequest`/`Response`/`Result` handshake on a
/// freshly connected transport, installing the negotiated session key.
///
/// `universe_modulus_hex`/`universe_exponent_hex` are the Steam public
/// universe RSA key components used to wrap the session key; this is a
/// fixed, published constant, not a per-account key.
fn perform_channel_encrypt_handshake(
	transport: &mut FramedTransport,
	universe_modulus_hex: &str,
	universe_exponent_hex: &str,
) -> Result<(), TransportError> {
	transport.set_state(ConnectionState::ChannelEncryptPending);

	let raw = transport.recv()?;
	let request = Message::decode(&raw).map_err(|_| TransportError::BadMagic)?;
	match request.kind {
		MessageKind::Classic(CHANNEL_ENCRYPT_REQUEST) => {}
		_ => return Err(TransportError::BadMagic),
	}
	if request.payload.len() < 24 {
		return Err(TransportError::BadMagic);
	}
	let protocol = u32::from_le_bytes(request.payload[0..4].try_into().unwrap());

	let channel_key = crate::crypto::generate_channel_key(universe_modulus_hex, universe_exponent_hex)
		.map_err(|_| TransportError::DecryptFailed)?;

	let mut response_payload = Vec::with_capacity(4 + 4 + channel_key.wrapped.len() + 4 + 4);
	response_payload.extend_from_slice(&protocol.to_le_bytes());
	response_payload.extend_from_slice(&(channel_key.wrapped.len() as u32).to_le_bytes());
	response_payload.extend_from_slice(&channel_key.wrapped);
	response_payload.extend_from_slice(&crc::crc32::checksum_ieee(&channel_key.wrapped).to_le_bytes());
	response_payload.extend_from_slice(&0u32.to_le_bytes());

	let response = Message {
		kind: MessageKind::Classic(CHANNEL_ENCRYPT_RESPONSE),
		source_job_id: INVALID_JOB_ID,
		target_job_id: INVALID_JOB_ID,
		steam_id: None,
		session_id: None,
		eresult: None,
		payload: response_payload,
	};
	let encoded = response.encode().map_err(TransportError::Io)?;
	transport.send(&encoded)?;

	let raw = transport.recv()?;
	let result = Message::decode(&raw).map_err(|_| TransportError::BadMagic)?;
	match result.kind {
		MessageKind::Classic(CHANNEL_ENCRYPT_RESULT) => {}
		_ => return Err(TransportError::BadMagic),
	}
	if result.payload.len() < 4 {
		return Err(TransportError::BadMagic);
	}
	const K_ERESULT_OK: u32 = 1;
	let eresult = u32::from_le_bytes(result.payload[0..4].try_into().unwrap());
	if eresult != K_ERESULT_OK {
		return Err(TransportError::DecryptFailed);
	}

	transport.install_session_key(channel_key.session_key);
	Ok(())
}

/// Decorrelated-jitter backoff: `sleep = min(cap, random(base, prev * 3))`.
struct Backoff {
	base: Duration,
	cap: Duration,
	prev: Duration,
}

impl Backoff {
	fn new(base: Duration, cap: Duration) -> Self {
		Backoff { base, cap, prev: base }
	}

	fn next(&mut self) -> Duration {
		let upper = (self.prev.as_secs_f64() * 3.0).max(self.base.as_secs_f64());
		let secs = rand::thread_rng().gen_range(self.base.as_secs_f64()..=upper);
		let next = Duration::from_secs_f64(secs).min(self.cap);
		self.prev = next;
		next
	}

	fn reset(&mut self) {
		self.prev = self.base;
	}
}

/// Runs one connected session to completion (until disconnect), driving the
/// dispatcher on the current thread. Returns when the transport closes.
fn run_connected_session(
	mut transport: FramedTransport,
	driver_rx: Receiver<DriverEvent>,
	cmd_rx: &Receiver<Command>,
	lifecycle_tx: &Sender<LifecycleEvent>,
) {
	let mut dispatcher = Dispatcher::new();
	let mut job_alloc = JobIdAllocator::new();
	let mut heartbeat_interval = DEFAULT_HEARTBEAT;
	let mut last_frame_seen = Instant::now();
	let mut last_heartbeat_sent = Instant::now();

	transport.set_state(ConnectionState::LoggedOn);
	let _ = lifecycle_tx.send(LifecycleEvent::Ready);

	'outer: loop {
		let poll_timeout = Duration::from_millis(500);
		match driver_rx.recv_timeout(poll_timeout) {
			Ok(DriverEvent::Frame(message)) => {
				last_frame_seen = Instant::now();
				dispatcher.dispatch(message);
			}
			Ok(DriverEvent::ReaderClosed) => {
				debug!("reader thread closed the connection");
				break;
			}
			Err(RecvTimeoutError::Timeout) => {}
			Err(RecvTimeoutError::Disconnected) => break,
		}

		// Commands never block the reader: drain whatever is queued, but
		// never wait on an empty channel here.
		loop {
			match cmd_rx.try_recv() {
				Ok(Command::Rpc {
					kind,
					steam_id,
					session_id,
					payload,
					reply_tx,
					timeout,
				}) => {
					let job_id = match job_alloc.allocate() {
						Ok(id) => id,
						Err(_) => {
							let _ = reply_tx.send(Err(RpcError::Disconnected));
							continue;
						}
					};
					let message = Message {
						kind,
						source_job_id: job_id,
						target_job_id: INVALID_JOB_ID,
						steam_id,
						session_id,
						eresult: None,
						payload,
					};
					let deadline = timeout.map(|d| Instant::now() + d);
					match message.encode().and_then(|bytes| {
						transport
							.send(&bytes)
							.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
					}) {
						Ok(()) => dispatcher.register(job_id, reply_tx, deadline),
						Err(e) => {
							warn!("failed to send RPC frame: {}", e);
							let _ = reply_tx.send(Err(RpcError::Disconnected));
							break 'outer;
						}
					}
				}
				Ok(Command::Send {
					kind,
					steam_id,
					session_id,
					payload,
				}) => {
					let message = Message {
						kind,
						source_job_id: INVALID_JOB_ID,
						target_job_id: INVALID_JOB_ID,
						steam_id,
						session_id,
						eresult: None,
						payload,
					};
					if let Ok(bytes) = message.encode() {
						if let Err(e) = transport.send(&bytes) {
							warn!("failed to send frame: {}", e);
							break 'outer;
						}
					}
				}
				Ok(Command::Subscribe { kind, tx }) => {
					dispatcher.subscribe(kind, tx);
				}
				Ok(Command::SetHeartbeatInterval(interval)) => {
					heartbeat_interval = interval;
				}
				Ok(Command::Shutdown) => {
					info!("session shutdown requested");
					break 'outer;
				}
				Err(_) => break,
			}
		}

		let now = Instant::now();
		dispatcher.sweep_timeouts(now);

		if now.saturating_duration_since(last_frame_seen) >= heartbeat_interval * 3 {
			warn!("no frames received for 3x the heartbeat interval, disconnecting");
			break;
		}
		if now.saturating_duration_since(last_heartbeat_sent) >= heartbeat_interval {
			let heartbeat = Message {
				kind: MessageKind::Classic(CLIENT_HEART_BEAT),
				source_job_id: INVALID_JOB_ID,
				target_job_id: INVALID_JOB_ID,
				steam_id: None,
				session_id: None,
				eresult: None,
				payload: vec![],
			};
			if let Ok(bytes) = heartbeat.encode() {
				let _ = transport.send(&bytes);
			}
			last_heartbeat_sent = now;
		}
	}

	dispatcher.close();
	transport.shutdown();
	let _ = lifecycle_tx.send(LifecycleEvent::Disconnected);
}

/// Options for the supervised connect/reconnect loop.
pub struct SessionOptions {
	pub universe_modulus_hex: String,
	pub universe_exponent_hex: String,
	pub reconnect_base: Duration,
	pub reconnect_cap: Duration,
}

/// Spawns the supervisor thread: connects, runs the session to completion,
/// backs off, and reconnects indefinitely until `SessionHandle::shutdown` is
/// called. Returns a handle plus a receiver for lifecycle events.
pub fn spawn_supervised_session<D>(
	directory: Arc<Mutex<CmDirectory<D>>>,
	options: SessionOptions,
) -> (SessionHandle, Receiver<LifecycleEvent>)
where
	D: DiscoverySource + Send + 'static,
{
	let (cmd_tx, cmd_rx) = sync_channel::<Command>(COMMAND_QUEUE_DEPTH);
	let (lifecycle_tx, lifecycle_rx) = channel();
	let handle = SessionHandle { cmd_tx };

	thread::spawn(move || {
		let mut backoff = Backoff::new(options.reconnect_base, options.reconnect_cap);
		loop {
			let endpoint = {
				let mut dir = directory.lock().expect("directory mutex poisoned");
				match dir.next_endpoint() {
					Ok(e) => e,
					Err(e) => {
						error!("no CM endpoint available: {}", e);
						thread::sleep(backoff.next());
						continue;
					}
				}
			};
			match connect_and_run(&endpoint, &options, &cmd_rx, &lifecycle_tx) {
				Ok(()) => backoff.reset(),
				Err(e) => {
					warn!("session to {} failed: {}", endpoint, e);
					if let Ok(mut dir) = directory.lock() {
						dir.blacklist(&endpoint);
					}
					thread::sleep(backoff.next());
				}
			}

			// A Shutdown command drains the channel; detect it by a
			// disconnected sender (all handles dropped) or a direct peek.
			if let Ok(Command::Shutdown) = cmd_rx.try_recv() {
				break;
			}
		}
	});

	(handle, lifecycle_rx)
}

fn connect_and_run(
	endpoint: &CmEndpoint,
	options: &SessionOptions,
	cmd_rx: &Receiver<Command>,
	lifecycle_tx: &Sender<LifecycleEvent>,
) -> Result<(), TransportError> {
	info!("connecting to CM endpoint {}", endpoint);
	let mut transport = FramedTransport::connect(endpoint)?;
	perform_channel_encrypt_handshake(&mut transport, &options.universe_modulus_hex, &options.universe_exponent_hex)?;

	let mut reader_transport = transport.try_clone_reader()?;
	let (driver_tx, driver_rx) = channel::<DriverEvent>();

	let reader_driver_tx = driver_tx.clone();
	let reader_handle = thread::spawn(move || loop {
		match reader_transport.recv() {
			Ok(payload) => match Message::decode(&payload) {
				Ok(message) => {
					if reader_driver_tx.send(DriverEvent::Frame(message)).is_err() {
						break;
					}
				}
				Err(_) => continue,
			},
			Err(_) => {
				let _ = reader_driver_tx.send(DriverEvent::ReaderClosed);
				break;
			}
		}
	});

	run_connected_session(transport, driver_rx, cmd_rx, lifecycle_tx);

	drop(driver_tx);
	let _ = reader_handle.join();
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn backoff_stays_within_base_and_cap() {
		let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
		for _ in 0..20 {
			let d = backoff.next();
			assert!(d >= Duration::from_secs(1));
			assert!(d <= Duration::from_secs(60));
		}
	}

	#[test]
	fn backoff_reset_returns_to_base_range() {
		let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
		for _ in 0..5 {
			backoff.next();
		}
		backoff.reset();
		assert_eq!(backoff.prev, Duration::from_secs(1));
	}
}
