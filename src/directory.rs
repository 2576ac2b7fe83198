//! CM endpoint directory: discovery, ageing cache, and weighted selection.
//!
//! Persistence follows the same `serde_json`-on-disk pattern used for the
//! sentry store; the pinned fallback list keeps a session connectable even
//! when the discovery endpoint itself is unreachable.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::DirectoryError;

const CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// The carrier a `CmEndpoint` answers to. `HttpDiscoverySource` only ever
/// returns `Tcp` entries today (Steam's `GetCMList` `serverlist` field); a
/// `WebSocket` entry can only arrive via a hand-built `CmEndpoint` until
/// discovery grows a websocket server list, and `FramedTransport::connect`
/// rejects it rather than silently opening a raw TCP socket to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmScheme {
	Tcp,
	WebSocket,
}

/// A single CM endpoint: host, port, and the carrier scheme it answers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CmEndpoint {
	pub host: String,
	pub port: u16,
	#[serde(default = "default_scheme")]
	pub scheme: CmScheme,
}

fn default_scheme() -> CmScheme {
	CmScheme::Tcp
}

impl CmEndpoint {
	/// Builds a TCP endpoint, the only scheme this core currently connects to.
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		CmEndpoint {
			host: host.into(),
			port,
			scheme: CmScheme::Tcp,
		}
	}

	pub fn with_scheme(host: impl Into<String>, port: u16, scheme: CmScheme) -> Self {
		CmEndpoint {
			host: host.into(),
			port,
			scheme,
		}
	}
}

impl std::fmt::Display for CmEndpoint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}

/// Pinned fallback endpoints compiled into the binary, used when discovery
/// fails and no cache entry remains unblacklisted.
fn fallback_endpoints() -> Vec<CmEndpoint> {
	vec![
		CmEndpoint::new("162.254.197.36", 27017),
		CmEndpoint::new("162.254.197.37", 27017),
		CmEndpoint::new("162.254.197.38", 27017),
		CmEndpoint::new("162.254.197.39", 27017),
		CmEndpoint::new("162.254.197.40", 27017),
		CmEndpoint::new("162.254.197.42", 27018),
	]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedEntry {
	endpoint: CmEndpoint,
	last_seen_unix: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CmCache {
	entries: Vec<CachedEntry>,
}

fn now_unix() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs()
}

/// Fetches the bootstrap CM endpoint list from the discovery endpoint. The
/// actual HTTP call is injected so tests can stub it without a network.
pub trait DiscoverySource {
	fn discover(&self) -> Result<Vec<CmEndpoint>, DirectoryError>;
}

/// `https://api.steampowered.com/ISteamDirectory/GetCMList/v1/` via a shared
/// blocking `reqwest` client.
pub struct HttpDiscoverySource {
	client: reqwest::blocking::Client,
	cell_id: u32,
}

impl HttpDiscoverySource {
	pub fn new(client: reqwest::blocking::Client, cell_id: u32) -> Self {
		HttpDiscoverySource { client, cell_id }
	}
}

#[derive(Deserialize)]
struct GetCmListResponse {
	response: GetCmListInner,
}

#[derive(Deserialize)]
struct GetCmListInner {
	#[serde(default)]
	serverlist: Vec<String>,
}

impl DiscoverySource for HttpDiscoverySource {
	fn discover(&self) -> Result<Vec<CmEndpoint>, DirectoryError> {
		let url = format!(
			"https://api.steampowered.com/ISteamDirectory/GetCMList/v1/?cellid={}",
			self.cell_id
		);
		let body: GetCmListResponse = self
			.client
			.get(&url)
			.send()
			.map_err(|e| DirectoryError::FetchFailed(e.into()))?
			.json()
			.map_err(|e| DirectoryError::FetchFailed(e.into()))?;
		let endpoints = body
			.response
			.serverlist
			.iter()
			.filter_map(|entry| {
				let mut parts = entry.rsplitn(2, ':');
				let port: u16 = parts.next()?.parse().ok()?;
				let host = parts.next()?.to_string();
				Some(CmEndpoint::new(host, port))
			})
			.collect();
		Ok(endpoints)
	}
}

/// Discovers, caches, and selects CM endpoints per the directory policy.
pub struct CmDirectory<D: DiscoverySource> {
	source: D,
	cache_path: Option<PathBuf>,
	cache: CmCache,
	blacklist: HashSet<CmEndpoint>,
}

impl<D: DiscoverySource> CmDirectory<D> {
	pub fn new(source: D, cache_path: Option<PathBuf>) -> Self {
		let cache = cache_path
			.as_deref()
			.and_then(|p| Self::load_cache(p).ok())
			.unwrap_or_default();
		CmDirectory {
			source,
			cache_path,
			cache,
			blacklist: HashSet::new(),
		}
	}

	fn load_cache(path: &Path) -> std::io::Result<CmCache> {
		if !path.exists() {
			return Ok(CmCache::default());
		}
		let data = fs::read_to_string(path)?;
		serde_json::from_str(&data).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
	}

	fn save_cache(&self) -> Result<(), DirectoryError> {
		if let Some(path) = &self.cache_path {
			let data = serde_json::to_string_pretty(&self.cache)
				.map_err(|e| DirectoryError::FetchFailed(anyhow::Error::new(e)))?;
			if let Some(parent) = path.parent() {
				fs::create_dir_all(parent)?;
			}
			fs::write(path, data)?;
		}
		Ok(())
	}

	fn cache_is_fresh(&self) -> bool {
		if self.cache.entries.is_empty() {
			return false;
		}
		let now = now_unix();
		self.cache
			.entries
			.iter()
			.all(|e| now.saturating_sub(e.last_seen_unix) < CACHE_MAX_AGE.as_secs())
	}

	fn refresh(&mut self) -> Result<(), DirectoryError> {
		let endpoints = self.source.discover()?;
		if endpoints.is_empty() {
			return Err(DirectoryError::NoEndpointsAvailable);
		}
		let now = now_unix();
		self.cache.entries = endpoints
			.into_iter()
			.map(|endpoint| CachedEntry {
				endpoint,
				last_seen_unix: now,
			})
			.collect();
		self.save_cache()
	}

	/// Marks `endpoint` unusable for the remainder of this session (e.g. after
	/// `TryAnotherCM`).
	pub fn blacklist(&mut self, endpoint: &CmEndpoint) {
		self.blacklist.insert(endpoint.clone());
	}

	/// Selects the next endpoint to attempt, per the directory policy in
	/// order: fresh cache → fresh discovery → pinned fallback.
	pub fn next_endpoint(&mut self) -> Result<CmEndpoint, DirectoryError> {
		if !self.cache_is_fresh() {
			// A discovery failure here is not fatal yet; we still have the
			// cache (if stale) and the fallback list to try.
			let _ = self.refresh();
		}

		let candidates: Vec<&CmEndpoint> = self
			.cache
			.entries
			.iter()
			.map(|e| &e.endpoint)
			.filter(|e| !self.blacklist.contains(e))
			.collect();
		if let Some(chosen) = candidates.choose(&mut rand::thread_rng()) {
			return Ok((*chosen).clone());
		}

		let fallback: Vec<CmEndpoint> = fallback_endpoints()
			.into_iter()
			.filter(|e| !self.blacklist.contains(e))
			.collect();
		fallback
			.choose(&mut rand::thread_rng())
			.cloned()
			.ok_or(DirectoryError::NoEndpointsAvailable)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::RefCell;
	use tempdir::TempDir;

	#[test]
	fn endpoint_without_a_scheme_field_deserializes_as_tcp() {
		let endpoint: CmEndpoint = serde_json::from_str(r#"{"host":"cm1.example.com","port":27017}"#).unwrap();
		assert_eq!(endpoint.scheme, CmScheme::Tcp);
	}

	struct StubSource {
		endpoints: RefCell<Vec<CmEndpoint>>,
		fail: bool,
	}

	impl DiscoverySource for StubSource {
		fn discover(&self) -> Result<Vec<CmEndpoint>, DirectoryError> {
			if self.fail {
				return Err(DirectoryError::NoEndpointsAvailable);
			}
			Ok(self.endpoints.borrow().clone())
		}
	}

	#[test]
	fn selects_from_discovered_endpoints() {
		let source = StubSource {
			endpoints: RefCell::new(vec![CmEndpoint::new("cm1.example.com", 27017)]),
			fail: false,
		};
		let mut directory = CmDirectory::new(source, None);
		let chosen = directory.next_endpoint().unwrap();
		assert_eq!(chosen.host, "cm1.example.com");
	}

	#[test]
	fn falls_back_to_pinned_list_on_discovery_failure() {
		let source = StubSource {
			endpoints: RefCell::new(vec![]),
			fail: true,
		};
		let mut directory = CmDirectory::new(source, None);
		let chosen = directory.next_endpoint().unwrap();
		assert!(fallback_endpoints().contains(&chosen));
	}

	#[test]
	fn blacklisted_endpoint_is_never_selected() {
		let only = CmEndpoint::new("cm1.example.com", 27017);
		let source = StubSource {
			endpoints: RefCell::new(vec![only.clone()]),
			fail: false,
		};
		let mut directory = CmDirectory::new(source, None);
		directory.blacklist(&only);
		let err = directory.next_endpoint();
		assert!(matches!(err, Err(DirectoryError::NoEndpointsAvailable)));
	}

	#[test]
	fn cache_persists_across_instances() {
		let dir = TempDir::new("steamguard-directory").unwrap();
		let path = dir.path().join("cm_cache.json");

		let source = StubSource {
			endpoints: RefCell::new(vec![CmEndpoint::new("cm1.example.com", 27017)]),
			fail: false,
		};
		let mut directory = CmDirectory::new(source, Some(path.clone()));
		directory.next_endpoint().unwrap();

		let source2 = StubSource {
			endpoints: RefCell::new(vec![]),
			fail: true,
		};
		let mut directory2 = CmDirectory::new(source2, Some(path));
		let chosen = directory2.next_endpoint().unwrap();
		assert_eq!(chosen.host, "cm1.example.com");
	}
}
