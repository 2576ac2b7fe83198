//! Sentry file persistence: the machine-auth blob Steam hands back on
//! `ClientUpdateMachineAuth` and expects echoed (by hash) on future logons.
//!
//! Stored the same way the teacher persists its own session state: plain
//! `serde_json` on disk, keyed by account name so one file can hold more than
//! one machine's sentries if several accounts share a cache directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::crypto::sentry_hash;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentryFile {
	#[serde(with = "hex_bytes")]
	pub bytes: Vec<u8>,
}

impl SentryFile {
	pub fn new(bytes: Vec<u8>) -> Self {
		SentryFile { bytes }
	}

	pub fn hash(&self) -> [u8; 20] {
		sentry_hash(&self.bytes)
	}
}

mod hex_bytes {
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		hex::encode(bytes).serialize(serializer)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let s = String::deserialize(deserializer)?;
		hex::decode(s).map_err(serde::de::Error::custom)
	}
}

/// A directory-backed store mapping account name to its sentry blob,
/// persisted as one JSON document per call to [`SentryStore::save`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentryStore {
	#[serde(default)]
	entries: HashMap<String, SentryFile>,
}

impl SentryStore {
	pub fn new() -> Self {
		SentryStore::default()
	}

	pub fn load(path: &Path) -> std::io::Result<Self> {
		if !path.exists() {
			return Ok(SentryStore::new());
		}
		let data = fs::read_to_string(path)?;
		serde_json::from_str(&data).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
	}

	pub fn save(&self, path: &Path) -> std::io::Result<()> {
		let data = serde_json::to_string_pretty(self).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(path, data)
	}

	pub fn get(&self, account_name: &str) -> Option<&SentryFile> {
		self.entries.get(account_name)
	}

	pub fn set(&mut self, account_name: impl Into<String>, sentry: SentryFile) {
		self.entries.insert(account_name.into(), sentry);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempdir::TempDir;

	#[test]
	fn round_trips_through_disk() {
		let dir = TempDir::new("steamguard-sentry").unwrap();
		let path = dir.path().join("sentry.json");

		let mut store = SentryStore::new();
		store.set("alice", SentryFile::new(vec![1, 2, 3, 4, 5]));
		store.save(&path).unwrap();

		let loaded = SentryStore::load(&path).unwrap();
		let sentry = loaded.get("alice").unwrap();
		assert_eq!(sentry.bytes, vec![1, 2, 3, 4, 5]);
	}

	#[test]
	fn missing_file_yields_an_empty_store() {
		let dir = TempDir::new("steamguard-sentry").unwrap();
		let path = dir.path().join("does-not-exist.json");
		let store = SentryStore::load(&path).unwrap();
		assert!(store.get("anyone").is_none());
	}

	#[test]
	fn hash_matches_crypto_sentry_hash() {
		let sentry = SentryFile::new(b"challenge-blob".to_vec());
		assert_eq!(sentry.hash(), sentry_hash(b"challenge-blob"));
	}
}
