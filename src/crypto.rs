//! RSA password wrapping, channel-key establishment, Steam Guard TOTP codes,
//! mobile confirmation codes, and sentry/device-id hashing.
//!
//! HMAC-SHA1 mirrors how the teacher computes Steam Guard codes; RSA and AES
//! follow the same crate choices the teacher already depends on (`rsa`,
//! `aes`, `block-modes`).

use aes::Aes256;
use base64::{decode as b64_decode, encode as b64_encode};
use block_modes::block_padding::Pkcs7;
use block_modes::{BlockMode, Cbc};
use rand::RngCore;
use rsa::{BigUint, PaddingScheme, PublicKey, RsaPublicKey};

use crate::error::CryptoError;

type Aes256CbcDec = Cbc<Aes256, Pkcs7>;
type Aes256CbcEnc = Cbc<Aes256, Pkcs7>;

pub const GUARD_CODE_ALPHABET: &[u8] = b"23456789BCDFGHJKMNPQRTVWXY";
const TOTP_PERIOD_SECS: u64 = 30;

fn rsa_public_key(modulus_hex: &str, exponent_hex: &str) -> Result<RsaPublicKey, CryptoError> {
	let modulus_bytes = hex::decode(modulus_hex)?;
	let exponent_bytes = hex::decode(exponent_hex)?;
	if modulus_bytes.len() * 8 < 1024 {
		return Err(CryptoError::ModulusTooSmall(modulus_bytes.len() * 8));
	}
	let n = BigUint::from_bytes_be(&modulus_bytes);
	let e = BigUint::from_bytes_be(&exponent_bytes);
	Ok(RsaPublicKey::new(n, e)?)
}

/// Encrypts `password` with PKCS#1 v1.5 under the account's RSA public key.
pub fn wrap_password(password: &str, modulus_hex: &str, exponent_hex: &str) -> Result<Vec<u8>, CryptoError> {
	let key = rsa_public_key(modulus_hex, exponent_hex)?;
	let mut rng = rand::thread_rng();
	let padding = PaddingScheme::new_pkcs1v15_encrypt();
	Ok(key.encrypt(&mut rng, padding, password.as_bytes())?)
}

pub struct ChannelKey {
	/// The raw 32-byte session key, kept by the caller to encrypt/decrypt frames.
	pub session_key: [u8; 32],
	/// The session key, RSA-OAEP-SHA1 encrypted, to send to the CM.
	pub wrapped: Vec<u8>,
	/// HMAC-SHA1 of `wrapped` under the first 16 bytes of `session_key`, the
	/// "channel confirmation" the CM checks before trusting the key.
	pub confirmation: [u8; 20],
}

/// Generates a fresh session key and wraps it for the channel-encrypt handshake.
pub fn generate_channel_key(modulus_hex: &str, exponent_hex: &str) -> Result<ChannelKey, CryptoError> {
	let key = rsa_public_key(modulus_hex, exponent_hex)?;
	let mut session_key = [0u8; 32];
	rand::thread_rng().fill_bytes(&mut session_key);

	let mut rng = rand::thread_rng();
	let padding = PaddingScheme::new_oaep::<sha1::Sha1>();
	let wrapped = key.encrypt(&mut rng, padding, &session_key)?;

	let confirmation = hmac_sha1::hmac_sha1(&session_key[..16], &wrapped);

	Ok(ChannelKey {
		session_key,
		wrapped,
		confirmation,
	})
}

/// Encrypts a single frame payload with AES-256-CBC under `session_key`,
/// prefixing the ciphertext with a fresh, unencrypted 16-byte IV.
pub fn encrypt_frame(session_key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
	let mut iv = [0u8; 16];
	rand::thread_rng().fill_bytes(&mut iv);
	let cipher = Aes256CbcEnc::new_from_slices(session_key, &iv).expect("key/iv are fixed-size");
	let mut out = Vec::with_capacity(16 + plaintext.len() + 16);
	out.extend_from_slice(&iv);
	out.extend_from_slice(&cipher.encrypt_vec(plaintext));
	out
}

/// Decrypts a frame produced by [`encrypt_frame`].
pub fn decrypt_frame(session_key: &[u8; 32], framed: &[u8]) -> Result<Vec<u8>, CryptoError> {
	if framed.len() < 16 {
		return Err(CryptoError::DecryptFailed);
	}
	let (iv, ciphertext) = framed.split_at(16);
	let cipher = Aes256CbcDec::new_from_slices(session_key, iv).map_err(|_| CryptoError::DecryptFailed)?;
	cipher
		.decrypt_vec(ciphertext)
		.map_err(|_| CryptoError::DecryptFailed)
}

/// Computes a 5-character Steam Guard TOTP code for `unix_time`.
pub fn guard_code(shared_secret_b64: &str, unix_time: u64) -> Result<String, CryptoError> {
	if shared_secret_b64.trim().is_empty() {
		return Err(CryptoError::EmptySecret);
	}
	let secret = b64_decode(shared_secret_b64.trim())?;
	let counter = (unix_time / TOTP_PERIOD_SECS).to_be_bytes();
	let mac = hmac_sha1::hmac_sha1(&secret, &counter);

	let offset = (mac[19] & 0x0F) as usize;
	let mut truncated = [0u8; 4];
	truncated.copy_from_slice(&mac[offset..offset + 4]);
	let mut code_point = u32::from_be_bytes(truncated) & 0x7FFF_FFFF;

	let mut code = String::with_capacity(5);
	for _ in 0..5 {
		let idx = (code_point as usize) % GUARD_CODE_ALPHABET.len();
		code.push(GUARD_CODE_ALPHABET[idx] as char);
		code_point /= GUARD_CODE_ALPHABET.len() as u32;
	}
	Ok(code)
}

/// Computes a base64 mobile confirmation code for the given `tag` (`"conf"`,
/// `"details"`, `"allow"`, `"cancel"`) at `unix_time`.
pub fn confirmation_code(identity_secret_b64: &str, tag: &str, unix_time: u64) -> Result<String, CryptoError> {
	if identity_secret_b64.trim().is_empty() {
		return Err(CryptoError::EmptySecret);
	}
	let secret = b64_decode(identity_secret_b64.trim())?;
	let mut buf = Vec::with_capacity(8 + tag.len());
	buf.extend_from_slice(&unix_time.to_be_bytes());
	buf.extend_from_slice(tag.as_bytes());
	let mac = hmac_sha1::hmac_sha1(&secret, &buf);
	Ok(b64_encode(mac))
}

/// Derives the `android:8-4-4-4-12` device id Steam expects from a SteamID.
pub fn device_id(steamid: u64) -> String {
	let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, steamid.to_string().as_bytes());
	let hex = hex::encode(digest.as_ref());
	format!(
		"android:{}-{}-{}-{}-{}",
		&hex[0..8],
		&hex[8..12],
		&hex[12..16],
		&hex[16..20],
		&hex[20..32]
	)
}

/// SHA-1 hashes a sentry challenge blob, as returned to Steam in response to
/// `ClientUpdateMachineAuth`.
pub fn sentry_hash(blob: &[u8]) -> [u8; 20] {
	let digest = ring::digest::digest(&ring::digest::SHA1_FOR_LEGACY_USE_ONLY, blob);
	let mut out = [0u8; 20];
	out.copy_from_slice(digest.as_ref());
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ten_zero_bytes_secret() -> String {
		base64::encode([0u8; 10])
	}

	#[test]
	fn guard_code_is_deterministic() {
		let secret = ten_zero_bytes_secret();
		let a = guard_code(&secret, 1700000000).unwrap();
		let b = guard_code(&secret, 1700000000).unwrap();
		assert_eq!(a, b);
		assert_eq!(a.len(), 5);
		assert!(a.chars().all(|c| GUARD_CODE_ALPHABET.contains(&(c as u8))));
	}

	#[test]
	fn guard_code_is_stable_within_the_totp_window() {
		let secret = ten_zero_bytes_secret();
		let base = 1700000000u64 - (1700000000u64 % 30);
		let a = guard_code(&secret, base).unwrap();
		let b = guard_code(&secret, base + 29).unwrap();
		assert_eq!(a, b);
	}

	#[test]
	fn guard_code_changes_across_the_totp_window() {
		let secret = ten_zero_bytes_secret();
		let base = 1700000000u64 - (1700000000u64 % 30);
		let a = guard_code(&secret, base).unwrap();
		let b = guard_code(&secret, base + 30).unwrap();
		assert_ne!(a, b);
	}

	#[test]
	fn confirmation_tags_are_separated() {
		let secret = ten_zero_bytes_secret();
		let allow = confirmation_code(&secret, "allow", 1700000000).unwrap();
		let cancel = confirmation_code(&secret, "cancel", 1700000000).unwrap();
		assert_ne!(allow, cancel);
	}

	#[test]
	fn device_id_has_the_android_shape() {
		let id = device_id(76561198020145915);
		assert!(id.starts_with("android:"));
		let hex_part = &id["android:".len()..];
		let segments: Vec<&str> = hex_part.split('-').collect();
		assert_eq!(segments.iter().map(|s| s.len()).collect::<Vec<_>>(), vec![8, 4, 4, 4, 12]);
	}

	#[test]
	fn frame_encryption_round_trips() {
		let mut key = [0u8; 32];
		rand::thread_rng().fill_bytes(&mut key);
		let plaintext = b"hello steam";
		let framed = encrypt_frame(&key, plaintext);
		let decrypted = decrypt_frame(&key, &framed).unwrap();
		assert_eq!(decrypted, plaintext);
	}

	proptest::proptest! {
		#[test]
		fn framing_is_byte_exact(payload: Vec<u8>) {
			let mut key = [0u8; 32];
			rand::thread_rng().fill_bytes(&mut key);
			let framed = encrypt_frame(&key, &payload);
			let decrypted = decrypt_frame(&key, &framed).unwrap();
			proptest::prop_assert_eq!(decrypted, payload);
		}
	}
}
