//! AEAD sealing for bearer tokens persisted inside flow contexts.

// crates.io
use aes_gcm::{
	Aes256Gcm, Key, Nonce,
	aead::{Aead, KeyInit},
};
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use rand::RngCore;
// self
use crate::_prelude::*;

const NONCE_LEN: usize = 12;

/// Errors raised while sealing or opening token material.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum SealError {
	/// The configured key is not valid base64 or not 256 bits.
	#[error("Sealing key must be base64 of exactly 32 bytes.")]
	InvalidKey,
	/// Encryption failed inside the AEAD.
	#[error("Failed to seal token material.")]
	Seal,
	/// The stored blob is malformed or was sealed under a different key.
	#[error("Failed to open sealed token material.")]
	Open,
}

/// Process-wide 256-bit key used to seal bearer tokens at rest.
#[derive(Clone)]
pub struct SealingKey([u8; 32]);
impl SealingKey {
	/// Wraps raw key bytes.
	pub fn from_bytes(bytes: [u8; 32]) -> Self {
		Self(bytes)
	}

	/// Decodes a key from standard or URL-safe base64.
	pub fn from_base64(encoded: &str) -> Result<Self, SealError> {
		let bytes = STANDARD
			.decode(encoded)
			.or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
			.map_err(|_| SealError::InvalidKey)?;

		<[u8; 32]>::try_from(bytes).map(Self).map_err(|_| SealError::InvalidKey)
	}
}
impl Debug for SealingKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("SealingKey").field(&"<redacted>").finish()
	}
}

/// AES-256-GCM cipher sealing bearer tokens before they reach storage.
///
/// The sealed blob is `base64(nonce || ciphertext)` with a fresh nonce per
/// encryption; the empty token maps to `None` so callers can store NULL.
#[derive(Clone)]
pub struct TokenCipher {
	cipher: Aes256Gcm,
}
impl TokenCipher {
	/// Builds a cipher over the deployment sealing key.
	pub fn new(key: &SealingKey) -> Self {
		Self { cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)) }
	}

	/// Seals a token; the empty string seals to `None`.
	pub fn seal(&self, plaintext: &str) -> Result<Option<String>, SealError> {
		if plaintext.is_empty() {
			return Ok(None);
		}

		let mut nonce = [0_u8; NONCE_LEN];

		rand::rng().fill_bytes(&mut nonce);

		let ciphertext = self
			.cipher
			.encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
			.map_err(|_| SealError::Seal)?;
		let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());

		blob.extend_from_slice(&nonce);
		blob.extend_from_slice(&ciphertext);

		Ok(Some(STANDARD.encode(blob)))
	}

	/// Opens a sealed blob produced by [`seal`](Self::seal).
	pub fn open(&self, sealed: &str) -> Result<String, SealError> {
		let blob = STANDARD.decode(sealed).map_err(|_| SealError::Open)?;

		if blob.len() <= NONCE_LEN {
			return Err(SealError::Open);
		}

		let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
		let plaintext =
			self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| SealError::Open)?;

		String::from_utf8(plaintext).map_err(|_| SealError::Open)
	}
}
impl Debug for TokenCipher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenCipher(..)")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn cipher() -> TokenCipher {
		TokenCipher::new(&SealingKey::from_bytes([42; 32]))
	}

	#[test]
	fn seal_open_round_trips() {
		let cipher = cipher();
		let sealed = cipher
			.seal("bearer-token-value")
			.expect("Sealing should succeed.")
			.expect("Non-empty tokens should produce a blob.");

		assert_ne!(sealed, "bearer-token-value");
		assert_eq!(cipher.open(&sealed).expect("Opening should succeed."), "bearer-token-value");
	}

	#[test]
	fn empty_tokens_seal_to_none() {
		assert_eq!(cipher().seal("").expect("Sealing the empty string should succeed."), None);
	}

	#[test]
	fn nonces_differ_between_seals() {
		let cipher = cipher();
		let lhs = cipher.seal("same").expect("Seal should succeed.").expect("Blob expected.");
		let rhs = cipher.seal("same").expect("Seal should succeed.").expect("Blob expected.");

		assert_ne!(lhs, rhs, "Each seal must use a fresh nonce.");
	}

	#[test]
	fn tampered_blobs_fail_to_open() {
		let cipher = cipher();
		let sealed = cipher.seal("token").expect("Seal should succeed.").expect("Blob expected.");

		assert_eq!(cipher.open("not-base64!!!"), Err(SealError::Open));

		let foreign = TokenCipher::new(&SealingKey::from_bytes([7; 32]));

		assert_eq!(foreign.open(&sealed), Err(SealError::Open));
	}

	#[test]
	fn keys_decode_from_base64() {
		let encoded = STANDARD.encode([1_u8; 32]);

		SealingKey::from_base64(&encoded).expect("32-byte key should decode.");
		assert!(matches!(SealingKey::from_base64("short"), Err(SealError::InvalidKey)));
	}
}
