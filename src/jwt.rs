//! Assertion signing service wrapping `jsonwebtoken`.

// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
// self
use crate::_prelude::*;

const MIN_KEY_LEN: usize = 32;

/// Errors raised while signing or verifying assertions.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum JwtError {
	/// The configured key is shorter than 256 bits or not valid base64.
	#[error("Signing key must be base64 of at least 32 bytes.")]
	InvalidKey,
	/// Signing failed inside the JWT library.
	#[error("Failed to sign assertion: {message}.")]
	Sign {
		/// Underlying library error text.
		message: String,
	},
	/// Signature or claim validation failed.
	#[error("Failed to verify assertion: {message}.")]
	Verify {
		/// Underlying library error text.
		message: String,
	},
	/// A claim required by the caller is absent from the verified payload.
	#[error("Assertion is missing required claim `{name}`.")]
	MissingClaim {
		/// Name of the absent claim.
		name: &'static str,
	},
}

/// Symmetric key material for assertion signing.
#[derive(Clone)]
pub struct SigningKey(Vec<u8>);
impl SigningKey {
	/// Wraps raw key bytes.
	pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
		Self(bytes.into())
	}

	/// Decodes a key from standard or URL-safe base64, enforcing the minimum length.
	pub fn from_base64(encoded: &str) -> Result<Self, JwtError> {
		let bytes = STANDARD
			.decode(encoded)
			.or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
			.map_err(|_| JwtError::InvalidKey)?;

		if bytes.len() < MIN_KEY_LEN {
			return Err(JwtError::InvalidKey);
		}

		Ok(Self(bytes))
	}
}
impl Debug for SigningKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("SigningKey").field(&"<redacted>").finish()
	}
}

/// Service signing flow assertions with HS256 over the deployment key.
///
/// The bridge holds the same key, so assertions are verified (not merely
/// decoded) when their claims are lifted into an authorization session.
pub struct JwtSigner {
	issuer: String,
	encoding: EncodingKey,
	decoding: DecodingKey,
}
impl JwtSigner {
	/// Builds a signer for the configured issuer and key.
	pub fn new(issuer: impl Into<String>, key: &SigningKey) -> Self {
		Self {
			issuer: issuer.into(),
			encoding: EncodingKey::from_secret(&key.0),
			decoding: DecodingKey::from_secret(&key.0),
		}
	}

	/// Issuer claim placed into every assertion.
	pub fn issuer(&self) -> &str {
		&self.issuer
	}

	/// Signs an assembled claim document.
	pub fn sign(&self, claims: &serde_json::Value) -> Result<String, JwtError> {
		jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
			.map_err(|e| JwtError::Sign { message: e.to_string() })
	}

	/// Verifies a token and returns its claim document.
	///
	/// When `audience` is provided the `aud` claim must match; expiry is
	/// always enforced.
	pub fn verify(
		&self,
		token: &str,
		audience: Option<&str>,
	) -> Result<serde_json::Map<String, serde_json::Value>, JwtError> {
		let mut validation = Validation::new(Algorithm::HS256);

		validation.set_issuer(&[&self.issuer]);

		match audience {
			Some(audience) => validation.set_audience(&[audience]),
			None => validation.validate_aud = false,
		}

		jsonwebtoken::decode::<serde_json::Map<String, serde_json::Value>>(
			token,
			&self.decoding,
			&validation,
		)
		.map(|data| data.claims)
		.map_err(|e| JwtError::Verify { message: e.to_string() })
	}
}
impl Debug for JwtSigner {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("JwtSigner").field("issuer", &self.issuer).finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	fn signer() -> JwtSigner {
		JwtSigner::new("https://idp.example.com", &SigningKey::from_bytes([3_u8; 32]))
	}

	fn claims(audience: &str) -> serde_json::Value {
		let now = OffsetDateTime::now_utc().unix_timestamp();

		json!({
			"sub": "user-1",
			"iss": "https://idp.example.com",
			"aud": audience,
			"iat": now,
			"exp": now + 300,
		})
	}

	#[test]
	fn sign_verify_round_trips() {
		let signer = signer();
		let token = signer.sign(&claims("app-1")).expect("Signing should succeed.");
		let verified =
			signer.verify(&token, Some("app-1")).expect("Verification should succeed.");

		assert_eq!(verified.get("sub").and_then(serde_json::Value::as_str), Some("user-1"));
	}

	#[test]
	fn audience_mismatch_fails_verification() {
		let signer = signer();
		let token = signer.sign(&claims("app-1")).expect("Signing should succeed.");

		assert!(matches!(
			signer.verify(&token, Some("other-app")),
			Err(JwtError::Verify { .. })
		));
	}

	#[test]
	fn foreign_keys_fail_verification() {
		let token = signer().sign(&claims("app-1")).expect("Signing should succeed.");
		let foreign =
			JwtSigner::new("https://idp.example.com", &SigningKey::from_bytes([4_u8; 32]));

		assert!(matches!(foreign.verify(&token, None), Err(JwtError::Verify { .. })));
	}

	#[test]
	fn short_keys_are_rejected() {
		let encoded = STANDARD.encode([1_u8; 8]);

		assert!(matches!(SigningKey::from_base64(&encoded), Err(JwtError::InvalidKey)));
	}
}
