//! Credential material staged inside flows: bearer tokens and passwords.

// self
use crate::_prelude::*;

/// Credential value moving through a flow: the bearer token minted by the
/// credentials service, or a password collected from step inputs and staged
/// for provisioning.
///
/// The wrapper implements no `Display` and redacts `Debug`, so credential
/// material cannot reach logs through formatting; persistence goes through
/// the context store, which seals the value before it leaves the process.
/// Equality and [`matches`](Self::matches) compare in constant time over the
/// full value, so a credential check cannot leak a matching prefix through
/// timing.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new credential value.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner credential. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns true for the empty credential, which persists as NULL.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Compares a submitted candidate against the stored credential.
	///
	/// Runs over every byte regardless of where the first mismatch occurs;
	/// unequal lengths are rejected without inspecting contents.
	pub fn matches(&self, candidate: &str) -> bool {
		let stored = self.0.as_bytes();
		let candidate = candidate.as_bytes();

		if stored.len() != candidate.len() {
			return false;
		}

		stored.iter().zip(candidate).fold(0_u8, |diff, (lhs, rhs)| diff | (lhs ^ rhs)) == 0
	}
}
impl PartialEq for TokenSecret {
	fn eq(&self, other: &Self) -> bool {
		self.matches(other.expose())
	}
}
impl Eq for TokenSecret {}
impl From<String> for TokenSecret {
	fn from(value: String) -> Self {
		Self(value)
	}
}
impl From<&str> for TokenSecret {
	fn from(value: &str) -> Self {
		Self(value.to_owned())
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn debug_redacts_the_credential() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(\"<redacted>\")");
		assert_eq!(secret.expose(), "super-secret");
	}

	#[test]
	fn matches_compares_full_values() {
		let secret = TokenSecret::new("s3cret");

		assert!(secret.matches("s3cret"));
		assert!(!secret.matches("s3crex"), "A trailing mismatch must fail.");
		assert!(!secret.matches("s3cret-suffix"), "Length mismatches must fail.");
		assert!(!secret.matches(""));
		assert!(TokenSecret::new("").matches(""));
	}

	#[test]
	fn equality_uses_the_credential_comparison() {
		assert_eq!(TokenSecret::new("bearer"), TokenSecret::from("bearer"));
		assert_ne!(TokenSecret::new("bearer"), TokenSecret::from("other".to_owned()));
	}

	#[test]
	fn empty_credentials_are_flagged_for_null_storage() {
		assert!(TokenSecret::new("").is_empty());
		assert!(!TokenSecret::new("b").is_empty());
	}
}
