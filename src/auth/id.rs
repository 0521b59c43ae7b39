//! Strongly typed identifiers enforced across the broker domain.
//!
//! Two id populations exist. Configured identifiers (deployments,
//! applications, users, organization units) arrive from config files, YAML
//! resources, and admin APIs. Generated identifiers (flows, session data
//! keys) are minted by the broker itself and round-trip through browser
//! query strings. Both travel unquoted through URLs, log lines, and database
//! keys, so validation rejects whitespace and control characters rather than
//! whitelisting a charset: resource ids in the wild carry dots, slashes, and
//! unicode names, and the stores key on exact bytes anyway. Generated kinds
//! additionally declare their own entropy length, browser-facing keys being
//! longer than server-side flow ids.

// std
use std::{borrow::Borrow, ops::Deref};
// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::_prelude::*;

macro_rules! def_id {
	(@configured $name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
	(@generated $name:ident, $doc:literal, $kind:literal, $len:literal) => {
		def_id! { @configured $name, $doc, $kind }
		impl $name {
			/// Number of alphanumeric characters in a minted identifier.
			pub const GENERATED_LEN: usize = $len;

			/// Mints a fresh random identifier of [`Self::GENERATED_LEN`] characters.
			pub fn generate() -> Self {
				Self(random_string(Self::GENERATED_LEN))
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (deployment, flow, application, ...).
		kind: &'static str,
	},
	/// The identifier contains a character that cannot travel unquoted.
	#[error("{kind} identifier contains the forbidden character {character:?}.")]
	ForbiddenCharacter {
		/// Kind of identifier (deployment, flow, application, ...).
		kind: &'static str,
		/// The offending whitespace or control character.
		character: char,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (deployment, flow, application, ...).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { @configured DeploymentId, "Per-installation identifier partitioning rows in shared databases.", "Deployment" }
def_id! { @configured ApplicationId, "Unique identifier for a registered application.", "Application" }
def_id! { @configured UserId, "Unique identifier for a directory user.", "User" }
def_id! { @configured OuId, "Identifier for an organization unit scoping users and schemas.", "OrganizationUnit" }
def_id! { @generated FlowId, "Unique identifier for an in-progress authentication or registration flow.", "Flow", 32 }
def_id! { @generated SessionDataKey, "Opaque key binding a browser to an authorization-endpoint session.", "Session", 48 }

/// Produces an alphanumeric random string of the requested length.
pub(crate) fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}
	if let Some(character) = view.chars().find(|c| c.is_whitespace() || c.is_control()) {
		return Err(IdentifierError::ForbiddenCharacter { kind, character });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_padding_and_emptiness() {
		assert!(
			matches!(
				FlowId::new(" flow-123"),
				Err(IdentifierError::ForbiddenCharacter { character: ' ', .. })
			),
			"Leading whitespace must be rejected."
		);
		assert!(FlowId::new("flow-123 ").is_err(), "Trailing whitespace must be rejected.");

		let flow = FlowId::new("flow-123").expect("Flow fixture should be considered valid.");

		assert_eq!(flow.as_ref(), "flow-123");
		assert!(matches!(UserId::new(""), Err(IdentifierError::Empty { .. })));
		assert!(DeploymentId::new("with space").is_err());
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let payload = "\"deployment-42\"";
		let deployment: DeploymentId =
			serde_json::from_str(payload).expect("Deployment should deserialize successfully.");

		assert_eq!(deployment.as_ref(), "deployment-42");
		assert!(serde_json::from_str::<DeploymentId>("\"with space\"").is_err());
		assert!(serde_json::from_str::<DeploymentId>("\" deployment-42\"").is_err());
	}

	#[test]
	fn unquotable_characters_and_length_limits() {
		let nbsp = format!("ou{}id", '\u{00A0}');

		assert!(matches!(
			OuId::new(&nbsp),
			Err(IdentifierError::ForbiddenCharacter { character: '\u{00A0}', .. })
		));

		let bell = format!("user{}1", '\u{0007}');

		assert!(
			matches!(
				UserId::new(&bell),
				Err(IdentifierError::ForbiddenCharacter { character: '\u{0007}', .. })
			),
			"Control characters must be rejected."
		);

		let dotted = "apps/portal.v2";

		ApplicationId::new(dotted).expect("Punctuation-bearing ids are legitimate.");

		let exact = "a".repeat(IDENTIFIER_MAX_LEN);

		OuId::new(&exact).expect("Exact length should succeed.");

		let too_long = "a".repeat(IDENTIFIER_MAX_LEN + 1);

		assert!(matches!(OuId::new(&too_long), Err(IdentifierError::TooLong { .. })));
	}

	#[test]
	fn generated_identifiers_carry_their_declared_entropy() {
		let lhs = FlowId::generate();
		let rhs = FlowId::generate();

		assert_eq!(lhs.len(), FlowId::GENERATED_LEN);
		assert_ne!(lhs, rhs, "Consecutive generated flow ids should not collide.");

		let key = SessionDataKey::generate();

		assert_eq!(key.len(), SessionDataKey::GENERATED_LEN);
		assert!(
			SessionDataKey::GENERATED_LEN > FlowId::GENERATED_LEN,
			"Browser-facing keys carry more entropy than server-side flow ids."
		);
		SessionDataKey::new(key.as_ref()).expect("Generated keys should pass validation.");
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<FlowId, u8> = HashMap::from_iter([(
			FlowId::new("flow-123").expect("Flow used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("flow-123"), Some(&7));
	}
}
