//! Broker configuration assembled by the embedding service at startup.

// std
use std::path::PathBuf;
// self
use crate::{_prelude::*, auth::DeploymentId, crypt::SealingKey, jwt::SigningKey};

/// Default assertion validity when neither the application nor the caller overrides it.
pub const DEFAULT_ASSERTION_VALIDITY: Duration = Duration::seconds(3_600);
/// Default page size used when resolving the `groups` assertion attribute.
pub const DEFAULT_GROUP_CLAIM_LIMIT: u32 = 100;

/// Backing-store selection for one resource family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreMode {
	/// Database-backed store with the full write surface.
	Mutable,
	/// Immutable file-backed store loaded from YAML.
	Declarative,
	/// Merged view over both stores.
	Composite,
}
impl StoreMode {
	/// Parses a configured mode; case-insensitive with surrounding whitespace trimmed.
	pub fn parse(raw: &str) -> Option<Self> {
		let trimmed = raw.trim();

		if trimmed.eq_ignore_ascii_case("mutable") {
			Some(Self::Mutable)
		} else if trimmed.eq_ignore_ascii_case("declarative") {
			Some(Self::Declarative)
		} else if trimmed.eq_ignore_ascii_case("composite") {
			Some(Self::Composite)
		} else {
			None
		}
	}

	/// Resolves a raw mode value, falling back to the global declarative switch.
	pub fn resolve(raw: Option<&str>, declarative_enabled: bool) -> Self {
		raw.and_then(Self::parse).unwrap_or(if declarative_enabled {
			Self::Declarative
		} else {
			Self::Mutable
		})
	}
}

/// Deployment-wide settings consumed across the broker.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
	/// Identifier partitioning all persisted rows for this installation.
	pub deployment: DeploymentId,
	/// Issuer placed into every assertion; application config never overrides it.
	pub issuer: String,
	/// Assertion validity applied when the application declares none.
	pub assertion_validity: Duration,
	/// OAuth authorization endpoint the bridge redirects back to.
	pub authorization_endpoint: Url,
	/// Root directory containing `declarative_resources/`.
	pub declarative_root: PathBuf,
	/// Global fallback switch for families without an explicit store mode.
	pub declarative_enabled: bool,
	/// Key sealing bearer tokens at rest.
	pub sealing_key: SealingKey,
	/// Key signing flow assertions.
	pub signing_key: SigningKey,
	/// Page size for the `groups` assertion attribute lookup.
	pub group_claim_limit: u32,
	store_modes: HashMap<String, String>,
}
impl BrokerConfig {
	/// Creates a configuration with crate defaults for the optional settings.
	pub fn new(
		deployment: DeploymentId,
		issuer: impl Into<String>,
		authorization_endpoint: Url,
		sealing_key: SealingKey,
		signing_key: SigningKey,
	) -> Self {
		Self {
			deployment,
			issuer: issuer.into(),
			assertion_validity: DEFAULT_ASSERTION_VALIDITY,
			authorization_endpoint,
			declarative_root: PathBuf::from("."),
			declarative_enabled: true,
			sealing_key,
			signing_key,
			group_claim_limit: DEFAULT_GROUP_CLAIM_LIMIT,
			store_modes: HashMap::new(),
		}
	}

	/// Overrides the declarative resource root directory.
	pub fn with_declarative_root(mut self, root: impl Into<PathBuf>) -> Self {
		self.declarative_root = root.into();

		self
	}

	/// Toggles the global declarative-resources fallback switch.
	pub fn with_declarative_enabled(mut self, enabled: bool) -> Self {
		self.declarative_enabled = enabled;

		self
	}

	/// Overrides the default assertion validity.
	pub fn with_assertion_validity(mut self, validity: Duration) -> Self {
		self.assertion_validity = validity;

		self
	}

	/// Sets the raw `<family>.store` value for one resource family.
	pub fn with_store_mode(mut self, family: impl Into<String>, raw: impl Into<String>) -> Self {
		self.store_modes.insert(family.into(), raw.into());

		self
	}

	/// Resolves the effective store mode for a resource family.
	pub fn store_mode(&self, family: &str) -> StoreMode {
		StoreMode::resolve(self.store_modes.get(family).map(String::as_str), self.declarative_enabled)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{crypt, jwt};

	#[test]
	fn store_modes_parse_loosely() {
		assert_eq!(StoreMode::parse("  Composite \n"), Some(StoreMode::Composite));
		assert_eq!(StoreMode::parse("MUTABLE"), Some(StoreMode::Mutable));
		assert_eq!(StoreMode::parse("declarative"), Some(StoreMode::Declarative));
		assert_eq!(StoreMode::parse("database"), None);
	}

	#[test]
	fn unknown_modes_fall_back_to_the_global_switch() {
		assert_eq!(StoreMode::resolve(Some("bogus"), true), StoreMode::Declarative);
		assert_eq!(StoreMode::resolve(Some("bogus"), false), StoreMode::Mutable);
		assert_eq!(StoreMode::resolve(None, true), StoreMode::Declarative);
		assert_eq!(StoreMode::resolve(Some(" composite "), false), StoreMode::Composite);
	}

	#[test]
	fn per_family_modes_override_the_switch() {
		let config = BrokerConfig::new(
			DeploymentId::new("dep-1").expect("Deployment fixture should be valid."),
			"https://idp.example.com",
			Url::parse("https://idp.example.com/oauth2/authorize")
				.expect("Endpoint fixture should parse."),
			crypt::SealingKey::from_bytes([7; 32]),
			jwt::SigningKey::from_bytes([9; 32]),
		)
		.with_declarative_enabled(false)
		.with_store_mode("layouts", "composite");

		assert_eq!(config.store_mode("layouts"), StoreMode::Composite);
		assert_eq!(config.store_mode("applications"), StoreMode::Mutable);
	}
}
