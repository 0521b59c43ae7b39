//! Authenticated-user state carried inside a flow context.

// self
use crate::{
	_prelude::*,
	auth::{OuId, TokenSecret, UserId},
};

/// User state accumulated while a flow executes.
///
/// Executors populate this record step by step: credential executors mark the
/// user authenticated and attach the directory identity, attribute collectors
/// merge collected values, and provisioning creates the identity for
/// registration flows. The assertion issuer reads the final state.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
	/// True once a credential or federation executor verified the user.
	pub is_authenticated: bool,
	/// Directory identifier of the user, when resolved.
	pub user_id: Option<UserId>,
	/// Organization unit the user belongs to.
	pub ou_id: Option<OuId>,
	/// Directory user type (person, machine, ...).
	pub user_type: Option<String>,
	/// Bearer token returned by the credentials service; sealed at rest.
	pub token: Option<TokenSecret>,
	/// Attributes gathered from inputs, federation profiles, or the directory.
	pub attributes: serde_json::Map<String, serde_json::Value>,
	/// Attribute names the credentials service can resolve for this user.
	pub available_attributes: Option<Vec<String>>,
}
impl AuthenticatedUser {
	/// Returns the attribute value as a string, when present and textual.
	pub fn attribute_str(&self, name: &str) -> Option<&str> {
		self.attributes.get(name).and_then(serde_json::Value::as_str)
	}

	/// Inserts or replaces a textual attribute.
	pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.attributes.insert(name.into(), serde_json::Value::String(value.into()));
	}

	/// Merges another user state into this one; `other`'s fields win when set.
	pub fn merge(&mut self, other: AuthenticatedUser) {
		self.is_authenticated = other.is_authenticated;

		if other.user_id.is_some() {
			self.user_id = other.user_id;
		}
		if other.ou_id.is_some() {
			self.ou_id = other.ou_id;
		}
		if other.user_type.is_some() {
			self.user_type = other.user_type;
		}
		if other.token.is_some() {
			self.token = other.token;
		}
		if other.available_attributes.is_some() {
			self.available_attributes = other.available_attributes;
		}

		for (key, value) in other.attributes {
			self.attributes.insert(key, value);
		}
	}
}
impl Debug for AuthenticatedUser {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthenticatedUser")
			.field("is_authenticated", &self.is_authenticated)
			.field("user_id", &self.user_id)
			.field("ou_id", &self.ou_id)
			.field("user_type", &self.user_type)
			.field("token", &self.token.as_ref().map(|_| "<redacted>"))
			.field("attributes", &self.attributes)
			.field("available_attributes", &self.available_attributes)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn merge_overwrites_set_fields_only() {
		let mut base = AuthenticatedUser {
			is_authenticated: false,
			user_id: Some(UserId::new("user-1").expect("User fixture should be valid.")),
			..Default::default()
		};

		base.set_attribute("email", "u@example.com");

		let update = AuthenticatedUser {
			is_authenticated: true,
			token: Some(TokenSecret::new("bearer")),
			..Default::default()
		};

		base.merge(update);

		assert!(base.is_authenticated);
		assert_eq!(base.user_id.as_deref(), Some("user-1"));
		assert_eq!(base.token.as_ref().map(TokenSecret::expose), Some("bearer"));
		assert_eq!(base.attribute_str("email"), Some("u@example.com"));
	}

	#[test]
	fn debug_redacts_bearer_token() {
		let user =
			AuthenticatedUser { token: Some(TokenSecret::new("secret")), ..Default::default() };

		assert!(!format!("{user:?}").contains("secret"));
	}
}
