//! In-memory authorization-endpoint session store.

// self
use crate::{
	_prelude::*,
	auth::{ApplicationId, AuthenticatedUser, ScopeSet, SessionDataKey},
};

/// OAuth parameters captured from the authorization request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OAuthParameters {
	/// Application the authorization request targets.
	pub app_id: ApplicationId,
	/// OAuth client id of the request.
	pub client_id: String,
	/// Redirect URI resolved for the request.
	pub redirect_uri: String,
	/// Requested scopes.
	pub scopes: ScopeSet,
	/// Client-provided state parameter.
	#[serde(default)]
	pub state: Option<String>,
}

/// One authorization-endpoint session.
///
/// Sessions live only in process memory: the bridge moves them between keys
/// (session data key ↔ flow id) while a flow is in progress and mints a
/// fresh key once the flow completes.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationSession {
	/// Key the browser presents to resume the session.
	pub session_data_key: SessionDataKey,
	/// Captured OAuth parameters.
	pub oauth: OAuthParameters,
	/// Instant the user authenticated, once known.
	pub auth_time: OffsetDateTime,
	/// Authenticated user, populated after flow completion.
	#[serde(default)]
	pub user: Option<AuthenticatedUser>,
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("session_data_key", &self.session_data_key)
			.field("app_id", &self.oauth.app_id)
			.field("authenticated", &self.user.is_some())
			.finish()
	}
}

/// Errors raised by the session bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum SessionError {
	/// Neither or both of session key and flow id were provided.
	#[error("Exactly one of session data key or flow id must be provided.")]
	InvalidAuthFlow,
	/// No session exists under the presented key.
	#[error("Authorization session `{key}` was not found or has been terminated.")]
	NotFound {
		/// Presented session key or flow id.
		key: String,
	},
	/// Internal failure while translating sessions and flows.
	#[error("Authorization session failure: {message}.")]
	Backend {
		/// Redacted failure text.
		message: String,
	},
}
impl SessionError {
	/// Returns the stable client-facing code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidAuthFlow => "SSE-40001",
			Self::NotFound { .. } => "SSE-40002",
			Self::Backend { .. } => "SSE-5000",
		}
	}

	/// Classifies the error as a client or server failure.
	pub fn kind(&self) -> crate::error::ErrorKind {
		match self {
			Self::Backend { .. } => crate::error::ErrorKind::Server,
			_ => crate::error::ErrorKind::Client,
		}
	}
}

/// Process-wide map of in-flight authorization sessions.
///
/// The store is the single accessor for the session map; readers are
/// unlocked while writers (insert/remove) take the exclusive side of the
/// guard. Entries are keyed by whatever string currently owns the session:
/// a session data key before a flow starts, a flow id while one runs.
#[derive(Clone, Default)]
pub struct SessionStore {
	inner: Arc<RwLock<HashMap<String, AuthorizationSession>>>,
}
impl SessionStore {
	/// Creates an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores a session under the provided key, replacing any previous entry.
	pub fn insert(&self, key: impl Into<String>, session: AuthorizationSession) {
		self.inner.write().insert(key.into(), session);
	}

	/// Removes and returns the session under the key.
	pub fn take(&self, key: &str) -> Option<AuthorizationSession> {
		self.inner.write().remove(key)
	}

	/// Returns a copy of the session under the key without removing it.
	pub fn peek(&self, key: &str) -> Option<AuthorizationSession> {
		self.inner.read().get(key).cloned()
	}

	/// Number of in-flight sessions.
	pub fn len(&self) -> usize {
		self.inner.read().len()
	}

	/// True when no sessions are held.
	pub fn is_empty(&self) -> bool {
		self.inner.read().is_empty()
	}
}
impl Debug for SessionStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionStore").field("sessions", &self.len()).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn session(key: &str) -> AuthorizationSession {
		AuthorizationSession {
			session_data_key: SessionDataKey::new(key).expect("Key fixture should be valid."),
			oauth: OAuthParameters {
				app_id: ApplicationId::new("app-1").expect("Application fixture should be valid."),
				client_id: "client-1".into(),
				redirect_uri: "https://app.example.com/cb".into(),
				scopes: ScopeSet::default(),
				state: None,
			},
			auth_time: OffsetDateTime::now_utc(),
			user: None,
		}
	}

	#[test]
	fn take_removes_the_entry() {
		let store = SessionStore::new();

		store.insert("key-1", session("key-1"));

		assert_eq!(store.len(), 1);
		assert!(store.take("key-1").is_some());
		assert!(store.take("key-1").is_none(), "Sessions are single-take.");
		assert!(store.is_empty());
	}

	#[test]
	fn rekeying_moves_a_session() {
		let store = SessionStore::new();

		store.insert("key-1", session("key-1"));

		let moved = store.take("key-1").expect("Session should exist.");

		store.insert("flow-9", moved);

		assert!(store.peek("flow-9").is_some());
		assert!(store.peek("key-1").is_none());
	}

	#[test]
	fn debug_redacts_user_state() {
		let mut entry = session("key-1");

		entry.user = Some(AuthenticatedUser::default());

		assert!(!format!("{entry:?}").contains("attributes"));
	}
}
