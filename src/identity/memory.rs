//! In-memory identity collaborators for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{ApplicationId, OuId, TokenSecret, UserId, id::random_string},
	identity::{
		AttributeMap, AttributeQuery, CredentialsService, Group, GroupService, IdentityError,
		IdentityFuture, NewUser, OrganizationUnit, OuService, User, UserService,
		VerifiedCredentials,
	},
};

const BEARER_LEN: usize = 48;

#[derive(Clone, Debug)]
struct StoredUser {
	user: User,
	password: Option<TokenSecret>,
}

#[derive(Default)]
struct DirectoryState {
	users: HashMap<UserId, StoredUser>,
	ous: HashMap<OuId, OrganizationUnit>,
	groups: HashMap<UserId, Vec<Group>>,
	bearers: HashMap<String, UserId>,
}

/// Process-local directory implementing every identity collaborator seam.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
	state: Arc<RwLock<DirectoryState>>,
}
impl MemoryDirectory {
	/// Creates an empty directory.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a user with an optional password credential.
	pub fn add_user(&self, user: User, password: Option<&str>) -> &Self {
		self.state.write().users.insert(
			user.id.clone(),
			StoredUser { user, password: password.map(TokenSecret::new) },
		);

		self
	}

	/// Registers an organization unit.
	pub fn add_organization_unit(&self, ou: OrganizationUnit) -> &Self {
		self.state.write().ous.insert(ou.id.clone(), ou);

		self
	}

	/// Registers group memberships for a user.
	pub fn add_groups(&self, user_id: UserId, groups: Vec<Group>) -> &Self {
		self.state.write().groups.insert(user_id, groups);

		self
	}

	fn find_by_attributes(state: &DirectoryState, identifying: &AttributeMap) -> Option<UserId> {
		state
			.users
			.values()
			.find(|stored| {
				identifying.iter().all(|(name, value)| {
					stored.user.attributes.get(name).and_then(serde_json::Value::as_str)
						== Some(value.as_str())
				})
			})
			.map(|stored| stored.user.id.clone())
	}
}
impl Debug for MemoryDirectory {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MemoryDirectory").field("users", &self.state.read().users.len()).finish()
	}
}
impl CredentialsService for MemoryDirectory {
	fn authenticate<'a>(
		&'a self,
		_app_id: &'a ApplicationId,
		identifying: &'a AttributeMap,
		verifying: &'a AttributeMap,
	) -> IdentityFuture<'a, VerifiedCredentials> {
		Box::pin(async move {
			if identifying.is_empty() {
				return Err(IdentityError::Client {
					message: "identifying attributes must not be empty".into(),
				});
			}

			let mut state = self.state.write();
			let user_id = Self::find_by_attributes(&state, identifying)
				.ok_or(IdentityError::UserNotFound)?;
			let stored = state.users.get(&user_id).ok_or(IdentityError::UserNotFound)?;
			let supplied = verifying.get("password").map(String::as_str).unwrap_or_default();
			let matches = stored
				.password
				.as_ref()
				.map(|password| password.matches(supplied))
				.unwrap_or(false);

			if !matches {
				return Err(IdentityError::InvalidCredentials);
			}

			let verified = VerifiedCredentials {
				user_id: stored.user.id.clone(),
				ou_id: stored.user.ou_id.clone(),
				user_type: stored.user.user_type.clone(),
				token: TokenSecret::new(random_string(BEARER_LEN)),
				available_attributes: stored.user.attributes.keys().cloned().collect(),
			};

			state.bearers.insert(verified.token.expose().to_owned(), verified.user_id.clone());

			Ok(verified)
		})
	}

	fn identify<'a>(&'a self, identifying: &'a AttributeMap) -> IdentityFuture<'a, Option<UserId>> {
		Box::pin(async move { Ok(Self::find_by_attributes(&self.state.read(), identifying)) })
	}

	fn attributes<'a>(
		&'a self,
		token: &'a TokenSecret,
		query: &'a AttributeQuery,
	) -> IdentityFuture<'a, serde_json::Map<String, serde_json::Value>> {
		Box::pin(async move {
			let state = self.state.read();
			let user_id = state
				.bearers
				.get(token.expose())
				.ok_or(IdentityError::InvalidCredentials)?;
			let stored = state.users.get(user_id).ok_or(IdentityError::UserNotFound)?;
			let attributes = stored
				.user
				.attributes
				.iter()
				.filter(|(name, _)| {
					query.attributes.is_empty() || query.attributes.contains(name)
				})
				.map(|(name, value)| (name.clone(), value.clone()))
				.collect();

			Ok(attributes)
		})
	}
}
impl UserService for MemoryDirectory {
	fn user<'a>(&'a self, id: &'a UserId) -> IdentityFuture<'a, User> {
		Box::pin(async move {
			self.state
				.read()
				.users
				.get(id)
				.map(|stored| stored.user.clone())
				.ok_or(IdentityError::UserNotFound)
		})
	}

	fn create_user(&self, new_user: NewUser) -> IdentityFuture<'_, User> {
		Box::pin(async move {
			let id = UserId::new(format!("user-{}", random_string(16))).map_err(|e| {
				IdentityError::Server { message: e.to_string() }
			})?;
			let ou_id = match new_user.ou_id {
				Some(ou_id) => ou_id,
				None => OuId::new("ou-default")
					.map_err(|e| IdentityError::Server { message: e.to_string() })?,
			};
			let user = User {
				id: id.clone(),
				ou_id,
				user_type: new_user.user_type,
				active: new_user.password.is_some(),
				attributes: new_user.attributes,
			};

			self.state
				.write()
				.users
				.insert(id, StoredUser { user: user.clone(), password: new_user.password });

			Ok(user)
		})
	}

	fn set_credentials_and_activate<'a>(
		&'a self,
		id: &'a UserId,
		password: &'a TokenSecret,
	) -> IdentityFuture<'a, User> {
		Box::pin(async move {
			let mut state = self.state.write();
			let stored = state.users.get_mut(id).ok_or(IdentityError::UserNotFound)?;

			stored.password = Some(password.clone());
			stored.user.active = true;

			Ok(stored.user.clone())
		})
	}
}
impl OuService for MemoryDirectory {
	fn organization_unit<'a>(&'a self, id: &'a OuId) -> IdentityFuture<'a, OrganizationUnit> {
		Box::pin(async move {
			self.state.read().ous.get(id).cloned().ok_or_else(|| IdentityError::Client {
				message: format!("organization unit `{id}` was not found"),
			})
		})
	}
}
impl GroupService for MemoryDirectory {
	fn user_groups<'a>(
		&'a self,
		user_id: &'a UserId,
		limit: u32,
		offset: u32,
	) -> IdentityFuture<'a, Vec<Group>> {
		Box::pin(async move {
			Ok(self
				.state
				.read()
				.groups
				.get(user_id)
				.map(|groups| {
					groups
						.iter()
						.skip(offset as usize)
						.take(limit as usize)
						.cloned()
						.collect()
				})
				.unwrap_or_default())
		})
	}
}
