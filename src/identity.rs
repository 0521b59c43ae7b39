//! Collaborator contracts for the credentials service, user directory, OUs, and groups.
//!
//! The flow engine and the assertion issuer consume these seams only; the
//! production implementations live with the embedding service. The in-memory
//! [`MemoryDirectory`] backs local development and tests, and
//! [`HttpCredentialsService`] speaks JSON over any [`JsonTransport`](crate::http::JsonTransport).

pub mod http;
pub mod memory;

pub use http::HttpCredentialsService;
pub use memory::MemoryDirectory;

// self
use crate::{
	_prelude::*,
	auth::{ApplicationId, OuId, TokenSecret, UserId},
};

/// Boxed future returned by identity collaborator operations.
pub type IdentityFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, IdentityError>> + 'a + Send>>;

/// String-valued attribute map exchanged with the credentials service.
pub type AttributeMap = HashMap<String, String>;

/// Errors raised by identity collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum IdentityError {
	/// Verifying attributes did not match the stored credential.
	#[error("Invalid credentials.")]
	InvalidCredentials,
	/// No user matched the identifying attributes.
	#[error("User was not found.")]
	UserNotFound,
	/// The collaborator rejected the request for another caller-side reason.
	#[error("Identity request was rejected: {message}.")]
	Client {
		/// Collaborator-supplied reason.
		message: String,
	},
	/// The collaborator failed internally.
	#[error("Identity service failure: {message}.")]
	Server {
		/// Collaborator-supplied reason.
		message: String,
	},
}
impl IdentityError {
	/// Returns the stable client-facing code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidCredentials => "AUT-40001",
			Self::UserNotFound => "AUT-40002",
			Self::Client { .. } => "AUT-40003",
			Self::Server { .. } => "AUT-50001",
		}
	}

	/// Classifies the error as a client or server failure.
	pub fn kind(&self) -> crate::error::ErrorKind {
		match self {
			Self::Server { .. } => crate::error::ErrorKind::Server,
			_ => crate::error::ErrorKind::Client,
		}
	}
}

/// Directory user record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
	/// Unique user identifier.
	pub id: UserId,
	/// Organization unit the user belongs to.
	pub ou_id: OuId,
	/// Directory user type (person, machine, ...).
	pub user_type: String,
	/// False until the user activated the account (e.g. via invitation).
	pub active: bool,
	/// Profile attributes.
	pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Organization unit scoping users and schemas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationUnit {
	/// Unique OU identifier.
	pub id: OuId,
	/// Display name.
	pub name: String,
	/// URL-safe handle.
	pub handle: String,
}

/// Group membership entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
	/// Unique group identifier.
	pub id: String,
	/// Group name emitted into assertions.
	pub name: String,
}

/// Successful credential verification result.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifiedCredentials {
	/// Identifier of the verified user.
	pub user_id: UserId,
	/// Organization unit of the verified user.
	pub ou_id: OuId,
	/// Directory user type.
	pub user_type: String,
	/// Bearer token scoped to the verified user.
	pub token: TokenSecret,
	/// Attribute names the credentials service can resolve for this user.
	pub available_attributes: Vec<String>,
}

/// Metadata forwarded with credentials-service attribute lookups.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeQuery {
	/// Requesting application name, when known.
	pub application: Option<String>,
	/// Non-empty OAuth client ids registered for the application.
	pub client_ids: Vec<String>,
	/// Locale hint aggregated from flow runtime data.
	pub locale: Option<String>,
	/// Attribute names to resolve.
	pub attributes: Vec<String>,
}

/// Request payload for directory user creation.
#[derive(Clone, Debug)]
pub struct NewUser {
	/// Organization unit the user is created under, when known.
	pub ou_id: Option<OuId>,
	/// Directory user type.
	pub user_type: String,
	/// Initial profile attributes.
	pub attributes: serde_json::Map<String, serde_json::Value>,
	/// Initial credential, when collected during registration.
	pub password: Option<TokenSecret>,
}

/// Credential verification and attribute resolution seam.
pub trait CredentialsService
where
	Self: Send + Sync,
{
	/// Verifies credentials for the identified user on behalf of an application.
	fn authenticate<'a>(
		&'a self,
		app_id: &'a ApplicationId,
		identifying: &'a AttributeMap,
		verifying: &'a AttributeMap,
	) -> IdentityFuture<'a, VerifiedCredentials>;

	/// Resolves identifying attributes to a user id without verifying credentials.
	fn identify<'a>(&'a self, identifying: &'a AttributeMap) -> IdentityFuture<'a, Option<UserId>>;

	/// Resolves user attributes with a bearer token issued by [`authenticate`](Self::authenticate).
	fn attributes<'a>(
		&'a self,
		token: &'a TokenSecret,
		query: &'a AttributeQuery,
	) -> IdentityFuture<'a, serde_json::Map<String, serde_json::Value>>;
}

/// User directory seam.
pub trait UserService
where
	Self: Send + Sync,
{
	/// Fetches a user by id.
	fn user<'a>(&'a self, id: &'a UserId) -> IdentityFuture<'a, User>;

	/// Creates a directory user during registration provisioning.
	fn create_user(&self, new_user: NewUser) -> IdentityFuture<'_, User>;

	/// Sets the credential of a pre-created user and activates the account.
	fn set_credentials_and_activate<'a>(
		&'a self,
		id: &'a UserId,
		password: &'a TokenSecret,
	) -> IdentityFuture<'a, User>;
}

/// Organization unit lookup seam.
pub trait OuService
where
	Self: Send + Sync,
{
	/// Fetches an organization unit by id.
	fn organization_unit<'a>(&'a self, id: &'a OuId) -> IdentityFuture<'a, OrganizationUnit>;
}

/// Group membership lookup seam.
pub trait GroupService
where
	Self: Send + Sync,
{
	/// Pages through the groups a user belongs to.
	fn user_groups<'a>(
		&'a self,
		user_id: &'a UserId,
		limit: u32,
		offset: u32,
	) -> IdentityFuture<'a, Vec<Group>>;
}
