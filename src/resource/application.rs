//! Application resource family: registered clients with OAuth inbound authentication.

// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, id::random_string},
	config::StoreMode,
	resource::{Backend, ResourceExporter, ResourceRules},
	store::{
		DeclarativeSource, FileStore, Precedence, RecordStore, ResourceRecord, StoreError,
		StoreFuture, declarative::parse_yaml,
	},
};

/// Assertion settings carried by an application or its OAuth config.
///
/// The issuer field never overrides the deployment issuer; only the validity
/// period and attribute selection apply.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionConfig {
	/// Declared issuer; recorded but not applied to `iss`.
	#[serde(default)]
	pub issuer: Option<String>,
	/// Assertion validity in seconds.
	#[serde(default)]
	pub validity_period: Option<i64>,
	/// User attributes copied into the assertion claims.
	#[serde(default)]
	pub user_attributes: Vec<String>,
}

/// Certificate pinned to an application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
	/// Certificate type label.
	#[serde(rename = "type")]
	pub kind: String,
	/// Encoded certificate material.
	pub value: String,
}

/// OAuth client settings nested inside an inbound auth config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthAppConfig {
	/// OAuth client identifier.
	pub client_id: String,
	/// SHA-256 hash of the client secret; never the plaintext.
	#[serde(default)]
	pub client_secret_hash: Option<String>,
	/// Registered redirect URIs.
	#[serde(default)]
	pub redirect_uris: Vec<String>,
	/// Allowed grant types.
	#[serde(default)]
	pub grant_types: Vec<String>,
	/// Allowed response types.
	#[serde(default)]
	pub response_types: Vec<String>,
	/// Token endpoint authentication method.
	#[serde(default)]
	pub token_endpoint_auth_method: Option<String>,
	/// True when PKCE is mandatory for the authorization code grant.
	#[serde(default)]
	pub pkce_required: bool,
	/// True for public (secret-less) clients.
	#[serde(default)]
	pub public_client: bool,
	/// Scopes the client may request.
	#[serde(default)]
	pub scopes: ScopeSet,
	/// Token settings scoped to this client.
	#[serde(default)]
	pub token: Option<AssertionConfig>,
}

/// Inbound authentication configuration entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundAuthConfig {
	/// Protocol type; only `oauth2` is recognized.
	#[serde(rename = "type")]
	pub kind: String,
	/// OAuth client settings.
	pub config: OAuthAppConfig,
}

/// Application payload stored by the family.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Application {
	/// Unique application id.
	pub id: String,
	/// Application name, unique within the deployment.
	pub name: String,
	/// Optional free-form description.
	#[serde(default)]
	pub description: Option<String>,
	/// Graph driving the authentication flow.
	pub auth_flow_graph_id: String,
	/// Graph driving the registration flow, when enabled.
	#[serde(default)]
	pub registration_flow_graph_id: Option<String>,
	/// True when self-registration is offered.
	#[serde(default)]
	pub is_registration_flow_enabled: bool,
	/// Application home URL.
	#[serde(default)]
	pub url: Option<String>,
	/// Logo URL.
	#[serde(default)]
	pub logo_url: Option<String>,
	/// Application-level assertion settings.
	#[serde(default)]
	pub token: Option<AssertionConfig>,
	/// Pinned certificate.
	#[serde(default)]
	pub certificate: Option<Certificate>,
	/// Terms-of-service URI.
	#[serde(default)]
	pub tos_uri: Option<String>,
	/// Policy URI.
	#[serde(default)]
	pub policy_uri: Option<String>,
	/// Administrative contacts.
	#[serde(default)]
	pub contacts: Vec<String>,
	/// Inbound authentication configurations.
	#[serde(default, rename = "inbound_auth_config")]
	pub inbound_auth: Vec<InboundAuthConfig>,
}
impl Application {
	/// First OAuth inbound config, when present.
	pub fn oauth_config(&self) -> Option<&OAuthAppConfig> {
		self.inbound_auth
			.iter()
			.find(|inbound| inbound.kind.eq_ignore_ascii_case("oauth2"))
			.map(|inbound| &inbound.config)
	}

	/// Non-empty OAuth client ids across every inbound config.
	pub fn client_ids(&self) -> Vec<String> {
		self.inbound_auth
			.iter()
			.map(|inbound| inbound.config.client_id.clone())
			.filter(|client_id| !client_id.is_empty())
			.collect()
	}

	/// Effective assertion settings: application level first, then OAuth level.
	pub fn assertion_config(&self) -> Option<&AssertionConfig> {
		self.token
			.as_ref()
			.or_else(|| self.oauth_config().and_then(|config| config.token.as_ref()))
	}

	/// Resolves the redirect URI to use for an authorization request.
	///
	/// An omitted request URI is accepted iff exactly one fully-qualified URI
	/// is registered; a provided URI must match a registered URI exactly and
	/// carry no fragment.
	pub fn resolve_redirect_uri(&self, requested: Option<&str>) -> Result<String, ApplicationError> {
		let registered = self
			.oauth_config()
			.map(|config| config.redirect_uris.as_slice())
			.unwrap_or_default();

		resolve_redirect_uri(registered, requested)
	}
}

/// Incoming OAuth client settings carrying the plaintext secret.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OAuthAppConfigRequest {
	/// OAuth client identifier.
	#[serde(default)]
	pub client_id: String,
	/// Plaintext client secret; hashed before storage.
	#[serde(default)]
	pub client_secret: Option<String>,
	/// Registered redirect URIs.
	#[serde(default)]
	pub redirect_uris: Vec<String>,
	/// Allowed grant types.
	#[serde(default)]
	pub grant_types: Vec<String>,
	/// Allowed response types.
	#[serde(default)]
	pub response_types: Vec<String>,
	/// Token endpoint authentication method.
	#[serde(default)]
	pub token_endpoint_auth_method: Option<String>,
	/// True when PKCE is mandatory.
	#[serde(default)]
	pub pkce_required: bool,
	/// True for public clients.
	#[serde(default)]
	pub public_client: bool,
	/// Scopes the client may request.
	#[serde(default)]
	pub scopes: ScopeSet,
	/// Token settings scoped to this client.
	#[serde(default)]
	pub token: Option<AssertionConfig>,
}

/// Incoming inbound auth entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InboundAuthConfigRequest {
	/// Protocol type.
	#[serde(rename = "type")]
	pub kind: String,
	/// OAuth client settings.
	pub config: OAuthAppConfigRequest,
}

/// Incoming application document (API request or declarative YAML).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApplicationRequest {
	/// Explicit id; generated when omitted on API create.
	#[serde(default)]
	pub id: Option<String>,
	/// Application name.
	#[serde(default)]
	pub name: String,
	/// Optional free-form description.
	#[serde(default)]
	pub description: Option<String>,
	/// Graph driving the authentication flow.
	#[serde(default)]
	pub auth_flow_graph_id: String,
	/// Graph driving the registration flow.
	#[serde(default)]
	pub registration_flow_graph_id: Option<String>,
	/// True when self-registration is offered.
	#[serde(default)]
	pub is_registration_flow_enabled: bool,
	/// Application home URL.
	#[serde(default)]
	pub url: Option<String>,
	/// Logo URL.
	#[serde(default)]
	pub logo_url: Option<String>,
	/// Application-level assertion settings.
	#[serde(default)]
	pub token: Option<AssertionConfig>,
	/// Pinned certificate.
	#[serde(default)]
	pub certificate: Option<Certificate>,
	/// Terms-of-service URI.
	#[serde(default)]
	pub tos_uri: Option<String>,
	/// Policy URI.
	#[serde(default)]
	pub policy_uri: Option<String>,
	/// Administrative contacts.
	#[serde(default)]
	pub contacts: Vec<String>,
	/// Inbound authentication configurations.
	#[serde(default, rename = "inbound_auth_config")]
	pub inbound_auth: Vec<InboundAuthConfigRequest>,
}

/// Projection returned by application list queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplicationListItem {
	/// Unique application id.
	pub id: String,
	/// Application name.
	pub name: String,
	/// First OAuth client id, when configured.
	pub client_id: Option<String>,
	/// True when the application is declarative and therefore read-only.
	pub read_only: bool,
}

/// Errors raised by the application family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ApplicationError {
	/// The request is structurally invalid.
	#[error("Invalid application request: {message}.")]
	InvalidRequest {
		/// Validation failure text.
		message: String,
	},
	/// No application matched the requested id, name, or client id.
	#[error("Application `{id}` was not found.")]
	NotFound {
		/// Requested id or lookup value.
		id: String,
	},
	/// An application with the same id already exists.
	#[error("Application `{id}` already exists.")]
	Duplicate {
		/// Offending id.
		id: String,
	},
	/// The application is declarative and cannot be modified.
	#[error("Application `{id}` is declarative and cannot be modified.")]
	Immutable {
		/// Declarative application id.
		id: String,
	},
	/// Another application already registered the client id.
	#[error("Client id `{client_id}` is already registered.")]
	DuplicateClientId {
		/// Offending client id.
		client_id: String,
	},
	/// The redirect URI carries a fragment component.
	#[error("Redirect URI must not contain a fragment.")]
	RedirectUriFragment,
	/// The redirect URI does not match any registered URI.
	#[error("Redirect URI does not match a registered URI.")]
	RedirectUriMismatch,
	/// No usable redirect URI: the request omitted one and registration is ambiguous.
	#[error("Redirect URI is required: no single fully-qualified URI is registered.")]
	RedirectUriRequired,
	/// The combined store count exceeds the composite cap.
	#[error("Application list exceeds the composite record limit.")]
	LimitExceeded,
	/// Underlying storage failure.
	#[error("Application storage failure: {message}.")]
	Backend {
		/// Redacted upstream failure text.
		message: String,
	},
}
impl ApplicationError {
	/// Returns the stable client-facing code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidRequest { .. } => "APP-1001",
			Self::NotFound { .. } => "APP-1002",
			Self::Duplicate { .. } => "APP-1003",
			Self::Immutable { .. } => "APP-1004",
			Self::DuplicateClientId { .. } => "APP-1005",
			Self::RedirectUriFragment => "APP-1006",
			Self::RedirectUriMismatch => "APP-1007",
			Self::RedirectUriRequired => "APP-1008",
			Self::LimitExceeded => "APP-5001",
			Self::Backend { .. } => "APP-5002",
		}
	}

	/// Classifies the error as a client or server failure.
	pub fn kind(&self) -> crate::error::ErrorKind {
		match self {
			Self::LimitExceeded | Self::Backend { .. } => crate::error::ErrorKind::Server,
			_ => crate::error::ErrorKind::Client,
		}
	}

	fn from_store(e: StoreError) -> Self {
		match e {
			StoreError::DuplicateKey { id } => Self::Duplicate { id },
			StoreError::NotFound { id } => Self::NotFound { id },
			StoreError::Immutable { id } => Self::Immutable { id },
			StoreError::ResultLimitExceeded { .. } => Self::LimitExceeded,
			other => Self::Backend { message: other.to_string() },
		}
	}
}

/// Service exposing the application family over its configured backend.
pub struct ApplicationService {
	backend: Backend<Application>,
	database: Arc<dyn RecordStore<Application>>,
}
impl Debug for ApplicationService {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ApplicationService").field("backend", &self.backend).finish()
	}
}
impl ApplicationService {
	/// Family key used for store-mode configuration.
	pub const FAMILY: &'static str = "applications";

	/// Wires the family for the configured store mode; composite reads prefer files.
	pub fn new(
		mode: StoreMode,
		database: Arc<dyn RecordStore<Application>>,
		file: FileStore<Application>,
	) -> Self {
		Self {
			backend: Backend::select(mode, database.clone(), file, Precedence::File),
			database,
		}
	}

	/// Creates a mutable application after conflict checks.
	pub async fn create(&self, request: ApplicationRequest) -> Result<Application, ApplicationError> {
		let application = resolve(request, true)?;

		if self.backend.exists(&application.id).await.map_err(ApplicationError::from_store)? {
			return Err(ApplicationError::Duplicate { id: application.id });
		}

		for client_id in application.client_ids() {
			match self.get_by_client_id(&client_id).await {
				Ok(_) => return Err(ApplicationError::DuplicateClientId { client_id }),
				Err(ApplicationError::NotFound { .. }) => {},
				Err(e) => return Err(e),
			}
		}

		self.backend
			.create(ResourceRecord::new(application.id.clone(), application.clone()))
			.await
			.map_err(ApplicationError::from_store)?;

		Ok(application)
	}

	/// Fetches an application by id.
	pub async fn get_by_id(&self, id: &str) -> Result<Application, ApplicationError> {
		self.backend
			.get(id)
			.await
			.map(|record| record.payload)
			.map_err(ApplicationError::from_store)
	}

	/// Fetches an application by name.
	pub async fn get_by_name(&self, name: &str) -> Result<Application, ApplicationError> {
		self.backend
			.get_by_field(name, |application| Some(application.name.clone()))
			.await
			.map(|record| record.payload)
			.map_err(ApplicationError::from_store)
	}

	/// Fetches an application by OAuth client id.
	pub async fn get_by_client_id(&self, client_id: &str) -> Result<Application, ApplicationError> {
		self.backend
			.get_by_field(client_id, |application| {
				application.oauth_config().map(|config| config.client_id.clone())
			})
			.await
			.map(|record| record.payload)
			.map_err(ApplicationError::from_store)
	}

	/// Pages through applications.
	pub async fn list(
		&self,
		limit: u32,
		offset: u32,
	) -> Result<Vec<ApplicationListItem>, ApplicationError> {
		Ok(self
			.backend
			.list(limit, offset)
			.await
			.map_err(ApplicationError::from_store)?
			.into_iter()
			.map(|record| ApplicationListItem {
				id: record.id,
				client_id: record
					.payload
					.oauth_config()
					.map(|config| config.client_id.clone()),
				name: record.payload.name,
				read_only: record.read_only,
			})
			.collect())
	}

	/// Total application count across the configured backend.
	pub async fn count(&self) -> Result<u32, ApplicationError> {
		self.backend.count().await.map_err(ApplicationError::from_store)
	}

	/// Replaces a mutable application.
	pub async fn update(
		&self,
		id: &str,
		mut request: ApplicationRequest,
	) -> Result<Application, ApplicationError> {
		request.id = Some(id.to_owned());

		let application = resolve(request, false)?;

		self.backend
			.update(ResourceRecord::new(id, application.clone()))
			.await
			.map_err(ApplicationError::from_store)?;

		Ok(application)
	}

	/// Deletes a mutable application.
	pub async fn delete(&self, id: &str) -> Result<(), ApplicationError> {
		self.backend.delete(id).await.map_err(ApplicationError::from_store)
	}

	/// Returns true if an application with the id exists.
	pub async fn exists(&self, id: &str) -> Result<bool, ApplicationError> {
		self.backend.exists(id).await.map_err(ApplicationError::from_store)
	}

	/// Returns true if the id is backed by a declarative file.
	pub async fn is_declarative(&self, id: &str) -> bool {
		self.backend.is_declarative(id).await
	}

	/// Declarative loader wiring for the family.
	pub fn declarative_source() -> DeclarativeSource<Application> {
		DeclarativeSource {
			resource_type: "application",
			directory: "applications",
			parse: |bytes| {
				parse_yaml::<ApplicationRequest>(bytes).map(convert)
			},
			validate: |application| validate(application),
			extract_id: |application| application.id.clone(),
		}
	}

	/// Exporter round-tripping mutable applications into YAML documents.
	pub fn exporter(&self) -> ApplicationExporter {
		ApplicationExporter { database: self.database.clone() }
	}
}

/// [`ResourceExporter`] implementation for applications.
#[derive(Clone)]
pub struct ApplicationExporter {
	database: Arc<dyn RecordStore<Application>>,
}
impl Debug for ApplicationExporter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ApplicationExporter(..)")
	}
}
impl ResourceExporter for ApplicationExporter {
	fn resource_type(&self) -> &'static str {
		"applications"
	}

	fn parameterizer_type(&self) -> &'static str {
		"application"
	}

	fn all_resource_ids(&self) -> StoreFuture<'_, Vec<String>> {
		Box::pin(async move {
			let mut ids: Vec<_> =
				self.database.list().await?.into_iter().map(|record| record.id).collect();

			ids.sort();

			Ok(ids)
		})
	}

	fn resource_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, (serde_json::Value, String)> {
		Box::pin(async move {
			let record = self.database.get(id).await?;
			let name = record.payload.name.clone();
			let document = serde_json::to_value(&record.payload)
				.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

			Ok((document, name))
		})
	}

	fn validate_resource(&self, payload: &serde_json::Value, id: &str) -> Result<(), StoreError> {
		let application: Application = serde_json::from_value(payload.clone())
			.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

		if application.id != id {
			return Err(StoreError::Serialization {
				message: format!("exported document id `{}` does not match `{id}`", application.id),
			});
		}

		validate(&application).map_err(|message| StoreError::Serialization { message })
	}

	fn resource_rules(&self) -> ResourceRules {
		ResourceRules {
			variables: vec!["id", "name", "description", "url", "logo_url"],
			array_variables: vec!["contacts", "inbound_auth_config"],
		}
	}
}

/// Hashes a plaintext client secret for storage (SHA-256, lowercase hex).
pub fn hash_client_secret(secret: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(secret.as_bytes());

	format!("{:x}", hasher.finalize())
}

/// Resolves the redirect URI for an authorization request against registered URIs.
pub fn resolve_redirect_uri(
	registered: &[String],
	requested: Option<&str>,
) -> Result<String, ApplicationError> {
	match requested.filter(|requested| !requested.is_empty()) {
		None => {
			if registered.len() != 1 {
				return Err(ApplicationError::RedirectUriRequired);
			}

			let only = &registered[0];

			if !is_fully_qualified(only) {
				return Err(ApplicationError::RedirectUriRequired);
			}

			Ok(only.clone())
		},
		Some(requested) => {
			let parsed =
				Url::parse(requested).map_err(|_| ApplicationError::RedirectUriMismatch)?;

			if parsed.fragment().is_some() {
				return Err(ApplicationError::RedirectUriFragment);
			}
			if !registered.iter().any(|candidate| candidate == requested) {
				return Err(ApplicationError::RedirectUriMismatch);
			}

			Ok(requested.to_owned())
		},
	}
}

fn is_fully_qualified(candidate: &str) -> bool {
	Url::parse(candidate)
		.map(|url| url.has_host() && url.fragment().is_none())
		.unwrap_or(false)
}

fn convert(request: ApplicationRequest) -> Application {
	Application {
		id: request.id.unwrap_or_default(),
		name: request.name,
		description: request.description,
		auth_flow_graph_id: request.auth_flow_graph_id,
		registration_flow_graph_id: request.registration_flow_graph_id,
		is_registration_flow_enabled: request.is_registration_flow_enabled,
		url: request.url,
		logo_url: request.logo_url,
		token: request.token,
		certificate: request.certificate,
		tos_uri: request.tos_uri,
		policy_uri: request.policy_uri,
		contacts: request.contacts,
		inbound_auth: request
			.inbound_auth
			.into_iter()
			.map(|inbound| InboundAuthConfig {
				kind: inbound.kind,
				config: OAuthAppConfig {
					client_id: inbound.config.client_id,
					client_secret_hash: inbound
						.config
						.client_secret
						.as_deref()
						.map(hash_client_secret),
					redirect_uris: inbound.config.redirect_uris,
					grant_types: inbound.config.grant_types,
					response_types: inbound.config.response_types,
					token_endpoint_auth_method: inbound.config.token_endpoint_auth_method,
					pkce_required: inbound.config.pkce_required,
					public_client: inbound.config.public_client,
					scopes: inbound.config.scopes,
					token: inbound.config.token,
				},
			})
			.collect(),
	}
}

fn resolve(request: ApplicationRequest, allow_generated_id: bool) -> Result<Application, ApplicationError> {
	let mut application = convert(request);

	if application.id.is_empty() && allow_generated_id {
		application.id = format!("app-{}", random_string(16));
	}

	validate(&application)
		.map_err(|message| ApplicationError::InvalidRequest { message })?;

	Ok(application)
}

fn validate(application: &Application) -> Result<(), String> {
	if application.id.is_empty() {
		return Err("application id must not be empty".into());
	}
	if application.name.trim().is_empty() {
		return Err("application name must not be empty".into());
	}
	if application.auth_flow_graph_id.trim().is_empty() {
		return Err("auth flow graph id must not be empty".into());
	}
	if application.is_registration_flow_enabled
		&& application
			.registration_flow_graph_id
			.as_deref()
			.map(str::trim)
			.unwrap_or_default()
			.is_empty()
	{
		return Err("registration flow graph id is required when registration is enabled".into());
	}

	for inbound in &application.inbound_auth {
		if !inbound.kind.eq_ignore_ascii_case("oauth2") {
			return Err(format!("unsupported inbound auth type `{}`", inbound.kind));
		}
		if inbound.config.client_id.is_empty() {
			return Err("oauth client id must not be empty".into());
		}

		for uri in &inbound.config.redirect_uris {
			let parsed = Url::parse(uri).map_err(|_| format!("invalid redirect URI `{uri}`"))?;

			if parsed.fragment().is_some() {
				return Err(format!("redirect URI `{uri}` must not contain a fragment"));
			}
		}
	}

	Ok(())
}
