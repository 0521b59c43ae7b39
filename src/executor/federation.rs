//! Federated sign-in executors (GitHub OAuth2, Google OIDC) and IdP descriptors.

// self
use crate::{
	_prelude::*,
	auth::{AuthenticatedUser, ScopeSet, id::random_string},
	executor::{ExecutorResponse, FailureReason, require_inputs},
	flow::{FlowContext, FlowType, InputSpec},
	http::JsonTransport,
	identity::{AttributeMap, CredentialsService},
};

/// Runtime-data key holding the outstanding authorization state parameter.
pub const RUNTIME_FEDERATION_STATE: &str = "federation_state";
/// Client-facing data key carrying the upstream authorize URL.
pub const DATA_REDIRECT_URL: &str = "redirectUrl";

const STATE_LEN: usize = 32;

/// Errors raised while assembling an [`IdpDescriptor`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum IdpDescriptorError {
	/// A mandatory descriptor field was not provided.
	#[error("IdP descriptor is missing `{field}`.")]
	MissingField {
		/// Name of the absent field.
		field: &'static str,
	},
}

/// Upstream identity provider endpoints and client settings.
#[derive(Clone, Debug)]
pub struct IdpDescriptor {
	/// Registry name referenced by node bindings (`github`, `google`, ...).
	pub name: String,
	/// Authorization endpoint end users are redirected to.
	pub authorization_endpoint: Url,
	/// Token endpoint exchanging codes for access tokens.
	pub token_endpoint: Url,
	/// Profile endpoint resolving the remote user, when the IdP exposes one.
	pub userinfo_endpoint: Option<Url>,
	/// Client id registered with the IdP.
	pub client_id: String,
	/// Client secret, for confidential registrations.
	pub client_secret: Option<String>,
	/// Redirect URI registered with the IdP.
	pub redirect_uri: Url,
	/// Scopes requested during authorization.
	pub scopes: ScopeSet,
}
impl IdpDescriptor {
	/// Starts a builder for the named IdP.
	pub fn builder(name: impl Into<String>) -> IdpDescriptorBuilder {
		IdpDescriptorBuilder {
			name: name.into(),
			authorization_endpoint: None,
			token_endpoint: None,
			userinfo_endpoint: None,
			client_id: None,
			client_secret: None,
			redirect_uri: None,
			scopes: ScopeSet::default(),
		}
	}

	/// Builds the authorize URL carrying the state parameter.
	pub fn authorize_url(&self, state: &str) -> Url {
		let mut url = self.authorization_endpoint.clone();

		url.query_pairs_mut()
			.append_pair("response_type", "code")
			.append_pair("client_id", &self.client_id)
			.append_pair("redirect_uri", self.redirect_uri.as_str())
			.append_pair("state", state);

		if !self.scopes.is_empty() {
			url.query_pairs_mut().append_pair("scope", &self.scopes.normalized());
		}

		url
	}
}

/// Builder assembling an [`IdpDescriptor`] field by field.
#[derive(Clone, Debug)]
pub struct IdpDescriptorBuilder {
	name: String,
	authorization_endpoint: Option<Url>,
	token_endpoint: Option<Url>,
	userinfo_endpoint: Option<Url>,
	client_id: Option<String>,
	client_secret: Option<String>,
	redirect_uri: Option<Url>,
	scopes: ScopeSet,
}
impl IdpDescriptorBuilder {
	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the userinfo endpoint.
	pub fn userinfo_endpoint(mut self, url: Url) -> Self {
		self.userinfo_endpoint = Some(url);

		self
	}

	/// Sets the client id.
	pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());

		self
	}

	/// Sets the client secret.
	pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
		self.client_secret = Some(client_secret.into());

		self
	}

	/// Sets the redirect URI.
	pub fn redirect_uri(mut self, url: Url) -> Self {
		self.redirect_uri = Some(url);

		self
	}

	/// Sets the requested scopes.
	pub fn scopes(mut self, scopes: ScopeSet) -> Self {
		self.scopes = scopes;

		self
	}

	/// Validates mandatory fields and produces the descriptor.
	pub fn build(self) -> Result<IdpDescriptor, IdpDescriptorError> {
		Ok(IdpDescriptor {
			name: self.name,
			authorization_endpoint: self
				.authorization_endpoint
				.ok_or(IdpDescriptorError::MissingField { field: "authorization_endpoint" })?,
			token_endpoint: self
				.token_endpoint
				.ok_or(IdpDescriptorError::MissingField { field: "token_endpoint" })?,
			userinfo_endpoint: self.userinfo_endpoint,
			client_id: self
				.client_id
				.ok_or(IdpDescriptorError::MissingField { field: "client_id" })?,
			client_secret: self.client_secret,
			redirect_uri: self
				.redirect_uri
				.ok_or(IdpDescriptorError::MissingField { field: "redirect_uri" })?,
			scopes: self.scopes,
		})
	}
}

/// Registry of IdP descriptors; immutable after startup, so no locking.
#[derive(Clone, Debug, Default)]
pub struct IdpRegistry {
	descriptors: HashMap<String, Arc<IdpDescriptor>>,
}
impl IdpRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a descriptor during startup.
	pub fn register(&mut self, descriptor: IdpDescriptor) {
		self.descriptors.insert(descriptor.name.clone(), Arc::new(descriptor));
	}

	/// Returns a descriptor by name.
	pub fn get(&self, name: &str) -> Option<Arc<IdpDescriptor>> {
		self.descriptors.get(name).cloned()
	}
}

/// Inputs federated executors expect back from the redirect leg.
pub fn default_inputs() -> Vec<InputSpec> {
	vec![InputSpec::required_string("code"), InputSpec::optional_string("state")]
}

/// Transport + descriptor core shared by the federated executors.
#[derive(Clone)]
struct FederatedCore {
	idp: Arc<IdpDescriptor>,
	transport: Arc<dyn JsonTransport>,
	credentials: Arc<dyn CredentialsService>,
}
impl FederatedCore {
	fn start_authorization(&self) -> ExecutorResponse {
		let state = random_string(STATE_LEN);
		let authorize_url = self.idp.authorize_url(&state);

		ExecutorResponse::user_input_required(default_inputs())
			.with_data(DATA_REDIRECT_URL, authorize_url)
			.with_runtime(RUNTIME_FEDERATION_STATE, state)
	}

	fn state_matches(&self, ctx: &FlowContext) -> bool {
		match (ctx.runtime(RUNTIME_FEDERATION_STATE), ctx.input("state")) {
			(Some(expected), Some(returned)) => expected == returned,
			// The IdP echoed no state; accept only if none was recorded.
			(None, _) => true,
			(Some(_), None) => false,
		}
	}

	async fn exchange_code(&self, code: &str) -> Result<String> {
		let mut params: Vec<(&str, String)> = vec![
			("grant_type", "authorization_code".to_owned()),
			("code", code.to_owned()),
			("redirect_uri", self.idp.redirect_uri.to_string()),
			("client_id", self.idp.client_id.clone()),
		];

		if let Some(client_secret) = &self.idp.client_secret {
			params.push(("client_secret", client_secret.clone()));
		}

		let response = self.transport.post_form(&self.idp.token_endpoint, &params).await?;

		response
			.get("access_token")
			.and_then(serde_json::Value::as_str)
			.map(str::to_owned)
			.ok_or_else(|| {
				crate::http::TransportError::Decode {
					url: self.idp.token_endpoint.to_string(),
					message: "token response is missing `access_token`".into(),
				}
				.into()
			})
	}

	async fn fetch_profile(&self, access_token: &str) -> Result<serde_json::Value> {
		let endpoint = self.userinfo_endpoint()?;
		let profile = self.transport.get_json(endpoint, Some(access_token)).await?;

		Ok(profile)
	}

	fn userinfo_endpoint(&self) -> Result<&Url> {
		self.idp.userinfo_endpoint.as_ref().ok_or_else(|| {
			crate::http::TransportError::Decode {
				url: self.idp.token_endpoint.to_string(),
				message: "IdP descriptor declares no userinfo endpoint".into(),
			}
			.into()
		})
	}

	/// Resolves the federated profile into flow user state.
	async fn conclude(
		&self,
		ctx: &FlowContext,
		attributes: serde_json::Map<String, serde_json::Value>,
		identifying: AttributeMap,
	) -> Result<ExecutorResponse> {
		let identified = match self.credentials.identify(&identifying).await {
			Ok(identified) => identified,
			Err(e) => return Err(e.into()),
		};

		match identified {
			Some(user_id) => {
				let user = AuthenticatedUser {
					is_authenticated: true,
					user_id: Some(user_id),
					attributes,
					..Default::default()
				};

				Ok(ExecutorResponse::complete_with_user(user))
			},
			None if ctx.flow_type == FlowType::Registration => {
				let user = AuthenticatedUser { attributes, ..Default::default() };

				Ok(ExecutorResponse::complete_with_user(user))
			},
			None => Ok(ExecutorResponse::failure(FailureReason::UserNotFound)),
		}
	}
}
impl Debug for FederatedCore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FederatedCore").field("idp", &self.idp.name).finish()
	}
}

/// GitHub OAuth2 federation executor.
#[derive(Clone, Debug)]
pub struct GithubOAuthExecutor {
	core: FederatedCore,
}
impl GithubOAuthExecutor {
	/// Builds the executor for a GitHub IdP descriptor.
	pub fn new(
		idp: Arc<IdpDescriptor>,
		transport: Arc<dyn JsonTransport>,
		credentials: Arc<dyn CredentialsService>,
	) -> Self {
		Self { core: FederatedCore { idp, transport, credentials } }
	}

	/// Runs one federation step.
	pub async fn execute(&self, ctx: &FlowContext) -> Result<ExecutorResponse> {
		if !ctx.has_input("code") {
			return Ok(self.core.start_authorization());
		}
		if let Some(response) = require_inputs(&default_inputs(), ctx) {
			return Ok(response);
		}
		if !self.core.state_matches(ctx) {
			return Ok(ExecutorResponse::failure(FailureReason::StateMismatch));
		}

		let access_token =
			self.core.exchange_code(ctx.input("code").unwrap_or_default()).await?;
		let profile = self.core.fetch_profile(&access_token).await?;
		let mut attributes = serde_json::Map::new();
		let mut identifying = AttributeMap::new();

		if let Some(login) = profile.get("login").and_then(serde_json::Value::as_str) {
			attributes.insert("username".into(), login.into());
			identifying.insert("username".into(), login.into());
		}
		if let Some(email) = profile.get("email").and_then(serde_json::Value::as_str) {
			attributes.insert("email".into(), email.into());
			identifying = AttributeMap::from_iter([("email".to_owned(), email.to_owned())]);
		}
		if let Some(name) = profile.get("name").and_then(serde_json::Value::as_str) {
			attributes.insert("firstName".into(), name.into());
		}

		self.core.conclude(ctx, attributes, identifying).await
	}
}

/// Google OIDC federation executor.
#[derive(Clone, Debug)]
pub struct GoogleOidcExecutor {
	core: FederatedCore,
}
impl GoogleOidcExecutor {
	/// Builds the executor for a Google IdP descriptor.
	pub fn new(
		idp: Arc<IdpDescriptor>,
		transport: Arc<dyn JsonTransport>,
		credentials: Arc<dyn CredentialsService>,
	) -> Self {
		Self { core: FederatedCore { idp, transport, credentials } }
	}

	/// Runs one federation step.
	pub async fn execute(&self, ctx: &FlowContext) -> Result<ExecutorResponse> {
		if !ctx.has_input("code") {
			return Ok(self.core.start_authorization());
		}
		if let Some(response) = require_inputs(&default_inputs(), ctx) {
			return Ok(response);
		}
		if !self.core.state_matches(ctx) {
			return Ok(ExecutorResponse::failure(FailureReason::StateMismatch));
		}

		let access_token =
			self.core.exchange_code(ctx.input("code").unwrap_or_default()).await?;
		let profile = self.core.fetch_profile(&access_token).await?;
		let mut attributes = serde_json::Map::new();
		let mut identifying = AttributeMap::new();

		if let Some(subject) = profile.get("sub").and_then(serde_json::Value::as_str) {
			attributes.insert("sub".into(), subject.into());
		}
		if let Some(email) = profile.get("email").and_then(serde_json::Value::as_str) {
			attributes.insert("email".into(), email.into());
			identifying.insert("email".into(), email.to_owned());
		}
		if let Some(given) = profile.get("given_name").and_then(serde_json::Value::as_str) {
			attributes.insert("firstName".into(), given.into());
		}
		if let Some(family) = profile.get("family_name").and_then(serde_json::Value::as_str) {
			attributes.insert("lastName".into(), family.into());
		}

		self.core.conclude(ctx, attributes, identifying).await
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		auth::{ApplicationId, DeploymentId, FlowId},
		executor::ExecutorStatus,
		http::{JsonTransport, TransportError, TransportFuture},
		identity::MemoryDirectory,
	};

	struct StubTransport {
		token: serde_json::Value,
		profile: serde_json::Value,
	}
	impl JsonTransport for StubTransport {
		fn get_json<'a>(
			&'a self,
			_url: &'a Url,
			bearer: Option<&'a str>,
		) -> TransportFuture<'a, serde_json::Value> {
			let profile = self.profile.clone();
			let authorized = bearer == Some("gh-token");

			Box::pin(async move {
				if authorized {
					Ok(profile)
				} else {
					Err(TransportError::Status {
						url: "stub".into(),
						status: 401,
						message: "missing bearer".into(),
					})
				}
			})
		}

		fn post_json<'a>(
			&'a self,
			url: &'a Url,
			_body: &'a serde_json::Value,
		) -> TransportFuture<'a, serde_json::Value> {
			Box::pin(async move {
				Err(TransportError::Status {
					url: url.to_string(),
					status: 404,
					message: "unexpected".into(),
				})
			})
		}

		fn post_form<'a>(
			&'a self,
			_url: &'a Url,
			params: &'a crate::http::FormParams<'a>,
		) -> TransportFuture<'a, serde_json::Value> {
			let token = self.token.clone();
			let has_code =
				params.iter().any(|(name, value)| *name == "code" && value.as_str() == "auth-code");

			Box::pin(async move {
				if has_code {
					Ok(token)
				} else {
					Err(TransportError::Status {
						url: "stub".into(),
						status: 400,
						message: "bad code".into(),
					})
				}
			})
		}
	}

	fn descriptor() -> IdpDescriptor {
		IdpDescriptor::builder("github")
			.authorization_endpoint(
				Url::parse("https://github.com/login/oauth/authorize")
					.expect("URL fixture should parse."),
			)
			.token_endpoint(
				Url::parse("https://github.com/login/oauth/access_token")
					.expect("URL fixture should parse."),
			)
			.userinfo_endpoint(
				Url::parse("https://api.github.com/user").expect("URL fixture should parse."),
			)
			.client_id("gh-client")
			.client_secret("gh-secret")
			.redirect_uri(
				Url::parse("https://idp.example.com/flow/callback")
					.expect("URL fixture should parse."),
			)
			.scopes(ScopeSet::new(["user:email"]).expect("Scope fixture should be valid."))
			.build()
			.expect("Descriptor fixture should build.")
	}

	fn executor(directory: MemoryDirectory) -> GithubOAuthExecutor {
		GithubOAuthExecutor::new(
			Arc::new(descriptor()),
			Arc::new(StubTransport {
				token: serde_json::json!({ "access_token": "gh-token" }),
				profile: serde_json::json!({
					"login": "jdoe",
					"email": "jdoe@example.com",
					"name": "J Doe",
				}),
			}),
			Arc::new(directory),
		)
	}

	fn context(inputs: &[(&str, &str)], runtime: &[(&str, &str)]) -> FlowContext {
		let mut ctx = FlowContext::start(
			FlowId::new("flow-1").expect("Flow fixture should be valid."),
			ApplicationId::new("app-1").expect("Application fixture should be valid."),
			crate::flow::FlowType::Authentication,
			"graph-1",
			"github",
			DeploymentId::new("dep-1").expect("Deployment fixture should be valid."),
		);

		ctx.merge_inputs(
			inputs.iter().map(|(name, value)| ((*name).to_owned(), (*value).to_owned())).collect(),
		);

		for (key, value) in runtime {
			ctx.runtime_data.insert((*key).to_owned(), (*value).to_owned());
		}

		ctx
	}

	#[test]
	fn builder_requires_mandatory_fields() {
		let err = IdpDescriptor::builder("github")
			.client_id("gh-client")
			.build()
			.expect_err("Missing endpoints must fail the build.");

		assert_eq!(err, IdpDescriptorError::MissingField { field: "authorization_endpoint" });
	}

	#[tokio::test]
	async fn first_step_returns_a_redirect_prompt() {
		let executor = executor(MemoryDirectory::new());
		let response =
			executor.execute(&context(&[], &[])).await.expect("First step should succeed.");

		assert_eq!(response.status, ExecutorStatus::UserInputRequired);

		let redirect = response
			.additional_data
			.get(DATA_REDIRECT_URL)
			.expect("Redirect URL should be attached.");
		let state = response
			.runtime_data
			.get(RUNTIME_FEDERATION_STATE)
			.expect("State should be staged.");

		assert!(redirect.contains("response_type=code"));
		assert!(redirect.contains("client_id=gh-client"));
		assert!(redirect.contains(state.as_str()));
	}

	#[tokio::test]
	async fn state_mismatch_fails() {
		let executor = executor(MemoryDirectory::new());
		let ctx = context(
			&[("code", "auth-code"), ("state", "evil")],
			&[(RUNTIME_FEDERATION_STATE, "expected")],
		);
		let response = executor.execute(&ctx).await.expect("Mismatch is not a server error.");

		assert_eq!(response.status, ExecutorStatus::Failure);
		assert_eq!(response.failure_reason, Some(FailureReason::StateMismatch));
	}

	#[tokio::test]
	async fn code_exchange_resolves_the_profile() {
		let directory = MemoryDirectory::new();
		let mut attributes = serde_json::Map::new();

		attributes.insert("email".into(), "jdoe@example.com".into());

		directory.add_user(
			crate::identity::User {
				id: crate::auth::UserId::new("user-1").expect("User fixture should be valid."),
				ou_id: crate::auth::OuId::new("ou-1").expect("OU fixture should be valid."),
				user_type: "person".into(),
				active: true,
				attributes,
			},
			None,
		);

		let executor = executor(directory);
		let ctx = context(
			&[("code", "auth-code"), ("state", "expected")],
			&[(RUNTIME_FEDERATION_STATE, "expected")],
		);
		let response = executor.execute(&ctx).await.expect("Exchange should succeed.");

		assert_eq!(response.status, ExecutorStatus::Complete);

		let user = response.user.expect("User should be populated.");

		assert!(user.is_authenticated);
		assert_eq!(user.user_id.as_deref(), Some("user-1"));
		assert_eq!(user.attribute_str("email"), Some("jdoe@example.com"));
	}
}
