//! Assertion issuance: claim assembly and signing for completed flows.

// self
use crate::{
	_prelude::*,
	config::{DEFAULT_ASSERTION_VALIDITY, DEFAULT_GROUP_CLAIM_LIMIT},
	executor::authenticator_references,
	flow::{FlowContext, RUNTIME_AUTHORIZED_PERMISSIONS, RUNTIME_REQUIRED_LOCALES},
	identity::{AttributeQuery, CredentialsService, GroupService, OuService, UserService},
	jwt::{JwtError, JwtSigner},
	resource::Application,
};

/// Signed assertion returned by a completed flow.
#[derive(Clone, Debug)]
pub struct IssuedAssertion {
	/// The signed JWT.
	pub token: String,
	/// Validity period baked into `exp`.
	pub validity: Duration,
}

/// Builds and signs the JWT emitted when a flow terminates successfully.
pub struct AssertionIssuer {
	jwt: Arc<JwtSigner>,
	users: Arc<dyn UserService>,
	ous: Arc<dyn OuService>,
	groups: Arc<dyn GroupService>,
	credentials: Arc<dyn CredentialsService>,
	default_validity: Duration,
	group_limit: u32,
}
impl AssertionIssuer {
	/// Builds the issuer over its collaborator seams.
	pub fn new(
		jwt: Arc<JwtSigner>,
		users: Arc<dyn UserService>,
		ous: Arc<dyn OuService>,
		groups: Arc<dyn GroupService>,
		credentials: Arc<dyn CredentialsService>,
	) -> Self {
		Self {
			jwt,
			users,
			ous,
			groups,
			credentials,
			default_validity: DEFAULT_ASSERTION_VALIDITY,
			group_limit: DEFAULT_GROUP_CLAIM_LIMIT,
		}
	}

	/// Overrides the fallback validity period.
	pub fn with_default_validity(mut self, validity: Duration) -> Self {
		self.default_validity = validity;

		self
	}

	/// Overrides the group lookup page size.
	pub fn with_group_limit(mut self, limit: u32) -> Self {
		self.group_limit = limit;

		self
	}

	/// Issues the assertion for a successfully terminated flow.
	///
	/// `sub` is the authenticated user id and the audience is the
	/// application id; the issuer always comes from deployment config. The
	/// validity period honors the application override.
	pub async fn issue(
		&self,
		ctx: &FlowContext,
		application: &Application,
	) -> Result<IssuedAssertion> {
		let user_id = ctx
			.user
			.user_id
			.as_ref()
			.ok_or(JwtError::MissingClaim { name: "sub" })?;
		let assertion_config = application.assertion_config();
		let validity = assertion_config
			.and_then(|config| config.validity_period)
			.map(Duration::seconds)
			.unwrap_or(self.default_validity);
		let now = OffsetDateTime::now_utc();
		let mut claims = serde_json::Map::new();

		claims.insert("sub".into(), user_id.as_ref().into());
		claims.insert("aud".into(), ctx.app_id.as_ref().into());
		claims.insert("iss".into(), self.jwt.issuer().into());
		claims.insert("iat".into(), now.unix_timestamp().into());
		claims.insert("exp".into(), (now + validity).unix_timestamp().into());

		if let Some(raw) = ctx.runtime(RUNTIME_AUTHORIZED_PERMISSIONS) {
			let permissions: Vec<&str> = raw.split_whitespace().collect();

			claims.insert(
				"permissions".into(),
				serde_json::to_value(permissions)
					.map_err(|e| JwtError::Sign { message: e.to_string() })?,
			);
		}

		let requested = assertion_config
			.map(|config| config.user_attributes.clone())
			.unwrap_or_default();

		self.resolve_user_attributes(ctx, application, &requested, &mut claims).await?;

		let references = authenticator_references(&ctx.history);

		if !references.is_empty() {
			claims.insert(
				"auth_references".into(),
				serde_json::to_value(&references)
					.map_err(|e| JwtError::Sign { message: e.to_string() })?,
			);
		}

		let token = self.jwt.sign(&serde_json::Value::Object(claims))?;

		Ok(IssuedAssertion { token, validity })
	}

	async fn resolve_user_attributes(
		&self,
		ctx: &FlowContext,
		application: &Application,
		requested: &[String],
		claims: &mut serde_json::Map<String, serde_json::Value>,
	) -> Result<()> {
		let user_id = ctx
			.user
			.user_id
			.as_ref()
			.ok_or(JwtError::MissingClaim { name: "sub" })?;
		let needs_ou = requested.iter().any(|name| name == "ouName" || name == "ouHandle");
		let organization_unit = match (needs_ou, &ctx.user.ou_id) {
			(true, Some(ou_id)) => Some(self.ous.organization_unit(ou_id).await?),
			_ => None,
		};
		let plain: Vec<String> = requested
			.iter()
			.filter(|name| {
				!matches!(name.as_str(), "ouId" | "ouName" | "ouHandle" | "userType" | "groups")
			})
			.cloned()
			.collect();
		let fetched = if plain.is_empty() {
			serde_json::Map::new()
		} else {
			self.fetch_plain_attributes(ctx, application, &plain).await?
		};

		for name in requested {
			match name.as_str() {
				"ouId" =>
					if let Some(ou_id) = &ctx.user.ou_id {
						claims.insert("ouId".into(), ou_id.as_ref().into());
					},
				"ouName" =>
					if let Some(ou) = &organization_unit {
						claims.insert("ouName".into(), ou.name.clone().into());
					},
				"ouHandle" =>
					if let Some(ou) = &organization_unit {
						claims.insert("ouHandle".into(), ou.handle.clone().into());
					},
				"userType" =>
					if let Some(user_type) = &ctx.user.user_type {
						claims.insert("userType".into(), user_type.clone().into());
					},
				"groups" => {
					let groups =
						self.groups.user_groups(user_id, self.group_limit, 0).await?;

					if !groups.is_empty() {
						let names: Vec<String> =
							groups.into_iter().map(|group| group.name).collect();

						claims.insert(
							"groups".into(),
							serde_json::to_value(names)
								.map_err(|e| JwtError::Sign { message: e.to_string() })?,
						);
					}
				},
				other => {
					let value = ctx
						.user
						.attributes
						.get(other)
						.cloned()
						.or_else(|| fetched.get(other).cloned());

					if let Some(value) = value {
						claims.insert(other.to_owned(), value);
					}
				},
			}
		}

		Ok(())
	}

	/// Resolves non-structural attributes from the credentials service (when a
	/// bearer token is held) or from the user directory.
	async fn fetch_plain_attributes(
		&self,
		ctx: &FlowContext,
		application: &Application,
		names: &[String],
	) -> Result<serde_json::Map<String, serde_json::Value>> {
		let user_id = ctx
			.user
			.user_id
			.as_ref()
			.ok_or(JwtError::MissingClaim { name: "sub" })?;

		match &ctx.user.token {
			Some(token) => {
				let query = AttributeQuery {
					application: Some(application.name.clone()),
					client_ids: application.client_ids(),
					locale: ctx.runtime(RUNTIME_REQUIRED_LOCALES).map(str::to_owned),
					attributes: names.to_vec(),
				};

				Ok(self.credentials.attributes(token, &query).await?)
			},
			None => Ok(self.users.user(user_id).await?.attributes),
		}
	}
}
impl Debug for AssertionIssuer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AssertionIssuer")
			.field("default_validity", &self.default_validity)
			.field("group_limit", &self.group_limit)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		auth::{ApplicationId, DeploymentId, FlowId, OuId, UserId},
		flow::FlowType,
		identity::{Group, MemoryDirectory, OrganizationUnit, User},
		jwt::SigningKey,
		resource::application::AssertionConfig,
	};

	fn signer() -> Arc<JwtSigner> {
		Arc::new(JwtSigner::new("https://idp.example.com", &SigningKey::from_bytes([5_u8; 32])))
	}

	fn directory() -> MemoryDirectory {
		let directory = MemoryDirectory::new();
		let mut attributes = serde_json::Map::new();

		attributes.insert("email".into(), "jdoe@example.com".into());
		attributes.insert("firstName".into(), "J".into());

		let user_id = UserId::new("user-1").expect("User fixture should be valid.");

		directory.add_user(
			User {
				id: user_id.clone(),
				ou_id: OuId::new("ou-1").expect("OU fixture should be valid."),
				user_type: "person".into(),
				active: true,
				attributes,
			},
			Some("s3cret"),
		);
		directory.add_organization_unit(OrganizationUnit {
			id: OuId::new("ou-1").expect("OU fixture should be valid."),
			name: "Engineering".into(),
			handle: "engineering".into(),
		});
		directory.add_groups(
			user_id,
			vec![Group { id: "g1".into(), name: "admins".into() }],
		);

		directory
	}

	fn issuer(directory: MemoryDirectory) -> AssertionIssuer {
		let directory = Arc::new(directory);

		AssertionIssuer::new(
			signer(),
			directory.clone(),
			directory.clone(),
			directory.clone(),
			directory,
		)
	}

	fn application(user_attributes: &[&str]) -> Application {
		Application {
			id: "app-1".into(),
			name: "Portal".into(),
			description: None,
			auth_flow_graph_id: "g".into(),
			registration_flow_graph_id: None,
			is_registration_flow_enabled: false,
			url: None,
			logo_url: None,
			token: Some(AssertionConfig {
				issuer: Some("https://override.example.com".into()),
				validity_period: Some(120),
				user_attributes: user_attributes.iter().map(|name| (*name).to_owned()).collect(),
			}),
			certificate: None,
			tos_uri: None,
			policy_uri: None,
			contacts: vec![],
			inbound_auth: vec![],
		}
	}

	fn context() -> FlowContext {
		let mut ctx = FlowContext::start(
			FlowId::new("flow-1").expect("Flow fixture should be valid."),
			ApplicationId::new("app-1").expect("Application fixture should be valid."),
			FlowType::Authentication,
			"graph-1",
			"success",
			DeploymentId::new("dep-1").expect("Deployment fixture should be valid."),
		);

		ctx.user.is_authenticated = true;
		ctx.user.user_id = Some(UserId::new("user-1").expect("User fixture should be valid."));
		ctx.user.ou_id = Some(OuId::new("ou-1").expect("OU fixture should be valid."));
		ctx.user.user_type = Some("person".into());

		ctx
	}

	#[tokio::test]
	async fn subject_and_audience_bind_user_and_app() {
		let issuer = issuer(directory());
		let issued = issuer
			.issue(&context(), &application(&[]))
			.await
			.expect("Issuance should succeed.");

		assert_eq!(issued.validity, Duration::seconds(120));

		let claims = signer()
			.verify(&issued.token, Some("app-1"))
			.expect("Assertion should verify.");

		assert_eq!(claims.get("sub").and_then(serde_json::Value::as_str), Some("user-1"));
		assert_eq!(
			claims.get("iss").and_then(serde_json::Value::as_str),
			Some("https://idp.example.com"),
			"Application issuer overrides must never change `iss`."
		);
	}

	#[tokio::test]
	async fn requested_attributes_resolve_ou_groups_and_profile() {
		let issuer = issuer(directory());
		let issued = issuer
			.issue(
				&context(),
				&application(&["ouId", "ouName", "ouHandle", "userType", "groups", "email"]),
			)
			.await
			.expect("Issuance should succeed.");
		let claims = signer()
			.verify(&issued.token, Some("app-1"))
			.expect("Assertion should verify.");

		assert_eq!(claims.get("ouName").and_then(serde_json::Value::as_str), Some("Engineering"));
		assert_eq!(
			claims.get("ouHandle").and_then(serde_json::Value::as_str),
			Some("engineering")
		);
		assert_eq!(claims.get("userType").and_then(serde_json::Value::as_str), Some("person"));
		assert_eq!(
			claims.get("groups"),
			Some(&serde_json::json!(["admins"])),
			"Groups are emitted as a string array when non-empty."
		);
		assert_eq!(
			claims.get("email").and_then(serde_json::Value::as_str),
			Some("jdoe@example.com")
		);
	}

	#[tokio::test]
	async fn empty_groups_are_omitted() {
		let directory = MemoryDirectory::new();
		let user_id = UserId::new("user-2").expect("User fixture should be valid.");
		let mut attributes = serde_json::Map::new();

		attributes.insert("email".into(), "solo@example.com".into());
		directory.add_user(
			User {
				id: user_id.clone(),
				ou_id: OuId::new("ou-1").expect("OU fixture should be valid."),
				user_type: "person".into(),
				active: true,
				attributes,
			},
			None,
		);

		let issuer = issuer(directory);
		let mut ctx = context();

		ctx.user.user_id = Some(user_id);

		let issued = issuer
			.issue(&ctx, &application(&["groups"]))
			.await
			.expect("Issuance should succeed.");
		let claims =
			signer().verify(&issued.token, Some("app-1")).expect("Assertion should verify.");

		assert!(claims.get("groups").is_none());
	}

	#[tokio::test]
	async fn permissions_copy_from_runtime_data() {
		let issuer = issuer(directory());
		let mut ctx = context();

		ctx.runtime_data
			.insert(RUNTIME_AUTHORIZED_PERMISSIONS.into(), "orders:read orders:write".into());

		let issued =
			issuer.issue(&ctx, &application(&[])).await.expect("Issuance should succeed.");
		let claims =
			signer().verify(&issued.token, Some("app-1")).expect("Assertion should verify.");

		assert_eq!(
			claims.get("permissions"),
			Some(&serde_json::json!(["orders:read", "orders:write"]))
		);
	}

	#[tokio::test]
	async fn missing_subject_is_a_server_error() {
		let issuer = issuer(directory());
		let mut ctx = context();

		ctx.user.user_id = None;

		assert!(issuer.issue(&ctx, &application(&[])).await.is_err());
	}
}
