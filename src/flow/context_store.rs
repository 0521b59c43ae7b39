//! Encrypted, deployment-scoped persistence of paused flow contexts.

// self
use crate::{
	_prelude::*,
	auth::{ApplicationId, AuthenticatedUser, DeploymentId, FlowId, OuId, TokenSecret, UserId},
	crypt::TokenCipher,
	flow::{FlowContext, FlowType, NodeExecutionRecord},
	store::{StoreError, StoreFuture},
};

/// Persistence contract for paused flow contexts, keyed `(deployment, flow)`.
///
/// Implementations persist the stored row shape produced by
/// [`to_stored`]/[`from_stored`] so the bearer token is always sealed at
/// rest. The context row and the user-data row share a single transaction in
/// database-backed implementations.
pub trait FlowContextStore
where
	Self: Send + Sync,
{
	/// Persists (creates or replaces) a context.
	fn store<'a>(&'a self, ctx: &'a FlowContext) -> StoreFuture<'a, ()>;

	/// Loads a context; fails with [`StoreError::NotFound`] for unknown flows.
	fn load<'a>(
		&'a self,
		deployment: &'a DeploymentId,
		flow_id: &'a FlowId,
	) -> StoreFuture<'a, FlowContext>;

	/// Removes a context; unknown flows are ignored.
	fn remove<'a>(
		&'a self,
		deployment: &'a DeploymentId,
		flow_id: &'a FlowId,
	) -> StoreFuture<'a, ()>;
}

/// Row shape a flow context is persisted as.
///
/// Structured sub-documents are serialized to JSON strings; the bearer token
/// is replaced by its sealed blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFlowContext {
	/// Flow identifier.
	pub flow_id: String,
	/// Application identifier.
	pub app_id: String,
	/// Flow type label.
	pub flow_type: String,
	/// Graph identifier re-bound from the registry on load.
	pub graph_id: String,
	/// Current node position.
	pub current_node_id: Option<String>,
	/// Latest submitted action.
	pub current_action: Option<String>,
	/// Verbose-response switch.
	pub verbose: bool,
	/// Executor invocations performed so far.
	pub steps_taken: u32,
	/// Deployment partition.
	pub deployment_id: String,
	/// JSON document of submitted inputs.
	pub user_inputs: String,
	/// JSON document of runtime data.
	pub runtime_data: String,
	/// JSON document of the execution history.
	pub history: String,
	/// Authentication marker of the user row.
	pub is_authenticated: bool,
	/// Authenticated user id.
	pub user_id: Option<String>,
	/// Authenticated user OU.
	pub ou_id: Option<String>,
	/// Authenticated user type.
	pub user_type: Option<String>,
	/// Sealed bearer token; `None` for absent or empty tokens.
	pub sealed_token: Option<String>,
	/// JSON document of accumulated user attributes.
	pub attributes: String,
	/// JSON document of available attribute names, when known.
	pub available_attributes: Option<String>,
}

/// Serializes a context into its persisted row shape, sealing the token.
pub fn to_stored(ctx: &FlowContext, cipher: &TokenCipher) -> Result<StoredFlowContext, StoreError> {
	let sealed_token = match &ctx.user.token {
		Some(token) => cipher
			.seal(token.expose())
			.map_err(|e| StoreError::Backend { message: format!("token sealing failed: {e}") })?,
		None => None,
	};

	Ok(StoredFlowContext {
		flow_id: ctx.flow_id.to_string(),
		app_id: ctx.app_id.to_string(),
		flow_type: ctx.flow_type.as_str().to_owned(),
		graph_id: ctx.graph_id.clone(),
		current_node_id: ctx.current_node_id.clone(),
		current_action: ctx.current_action.clone(),
		verbose: ctx.verbose,
		steps_taken: ctx.steps_taken,
		deployment_id: ctx.deployment_id.to_string(),
		user_inputs: to_json(&ctx.user_inputs)?,
		runtime_data: to_json(&ctx.runtime_data)?,
		history: to_json(&ctx.history)?,
		is_authenticated: ctx.user.is_authenticated,
		user_id: ctx.user.user_id.as_ref().map(ToString::to_string),
		ou_id: ctx.user.ou_id.as_ref().map(ToString::to_string),
		user_type: ctx.user.user_type.clone(),
		sealed_token,
		attributes: to_json(&ctx.user.attributes)?,
		available_attributes: ctx
			.user
			.available_attributes
			.as_ref()
			.map(|names| to_json(names))
			.transpose()?,
	})
}

/// Restores a context from its persisted row shape, opening the sealed token.
///
/// Invalid ciphertext fails the load; the caller re-binds the graph by id
/// against the in-memory registry.
pub fn from_stored(
	stored: StoredFlowContext,
	cipher: &TokenCipher,
) -> Result<FlowContext, StoreError> {
	let token = stored
		.sealed_token
		.as_deref()
		.map(|sealed| cipher.open(sealed))
		.transpose()
		.map_err(|e| StoreError::Backend { message: format!("token opening failed: {e}") })?
		.map(TokenSecret::new);
	let user = AuthenticatedUser {
		is_authenticated: stored.is_authenticated,
		user_id: stored.user_id.as_deref().map(UserId::new).transpose().map_err(invalid_id)?,
		ou_id: stored.ou_id.as_deref().map(OuId::new).transpose().map_err(invalid_id)?,
		user_type: stored.user_type,
		token,
		attributes: from_json(&stored.attributes)?,
		available_attributes: stored
			.available_attributes
			.as_deref()
			.map(from_json::<Vec<String>>)
			.transpose()?,
	};
	let history: BTreeMap<String, NodeExecutionRecord> = from_json(&stored.history)?;

	Ok(FlowContext {
		flow_id: FlowId::new(&stored.flow_id).map_err(invalid_id)?,
		app_id: ApplicationId::new(&stored.app_id).map_err(invalid_id)?,
		verbose: stored.verbose,
		flow_type: stored
			.flow_type
			.parse::<FlowType>()
			.map_err(|e| StoreError::Serialization { message: e.to_string() })?,
		current_node_id: stored.current_node_id,
		current_action: stored.current_action,
		graph_id: stored.graph_id,
		user_inputs: from_json(&stored.user_inputs)?,
		runtime_data: from_json(&stored.runtime_data)?,
		user,
		history,
		steps_taken: stored.steps_taken,
		deployment_id: DeploymentId::new(&stored.deployment_id).map_err(invalid_id)?,
	})
}

/// In-memory [`FlowContextStore`] for local development and tests.
///
/// Contexts are held in their sealed row shape so the encryption round-trip
/// is exercised exactly as with a database backend.
#[derive(Clone)]
pub struct MemoryContextStore {
	cipher: TokenCipher,
	inner: Arc<RwLock<HashMap<(String, String), StoredFlowContext>>>,
}
impl MemoryContextStore {
	/// Creates an empty store sealing tokens with the provided cipher.
	pub fn new(cipher: TokenCipher) -> Self {
		Self { cipher, inner: Arc::new(RwLock::new(HashMap::new())) }
	}
}
impl Debug for MemoryContextStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MemoryContextStore").field("contexts", &self.inner.read().len()).finish()
	}
}
impl FlowContextStore for MemoryContextStore {
	fn store<'a>(&'a self, ctx: &'a FlowContext) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let stored = to_stored(ctx, &self.cipher)?;
			let key = (stored.deployment_id.clone(), stored.flow_id.clone());

			self.inner.write().insert(key, stored);

			Ok(())
		})
	}

	fn load<'a>(
		&'a self,
		deployment: &'a DeploymentId,
		flow_id: &'a FlowId,
	) -> StoreFuture<'a, FlowContext> {
		Box::pin(async move {
			let key = (deployment.to_string(), flow_id.to_string());
			let stored = self
				.inner
				.read()
				.get(&key)
				.cloned()
				.ok_or_else(|| StoreError::NotFound { id: flow_id.to_string() })?;

			from_stored(stored, &self.cipher)
		})
	}

	fn remove<'a>(
		&'a self,
		deployment: &'a DeploymentId,
		flow_id: &'a FlowId,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.inner.write().remove(&(deployment.to_string(), flow_id.to_string()));

			Ok(())
		})
	}
}

fn to_json<T>(value: &T) -> Result<String, StoreError>
where
	T: Serialize,
{
	serde_json::to_string(value).map_err(|e| StoreError::Serialization { message: e.to_string() })
}

fn from_json<T>(raw: &str) -> Result<T, StoreError>
where
	T: serde::de::DeserializeOwned,
{
	serde_json::from_str(raw).map_err(|e| StoreError::Serialization { message: e.to_string() })
}

fn invalid_id(e: crate::auth::IdentifierError) -> StoreError {
	StoreError::Serialization { message: e.to_string() }
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		crypt::SealingKey,
		flow::{ExecutionStatus, ExecutorKind, ExecutorMode, ExecutorName},
	};

	fn cipher() -> TokenCipher {
		TokenCipher::new(&SealingKey::from_bytes([9; 32]))
	}

	fn fixture() -> FlowContext {
		let mut ctx = FlowContext::start(
			FlowId::new("flow-1").expect("Flow fixture should be valid."),
			ApplicationId::new("app-1").expect("Application fixture should be valid."),
			FlowType::Authentication,
			"graph-1",
			"basic_auth",
			DeploymentId::new("dep-1").expect("Deployment fixture should be valid."),
		);

		ctx.user_inputs.insert("username".into(), "jdoe".into());
		ctx.runtime_data.insert("otp_attempts".into(), "1".into());
		ctx.user.is_authenticated = true;
		ctx.user.user_id = Some(UserId::new("user-1").expect("User fixture should be valid."));
		ctx.user.token = Some(TokenSecret::new("bearer-token"));
		ctx.user.available_attributes = Some(vec!["email".into()]);
		ctx.user.set_attribute("email", "jdoe@example.com");
		ctx.steps_taken = 2;
		ctx.history.insert(
			"basic_auth".into(),
			NodeExecutionRecord {
				node_id: "basic_auth".into(),
				executor: ExecutorName::SmsOtpAuth,
				executor_kind: ExecutorKind::Authentication,
				executor_mode: Some(ExecutorMode::Send),
				status: ExecutionStatus::Complete,
				step: 1,
				started_at: OffsetDateTime::now_utc(),
				ended_at: Some(OffsetDateTime::now_utc()),
			},
		);

		ctx
	}

	#[test]
	fn stored_round_trip_preserves_every_field() {
		let cipher = cipher();
		let ctx = fixture();
		let stored = to_stored(&ctx, &cipher).expect("Serialization should succeed.");

		assert_ne!(
			stored.sealed_token.as_deref(),
			Some("bearer-token"),
			"The bearer token must never be stored in the clear."
		);

		let restored = from_stored(stored, &cipher).expect("Deserialization should succeed.");

		assert_eq!(restored, ctx);
	}

	#[test]
	fn empty_tokens_store_as_null() {
		let cipher = cipher();
		let mut ctx = fixture();

		ctx.user.token = Some(TokenSecret::new(""));

		let stored = to_stored(&ctx, &cipher).expect("Serialization should succeed.");

		assert_eq!(stored.sealed_token, None);

		let restored = from_stored(stored, &cipher).expect("Deserialization should succeed.");

		assert_eq!(restored.user.token, None);
	}

	#[test]
	fn foreign_ciphertext_fails_the_load() {
		let ctx = fixture();
		let stored = to_stored(&ctx, &cipher()).expect("Serialization should succeed.");
		let foreign = TokenCipher::new(&SealingKey::from_bytes([1; 32]));

		assert!(matches!(
			from_stored(stored, &foreign),
			Err(StoreError::Backend { .. })
		));
	}

	#[tokio::test]
	async fn memory_store_partitions_by_deployment() {
		let store = MemoryContextStore::new(cipher());
		let ctx = fixture();

		store.store(&ctx).await.expect("Store should succeed.");

		let other =
			DeploymentId::new("dep-2").expect("Deployment fixture should be valid.");

		assert!(matches!(
			store.load(&other, &ctx.flow_id).await,
			Err(StoreError::NotFound { .. })
		));

		let loaded = store
			.load(&ctx.deployment_id, &ctx.flow_id)
			.await
			.expect("Load should succeed.");

		assert_eq!(loaded, ctx);

		store.remove(&ctx.deployment_id, &ctx.flow_id).await.expect("Remove should succeed.");
		assert!(store.load(&ctx.deployment_id, &ctx.flow_id).await.is_err());
	}
}
