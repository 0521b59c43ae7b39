//! Uniform executor contract and the built-in executor set.
//!
//! Executors are a closed variant enum rather than trait objects: the engine
//! pattern-matches on the tag for routing while every variant carries its own
//! collaborator handles and per-node configuration.

pub mod assert;
pub mod attribute_collector;
pub mod basic_auth;
pub mod federation;
pub mod provisioning;
pub mod sms_otp;

pub use assert::AuthAssertExecutor;
pub use attribute_collector::AttributeCollectorExecutor;
pub use basic_auth::BasicAuthExecutor;
pub use federation::{
	GithubOAuthExecutor, GoogleOidcExecutor, IdpDescriptor, IdpDescriptorBuilder, IdpRegistry,
};
pub use provisioning::ProvisioningExecutor;
pub use sms_otp::{MemoryOtpSender, OtpSender, SmsOtpExecutor};

// self
use crate::{
	_prelude::*,
	auth::AuthenticatedUser,
	flow::{
		ExecutionStatus, ExecutorKind, ExecutorMode, ExecutorName, FlowContext, FlowError,
		InputSpec, Node, NodeExecutionRecord,
	},
	http::JsonTransport,
	identity::{CredentialsService, IdentityError, UserService},
};

/// Outcome status of one executor invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutorStatus {
	/// The step finished; the engine may advance.
	Complete,
	/// The step needs user input before it can proceed.
	UserInputRequired,
	/// The step failed recoverably; the client should re-prompt without advancing.
	Retry,
	/// The step failed terminally.
	Failure,
}

/// Typed reason attached to retriable and failed outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
	/// Verifying attributes did not match the stored credential.
	InvalidCredentials,
	/// No user matched the identifying attributes.
	UserNotFound,
	/// Registration attempted for an existing user.
	UserAlreadyExists,
	/// The submitted one-time password is wrong.
	InvalidOtp,
	/// The one-time password expired before verification.
	OtpExpired,
	/// The retry budget for one-time passwords is exhausted.
	TooManyAttempts,
	/// The federated state parameter did not round-trip.
	StateMismatch,
	/// The invitation runtime state references an unusable user.
	InvitationInvalid,
	/// Catch-all authentication failure safe to show to clients.
	AuthenticationFailed,
}

/// Result of one executor invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorResponse {
	/// Outcome status.
	pub status: ExecutorStatus,
	/// Input specs the client must satisfy for `UserInputRequired`/`Retry`.
	#[serde(default)]
	pub inputs: Vec<InputSpec>,
	/// Client-facing data (e.g. a federation redirect URL).
	#[serde(default)]
	pub additional_data: HashMap<String, String>,
	/// Executor-to-executor state merged into the context.
	#[serde(default)]
	pub runtime_data: HashMap<String, String>,
	/// User state to merge into the context.
	#[serde(default)]
	pub user: Option<AuthenticatedUser>,
	/// Assertion produced by a terminal executor, when any.
	#[serde(default)]
	pub assertion: Option<String>,
	/// Typed reason for non-complete outcomes.
	#[serde(default)]
	pub failure_reason: Option<FailureReason>,
}
impl ExecutorResponse {
	/// Successful outcome with no attached data.
	pub fn complete() -> Self {
		Self { status: ExecutorStatus::Complete, ..Default::default() }
	}

	/// Successful outcome carrying updated user state.
	pub fn complete_with_user(user: AuthenticatedUser) -> Self {
		Self { status: ExecutorStatus::Complete, user: Some(user), ..Default::default() }
	}

	/// Input-required outcome carrying the specs to prompt for.
	pub fn user_input_required(inputs: Vec<InputSpec>) -> Self {
		Self { status: ExecutorStatus::UserInputRequired, inputs, ..Default::default() }
	}

	/// Re-prompt outcome with a typed reason.
	pub fn retry(inputs: Vec<InputSpec>, reason: FailureReason) -> Self {
		Self {
			status: ExecutorStatus::Retry,
			inputs,
			failure_reason: Some(reason),
			..Default::default()
		}
	}

	/// Terminal failure with a typed reason.
	pub fn failure(reason: FailureReason) -> Self {
		Self { status: ExecutorStatus::Failure, failure_reason: Some(reason), ..Default::default() }
	}

	/// Attaches a runtime-data entry.
	pub fn with_runtime(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.runtime_data.insert(key.into(), value.into());

		self
	}

	/// Attaches a client-facing data entry.
	pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.additional_data.insert(key.into(), value.into());

		self
	}

	/// Attaches a typed reason without changing the status.
	pub fn with_reason(mut self, reason: FailureReason) -> Self {
		self.failure_reason = Some(reason);

		self
	}
}
impl Default for ExecutorStatus {
	fn default() -> Self {
		Self::Complete
	}
}

/// Built-in executor set dispatched by tag.
#[derive(Clone)]
pub enum Executor {
	/// Username/password credential verification.
	BasicAuth(BasicAuthExecutor),
	/// SMS one-time-password send/verify.
	SmsOtp(SmsOtpExecutor),
	/// GitHub OAuth2 federation.
	Github(GithubOAuthExecutor),
	/// Google OIDC federation.
	GoogleOidc(GoogleOidcExecutor),
	/// Collects declared attributes into the user state.
	AttributeCollector(AttributeCollectorExecutor),
	/// Creates or activates directory users during registration.
	Provisioning(ProvisioningExecutor),
	/// Finalizes a successful flow.
	AuthAssert(AuthAssertExecutor),
}
impl Executor {
	/// Registry name of the executor.
	pub fn name(&self) -> ExecutorName {
		match self {
			Self::BasicAuth(_) => ExecutorName::BasicAuth,
			Self::SmsOtp(_) => ExecutorName::SmsOtpAuth,
			Self::Github(_) => ExecutorName::GithubOAuth,
			Self::GoogleOidc(_) => ExecutorName::GoogleOidcAuth,
			Self::AttributeCollector(_) => ExecutorName::AttributeCollector,
			Self::Provisioning(_) => ExecutorName::Provisioning,
			Self::AuthAssert(_) => ExecutorName::AuthAssert,
		}
	}

	/// Role classification recorded into execution history.
	pub fn kind(&self) -> ExecutorKind {
		match self {
			Self::BasicAuth(_) | Self::SmsOtp(_) | Self::Github(_) | Self::GoogleOidc(_) =>
				ExecutorKind::Authentication,
			Self::Provisioning(_) => ExecutorKind::Registration,
			Self::AttributeCollector(_) | Self::AuthAssert(_) => ExecutorKind::Utility,
		}
	}

	/// Phase annotation, when the executor runs in phases.
	pub fn mode(&self) -> Option<ExecutorMode> {
		match self {
			Self::SmsOtp(executor) => Some(executor.mode()),
			_ => None,
		}
	}

	/// Inputs the executor prompts for when the node declares none.
	pub fn default_inputs(&self) -> Vec<InputSpec> {
		match self {
			Self::BasicAuth(executor) => executor.default_inputs(),
			Self::SmsOtp(executor) => executor.default_inputs(),
			Self::Github(_) | Self::GoogleOidc(_) => federation::default_inputs(),
			Self::AttributeCollector(executor) => executor.default_inputs(),
			Self::Provisioning(executor) => executor.default_inputs(),
			Self::AuthAssert(_) => Vec::new(),
		}
	}

	/// Runtime-data keys that must exist before the executor can run.
	pub fn prerequisites(&self) -> Vec<&'static str> {
		match self {
			Self::SmsOtp(executor) => executor.prerequisites(),
			_ => Vec::new(),
		}
	}

	/// Inputs still required given the current context.
	pub fn required_inputs(&self, ctx: &FlowContext) -> Vec<InputSpec> {
		self.default_inputs()
			.into_iter()
			.filter(|spec| spec.required && !ctx.has_input(&spec.name))
			.collect()
	}

	/// Runs the executor against a read-only context snapshot.
	///
	/// Recoverable authentication failures surface inside the response;
	/// `Err` is reserved for server failures that abort the step.
	pub async fn execute(&self, ctx: &FlowContext) -> Result<ExecutorResponse> {
		match self {
			Self::BasicAuth(executor) => executor.execute(ctx).await,
			Self::SmsOtp(executor) => executor.execute(ctx).await,
			Self::Github(executor) => executor.execute(ctx).await,
			Self::GoogleOidc(executor) => executor.execute(ctx).await,
			Self::AttributeCollector(executor) => executor.execute(ctx).await,
			Self::Provisioning(executor) => executor.execute(ctx).await,
			Self::AuthAssert(executor) => executor.execute(ctx).await,
		}
	}
}
impl Debug for Executor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("Executor").field(&self.name()).finish()
	}
}

/// Required-input gating shared by executors.
///
/// Returns the re-prompt response when any required input is missing or
/// empty; `None` when the executor may proceed.
pub fn require_inputs(required: &[InputSpec], ctx: &FlowContext) -> Option<ExecutorResponse> {
	let missing =
		required.iter().any(|spec| spec.required && !ctx.has_input(&spec.name));

	missing.then(|| ExecutorResponse::user_input_required(required.to_vec()))
}

/// Maps a credentials-service failure onto the executor outcome policy.
///
/// Invalid credentials and unknown users re-prompt with a typed reason,
/// other client failures re-prompt with a generic reason, and server
/// failures abort the step.
pub fn credentials_failure(
	e: IdentityError,
	inputs: Vec<InputSpec>,
) -> Result<ExecutorResponse> {
	match e {
		IdentityError::InvalidCredentials => Ok(ExecutorResponse::user_input_required(inputs)
			.with_reason(FailureReason::InvalidCredentials)),
		IdentityError::UserNotFound => Ok(ExecutorResponse::user_input_required(inputs)
			.with_reason(FailureReason::UserNotFound)),
		IdentityError::Client { .. } => Ok(ExecutorResponse::user_input_required(inputs)
			.with_reason(FailureReason::AuthenticationFailed)),
		e @ IdentityError::Server { .. } => Err(e.into()),
	}
}

/// Reference to an authenticator that completed during a flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatorReference {
	/// Authenticator (executor) name.
	pub authenticator: ExecutorName,
	/// Earliest step at which the authenticator ran.
	pub step: u32,
}

/// Extracts authenticator references from execution history.
///
/// One entry per distinct authentication executor that reached `complete`,
/// keyed by its earliest step; multi-phase executors (SMS OTP send/verify)
/// therefore collapse to a single reference. Entries are emitted in
/// ascending step order.
pub fn authenticator_references(
	history: &BTreeMap<String, NodeExecutionRecord>,
) -> Vec<AuthenticatorReference> {
	let mut earliest: HashMap<ExecutorName, u32> = HashMap::new();

	for record in history.values() {
		if record.executor_kind != ExecutorKind::Authentication
			|| record.status != ExecutionStatus::Complete
		{
			continue;
		}

		earliest
			.entry(record.executor)
			.and_modify(|step| *step = (*step).min(record.step))
			.or_insert(record.step);
	}

	let mut references: Vec<_> = earliest
		.into_iter()
		.map(|(authenticator, step)| AuthenticatorReference { authenticator, step })
		.collect();

	references.sort_by_key(|reference| reference.step);

	references
}

/// Shared collaborator handles resolving node bindings into executors.
pub struct ExecutorRegistry {
	credentials: Arc<dyn CredentialsService>,
	users: Arc<dyn UserService>,
	otp: Arc<dyn OtpSender>,
	transport: Arc<dyn JsonTransport>,
	idps: IdpRegistry,
}
impl ExecutorRegistry {
	/// Builds the registry over the collaborator seams.
	pub fn new(
		credentials: Arc<dyn CredentialsService>,
		users: Arc<dyn UserService>,
		otp: Arc<dyn OtpSender>,
		transport: Arc<dyn JsonTransport>,
		idps: IdpRegistry,
	) -> Self {
		Self { credentials, users, otp, transport, idps }
	}

	/// Instantiates the executor bound to a node.
	pub fn resolve(&self, node: &Node) -> Result<Executor, FlowError> {
		let binding = node
			.executor
			.as_ref()
			.ok_or_else(|| FlowError::MissingExecutor { node: node.id.clone() })?;

		Ok(match binding.name {
			ExecutorName::BasicAuth =>
				Executor::BasicAuth(BasicAuthExecutor::new(self.credentials.clone())),
			ExecutorName::SmsOtpAuth => Executor::SmsOtp(SmsOtpExecutor::new(
				self.credentials.clone(),
				self.otp.clone(),
				sms_otp::mode_from_properties(&binding.properties),
			)),
			ExecutorName::GithubOAuth => Executor::Github(GithubOAuthExecutor::new(
				self.descriptor(binding.idp_name.as_deref().unwrap_or("github"))?,
				self.transport.clone(),
				self.credentials.clone(),
			)),
			ExecutorName::GoogleOidcAuth => Executor::GoogleOidc(GoogleOidcExecutor::new(
				self.descriptor(binding.idp_name.as_deref().unwrap_or("google"))?,
				self.transport.clone(),
				self.credentials.clone(),
			)),
			ExecutorName::AttributeCollector => Executor::AttributeCollector(
				AttributeCollectorExecutor::new(node.input_data.clone()),
			),
			ExecutorName::Provisioning =>
				Executor::Provisioning(ProvisioningExecutor::new(self.users.clone())),
			ExecutorName::AuthAssert => Executor::AuthAssert(AuthAssertExecutor),
		})
	}

	fn descriptor(&self, name: &str) -> Result<Arc<IdpDescriptor>, FlowError> {
		self.idps.get(name).ok_or_else(|| FlowError::UnknownIdp { name: name.to_owned() })
	}
}
impl Debug for ExecutorRegistry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ExecutorRegistry").field("idps", &self.idps).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::flow::ExecutionStatus;

	fn record(
		node: &str,
		executor: ExecutorName,
		kind: ExecutorKind,
		mode: Option<ExecutorMode>,
		status: ExecutionStatus,
		step: u32,
	) -> (String, NodeExecutionRecord) {
		(
			node.to_owned(),
			NodeExecutionRecord {
				node_id: node.to_owned(),
				executor,
				executor_kind: kind,
				executor_mode: mode,
				status,
				step,
				started_at: OffsetDateTime::now_utc(),
				ended_at: Some(OffsetDateTime::now_utc()),
			},
		)
	}

	#[test]
	fn sms_send_and_verify_collapse_to_the_earlier_step() {
		let history = BTreeMap::from_iter([
			record(
				"sms_send",
				ExecutorName::SmsOtpAuth,
				ExecutorKind::Authentication,
				Some(ExecutorMode::Send),
				ExecutionStatus::Complete,
				1,
			),
			record(
				"sms_verify",
				ExecutorName::SmsOtpAuth,
				ExecutorKind::Authentication,
				Some(ExecutorMode::Verify),
				ExecutionStatus::Complete,
				2,
			),
		]);
		let references = authenticator_references(&history);

		assert_eq!(
			references,
			vec![AuthenticatorReference { authenticator: ExecutorName::SmsOtpAuth, step: 1 }]
		);
	}

	#[test]
	fn references_skip_utility_and_incomplete_records() {
		let history = BTreeMap::from_iter([
			record(
				"basic",
				ExecutorName::BasicAuth,
				ExecutorKind::Authentication,
				None,
				ExecutionStatus::Complete,
				2,
			),
			record(
				"collect",
				ExecutorName::AttributeCollector,
				ExecutorKind::Utility,
				None,
				ExecutionStatus::Complete,
				1,
			),
			record(
				"github",
				ExecutorName::GithubOAuth,
				ExecutorKind::Authentication,
				None,
				ExecutionStatus::Error,
				3,
			),
		]);
		let references = authenticator_references(&history);

		assert_eq!(
			references,
			vec![AuthenticatorReference { authenticator: ExecutorName::BasicAuth, step: 2 }]
		);
	}
}
