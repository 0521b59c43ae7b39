//! Persistent per-flow state driven by the engine.

// self
use crate::{
	_prelude::*,
	auth::{ApplicationId, AuthenticatedUser, DeploymentId, FlowId},
	flow::graph::{ExecutorName, FlowType},
};

/// Runtime-data key flagging an invitation-driven registration flow.
pub const RUNTIME_IS_INVITATION_FLOW: &str = "isInvitationFlow";
/// Runtime-data key carrying the pre-created user id of an invitation flow.
pub const RUNTIME_INVITED_USER_ID: &str = "invitedUserID";
/// Runtime-data key carrying space-separated authorized permissions.
pub const RUNTIME_AUTHORIZED_PERMISSIONS: &str = "authorized_permissions";
/// Runtime-data key carrying requested locales for attribute resolution.
pub const RUNTIME_REQUIRED_LOCALES: &str = "required_locales";

/// Execution-mode annotation for executors that run in phases (SMS OTP).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
	/// Dispatch phase (send the OTP).
	Send,
	/// Verification phase (check the OTP).
	Verify,
}

/// Classification of an executor's role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
	/// Verifies the user's identity.
	Authentication,
	/// Creates or activates identities.
	Registration,
	/// Collects data or finalizes flows without authenticating.
	Utility,
}

/// Outcome recorded for a node execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
	/// The executor finished and the flow advanced.
	Complete,
	/// The executor is waiting for user input.
	Incomplete,
	/// The executor failed terminally.
	Error,
}

/// History entry for one node of a flow.
///
/// `step` is the step number at which the node's executor first ran; re-runs
/// of the same node (retries, re-prompts) keep the original step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExecutionRecord {
	/// Node the record belongs to.
	pub node_id: String,
	/// Executor bound to the node.
	pub executor: ExecutorName,
	/// Role of the executor.
	pub executor_kind: ExecutorKind,
	/// Phase annotation, when the executor runs in phases.
	#[serde(default)]
	pub executor_mode: Option<ExecutorMode>,
	/// Latest outcome.
	pub status: ExecutionStatus,
	/// Step number of the first run.
	pub step: u32,
	/// Instant of the first run.
	pub started_at: OffsetDateTime,
	/// Instant of the latest outcome.
	#[serde(default)]
	pub ended_at: Option<OffsetDateTime>,
}

/// Persistent state of one in-progress flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowContext {
	/// Unique flow identifier within the deployment.
	pub flow_id: FlowId,
	/// Application the flow runs for.
	pub app_id: ApplicationId,
	/// True when step responses should carry executor diagnostics.
	pub verbose: bool,
	/// Kind of flow.
	pub flow_type: FlowType,
	/// Node the engine will execute next; `None` only before the first step.
	pub current_node_id: Option<String>,
	/// Action submitted with the latest step, for decision routing.
	pub current_action: Option<String>,
	/// Graph driving the flow.
	pub graph_id: String,
	/// Inputs submitted across all steps; later values overwrite.
	pub user_inputs: HashMap<String, String>,
	/// Executor-to-executor state carried across steps.
	pub runtime_data: HashMap<String, String>,
	/// Accumulated user state.
	pub user: AuthenticatedUser,
	/// Execution history by node id.
	pub history: BTreeMap<String, NodeExecutionRecord>,
	/// Number of executor invocations performed so far.
	pub steps_taken: u32,
	/// Deployment partition the flow belongs to.
	pub deployment_id: DeploymentId,
}
impl FlowContext {
	/// Creates the initial context of a new flow positioned at the start node.
	pub fn start(
		flow_id: FlowId,
		app_id: ApplicationId,
		flow_type: FlowType,
		graph_id: impl Into<String>,
		start_node_id: impl Into<String>,
		deployment_id: DeploymentId,
	) -> Self {
		Self {
			flow_id,
			app_id,
			verbose: false,
			flow_type,
			current_node_id: Some(start_node_id.into()),
			current_action: None,
			graph_id: graph_id.into(),
			user_inputs: HashMap::new(),
			runtime_data: HashMap::new(),
			user: AuthenticatedUser::default(),
			history: BTreeMap::new(),
			steps_taken: 0,
			deployment_id,
		}
	}

	/// Merges submitted inputs; new values overwrite existing ones.
	pub fn merge_inputs(&mut self, inputs: HashMap<String, String>) {
		for (name, value) in inputs {
			self.user_inputs.insert(name, value);
		}
	}

	/// Returns a runtime-data value.
	pub fn runtime(&self, key: &str) -> Option<&str> {
		self.runtime_data.get(key).map(String::as_str)
	}

	/// Returns a submitted input value.
	pub fn input(&self, name: &str) -> Option<&str> {
		self.user_inputs.get(name).map(String::as_str)
	}

	/// True when the input is present and non-empty.
	pub fn has_input(&self, name: &str) -> bool {
		self.input(name).map(|value| !value.is_empty()).unwrap_or(false)
	}
}
