//! The flow engine: executes graphs step by step over persisted contexts.

// self
use crate::{
	_prelude::*,
	assertion::AssertionIssuer,
	auth::{ApplicationId, DeploymentId, FlowId},
	executor::{ExecutorRegistry, ExecutorStatus, FailureReason},
	flow::{
		ExecutionStatus, FlowContext, FlowContextStore, FlowType, GraphRegistry, InputSpec, Node,
		NodeExecutionRecord, NodeType,
	},
	obs::{FlowOutcome, FlowSpan, FlowStage, record_flow_outcome},
	resource::{Application, ApplicationService},
	store::StoreError,
};

/// Client-visible status of a flow step response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStatus {
	/// The flow is waiting for more input.
	Incomplete,
	/// The flow terminated successfully.
	Complete,
	/// The flow terminated with a failure.
	Fail,
}

/// Presentation hint attached to an incomplete step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
	/// Render the prompted inputs.
	View,
	/// Redirect the browser to `data.redirectUrl`.
	Redirection,
}

/// Data payload of a flow step response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StepData {
	/// Redirect target, for redirection steps.
	#[serde(rename = "redirectUrl", skip_serializing_if = "Option::is_none")]
	pub redirect_url: Option<String>,
	/// Inputs the client must prompt for.
	#[serde(skip_serializing_if = "Vec::is_empty", default)]
	pub inputs: Vec<InputSpec>,
	/// Executor diagnostics, included for verbose flows.
	#[serde(skip_serializing_if = "HashMap::is_empty", default)]
	pub additional: HashMap<String, String>,
}

/// Response of every engine call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
	/// Flow the step belongs to.
	#[serde(rename = "flowId")]
	pub flow_id: FlowId,
	/// Client-visible status.
	#[serde(rename = "flowStatus")]
	pub flow_status: FlowStatus,
	/// Node the step paused on, for incomplete flows.
	#[serde(rename = "stepId", skip_serializing_if = "Option::is_none")]
	pub step_id: Option<String>,
	/// Presentation hint.
	#[serde(rename = "type", skip_serializing_if = "Option::is_none")]
	pub step_type: Option<StepType>,
	/// Step payload.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<StepData>,
	/// Signed assertion, attached on successful termination.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub assertion: Option<String>,
	/// Typed reason for failed or re-prompting steps.
	#[serde(rename = "failureReason", skip_serializing_if = "Option::is_none")]
	pub failure_reason: Option<FailureReason>,
}

/// Request driving one engine step.
#[derive(Clone, Debug, Default)]
pub struct FlowRequest {
	/// Application id; provided iff this starts a new flow.
	pub app_id: Option<ApplicationId>,
	/// Flow id; provided iff this continues an existing flow.
	pub flow_id: Option<FlowId>,
	/// Action selecting a branch on decision nodes.
	pub action_id: Option<String>,
	/// Kind of flow to start; ignored for continuations.
	pub flow_type: FlowType,
	/// Inputs submitted with this step.
	pub inputs: HashMap<String, String>,
	/// True when step responses should carry executor diagnostics.
	pub verbose: bool,
}
impl FlowRequest {
	/// Request starting a new flow for an application.
	pub fn new_flow(app_id: ApplicationId, flow_type: FlowType) -> Self {
		Self { app_id: Some(app_id), flow_type, ..Default::default() }
	}

	/// Request continuing an existing flow.
	pub fn continuation(flow_id: FlowId) -> Self {
		Self { flow_id: Some(flow_id), ..Default::default() }
	}

	/// Attaches submitted inputs.
	pub fn with_inputs(mut self, inputs: HashMap<String, String>) -> Self {
		self.inputs = inputs;

		self
	}

	/// Attaches a decision action.
	pub fn with_action(mut self, action_id: impl Into<String>) -> Self {
		self.action_id = Some(action_id.into());

		self
	}

	/// Enables verbose step responses.
	pub fn verbose(mut self) -> Self {
		self.verbose = true;

		self
	}
}
/// Errors raised by the flow engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum FlowError {
	/// The request supplied neither or both of `app_id`/`flow_id`.
	#[error("Exactly one of app id or flow id must be provided.")]
	InvalidRequest,
	/// No context exists for the continued flow.
	#[error("Flow `{flow_id}` was not found.")]
	UnknownFlow {
		/// Requested flow id.
		flow_id: String,
	},
	/// Registration was requested for an application that disables it.
	#[error("Application `{app}` does not enable registration flows.")]
	RegistrationDisabled {
		/// Offending application id.
		app: String,
	},
	/// The submitted action does not select a next node.
	#[error("Action `{action}` does not match an outgoing branch.")]
	InvalidAction {
		/// Submitted action value.
		action: String,
	},
	/// The persisted context references a node missing from the graph.
	#[error("Graph `{graph}` has no node `{node}`.")]
	UnknownNode {
		/// Graph id.
		graph: String,
		/// Missing node id.
		node: String,
	},
	/// An executable node carries no executor binding.
	#[error("Node `{node}` has no executor binding.")]
	MissingExecutor {
		/// Offending node id.
		node: String,
	},
	/// A federation binding references an unregistered IdP.
	#[error("IdP `{name}` is not registered.")]
	UnknownIdp {
		/// Missing IdP name.
		name: String,
	},
	/// A runtime prerequisite of the node's executor is missing.
	#[error("Node `{node}` is missing prerequisite `{key}`.")]
	MissingPrerequisite {
		/// Offending node id.
		node: String,
		/// Absent runtime-data key.
		key: &'static str,
	},
}
impl FlowError {
	/// Returns the stable client-facing code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidRequest => "FLO-40001",
			Self::UnknownFlow { .. } => "FLO-40002",
			Self::RegistrationDisabled { .. } => "FLO-40003",
			Self::InvalidAction { .. } => "FLO-40004",
			Self::UnknownNode { .. } => "FLO-50002",
			Self::MissingExecutor { .. } => "FLO-50003",
			Self::UnknownIdp { .. } => "FLO-50004",
			Self::MissingPrerequisite { .. } => "FLO-50005",
		}
	}

	/// Classifies the error as a client or server failure.
	pub fn kind(&self) -> crate::error::ErrorKind {
		match self {
			Self::InvalidRequest
			| Self::UnknownFlow { .. }
			| Self::RegistrationDisabled { .. }
			| Self::InvalidAction { .. } => crate::error::ErrorKind::Client,
			_ => crate::error::ErrorKind::Server,
		}
	}
}

/// Executes flow graphs over persisted contexts.
///
/// Each step is one synchronous pass over the context: load (or create),
/// merge inputs, dispatch executors until one blocks or the graph
/// terminates, persist, respond. Resumption is context reload, not a
/// coroutine. Steps of the same flow are serialized in-process by a
/// per-flow guard; across processes the storage layer is last-write-wins
/// and clients are expected to submit steps sequentially.
pub struct FlowEngine {
	deployment: DeploymentId,
	graphs: Arc<GraphRegistry>,
	contexts: Arc<dyn FlowContextStore>,
	executors: Arc<ExecutorRegistry>,
	issuer: Arc<AssertionIssuer>,
	applications: Arc<ApplicationService>,
	flow_guards: Mutex<HashMap<FlowId, Arc<AsyncMutex<()>>>>,
}
impl FlowEngine {
	/// Builds the engine over its collaborators.
	pub fn new(
		deployment: DeploymentId,
		graphs: Arc<GraphRegistry>,
		contexts: Arc<dyn FlowContextStore>,
		executors: Arc<ExecutorRegistry>,
		issuer: Arc<AssertionIssuer>,
		applications: Arc<ApplicationService>,
	) -> Self {
		Self {
			deployment,
			graphs,
			contexts,
			executors,
			issuer,
			applications,
			flow_guards: Mutex::new(HashMap::new()),
		}
	}

	/// Runs one flow step.
	pub async fn execute(&self, request: FlowRequest) -> Result<FlowStep> {
		let span = FlowSpan::new(FlowStage::Step);
		let fut = async {
			match (&request.app_id, &request.flow_id) {
				(Some(_), None) | (None, Some(_)) => {},
				_ => return Err(FlowError::InvalidRequest.into()),
			}

			// Same-flow steps serialize in-process; the guard is taken before
			// the context is read so a racing step observes the prior write.
			let guard = request.flow_id.as_ref().map(|flow_id| self.flow_guard(flow_id));
			let _serialized = match guard.as_ref() {
				Some(mutex) => Some(mutex.lock().await),
				None => None,
			};
			let (mut ctx, application) = match &request.flow_id {
				Some(flow_id) => {
					let ctx = match self.contexts.load(&self.deployment, flow_id).await {
						Ok(ctx) => ctx,
						Err(StoreError::NotFound { .. }) =>
							return Err(FlowError::UnknownFlow {
								flow_id: flow_id.to_string(),
							}
							.into()),
						Err(e) => return Err(e.into()),
					};
					let application =
						self.applications.get_by_id(ctx.app_id.as_ref()).await?;

					(ctx, application)
				},
				None => self.start_flow(&request).await?,
			};
			let graph = self.graphs.get(&ctx.graph_id)?;

			ctx.current_action = request.action_id.clone();
			ctx.verbose = ctx.verbose || request.verbose;
			ctx.merge_inputs(request.inputs.clone());

			record_flow_outcome(FlowStage::Step, FlowOutcome::Stepped);

			loop {
				let node_id = ctx.current_node_id.clone().ok_or_else(|| {
					FlowError::UnknownNode {
						graph: graph.id.clone(),
						node: String::new(),
					}
				})?;
				let node = graph.node(&node_id).ok_or_else(|| FlowError::UnknownNode {
					graph: graph.id.clone(),
					node: node_id.clone(),
				})?;

				// Re-entry after termination: the final node already completed.
				if node.is_final
					&& ctx
						.history
						.get(&node.id)
						.map(|record| record.status == ExecutionStatus::Complete)
						.unwrap_or(false)
				{
					return self.finalize(&mut ctx, node, &application).await;
				}

				let executor = self.executors.resolve(node)?;

				for key in executor.prerequisites() {
					if ctx.runtime(key).is_none() {
						return Err(FlowError::MissingPrerequisite {
							node: node.id.clone(),
							key,
						}
						.into());
					}
				}

				self.record_dispatch(&mut ctx, node, &executor);

				let response = executor.execute(&ctx).await?;
				let now = OffsetDateTime::now_utc();

				match response.status {
					ExecutorStatus::UserInputRequired | ExecutorStatus::Retry => {
						self.record_outcome(&mut ctx, node, ExecutionStatus::Incomplete, now);

						for (key, value) in response.runtime_data.clone() {
							ctx.runtime_data.insert(key, value);
						}

						self.contexts.store(&ctx).await?;

						return Ok(incomplete_step(&ctx, node, response));
					},
					ExecutorStatus::Failure => {
						self.record_outcome(&mut ctx, node, ExecutionStatus::Error, now);
						self.contexts.store(&ctx).await?;

						record_flow_outcome(FlowStage::Step, FlowOutcome::Failed);

						return Ok(FlowStep {
							flow_id: ctx.flow_id.clone(),
							flow_status: FlowStatus::Fail,
							step_id: Some(node.id.clone()),
							step_type: None,
							data: None,
							assertion: None,
							failure_reason: response
								.failure_reason
								.or(Some(FailureReason::AuthenticationFailed)),
						});
					},
					ExecutorStatus::Complete => {
						for (key, value) in response.runtime_data {
							ctx.runtime_data.insert(key, value);
						}
						for (key, value) in response.additional_data {
							ctx.runtime_data.insert(key, value);
						}
						if let Some(user) = response.user {
							ctx.user.merge(user);
						}

						self.record_outcome(&mut ctx, node, ExecutionStatus::Complete, now);

						if node.is_final {
							if node.node_type == NodeType::AuthFailure {
								self.contexts.store(&ctx).await?;

								record_flow_outcome(FlowStage::Step, FlowOutcome::Failed);

								return Ok(FlowStep {
									flow_id: ctx.flow_id.clone(),
									flow_status: FlowStatus::Fail,
									step_id: Some(node.id.clone()),
									step_type: None,
									data: None,
									assertion: None,
									failure_reason: Some(FailureReason::AuthenticationFailed),
								});
							}

							return self.finalize(&mut ctx, node, &application).await;
						}

						let next = self.advance(&ctx, node)?;

						ctx.current_node_id = Some(next);
					},
				}
			}
		};

		span.instrument(fut).await
	}

	async fn start_flow(
		&self,
		request: &FlowRequest,
	) -> Result<(FlowContext, Application)> {
		let app_id = request.app_id.clone().ok_or(FlowError::InvalidRequest)?;
		let application = self.applications.get_by_id(app_id.as_ref()).await?;
		let graph_id = match request.flow_type {
			FlowType::Authentication => application.auth_flow_graph_id.clone(),
			FlowType::Registration => {
				if !application.is_registration_flow_enabled {
					return Err(FlowError::RegistrationDisabled {
						app: app_id.to_string(),
					}
					.into());
				}

				application
					.registration_flow_graph_id
					.clone()
					.ok_or(FlowError::RegistrationDisabled { app: app_id.to_string() })?
			},
		};
		let graph = self.graphs.get(&graph_id)?;
		let mut ctx = FlowContext::start(
			FlowId::generate(),
			app_id,
			request.flow_type,
			graph_id,
			graph.start_node_id.clone(),
			self.deployment.clone(),
		);

		ctx.verbose = request.verbose;

		self.contexts.store(&ctx).await?;

		record_flow_outcome(FlowStage::Step, FlowOutcome::Started);

		Ok((ctx, application))
	}

	async fn finalize(
		&self,
		ctx: &mut FlowContext,
		node: &Node,
		application: &Application,
	) -> Result<FlowStep> {
		let issued = self.issuer.issue(ctx, application).await?;

		self.contexts.remove(&self.deployment, &ctx.flow_id).await?;
		self.drop_flow_guard(&ctx.flow_id);

		record_flow_outcome(FlowStage::Step, FlowOutcome::Completed);

		Ok(FlowStep {
			flow_id: ctx.flow_id.clone(),
			flow_status: FlowStatus::Complete,
			step_id: Some(node.id.clone()),
			step_type: None,
			data: None,
			assertion: Some(issued.token),
			failure_reason: None,
		})
	}

	fn advance(&self, ctx: &FlowContext, node: &Node) -> Result<String> {
		match node.next.as_slice() {
			[only] => Ok(only.clone()),
			_ => {
				let action = ctx
					.current_action
					.clone()
					.or_else(|| ctx.input("action").map(str::to_owned))
					.ok_or_else(|| FlowError::InvalidAction { action: String::new() })?;

				if node.next.iter().any(|candidate| candidate == &action) {
					Ok(action)
				} else {
					Err(FlowError::InvalidAction { action }.into())
				}
			},
		}
	}

	fn record_dispatch(
		&self,
		ctx: &mut FlowContext,
		node: &Node,
		executor: &crate::executor::Executor,
	) {
		if ctx.history.contains_key(&node.id) {
			return;
		}

		ctx.steps_taken += 1;
		ctx.history.insert(
			node.id.clone(),
			NodeExecutionRecord {
				node_id: node.id.clone(),
				executor: executor.name(),
				executor_kind: executor.kind(),
				executor_mode: executor.mode(),
				status: ExecutionStatus::Incomplete,
				step: ctx.steps_taken,
				started_at: OffsetDateTime::now_utc(),
				ended_at: None,
			},
		);
	}

	fn record_outcome(
		&self,
		ctx: &mut FlowContext,
		node: &Node,
		status: ExecutionStatus,
		now: OffsetDateTime,
	) {
		if let Some(record) = ctx.history.get_mut(&node.id) {
			record.status = status;
			record.ended_at = Some(now);
		}
	}

	fn flow_guard(&self, flow_id: &FlowId) -> Arc<AsyncMutex<()>> {
		let mut guards = self.flow_guards.lock();

		guards.entry(flow_id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	fn drop_flow_guard(&self, flow_id: &FlowId) {
		self.flow_guards.lock().remove(flow_id);
	}
}
impl Debug for FlowEngine {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FlowEngine").field("deployment", &self.deployment).finish()
	}
}

fn incomplete_step(
	ctx: &FlowContext,
	node: &Node,
	response: crate::executor::ExecutorResponse,
) -> FlowStep {
	let redirect_url = response.additional_data.get(crate::executor::federation::DATA_REDIRECT_URL).cloned();
	let step_type =
		if redirect_url.is_some() { StepType::Redirection } else { StepType::View };
	let additional = if ctx.verbose { response.additional_data } else { HashMap::new() };

	FlowStep {
		flow_id: ctx.flow_id.clone(),
		flow_status: FlowStatus::Incomplete,
		step_id: Some(node.id.clone()),
		step_type: Some(step_type),
		data: Some(StepData { redirect_url, inputs: response.inputs, additional }),
		assertion: None,
		failure_reason: response.failure_reason,
	}
}
