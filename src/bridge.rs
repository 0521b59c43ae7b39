//! Authorization-endpoint bridge translating sessions to flow executions.

// self
use crate::{
	_prelude::*,
	auth::{AuthenticatedUser, FlowId, SessionDataKey, UserId},
	flow::{FlowEngine, FlowRequest, FlowStatus, FlowStep, FlowType, StepData, StepType},
	jwt::JwtSigner,
	obs::{FlowStage, FlowSpan},
	session::{AuthorizationSession, SessionError, SessionStore},
};

/// Query parameter carrying the session key back to the authorization endpoint.
pub const SESSION_DATA_KEY_PARAM: &str = "sessionDataKey";

const CLAIM_ATTRIBUTES: [&str; 4] = ["username", "email", "firstName", "lastName"];

/// Request body of the authentication front endpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthnRequest {
	/// Session key minted by the authorization endpoint; starts a new flow.
	#[serde(rename = "sessionDataKey", default)]
	pub session_data_key: Option<String>,
	/// Flow id of an in-progress flow; continues it.
	#[serde(rename = "flowId", default)]
	pub flow_id: Option<String>,
	/// Action selecting a branch on decision nodes.
	#[serde(rename = "actionId", default)]
	pub action_id: Option<String>,
	/// Submitted step inputs.
	#[serde(default)]
	pub inputs: HashMap<String, String>,
}

/// Bridges OAuth authorization sessions and flow executions.
///
/// The single entry point accepts either a session data key (new flow) or a
/// flow id (continuation). On completion the consumed session is re-keyed
/// under a fresh session data key, the verified assertion claims populate
/// the session user, and the response redirects the browser back to the
/// authorization endpoint.
pub struct AuthnBridge {
	engine: Arc<FlowEngine>,
	sessions: Arc<SessionStore>,
	jwt: Arc<JwtSigner>,
	authorization_endpoint: Url,
}
impl AuthnBridge {
	/// Builds the bridge over the engine, session store, and verifier.
	pub fn new(
		engine: Arc<FlowEngine>,
		sessions: Arc<SessionStore>,
		jwt: Arc<JwtSigner>,
		authorization_endpoint: Url,
	) -> Self {
		Self { engine, sessions, jwt, authorization_endpoint }
	}

	/// Runs one authentication-front step.
	pub async fn execute(&self, request: AuthnRequest) -> Result<FlowStep> {
		let span = FlowSpan::new(FlowStage::Bridge);
		let fut = async {
			let session_data_key =
				request.session_data_key.as_deref().filter(|key| !key.is_empty());
			let flow_id = request.flow_id.as_deref().filter(|id| !id.is_empty());

			match (session_data_key, flow_id) {
				(Some(key), None) => self.start(key, request.inputs).await,
				(None, Some(flow_id)) =>
					self.resume(flow_id, request.action_id, request.inputs).await,
				_ => Err(SessionError::InvalidAuthFlow.into()),
			}
		};

		span.instrument(fut).await
	}

	async fn start(
		&self,
		session_data_key: &str,
		inputs: HashMap<String, String>,
	) -> Result<FlowStep> {
		let session = self
			.sessions
			.take(session_data_key)
			.ok_or_else(|| SessionError::NotFound { key: session_data_key.to_owned() })?;
		let request =
			FlowRequest::new_flow(session.oauth.app_id.clone(), FlowType::Authentication)
				.with_inputs(inputs);
		let step = self.engine.execute(request).await?;

		match step.flow_status {
			// Keep the original session reachable through the flow id so the
			// completion leg can re-key it.
			FlowStatus::Incomplete => {
				self.sessions.insert(step.flow_id.as_ref(), session);

				Ok(step)
			},
			FlowStatus::Complete => self.conclude(step, session),
			FlowStatus::Fail => Ok(step),
		}
	}

	async fn resume(
		&self,
		flow_id: &str,
		action_id: Option<String>,
		inputs: HashMap<String, String>,
	) -> Result<FlowStep> {
		let flow = FlowId::new(flow_id).map_err(|_| SessionError::InvalidAuthFlow)?;
		let mut request = FlowRequest::continuation(flow).with_inputs(inputs);

		if let Some(action_id) = action_id {
			request = request.with_action(action_id);
		}

		let step = self.engine.execute(request).await?;

		match step.flow_status {
			FlowStatus::Incomplete => Ok(step),
			FlowStatus::Complete => {
				let session = self
					.sessions
					.take(flow_id)
					.ok_or_else(|| SessionError::NotFound { key: flow_id.to_owned() })?;

				self.conclude(step, session)
			},
			FlowStatus::Fail => {
				self.sessions.take(flow_id);

				Ok(step)
			},
		}
	}

	/// Swaps the flow for a fresh authorization session and mints the redirect.
	fn conclude(
		&self,
		mut step: FlowStep,
		session: AuthorizationSession,
	) -> Result<FlowStep> {
		let assertion = step.assertion.take().ok_or_else(|| SessionError::Backend {
			message: "completed flow carries no assertion".into(),
		})?;
		let claims = self.jwt.verify(&assertion, Some(session.oauth.app_id.as_ref()))?;
		let subject = claims
			.get("sub")
			.and_then(serde_json::Value::as_str)
			.ok_or_else(|| SessionError::Backend {
				message: "assertion carries no subject".into(),
			})?;
		let user_id = UserId::new(subject)
			.map_err(|e| SessionError::Backend { message: e.to_string() })?;
		let mut user = AuthenticatedUser {
			is_authenticated: true,
			user_id: Some(user_id),
			..Default::default()
		};

		for name in CLAIM_ATTRIBUTES {
			if let Some(value) = claims.get(name).and_then(serde_json::Value::as_str) {
				user.set_attribute(name, value);
			}
		}

		let session_data_key = SessionDataKey::generate();
		let renewed = AuthorizationSession {
			session_data_key: session_data_key.clone(),
			oauth: session.oauth,
			auth_time: OffsetDateTime::now_utc(),
			user: Some(user),
		};

		self.sessions.insert(session_data_key.as_ref(), renewed);

		let mut redirect = self.authorization_endpoint.clone();

		redirect
			.query_pairs_mut()
			.append_pair(SESSION_DATA_KEY_PARAM, session_data_key.as_ref());

		step.step_type = Some(StepType::Redirection);
		step.data = Some(StepData {
			redirect_url: Some(redirect.into()),
			inputs: Vec::new(),
			additional: HashMap::new(),
		});

		Ok(step)
	}
}
impl Debug for AuthnBridge {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthnBridge")
			.field("authorization_endpoint", &self.authorization_endpoint.as_str())
			.finish()
	}
}
