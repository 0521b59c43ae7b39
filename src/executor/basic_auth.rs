//! Username/password credential executor.

// self
use crate::{
	_prelude::*,
	auth::AuthenticatedUser,
	executor::{ExecutorResponse, FailureReason, credentials_failure, require_inputs},
	flow::{FlowContext, FlowType, InputSpec},
	identity::{AttributeMap, CredentialsService},
};

/// Verifies username/password credentials against the credentials service.
///
/// In registration flows the executor only identifies the user: a hit fails
/// the flow (the user already exists) while a miss completes with the
/// supplied attributes staged for provisioning.
#[derive(Clone)]
pub struct BasicAuthExecutor {
	credentials: Arc<dyn CredentialsService>,
}
impl BasicAuthExecutor {
	/// Builds the executor over the credentials seam.
	pub fn new(credentials: Arc<dyn CredentialsService>) -> Self {
		Self { credentials }
	}

	/// Inputs the executor prompts for.
	pub fn default_inputs(&self) -> Vec<InputSpec> {
		vec![InputSpec::required_string("username"), InputSpec::required_string("password")]
	}

	/// Runs one credential verification step.
	pub async fn execute(&self, ctx: &FlowContext) -> Result<ExecutorResponse> {
		let inputs = self.default_inputs();

		if let Some(response) = require_inputs(&inputs, ctx) {
			return Ok(response);
		}

		let username = ctx.input("username").unwrap_or_default().to_owned();
		let identifying =
			AttributeMap::from_iter([("username".to_owned(), username.clone())]);

		if ctx.flow_type == FlowType::Registration {
			return match self.credentials.identify(&identifying).await {
				Ok(Some(_)) => Ok(ExecutorResponse::failure(FailureReason::UserAlreadyExists)),
				Ok(None) => {
					let mut user = AuthenticatedUser::default();

					user.set_attribute("username", username);

					Ok(ExecutorResponse::complete_with_user(user))
				},
				Err(e) => Err(e.into()),
			};
		}

		let verifying = AttributeMap::from_iter([(
			"password".to_owned(),
			ctx.input("password").unwrap_or_default().to_owned(),
		)]);

		match self.credentials.authenticate(&ctx.app_id, &identifying, &verifying).await {
			Ok(verified) => {
				let mut user = AuthenticatedUser {
					is_authenticated: true,
					user_id: Some(verified.user_id),
					ou_id: Some(verified.ou_id),
					user_type: Some(verified.user_type),
					token: Some(verified.token),
					available_attributes: Some(verified.available_attributes),
					..Default::default()
				};

				user.set_attribute("username", username);

				Ok(ExecutorResponse::complete_with_user(user))
			},
			Err(e) => credentials_failure(e, inputs),
		}
	}
}
impl Debug for BasicAuthExecutor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("BasicAuthExecutor(..)")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		auth::{ApplicationId, DeploymentId, FlowId, OuId, UserId},
		executor::ExecutorStatus,
		identity::{MemoryDirectory, User},
	};

	fn context(flow_type: FlowType, inputs: &[(&str, &str)]) -> FlowContext {
		let mut ctx = FlowContext::start(
			FlowId::new("flow-1").expect("Flow fixture should be valid."),
			ApplicationId::new("app-1").expect("Application fixture should be valid."),
			flow_type,
			"graph-1",
			"basic_auth",
			DeploymentId::new("dep-1").expect("Deployment fixture should be valid."),
		);

		ctx.merge_inputs(
			inputs.iter().map(|(name, value)| ((*name).to_owned(), (*value).to_owned())).collect(),
		);

		ctx
	}

	fn directory() -> MemoryDirectory {
		let directory = MemoryDirectory::new();
		let mut attributes = serde_json::Map::new();

		attributes.insert("username".into(), "jdoe".into());

		directory.add_user(
			User {
				id: UserId::new("user-1").expect("User fixture should be valid."),
				ou_id: OuId::new("ou-1").expect("OU fixture should be valid."),
				user_type: "person".into(),
				active: true,
				attributes,
			},
			Some("s3cret"),
		);

		directory
	}

	#[tokio::test]
	async fn missing_inputs_prompt() {
		let executor = BasicAuthExecutor::new(Arc::new(directory()));
		let response = executor
			.execute(&context(FlowType::Authentication, &[]))
			.await
			.expect("Gating should not error.");

		assert_eq!(response.status, ExecutorStatus::UserInputRequired);
		assert_eq!(response.inputs.len(), 2);
		assert!(response.failure_reason.is_none());
	}

	#[tokio::test]
	async fn wrong_password_reprompts_with_typed_reason() {
		let executor = BasicAuthExecutor::new(Arc::new(directory()));
		let response = executor
			.execute(&context(
				FlowType::Authentication,
				&[("username", "jdoe"), ("password", "wrong")],
			))
			.await
			.expect("Recoverable failures stay inside the response.");

		assert_eq!(response.status, ExecutorStatus::UserInputRequired);
		assert_eq!(response.failure_reason, Some(FailureReason::InvalidCredentials));
		assert!(
			response.inputs.iter().any(|spec| spec.name == "username")
				&& response.inputs.iter().any(|spec| spec.name == "password"),
			"Both credential inputs must be re-populated."
		);
	}

	#[tokio::test]
	async fn correct_password_authenticates() {
		let executor = BasicAuthExecutor::new(Arc::new(directory()));
		let response = executor
			.execute(&context(
				FlowType::Authentication,
				&[("username", "jdoe"), ("password", "s3cret")],
			))
			.await
			.expect("Verification should succeed.");

		assert_eq!(response.status, ExecutorStatus::Complete);

		let user = response.user.expect("User state should be populated.");

		assert!(user.is_authenticated);
		assert_eq!(user.user_id.as_deref(), Some("user-1"));
		assert!(user.token.is_some());
	}

	#[tokio::test]
	async fn registration_identify_first() {
		let executor = BasicAuthExecutor::new(Arc::new(directory()));
		let exists = executor
			.execute(&context(
				FlowType::Registration,
				&[("username", "jdoe"), ("password", "p")],
			))
			.await
			.expect("Identify should not error.");

		assert_eq!(exists.status, ExecutorStatus::Failure);
		assert_eq!(exists.failure_reason, Some(FailureReason::UserAlreadyExists));

		let fresh = executor
			.execute(&context(
				FlowType::Registration,
				&[("username", "newbie"), ("password", "p")],
			))
			.await
			.expect("Identify should not error.");

		assert_eq!(fresh.status, ExecutorStatus::Complete);

		let user = fresh.user.expect("User state should be staged.");

		assert!(!user.is_authenticated);
		assert_eq!(user.attribute_str("username"), Some("newbie"));
	}
}
