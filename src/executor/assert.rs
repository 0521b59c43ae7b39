//! Terminal executor marking a flow ready for assertion issuance.

// self
use crate::{
	_prelude::*,
	executor::{ExecutorResponse, FailureReason},
	flow::{FlowContext, FlowType},
};

/// Confirms the accumulated user state supports issuing an assertion.
///
/// Bound (explicitly or by default) to `authSuccess` nodes; the engine calls
/// the assertion issuer after this executor completes on a final node.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthAssertExecutor;
impl AuthAssertExecutor {
	/// Runs the terminal check.
	pub async fn execute(&self, ctx: &FlowContext) -> Result<ExecutorResponse> {
		if ctx.flow_type == FlowType::Authentication && !ctx.user.is_authenticated {
			return Ok(ExecutorResponse::failure(FailureReason::AuthenticationFailed));
		}
		if ctx.user.user_id.is_none() {
			return Ok(ExecutorResponse::failure(FailureReason::AuthenticationFailed));
		}

		Ok(ExecutorResponse::complete())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		auth::{ApplicationId, DeploymentId, FlowId, UserId},
		executor::ExecutorStatus,
	};

	fn context(authenticated: bool) -> FlowContext {
		let mut ctx = FlowContext::start(
			FlowId::new("flow-1").expect("Flow fixture should be valid."),
			ApplicationId::new("app-1").expect("Application fixture should be valid."),
			FlowType::Authentication,
			"graph-1",
			"success",
			DeploymentId::new("dep-1").expect("Deployment fixture should be valid."),
		);

		if authenticated {
			ctx.user.is_authenticated = true;
			ctx.user.user_id = Some(UserId::new("user-1").expect("User fixture should be valid."));
		}

		ctx
	}

	#[tokio::test]
	async fn unauthenticated_flows_fail_the_assert() {
		let response = AuthAssertExecutor
			.execute(&context(false))
			.await
			.expect("Failure stays in the response.");

		assert_eq!(response.status, ExecutorStatus::Failure);
		assert_eq!(response.failure_reason, Some(FailureReason::AuthenticationFailed));
	}

	#[tokio::test]
	async fn authenticated_flows_pass() {
		let response =
			AuthAssertExecutor.execute(&context(true)).await.expect("Assert should pass.");

		assert_eq!(response.status, ExecutorStatus::Complete);
	}
}
