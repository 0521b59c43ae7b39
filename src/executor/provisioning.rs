//! Provisioning executor creating or activating directory users.

// self
use crate::{
	_prelude::*,
	auth::{AuthenticatedUser, TokenSecret, UserId},
	executor::{ExecutorResponse, FailureReason, require_inputs},
	flow::{
		FlowContext, FlowType, InputSpec, RUNTIME_INVITED_USER_ID, RUNTIME_IS_INVITATION_FLOW,
	},
	identity::{IdentityError, NewUser, User, UserService},
};

/// Creates directory users for registration flows and activates invited users.
///
/// The invitation path is gated on flow runtime data: when
/// `isInvitationFlow` is `"true"` and `invitedUserID` names a pre-created
/// user, the executor collects a password, sets the credential, and
/// activates the account instead of creating a new one.
#[derive(Clone)]
pub struct ProvisioningExecutor {
	users: Arc<dyn UserService>,
}
impl ProvisioningExecutor {
	/// Builds the executor over the user directory seam.
	pub fn new(users: Arc<dyn UserService>) -> Self {
		Self { users }
	}

	/// Inputs the executor prompts for.
	pub fn default_inputs(&self) -> Vec<InputSpec> {
		vec![InputSpec::required_string("password")]
	}

	/// Runs one provisioning step.
	pub async fn execute(&self, ctx: &FlowContext) -> Result<ExecutorResponse> {
		if self.is_invitation_flow(ctx) {
			return self.redeem_invited_user(ctx).await;
		}

		if ctx.flow_type != FlowType::Registration {
			return Ok(ExecutorResponse::failure(FailureReason::AuthenticationFailed));
		}

		let mut attributes = ctx.user.attributes.clone();

		for (name, value) in &ctx.user_inputs {
			if name == "password" {
				continue;
			}

			attributes
				.entry(name.clone())
				.or_insert_with(|| serde_json::Value::String(value.clone()));
		}

		let new_user = NewUser {
			ou_id: ctx.user.ou_id.clone(),
			user_type: ctx.user.user_type.clone().unwrap_or_else(|| "person".to_owned()),
			attributes,
			password: ctx.input("password").map(TokenSecret::new),
		};
		let user = self.users.create_user(new_user).await.map_err(Error::from)?;

		Ok(ExecutorResponse::complete_with_user(authenticated(user)))
	}

	fn is_invitation_flow(&self, ctx: &FlowContext) -> bool {
		ctx.runtime(RUNTIME_IS_INVITATION_FLOW) == Some("true")
			&& ctx.runtime(RUNTIME_INVITED_USER_ID).is_some()
	}

	async fn redeem_invited_user(&self, ctx: &FlowContext) -> Result<ExecutorResponse> {
		let inputs = self.default_inputs();

		if let Some(response) = require_inputs(&inputs, ctx) {
			return Ok(response);
		}

		let invited = ctx.runtime(RUNTIME_INVITED_USER_ID).unwrap_or_default();
		let user_id = match UserId::new(invited) {
			Ok(user_id) => user_id,
			Err(_) => return Ok(ExecutorResponse::failure(FailureReason::InvitationInvalid)),
		};
		let password = TokenSecret::new(ctx.input("password").unwrap_or_default());

		match self.users.set_credentials_and_activate(&user_id, &password).await {
			Ok(user) => Ok(ExecutorResponse::complete_with_user(authenticated(user))),
			Err(IdentityError::UserNotFound) =>
				Ok(ExecutorResponse::failure(FailureReason::InvitationInvalid)),
			Err(e) => Err(e.into()),
		}
	}
}
impl Debug for ProvisioningExecutor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ProvisioningExecutor(..)")
	}
}

fn authenticated(user: User) -> AuthenticatedUser {
	AuthenticatedUser {
		is_authenticated: true,
		user_id: Some(user.id),
		ou_id: Some(user.ou_id),
		user_type: Some(user.user_type),
		token: None,
		attributes: user.attributes,
		available_attributes: None,
	}
}
