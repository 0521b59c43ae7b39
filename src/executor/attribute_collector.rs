//! Attribute collection executor gathering declared inputs into the user state.

// self
use crate::{
	_prelude::*,
	auth::AuthenticatedUser,
	executor::{ExecutorResponse, require_inputs},
	flow::{FlowContext, InputSpec},
};

/// Collects the node-declared inputs into the flow's user attributes.
///
/// The executor carries its node's input specs: the registry instantiates it
/// per node so graphs can collect different attribute sets at different steps.
#[derive(Clone, Debug)]
pub struct AttributeCollectorExecutor {
	inputs: Vec<InputSpec>,
}
impl AttributeCollectorExecutor {
	/// Builds the executor for one node's declared inputs.
	pub fn new(inputs: Vec<InputSpec>) -> Self {
		Self { inputs }
	}

	/// Inputs the executor prompts for.
	pub fn default_inputs(&self) -> Vec<InputSpec> {
		self.inputs.clone()
	}

	/// Runs one collection step.
	pub async fn execute(&self, ctx: &FlowContext) -> Result<ExecutorResponse> {
		if let Some(response) = require_inputs(&self.inputs, ctx) {
			return Ok(response);
		}

		let mut user = AuthenticatedUser { is_authenticated: ctx.user.is_authenticated, ..Default::default() };

		for spec in &self.inputs {
			if let Some(value) = ctx.input(&spec.name).filter(|value| !value.is_empty()) {
				user.set_attribute(spec.name.clone(), value);
			}
		}

		Ok(ExecutorResponse::complete_with_user(user))
	}
}
