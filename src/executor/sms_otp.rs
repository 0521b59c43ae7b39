//! SMS one-time-password executor with separate send and verify phases.

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	auth::AuthenticatedUser,
	executor::{ExecutorResponse, FailureReason, require_inputs},
	flow::{ExecutorMode, FlowContext, InputSpec},
	identity::{AttributeMap, CredentialsService, IdentityFuture},
};

/// Runtime-data key holding the outstanding OTP code.
pub const RUNTIME_OTP_CODE: &str = "otp_code";
/// Runtime-data key holding the OTP expiry as a unix timestamp.
pub const RUNTIME_OTP_EXPIRES_AT: &str = "otp_expires_at";
/// Runtime-data key holding the verified mobile number.
pub const RUNTIME_OTP_MOBILE: &str = "otp_mobile";
/// Runtime-data key counting failed verification attempts.
pub const RUNTIME_OTP_ATTEMPTS: &str = "otp_attempts";

const OTP_DIGITS: u32 = 6;
const OTP_ATTEMPT_LIMIT: u32 = 3;
const OTP_VALIDITY: Duration = Duration::minutes(5);

/// Gateway contract dispatching one-time passwords over SMS.
pub trait OtpSender
where
	Self: Send + Sync,
{
	/// Delivers `code` to `mobile`.
	fn send_otp<'a>(&'a self, mobile: &'a str, code: &'a str) -> IdentityFuture<'a, ()>;
}

/// In-process [`OtpSender`] capturing codes for local development and tests.
#[derive(Clone, Default)]
pub struct MemoryOtpSender {
	sent: Arc<RwLock<Vec<(String, String)>>>,
}
impl MemoryOtpSender {
	/// Creates an empty sender.
	pub fn new() -> Self {
		Self::default()
	}

	/// Snapshot of every `(mobile, code)` pair dispatched so far.
	pub fn sent(&self) -> Vec<(String, String)> {
		self.sent.read().clone()
	}
}
impl Debug for MemoryOtpSender {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MemoryOtpSender").field("sent", &self.sent.read().len()).finish()
	}
}
impl OtpSender for MemoryOtpSender {
	fn send_otp<'a>(&'a self, mobile: &'a str, code: &'a str) -> IdentityFuture<'a, ()> {
		Box::pin(async move {
			self.sent.write().push((mobile.to_owned(), code.to_owned()));

			Ok(())
		})
	}
}

/// Resolves the executor phase from node binding properties; defaults to send.
pub fn mode_from_properties(properties: &HashMap<String, String>) -> ExecutorMode {
	match properties.get("mode").map(String::as_str) {
		Some("verify") => ExecutorMode::Verify,
		_ => ExecutorMode::Send,
	}
}

/// Sends and verifies SMS one-time passwords.
///
/// Graphs bind the executor twice: a `send` node that identifies the user by
/// mobile number and dispatches a code, and a `verify` node that checks the
/// submitted code within the validity window and attempt budget.
#[derive(Clone)]
pub struct SmsOtpExecutor {
	credentials: Arc<dyn CredentialsService>,
	sender: Arc<dyn OtpSender>,
	mode: ExecutorMode,
}
impl SmsOtpExecutor {
	/// Builds the executor for one phase.
	pub fn new(
		credentials: Arc<dyn CredentialsService>,
		sender: Arc<dyn OtpSender>,
		mode: ExecutorMode,
	) -> Self {
		Self { credentials, sender, mode }
	}

	/// Phase the executor runs in.
	pub fn mode(&self) -> ExecutorMode {
		self.mode
	}

	/// Inputs the executor prompts for in its phase.
	pub fn default_inputs(&self) -> Vec<InputSpec> {
		match self.mode {
			ExecutorMode::Send => vec![InputSpec::required_string("mobileNumber")],
			ExecutorMode::Verify => vec![InputSpec::required_string("otp")],
		}
	}

	/// Runtime-data keys the phase depends on.
	pub fn prerequisites(&self) -> Vec<&'static str> {
		match self.mode {
			ExecutorMode::Send => Vec::new(),
			ExecutorMode::Verify => vec![RUNTIME_OTP_CODE, RUNTIME_OTP_MOBILE],
		}
	}

	/// Runs the configured phase.
	pub async fn execute(&self, ctx: &FlowContext) -> Result<ExecutorResponse> {
		match self.mode {
			ExecutorMode::Send => self.send(ctx).await,
			ExecutorMode::Verify => self.verify(ctx).await,
		}
	}

	async fn send(&self, ctx: &FlowContext) -> Result<ExecutorResponse> {
		let inputs = self.default_inputs();

		if let Some(response) = require_inputs(&inputs, ctx) {
			return Ok(response);
		}

		let mobile = ctx.input("mobileNumber").unwrap_or_default().to_owned();
		let identifying =
			AttributeMap::from_iter([("mobileNumber".to_owned(), mobile.clone())]);

		match self.credentials.identify(&identifying).await {
			Ok(Some(_)) => {},
			Ok(None) =>
				return Ok(ExecutorResponse::user_input_required(inputs)
					.with_reason(FailureReason::UserNotFound)),
			Err(e) => return Err(e.into()),
		}

		let code = generate_code();

		self.sender.send_otp(&mobile, &code).await.map_err(Error::from)?;

		let expires_at = (OffsetDateTime::now_utc() + OTP_VALIDITY).unix_timestamp();

		Ok(ExecutorResponse::complete()
			.with_runtime(RUNTIME_OTP_CODE, code)
			.with_runtime(RUNTIME_OTP_EXPIRES_AT, expires_at.to_string())
			.with_runtime(RUNTIME_OTP_MOBILE, mobile)
			.with_runtime(RUNTIME_OTP_ATTEMPTS, "0"))
	}

	async fn verify(&self, ctx: &FlowContext) -> Result<ExecutorResponse> {
		let inputs = self.default_inputs();

		if let Some(response) = require_inputs(&inputs, ctx) {
			return Ok(response);
		}

		let expected = ctx.runtime(RUNTIME_OTP_CODE).unwrap_or_default();
		let expires_at = ctx
			.runtime(RUNTIME_OTP_EXPIRES_AT)
			.and_then(|raw| raw.parse::<i64>().ok())
			.unwrap_or_default();

		if OffsetDateTime::now_utc().unix_timestamp() >= expires_at {
			return Ok(ExecutorResponse::failure(FailureReason::OtpExpired));
		}

		if ctx.input("otp") != Some(expected) {
			let attempts = ctx
				.runtime(RUNTIME_OTP_ATTEMPTS)
				.and_then(|raw| raw.parse::<u32>().ok())
				.unwrap_or_default()
				+ 1;

			if attempts >= OTP_ATTEMPT_LIMIT {
				return Ok(ExecutorResponse::failure(FailureReason::TooManyAttempts));
			}

			return Ok(ExecutorResponse::retry(inputs, FailureReason::InvalidOtp)
				.with_runtime(RUNTIME_OTP_ATTEMPTS, attempts.to_string()));
		}

		let mobile = ctx.runtime(RUNTIME_OTP_MOBILE).unwrap_or_default().to_owned();
		let identifying =
			AttributeMap::from_iter([("mobileNumber".to_owned(), mobile.clone())]);
		let user_id = match self.credentials.identify(&identifying).await {
			Ok(Some(user_id)) => user_id,
			Ok(None) =>
				return Ok(ExecutorResponse::failure(FailureReason::UserNotFound)),
			Err(e) => return Err(e.into()),
		};
		let mut user = AuthenticatedUser {
			is_authenticated: true,
			user_id: Some(user_id),
			..Default::default()
		};

		user.set_attribute("mobileNumber", mobile);

		Ok(ExecutorResponse::complete_with_user(user))
	}
}
impl Debug for SmsOtpExecutor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SmsOtpExecutor").field("mode", &self.mode).finish()
	}
}

fn generate_code() -> String {
	let ceiling = 10_u32.pow(OTP_DIGITS);

	format!("{:06}", rand::rng().random_range(0..ceiling))
}
