mod common;

// self
use authn_broker::{
	auth::{OuId, TokenSecret},
	crypt::{SealingKey, TokenCipher},
	flow::{
		ExecutionStatus, ExecutorKind, ExecutorMode, ExecutorName, FlowContext,
		FlowContextStore, FlowType, MemoryContextStore, NodeExecutionRecord, from_stored,
		to_stored,
	},
};
use common::{app_id, deployment, user_id};
use time::OffsetDateTime;

fn cipher() -> TokenCipher {
	TokenCipher::new(&SealingKey::from_bytes([21; 32]))
}

fn rich_context() -> FlowContext {
	let mut ctx = FlowContext::start(
		authn_broker::auth::FlowId::generate(),
		app_id("app-basic"),
		FlowType::Authentication,
		"auth_flow_config_basic",
		"basic_auth",
		deployment(),
	);

	ctx.verbose = true;
	ctx.current_action = Some("continue".into());
	ctx.steps_taken = 3;
	ctx.user_inputs.insert("username".into(), "jdoe".into());
	ctx.user_inputs.insert("otp".into(), "123456".into());
	ctx.runtime_data.insert("otp_attempts".into(), "2".into());
	ctx.runtime_data.insert("authorized_permissions".into(), "orders:read".into());
	ctx.user.is_authenticated = true;
	ctx.user.user_id = Some(user_id("user-1"));
	ctx.user.ou_id = Some(OuId::new("ou-1").expect("OU fixture should be valid."));
	ctx.user.user_type = Some("person".into());
	ctx.user.token = Some(TokenSecret::new("a-very-secret-bearer"));
	ctx.user.available_attributes = Some(vec!["email".into(), "firstName".into()]);
	ctx.user.set_attribute("email", "jdoe@example.com");
	ctx.history.insert(
		"sms_send".into(),
		NodeExecutionRecord {
			node_id: "sms_send".into(),
			executor: ExecutorName::SmsOtpAuth,
			executor_kind: ExecutorKind::Authentication,
			executor_mode: Some(ExecutorMode::Send),
			status: ExecutionStatus::Complete,
			step: 1,
			started_at: OffsetDateTime::now_utc(),
			ended_at: Some(OffsetDateTime::now_utc()),
		},
	);
	ctx.history.insert(
		"sms_verify".into(),
		NodeExecutionRecord {
			node_id: "sms_verify".into(),
			executor: ExecutorName::SmsOtpAuth,
			executor_kind: ExecutorKind::Authentication,
			executor_mode: Some(ExecutorMode::Verify),
			status: ExecutionStatus::Complete,
			step: 2,
			started_at: OffsetDateTime::now_utc(),
			ended_at: Some(OffsetDateTime::now_utc()),
		},
	);

	ctx
}

#[test]
fn every_field_survives_the_stored_round_trip() {
	let cipher = cipher();
	let ctx = rich_context();
	let stored = to_stored(&ctx, &cipher).expect("Serialization should succeed.");
	let restored = from_stored(stored, &cipher).expect("Deserialization should succeed.");

	assert_eq!(restored, ctx);
}

#[test]
fn sealing_is_randomized_but_decryptable() {
	let cipher = cipher();
	let ctx = rich_context();
	let first = to_stored(&ctx, &cipher).expect("Serialization should succeed.");
	let second = to_stored(&ctx, &cipher).expect("Serialization should succeed.");

	assert_ne!(
		first.sealed_token, second.sealed_token,
		"Each store uses a fresh nonce."
	);

	for stored in [first, second] {
		let restored =
			from_stored(stored, &cipher).expect("Deserialization should succeed.");

		assert_eq!(
			restored.user.token.as_ref().map(TokenSecret::expose),
			Some("a-very-secret-bearer")
		);
	}
}

#[tokio::test]
async fn store_load_remove_lifecycle() {
	let store = MemoryContextStore::new(cipher());
	let ctx = rich_context();

	store.store(&ctx).await.expect("Store should succeed.");

	let loaded = store
		.load(&deployment(), &ctx.flow_id)
		.await
		.expect("Load should succeed.");

	assert_eq!(loaded, ctx);

	// Last write wins for racing steps of the same flow.
	let mut updated = ctx.clone();

	updated.steps_taken = 4;
	updated.runtime_data.insert("otp_attempts".into(), "3".into());

	store.store(&updated).await.expect("Second store should succeed.");

	let reloaded = store
		.load(&deployment(), &ctx.flow_id)
		.await
		.expect("Reload should succeed.");

	assert_eq!(reloaded.steps_taken, 4);

	store.remove(&deployment(), &ctx.flow_id).await.expect("Remove should succeed.");
	assert!(store.load(&deployment(), &ctx.flow_id).await.is_err());
	store
		.remove(&deployment(), &ctx.flow_id)
		.await
		.expect("Removing a missing context is idempotent.");
}

#[tokio::test]
async fn contexts_are_partitioned_by_deployment() {
	let store = MemoryContextStore::new(cipher());
	let ctx = rich_context();

	store.store(&ctx).await.expect("Store should succeed.");

	let foreign = authn_broker::auth::DeploymentId::new("dep-other")
		.expect("Deployment fixture should be valid.");

	assert!(
		store.load(&foreign, &ctx.flow_id).await.is_err(),
		"No cross-deployment access."
	);
}
