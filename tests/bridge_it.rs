mod common;

// self
use authn_broker::{
	auth::ScopeSet,
	bridge::AuthnRequest,
	flow::FlowStatus,
	session::{AuthorizationSession, OAuthParameters},
};
use common::{app_id, inputs, stack};
use time::OffsetDateTime;

fn seed_session(stack: &common::TestStack, key: &str) {
	stack.sessions.insert(
		key,
		AuthorizationSession {
			session_data_key: authn_broker::auth::SessionDataKey::new(key)
				.expect("Key fixture should be valid."),
			oauth: OAuthParameters {
				app_id: app_id("app-basic"),
				client_id: "client-basic".into(),
				redirect_uri: "https://app.example.com/cb".into(),
				scopes: ScopeSet::new(["openid"]).expect("Scope fixture should be valid."),
				state: Some("client-state".into()),
			},
			auth_time: OffsetDateTime::now_utc(),
			user: None,
		},
	);
}

#[tokio::test]
async fn exactly_one_of_session_key_and_flow_id() {
	let stack = stack().await;

	let both = AuthnRequest {
		session_data_key: Some("k".into()),
		flow_id: Some("f".into()),
		..Default::default()
	};

	assert!(stack.bridge.execute(both).await.is_err());

	let neither = AuthnRequest::default();

	assert!(stack.bridge.execute(neither).await.is_err());
}

#[tokio::test]
async fn new_flows_rekey_the_session_under_the_flow_id() {
	let stack = stack().await;

	seed_session(&stack, "sdk-original");

	let step = stack
		.bridge
		.execute(AuthnRequest {
			session_data_key: Some("sdk-original".into()),
			..Default::default()
		})
		.await
		.expect("Bridge call should succeed.");

	assert_eq!(step.flow_status, FlowStatus::Incomplete);
	assert!(
		stack.sessions.peek("sdk-original").is_none(),
		"The original session key must be cleared."
	);
	assert!(
		stack.sessions.peek(step.flow_id.as_ref()).is_some(),
		"The session must be reachable under the flow id."
	);
}

#[tokio::test]
async fn completion_mints_a_fresh_session_and_redirect() {
	let stack = stack().await;

	seed_session(&stack, "sdk-original");

	let first = stack
		.bridge
		.execute(AuthnRequest {
			session_data_key: Some("sdk-original".into()),
			..Default::default()
		})
		.await
		.expect("Bridge call should succeed.");
	let second = stack
		.bridge
		.execute(AuthnRequest {
			flow_id: Some(first.flow_id.to_string()),
			inputs: inputs(&[("username", "jdoe"), ("password", "s3cret")]),
			..Default::default()
		})
		.await
		.expect("Bridge call should succeed.");

	assert_eq!(second.flow_status, FlowStatus::Complete);
	assert!(second.assertion.is_none(), "The bridge consumes the assertion.");

	let redirect = second
		.data
		.as_ref()
		.and_then(|data| data.redirect_url.as_deref())
		.expect("Completion responds with a redirect.");

	assert!(redirect.starts_with(common::AUTHZ_ENDPOINT));

	let new_key = redirect
		.split("sessionDataKey=")
		.nth(1)
		.expect("Redirect carries the fresh session key.");

	assert_ne!(new_key, "sdk-original");
	assert!(
		stack.sessions.peek(first.flow_id.as_ref()).is_none(),
		"The flow-keyed session must be cleared."
	);

	let renewed = stack
		.sessions
		.peek(new_key)
		.expect("A fresh session must exist under the new key.");
	let user = renewed.user.expect("The renewed session carries the user.");

	assert_eq!(user.user_id.as_deref(), Some("user-1"));
	assert_eq!(user.attribute_str("email"), Some("jdoe@example.com"));
	assert_eq!(
		renewed.oauth.client_id, "client-basic",
		"OAuth parameters survive the swap."
	);
}

#[tokio::test]
async fn failed_flows_clear_the_session() {
	let stack = stack().await;

	seed_session(&stack, "sdk-original");

	let first = stack
		.bridge
		.execute(AuthnRequest {
			session_data_key: Some("sdk-original".into()),
			..Default::default()
		})
		.await
		.expect("Bridge call should succeed.");

	// Exhaust the flow terminally by failing the assert stage: submit a
	// bogus continuation against a missing session after manual clearing.
	stack.sessions.take(first.flow_id.as_ref());

	let completion = stack
		.bridge
		.execute(AuthnRequest {
			flow_id: Some(first.flow_id.to_string()),
			inputs: inputs(&[("username", "jdoe"), ("password", "s3cret")]),
			..Default::default()
		})
		.await;

	assert!(
		completion.is_err(),
		"Completing without a stored session is a terminated-session error."
	);
}

#[tokio::test]
async fn unknown_session_keys_are_rejected() {
	let stack = stack().await;
	let step = stack
		.bridge
		.execute(AuthnRequest { session_data_key: Some("ghost".into()), ..Default::default() })
		.await;

	assert!(step.is_err());
}
