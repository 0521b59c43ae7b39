#![cfg(feature = "reqwest")]

// std
use std::{collections::HashMap, sync::Arc};
// crates.io
use httpmock::prelude::*;
// self
use authn_broker::{
	auth::{ApplicationId, TokenSecret},
	http::ReqwestJsonTransport,
	identity::{AttributeQuery, CredentialsService, HttpCredentialsService, IdentityError},
	url::Url,
};

fn client(server: &MockServer) -> HttpCredentialsService {
	let base = Url::parse(&server.base_url()).expect("Mock server URL should parse.");

	HttpCredentialsService::new(base, Arc::new(ReqwestJsonTransport::default()))
}

fn identifying() -> HashMap<String, String> {
	HashMap::from_iter([("username".to_owned(), "jdoe".to_owned())])
}

fn verifying(password: &str) -> HashMap<String, String> {
	HashMap::from_iter([("password".to_owned(), password.to_owned())])
}

fn app() -> ApplicationId {
	ApplicationId::new("app-1").expect("Application fixture should be valid.")
}

#[tokio::test]
async fn authenticate_round_trips_verified_credentials() {
	let server = MockServer::start();
	let mock = server.mock(|when, then| {
		when.method(POST)
			.path("/authenticate")
			.json_body_includes(r#"{"app_id": "app-1", "identifying": {"username": "jdoe"}}"#);
		then.status(200).json_body(serde_json::json!({
			"user_id": "user-1",
			"ou_id": "ou-1",
			"user_type": "person",
			"token": "bearer-1",
			"available_attributes": ["email", "firstName"],
		}));
	});

	let verified = client(&server)
		.authenticate(&app(), &identifying(), &verifying("s3cret"))
		.await
		.expect("Authentication should succeed.");

	mock.assert();
	assert_eq!(verified.user_id.as_ref(), "user-1");
	assert_eq!(verified.token.expose(), "bearer-1");
	assert_eq!(verified.available_attributes, vec!["email", "firstName"]);
}

#[tokio::test]
async fn upstream_401_maps_to_invalid_credentials() {
	let server = MockServer::start();

	server.mock(|when, then| {
		when.method(POST).path("/authenticate");
		then.status(401).json_body(serde_json::json!({ "error": "invalid_credentials" }));
	});

	assert_eq!(
		client(&server).authenticate(&app(), &identifying(), &verifying("wrong")).await,
		Err(IdentityError::InvalidCredentials)
	);
}

#[tokio::test]
async fn identify_treats_404_as_no_match() {
	let server = MockServer::start();

	server.mock(|when, then| {
		when.method(POST).path("/identify");
		then.status(404).json_body(serde_json::json!({ "error": "not_found" }));
	});

	let identified = client(&server)
		.identify(&identifying())
		.await
		.expect("A miss is not an error.");

	assert_eq!(identified, None);
}

#[tokio::test]
async fn attributes_resolve_with_a_bearer() {
	let server = MockServer::start();

	server.mock(|when, then| {
		when.method(POST)
			.path("/attributes")
			.json_body_includes(r#"{"token": "bearer-1"}"#);
		then.status(200).json_body(serde_json::json!({
			"attributes": { "email": "jdoe@example.com" },
		}));
	});

	let attributes = client(&server)
		.attributes(&TokenSecret::new("bearer-1"), &AttributeQuery::default())
		.await
		.expect("Attribute lookup should succeed.");

	assert_eq!(
		attributes.get("email").and_then(serde_json::Value::as_str),
		Some("jdoe@example.com")
	);
}

#[tokio::test]
async fn upstream_5xx_maps_to_server_failure() {
	let server = MockServer::start();

	server.mock(|when, then| {
		when.method(POST).path("/authenticate");
		then.status(503).body("unavailable");
	});

	assert!(matches!(
		client(&server).authenticate(&app(), &identifying(), &verifying("s3cret")).await,
		Err(IdentityError::Server { .. })
	));
}
