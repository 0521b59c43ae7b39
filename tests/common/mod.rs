//! Shared fixtures wiring a full in-memory broker stack for integration tests.

#![allow(dead_code)]

// std
use std::{collections::HashMap, sync::Arc};
// self
use authn_broker::{
	assertion::AssertionIssuer,
	auth::{ApplicationId, DeploymentId, OuId, UserId},
	bridge::AuthnBridge,
	config::StoreMode,
	crypt::{SealingKey, TokenCipher},
	executor::{ExecutorRegistry, IdpRegistry, MemoryOtpSender, OtpSender},
	flow::{
		EdgeDefinition, ExecutorDefinition, FlowEngine, GraphDefinition, GraphRegistry,
		InputSpec, MemoryContextStore, NodeDefinition, NodeType,
	},
	http::{JsonTransport, TransportError, TransportFuture},
	identity::{
		CredentialsService, Group, GroupService, MemoryDirectory, OrganizationUnit, OuService,
		User, UserService,
	},
	jwt::{JwtSigner, SigningKey},
	resource::{
		ApplicationService,
		application::{ApplicationRequest, InboundAuthConfigRequest, OAuthAppConfigRequest},
	},
	session::SessionStore,
	store::{FileStore, MemoryStore},
	url::Url,
};

/// Issuer baked into every test assertion.
pub const ISSUER: &str = "https://idp.example.com";
/// Authorization endpoint the bridge redirects back to.
pub const AUTHZ_ENDPOINT: &str = "https://idp.example.com/oauth2/authorize";

/// Fully wired in-memory broker stack.
pub struct TestStack {
	pub engine: Arc<FlowEngine>,
	pub bridge: AuthnBridge,
	pub directory: MemoryDirectory,
	pub sessions: Arc<SessionStore>,
	pub signer: Arc<JwtSigner>,
	pub applications: Arc<ApplicationService>,
	pub otp: MemoryOtpSender,
}

/// Transport stub for flows that never leave the process.
struct OfflineTransport;
impl JsonTransport for OfflineTransport {
	fn get_json<'a>(
		&'a self,
		url: &'a Url,
		_bearer: Option<&'a str>,
	) -> TransportFuture<'a, serde_json::Value> {
		Box::pin(async move {
			Err(TransportError::Network { url: url.to_string(), message: "offline".into() })
		})
	}

	fn post_json<'a>(
		&'a self,
		url: &'a Url,
		_body: &'a serde_json::Value,
	) -> TransportFuture<'a, serde_json::Value> {
		Box::pin(async move {
			Err(TransportError::Network { url: url.to_string(), message: "offline".into() })
		})
	}

	fn post_form<'a>(
		&'a self,
		url: &'a Url,
		_params: &'a authn_broker::http::FormParams<'a>,
	) -> TransportFuture<'a, serde_json::Value> {
		Box::pin(async move {
			Err(TransportError::Network { url: url.to_string(), message: "offline".into() })
		})
	}
}

pub fn deployment() -> DeploymentId {
	DeploymentId::new("dep-tests").expect("Deployment fixture should be valid.")
}

pub fn user_id(raw: &str) -> UserId {
	UserId::new(raw).expect("User fixture should be valid.")
}

pub fn app_id(raw: &str) -> ApplicationId {
	ApplicationId::new(raw).expect("Application fixture should be valid.")
}

pub fn inputs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
	pairs.iter().map(|(name, value)| ((*name).to_owned(), (*value).to_owned())).collect()
}

/// Seeds the directory with `jdoe` (password `s3cret`), an OU, and groups.
pub fn seeded_directory() -> MemoryDirectory {
	let directory = MemoryDirectory::new();
	let mut attributes = serde_json::Map::new();

	attributes.insert("username".into(), "jdoe".into());
	attributes.insert("email".into(), "jdoe@example.com".into());
	attributes.insert("mobileNumber".into(), "+14155550100".into());

	directory.add_user(
		User {
			id: user_id("user-1"),
			ou_id: OuId::new("ou-1").expect("OU fixture should be valid."),
			user_type: "person".into(),
			active: true,
			attributes,
		},
		Some("s3cret"),
	);
	directory.add_organization_unit(OrganizationUnit {
		id: OuId::new("ou-1").expect("OU fixture should be valid."),
		name: "Engineering".into(),
		handle: "engineering".into(),
	});
	directory.add_groups(
		user_id("user-1"),
		vec![Group { id: "g1".into(), name: "admins".into() }],
	);

	directory
}

fn node(
	id: &str,
	node_type: NodeType,
	executor: Option<&str>,
	properties: &[(&str, &str)],
	input_data: Vec<InputSpec>,
) -> NodeDefinition {
	NodeDefinition {
		id: id.into(),
		node_type,
		input_data,
		executor: executor.map(|name| ExecutorDefinition {
			name: name.into(),
			idp_name: None,
			properties: properties
				.iter()
				.map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
				.collect(),
		}),
	}
}

fn edge(from: &str, to: &str) -> EdgeDefinition {
	EdgeDefinition { from: from.into(), to: to.into() }
}

pub fn basic_auth_graph() -> GraphDefinition {
	GraphDefinition {
		id: "auth_flow_config_basic".into(),
		flow_type: "authentication".into(),
		nodes: vec![
			node("basic_auth", NodeType::TaskExecution, Some("BasicAuth"), &[], vec![]),
			node("success", NodeType::AuthSuccess, None, &[], vec![]),
		],
		edges: vec![edge("basic_auth", "success")],
	}
}

pub fn sms_auth_graph() -> GraphDefinition {
	GraphDefinition {
		id: "auth_flow_config_sms".into(),
		flow_type: "authentication".into(),
		nodes: vec![
			node(
				"sms_send",
				NodeType::TaskExecution,
				Some("SMSOTPAuth"),
				&[("mode", "send")],
				vec![],
			),
			node(
				"sms_verify",
				NodeType::TaskExecution,
				Some("SMSOTPAuth"),
				&[("mode", "verify")],
				vec![],
			),
			node("success", NodeType::AuthSuccess, None, &[], vec![]),
		],
		edges: vec![edge("sms_send", "sms_verify"), edge("sms_verify", "success")],
	}
}

pub fn registration_graph() -> GraphDefinition {
	GraphDefinition {
		id: "registration_flow_config_basic".into(),
		flow_type: "registration".into(),
		nodes: vec![
			node("basic_auth", NodeType::TaskExecution, Some("BasicAuth"), &[], vec![]),
			node(
				"collect",
				NodeType::TaskExecution,
				Some("AttributeCollector"),
				&[],
				vec![InputSpec::required_string("email")],
			),
			node("provision", NodeType::TaskExecution, Some("Provisioning"), &[], vec![]),
			node("success", NodeType::AuthSuccess, None, &[], vec![]),
		],
		edges: vec![
			edge("basic_auth", "collect"),
			edge("collect", "provision"),
			edge("provision", "success"),
		],
	}
}

fn application_request(id: &str, name: &str, client_id: &str) -> ApplicationRequest {
	ApplicationRequest {
		id: Some(id.into()),
		name: name.into(),
		auth_flow_graph_id: "auth_flow_config_basic".into(),
		registration_flow_graph_id: Some("registration_flow_config_basic".into()),
		is_registration_flow_enabled: true,
		token: Some(authn_broker::resource::application::AssertionConfig {
			issuer: None,
			validity_period: Some(600),
			user_attributes: vec!["email".into(), "groups".into()],
		}),
		inbound_auth: vec![InboundAuthConfigRequest {
			kind: "oauth2".into(),
			config: OAuthAppConfigRequest {
				client_id: client_id.into(),
				client_secret: Some("app-secret".into()),
				redirect_uris: vec!["https://app.example.com/cb".into()],
				grant_types: vec!["authorization_code".into()],
				response_types: vec!["code".into()],
				..Default::default()
			},
		}],
		..Default::default()
	}
}

/// Wires the full stack: directory, graphs, applications, engine, bridge.
pub async fn stack() -> TestStack {
	let directory = seeded_directory();
	let shared = Arc::new(directory.clone());
	let credentials: Arc<dyn CredentialsService> = shared.clone();
	let users: Arc<dyn UserService> = shared.clone();
	let ous: Arc<dyn OuService> = shared.clone();
	let groups: Arc<dyn GroupService> = shared.clone();
	let cipher = TokenCipher::new(&SealingKey::from_bytes([7; 32]));
	let contexts = Arc::new(MemoryContextStore::new(cipher));
	let mut graphs = GraphRegistry::new();

	graphs.register(basic_auth_graph()).expect("Basic graph should register.");
	graphs.register(sms_auth_graph()).expect("SMS graph should register.");
	graphs.register(registration_graph()).expect("Registration graph should register.");

	let signer = Arc::new(JwtSigner::new(ISSUER, &SigningKey::from_bytes([3; 32])));
	let issuer = Arc::new(AssertionIssuer::new(
		signer.clone(),
		users.clone(),
		ous,
		groups,
		credentials.clone(),
	));
	let applications = Arc::new(ApplicationService::new(
		StoreMode::Mutable,
		Arc::new(MemoryStore::new()),
		FileStore::new(),
	));

	applications
		.create(application_request("app-basic", "Basic Portal", "client-basic"))
		.await
		.expect("Basic application should create.");

	let mut sms_application = application_request("app-sms", "SMS Portal", "client-sms");

	sms_application.auth_flow_graph_id = "auth_flow_config_sms".into();

	applications.create(sms_application).await.expect("SMS application should create.");

	let otp = MemoryOtpSender::new();
	let otp_sender: Arc<dyn OtpSender> = Arc::new(otp.clone());
	let registry = Arc::new(ExecutorRegistry::new(
		credentials,
		users,
		otp_sender,
		Arc::new(OfflineTransport),
		IdpRegistry::new(),
	));
	let engine = Arc::new(FlowEngine::new(
		deployment(),
		Arc::new(graphs),
		contexts,
		registry,
		issuer,
		applications.clone(),
	));
	let sessions = Arc::new(SessionStore::new());
	let bridge = AuthnBridge::new(
		engine.clone(),
		sessions.clone(),
		signer.clone(),
		Url::parse(AUTHZ_ENDPOINT).expect("Endpoint fixture should parse."),
	);

	TestStack { engine, bridge, directory, sessions, signer, applications, otp }
}
