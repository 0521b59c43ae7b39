//! Flow graph model compiled from declarative graph definitions.

// self
use crate::_prelude::*;

/// Kind of flow a graph drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
	/// Credential or federated sign-in.
	Authentication,
	/// Self-registration and provisioning.
	Registration,
}
impl FlowType {
	/// Canonical string form used in definitions and persisted contexts.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Authentication => "authentication",
			Self::Registration => "registration",
		}
	}
}
impl Default for FlowType {
	fn default() -> Self {
		Self::Authentication
	}
}
impl FromStr for FlowType {
	type Err = GraphError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"authentication" => Ok(Self::Authentication),
			"registration" => Ok(Self::Registration),
			other => Err(GraphError::UnknownFlowType { value: other.to_owned() }),
		}
	}
}

/// Behavioral kind of a graph node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
	/// Terminal node of a successful flow; defaults to the assertion executor.
	AuthSuccess,
	/// Terminal node of a failed flow.
	AuthFailure,
	/// Executes its bound executor and advances.
	TaskExecution,
	/// Routes to one of several next nodes based on the submitted action.
	Decision,
	/// Collects inputs without invoking a remote collaborator.
	PromptOnly,
}

/// Executors available to graph nodes; resolved by name at build time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExecutorName {
	/// Username/password credential verification.
	BasicAuth,
	/// SMS one-time-password send/verify.
	SmsOtpAuth,
	/// GitHub OAuth2 federation.
	GithubOAuth,
	/// Google OIDC federation.
	GoogleOidcAuth,
	/// Collects declared attributes into the user state.
	AttributeCollector,
	/// Creates or activates directory users during registration.
	Provisioning,
	/// Finalizes a successful flow so the assertion can be issued.
	AuthAssert,
}
impl ExecutorName {
	/// Canonical registry name.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::BasicAuth => "BasicAuth",
			Self::SmsOtpAuth => "SMSOTPAuth",
			Self::GithubOAuth => "GithubOAuth",
			Self::GoogleOidcAuth => "GoogleOIDCAuth",
			Self::AttributeCollector => "AttributeCollector",
			Self::Provisioning => "Provisioning",
			Self::AuthAssert => "AuthAssert",
		}
	}
}
impl Display for ExecutorName {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for ExecutorName {
	type Err = GraphError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"BasicAuth" => Ok(Self::BasicAuth),
			"SMSOTPAuth" => Ok(Self::SmsOtpAuth),
			"GithubOAuth" => Ok(Self::GithubOAuth),
			"GoogleOIDCAuth" => Ok(Self::GoogleOidcAuth),
			"AttributeCollector" => Ok(Self::AttributeCollector),
			"Provisioning" => Ok(Self::Provisioning),
			"AuthAssert" => Ok(Self::AuthAssert),
			other => Err(GraphError::UnknownExecutor {
				node: String::new(),
				name: other.to_owned(),
			}),
		}
	}
}
impl TryFrom<String> for ExecutorName {
	type Error = GraphError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		value.parse()
	}
}
impl From<ExecutorName> for String {
	fn from(value: ExecutorName) -> Self {
		value.as_str().to_owned()
	}
}

/// Input a node requests from the end user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
	/// Input name submitted back in the step inputs.
	pub name: String,
	/// Input data type label.
	#[serde(rename = "type")]
	pub kind: String,
	/// True when the step cannot proceed without this input.
	pub required: bool,
}
impl InputSpec {
	/// Builds a required string input.
	pub fn required_string(name: impl Into<String>) -> Self {
		Self { name: name.into(), kind: "string".into(), required: true }
	}

	/// Builds an optional string input.
	pub fn optional_string(name: impl Into<String>) -> Self {
		Self { name: name.into(), kind: "string".into(), required: false }
	}
}

/// Executor attachment resolved onto a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutorBinding {
	/// Registry name of the executor.
	pub name: ExecutorName,
	/// Federated IdP the executor should talk to, when applicable.
	#[serde(default)]
	pub idp_name: Option<String>,
	/// Free-form executor properties (e.g. SMS OTP `mode`).
	#[serde(default)]
	pub properties: HashMap<String, String>,
}
impl ExecutorBinding {
	/// Binding with no IdP and no properties.
	pub fn plain(name: ExecutorName) -> Self {
		Self { name, idp_name: None, properties: HashMap::new() }
	}
}

/// Declarative executor attachment prior to registry resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorDefinition {
	/// Registry name of the executor.
	pub name: String,
	/// Federated IdP name.
	#[serde(default)]
	pub idp_name: Option<String>,
	/// Free-form executor properties.
	#[serde(default)]
	pub properties: HashMap<String, String>,
}

/// Declarative node prior to graph compilation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeDefinition {
	/// Unique node id within the graph.
	pub id: String,
	/// Behavioral kind.
	#[serde(rename = "type")]
	pub node_type: NodeType,
	/// Inputs the node requests.
	#[serde(default)]
	pub input_data: Vec<InputSpec>,
	/// Executor attachment.
	#[serde(default)]
	pub executor: Option<ExecutorDefinition>,
}

/// Declarative edge prior to graph compilation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EdgeDefinition {
	/// Source node id.
	pub from: String,
	/// Target node id.
	pub to: String,
}

/// Declarative graph document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphDefinition {
	/// Unique graph id referenced by applications.
	pub id: String,
	/// Flow type label (`authentication` or `registration`).
	#[serde(rename = "type")]
	pub flow_type: String,
	/// Graph nodes.
	pub nodes: Vec<NodeDefinition>,
	/// Directed edges.
	#[serde(default)]
	pub edges: Vec<EdgeDefinition>,
}

/// Compiled graph node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
	/// Unique node id within the graph.
	pub id: String,
	/// Behavioral kind.
	pub node_type: NodeType,
	/// True for the unique entry node.
	pub is_start: bool,
	/// True when the node has no outgoing edges.
	pub is_final: bool,
	/// Incoming node ids.
	pub prev: Vec<String>,
	/// Outgoing node ids.
	pub next: Vec<String>,
	/// Inputs the node requests.
	pub input_data: Vec<InputSpec>,
	/// Executor attachment; always present after compilation for executable nodes.
	pub executor: Option<ExecutorBinding>,
}

/// Errors raised while compiling a graph definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum GraphError {
	/// The definition declared an unrecognized flow type.
	#[error("Unknown flow type `{value}`.")]
	UnknownFlowType {
		/// Offending label.
		value: String,
	},
	/// Two nodes share an id.
	#[error("Graph declares duplicate node `{id}`.")]
	DuplicateNode {
		/// Duplicated node id.
		id: String,
	},
	/// A node references an executor missing from the registry.
	#[error("Node `{node}` references unknown executor `{name}`.")]
	UnknownExecutor {
		/// Offending node id (empty when parsed outside a node).
		node: String,
		/// Unresolved executor name.
		name: String,
	},
	/// An edge references a node that does not exist.
	#[error("Edge `{from}` -> `{to}` references a missing node.")]
	MissingEdgeEndpoint {
		/// Source node id.
		from: String,
		/// Target node id.
		to: String,
	},
	/// No node has an empty predecessor list.
	#[error("Graph `{graph}` has no start node.")]
	NoStartNode {
		/// Offending graph id.
		graph: String,
	},
	/// More than one node has an empty predecessor list.
	#[error("Graph `{graph}` has multiple start nodes.")]
	MultipleStartNodes {
		/// Offending graph id.
		graph: String,
	},
	/// The definition declared no nodes.
	#[error("Graph `{graph}` declares no nodes.")]
	Empty {
		/// Offending graph id.
		graph: String,
	},
	/// A referenced graph id is absent from the registry.
	#[error("Graph `{graph}` is not registered.")]
	NotRegistered {
		/// Missing graph id.
		graph: String,
	},
}

/// Compiled, immutable flow graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Graph {
	/// Unique graph id.
	pub id: String,
	/// Flow type the graph drives.
	pub flow_type: FlowType,
	/// Nodes by id.
	pub nodes: HashMap<String, Node>,
	/// Outgoing adjacency by node id.
	pub edges: HashMap<String, Vec<String>>,
	/// Unique entry node id.
	pub start_node_id: String,
}
impl Graph {
	/// Compiles a declarative definition into an executable graph.
	pub fn build(definition: GraphDefinition) -> Result<Self, GraphError> {
		if definition.nodes.is_empty() {
			return Err(GraphError::Empty { graph: definition.id });
		}

		let flow_type = definition.flow_type.parse::<FlowType>()?;
		let mut nodes: HashMap<String, Node> = HashMap::with_capacity(definition.nodes.len());

		for node_definition in definition.nodes {
			let executor = match node_definition.executor {
				Some(executor) => Some(ExecutorBinding {
					name: executor.name.parse::<ExecutorName>().map_err(|_| {
						GraphError::UnknownExecutor {
							node: node_definition.id.clone(),
							name: executor.name.clone(),
						}
					})?,
					idp_name: executor.idp_name,
					properties: executor.properties,
				}),
				None if node_definition.node_type == NodeType::AuthSuccess =>
					Some(ExecutorBinding::plain(ExecutorName::AuthAssert)),
				None => None,
			};
			let node = Node {
				id: node_definition.id.clone(),
				node_type: node_definition.node_type,
				is_start: false,
				is_final: false,
				prev: Vec::new(),
				next: Vec::new(),
				input_data: node_definition.input_data,
				executor,
			};

			if nodes.insert(node_definition.id.clone(), node).is_some() {
				return Err(GraphError::DuplicateNode { id: node_definition.id });
			}
		}

		let mut edges: HashMap<String, Vec<String>> = HashMap::new();

		for edge in definition.edges {
			if !nodes.contains_key(&edge.from) || !nodes.contains_key(&edge.to) {
				return Err(GraphError::MissingEdgeEndpoint { from: edge.from, to: edge.to });
			}

			nodes
				.get_mut(&edge.from)
				.expect("Edge source existence is checked above.")
				.next
				.push(edge.to.clone());
			nodes
				.get_mut(&edge.to)
				.expect("Edge target existence is checked above.")
				.prev
				.push(edge.from.clone());
			edges.entry(edge.from).or_default().push(edge.to);
		}

		let mut start_node_id = None;

		for node in nodes.values_mut() {
			node.is_final = node.next.is_empty();

			if node.prev.is_empty() {
				if start_node_id.is_some() {
					return Err(GraphError::MultipleStartNodes { graph: definition.id });
				}

				start_node_id = Some(node.id.clone());
				node.is_start = true;
			}
		}

		let start_node_id =
			start_node_id.ok_or(GraphError::NoStartNode { graph: definition.id.clone() })?;

		Ok(Self { id: definition.id, flow_type, nodes, edges, start_node_id })
	}

	/// Returns a node by id.
	pub fn node(&self, id: &str) -> Option<&Node> {
		self.nodes.get(id)
	}

	/// Returns the unique start node.
	pub fn start(&self) -> &Node {
		self.nodes
			.get(&self.start_node_id)
			.expect("Start node existence is enforced at build time.")
	}
}

/// Registry of compiled graphs; immutable after startup, so no locking.
#[derive(Clone, Debug, Default)]
pub struct GraphRegistry {
	graphs: HashMap<String, Arc<Graph>>,
}
impl GraphRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Compiles and registers a graph definition during startup.
	pub fn register(&mut self, definition: GraphDefinition) -> Result<(), GraphError> {
		let graph = Graph::build(definition)?;

		self.graphs.insert(graph.id.clone(), Arc::new(graph));

		Ok(())
	}

	/// Returns a registered graph by id.
	pub fn get(&self, id: &str) -> Result<Arc<Graph>, GraphError> {
		self.graphs
			.get(id)
			.cloned()
			.ok_or_else(|| GraphError::NotRegistered { graph: id.to_owned() })
	}
}
