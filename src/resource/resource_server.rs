//! Resource server family: protected APIs with hierarchical resources and actions.

// self
use crate::{
	_prelude::*,
	auth::{OuId, id::random_string},
	config::StoreMode,
	resource::{Backend, ResourceExporter, ResourceRules},
	store::{
		DeclarativeSource, FileStore, Precedence, RecordStore, ResourceRecord, StoreError,
		StoreFuture, declarative::parse_yaml,
	},
};

/// Default delimiter joining permission segments.
pub const DEFAULT_PERMISSION_DELIMITER: &str = ":";

/// Action exposed by a protected resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAction {
	/// Display name.
	pub name: String,
	/// URL-safe handle contributing to the permission string.
	pub handle: String,
	/// Optional free-form description.
	#[serde(default)]
	pub description: Option<String>,
	/// Permission string computed during load.
	#[serde(default)]
	pub permission: String,
}

/// Protected resource within a server, optionally nested under a parent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerResource {
	/// Display name.
	pub name: String,
	/// URL-safe handle contributing to the permission string.
	pub handle: String,
	/// Optional free-form description.
	#[serde(default)]
	pub description: Option<String>,
	/// Handle of the parent resource, when nested.
	#[serde(default)]
	pub parent: Option<String>,
	/// Actions exposed by the resource.
	#[serde(default)]
	pub actions: Vec<ServerAction>,
	/// Permission string computed during load.
	#[serde(default)]
	pub permission: String,
}

/// Resource server payload stored by the family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceServer {
	/// Unique server id.
	pub id: String,
	/// Display name.
	pub name: String,
	/// Identifier prefixing every permission string.
	pub identifier: String,
	/// Organization unit owning the server, when scoped.
	#[serde(default)]
	pub ou_id: Option<OuId>,
	/// Delimiter joining permission segments.
	#[serde(default)]
	pub delimiter: String,
	/// Protected resources, flat with parent references.
	#[serde(default)]
	pub resources: Vec<ServerResource>,
}

/// Incoming resource server document (API request or declarative YAML).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceServerRequest {
	/// Explicit id; generated when omitted on API create.
	#[serde(default)]
	pub id: Option<String>,
	/// Display name.
	#[serde(default)]
	pub name: String,
	/// Identifier prefixing every permission string.
	#[serde(default)]
	pub identifier: String,
	/// Organization unit owning the server, when scoped.
	#[serde(default)]
	pub ou_id: Option<String>,
	/// Delimiter override; defaults to `:`.
	#[serde(default)]
	pub delimiter: Option<String>,
	/// Protected resources.
	#[serde(default)]
	pub resources: Vec<ServerResource>,
}

/// Projection returned by resource server list queries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceServerListItem {
	/// Unique server id.
	pub id: String,
	/// Display name.
	pub name: String,
	/// Identifier prefixing permissions.
	pub identifier: String,
	/// True when the server is declarative and therefore read-only.
	pub read_only: bool,
}

/// Errors raised by the resource server family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ResourceServerError {
	/// The request is structurally invalid.
	#[error("Invalid resource server request: {message}.")]
	InvalidRequest {
		/// Validation failure text.
		message: String,
	},
	/// No server matched the requested id or name.
	#[error("Resource server `{id}` was not found.")]
	NotFound {
		/// Requested id or name.
		id: String,
	},
	/// A server with the same id already exists.
	#[error("Resource server `{id}` already exists.")]
	Duplicate {
		/// Offending id.
		id: String,
	},
	/// The server is declarative and cannot be modified.
	#[error("Resource server `{id}` is declarative and cannot be modified.")]
	Immutable {
		/// Declarative server id.
		id: String,
	},
	/// Two resources within the server share a handle.
	#[error("Resource server declares duplicate handle `{handle}`.")]
	DuplicateHandle {
		/// The duplicated handle.
		handle: String,
	},
	/// A resource references a parent handle that does not exist.
	#[error("Resource `{handle}` references unknown parent `{parent}`.")]
	UnknownParent {
		/// Child resource handle.
		handle: String,
		/// Missing parent handle.
		parent: String,
	},
	/// Parent references form a cycle.
	#[error("Resource `{handle}` participates in a parent cycle.")]
	ParentCycle {
		/// Handle inside the cycle.
		handle: String,
	},
	/// The combined store count exceeds the composite cap.
	#[error("Resource server list exceeds the composite record limit.")]
	LimitExceeded,
	/// Underlying storage failure.
	#[error("Resource server storage failure: {message}.")]
	Backend {
		/// Redacted upstream failure text.
		message: String,
	},
}
impl ResourceServerError {
	/// Returns the stable client-facing code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidRequest { .. } => "RSV-1001",
			Self::NotFound { .. } => "RSV-1002",
			Self::Duplicate { .. } => "RSV-1003",
			Self::Immutable { .. } => "RSV-1004",
			Self::DuplicateHandle { .. } => "RSV-1005",
			Self::UnknownParent { .. } => "RSV-1006",
			Self::ParentCycle { .. } => "RSV-1007",
			Self::LimitExceeded => "RSV-5001",
			Self::Backend { .. } => "RSV-5002",
		}
	}

	/// Classifies the error as a client or server failure.
	pub fn kind(&self) -> crate::error::ErrorKind {
		match self {
			Self::LimitExceeded | Self::Backend { .. } => crate::error::ErrorKind::Server,
			_ => crate::error::ErrorKind::Client,
		}
	}

	fn from_store(e: StoreError) -> Self {
		match e {
			StoreError::DuplicateKey { id } => Self::Duplicate { id },
			StoreError::NotFound { id } => Self::NotFound { id },
			StoreError::Immutable { id } => Self::Immutable { id },
			StoreError::ResultLimitExceeded { .. } => Self::LimitExceeded,
			other => Self::Backend { message: other.to_string() },
		}
	}
}

/// Service exposing the resource server family over its configured backend.
pub struct ResourceServerService {
	backend: Backend<ResourceServer>,
	database: Arc<dyn RecordStore<ResourceServer>>,
}
impl Debug for ResourceServerService {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResourceServerService").field("backend", &self.backend).finish()
	}
}
impl ResourceServerService {
	/// Family key used for store-mode configuration.
	pub const FAMILY: &'static str = "resource_servers";

	/// Wires the family for the configured store mode; composite reads prefer the database.
	pub fn new(
		mode: StoreMode,
		database: Arc<dyn RecordStore<ResourceServer>>,
		file: FileStore<ResourceServer>,
	) -> Self {
		Self {
			backend: Backend::select(mode, database.clone(), file, Precedence::Database),
			database,
		}
	}

	/// Creates a mutable resource server after computing permissions.
	pub async fn create(
		&self,
		request: ResourceServerRequest,
	) -> Result<ResourceServer, ResourceServerError> {
		let server = resolve(request, true)?;

		if self.backend.exists(&server.id).await.map_err(ResourceServerError::from_store)? {
			return Err(ResourceServerError::Duplicate { id: server.id });
		}

		self.backend
			.create(ResourceRecord::new(server.id.clone(), server.clone()))
			.await
			.map_err(ResourceServerError::from_store)?;

		Ok(server)
	}

	/// Fetches a resource server by id.
	pub async fn get_by_id(&self, id: &str) -> Result<ResourceServer, ResourceServerError> {
		self.backend
			.get(id)
			.await
			.map(|record| record.payload)
			.map_err(ResourceServerError::from_store)
	}

	/// Fetches a resource server by name.
	pub async fn get_by_name(&self, name: &str) -> Result<ResourceServer, ResourceServerError> {
		self.backend
			.get_by_field(name, |server| Some(server.name.clone()))
			.await
			.map(|record| record.payload)
			.map_err(ResourceServerError::from_store)
	}

	/// Pages through resource servers.
	pub async fn list(
		&self,
		limit: u32,
		offset: u32,
	) -> Result<Vec<ResourceServerListItem>, ResourceServerError> {
		Ok(self
			.backend
			.list(limit, offset)
			.await
			.map_err(ResourceServerError::from_store)?
			.into_iter()
			.map(|record| ResourceServerListItem {
				id: record.id,
				name: record.payload.name,
				identifier: record.payload.identifier,
				read_only: record.read_only,
			})
			.collect())
	}

	/// Total resource server count across the configured backend.
	pub async fn count(&self) -> Result<u32, ResourceServerError> {
		self.backend.count().await.map_err(ResourceServerError::from_store)
	}

	/// Replaces a mutable resource server, recomputing permissions.
	pub async fn update(
		&self,
		id: &str,
		mut request: ResourceServerRequest,
	) -> Result<ResourceServer, ResourceServerError> {
		request.id = Some(id.to_owned());

		let server = resolve(request, false)?;

		self.backend
			.update(ResourceRecord::new(id, server.clone()))
			.await
			.map_err(ResourceServerError::from_store)?;

		Ok(server)
	}

	/// Deletes a mutable resource server.
	pub async fn delete(&self, id: &str) -> Result<(), ResourceServerError> {
		self.backend.delete(id).await.map_err(ResourceServerError::from_store)
	}

	/// Returns true if a server with the id exists.
	pub async fn exists(&self, id: &str) -> Result<bool, ResourceServerError> {
		self.backend.exists(id).await.map_err(ResourceServerError::from_store)
	}

	/// Returns true if the id is backed by a declarative file.
	pub async fn is_declarative(&self, id: &str) -> bool {
		self.backend.is_declarative(id).await
	}

	/// Declarative loader wiring for the family.
	pub fn declarative_source() -> DeclarativeSource<ResourceServer> {
		DeclarativeSource {
			resource_type: "resource server",
			directory: "resource_servers",
			parse: |bytes| {
				parse_yaml::<ResourceServerRequest>(bytes).map(|request| ResourceServer {
					id: request.id.unwrap_or_default(),
					name: request.name,
					identifier: request.identifier,
					ou_id: request.ou_id.and_then(|raw| OuId::new(raw).ok()),
					delimiter: request
						.delimiter
						.unwrap_or_else(|| DEFAULT_PERMISSION_DELIMITER.to_owned()),
					resources: request.resources,
				})
			},
			validate: |server| {
				validate(server)?;

				compute_permissions(server).map_err(|e| e.to_string())
			},
			extract_id: |server| server.id.clone(),
		}
	}

	/// Exporter round-tripping mutable resource servers into YAML documents.
	pub fn exporter(&self) -> ResourceServerExporter {
		ResourceServerExporter { database: self.database.clone() }
	}
}

/// [`ResourceExporter`] implementation for resource servers.
#[derive(Clone)]
pub struct ResourceServerExporter {
	database: Arc<dyn RecordStore<ResourceServer>>,
}
impl Debug for ResourceServerExporter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ResourceServerExporter(..)")
	}
}
impl ResourceExporter for ResourceServerExporter {
	fn resource_type(&self) -> &'static str {
		"resource_servers"
	}

	fn parameterizer_type(&self) -> &'static str {
		"resource_server"
	}

	fn all_resource_ids(&self) -> StoreFuture<'_, Vec<String>> {
		Box::pin(async move {
			let mut ids: Vec<_> =
				self.database.list().await?.into_iter().map(|record| record.id).collect();

			ids.sort();

			Ok(ids)
		})
	}

	fn resource_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, (serde_json::Value, String)> {
		Box::pin(async move {
			let record = self.database.get(id).await?;
			let name = record.payload.name.clone();
			let document = serde_json::to_value(&record.payload)
				.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

			Ok((document, name))
		})
	}

	fn validate_resource(&self, payload: &serde_json::Value, id: &str) -> Result<(), StoreError> {
		let mut server: ResourceServer = serde_json::from_value(payload.clone())
			.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

		if server.id != id {
			return Err(StoreError::Serialization {
				message: format!("exported document id `{}` does not match `{id}`", server.id),
			});
		}

		validate(&server).map_err(|message| StoreError::Serialization { message })?;
		compute_permissions(&mut server)
			.map_err(|e| StoreError::Serialization { message: e.to_string() })
	}

	fn resource_rules(&self) -> ResourceRules {
		ResourceRules {
			variables: vec!["id", "name", "identifier", "ou_id", "delimiter"],
			array_variables: vec!["resources"],
		}
	}
}

/// Computes the permission string for every resource and action in the server.
///
/// `permission = join(identifier, ancestor handles…, self handle, delimiter)`;
/// action permissions append the action handle. Duplicate resource handles,
/// unknown parents, and parent cycles fail the computation.
pub fn compute_permissions(server: &mut ResourceServer) -> Result<(), ResourceServerError> {
	let mut parents: HashMap<&str, Option<&str>> = HashMap::with_capacity(server.resources.len());

	for resource in &server.resources {
		if parents.insert(resource.handle.as_str(), resource.parent.as_deref()).is_some() {
			return Err(ResourceServerError::DuplicateHandle { handle: resource.handle.clone() });
		}
	}

	let mut chains: HashMap<String, Vec<String>> = HashMap::with_capacity(server.resources.len());

	for resource in &server.resources {
		let mut chain = vec![resource.handle.clone()];
		let mut cursor = resource.parent.as_deref();

		while let Some(parent) = cursor {
			if chain.len() > server.resources.len() {
				return Err(ResourceServerError::ParentCycle {
					handle: resource.handle.clone(),
				});
			}

			match parents.get(parent) {
				Some(grandparent) => {
					chain.push(parent.to_owned());

					cursor = *grandparent;
				},
				None =>
					return Err(ResourceServerError::UnknownParent {
						handle: resource.handle.clone(),
						parent: parent.to_owned(),
					}),
			}
		}

		chain.reverse();
		chains.insert(resource.handle.clone(), chain);
	}

	drop(parents);

	for resource in &mut server.resources {
		let chain = chains
			.get(resource.handle.as_str())
			.expect("Every resource chain is computed above.");
		let mut segments = Vec::with_capacity(chain.len() + 1);

		segments.push(server.identifier.clone());
		segments.extend(chain.iter().cloned());

		resource.permission = segments.join(&server.delimiter);

		let mut action_handles = std::collections::HashSet::new();

		for action in &mut resource.actions {
			if !action_handles.insert(action.handle.clone()) {
				return Err(ResourceServerError::DuplicateHandle {
					handle: action.handle.clone(),
				});
			}

			action.permission =
				format!("{}{}{}", resource.permission, server.delimiter, action.handle);
		}
	}

	Ok(())
}

fn resolve(
	request: ResourceServerRequest,
	allow_generated_id: bool,
) -> Result<ResourceServer, ResourceServerError> {
	let id = match request.id {
		Some(id) if !id.is_empty() => id,
		_ if allow_generated_id => format!("rsv-{}", random_string(16)),
		_ => String::new(),
	};
	let ou_id = match request.ou_id {
		Some(raw) => Some(
			OuId::new(raw)
				.map_err(|e| ResourceServerError::InvalidRequest { message: e.to_string() })?,
		),
		None => None,
	};
	let mut server = ResourceServer {
		id,
		name: request.name,
		identifier: request.identifier,
		ou_id,
		delimiter: request.delimiter.unwrap_or_else(|| DEFAULT_PERMISSION_DELIMITER.to_owned()),
		resources: request.resources,
	};

	validate(&server).map_err(|message| ResourceServerError::InvalidRequest { message })?;
	compute_permissions(&mut server)?;

	Ok(server)
}

fn validate(server: &ResourceServer) -> Result<(), String> {
	if server.id.is_empty() {
		return Err("resource server id must not be empty".into());
	}
	if server.name.trim().is_empty() {
		return Err("resource server name must not be empty".into());
	}
	if server.identifier.trim().is_empty() {
		return Err("resource server identifier must not be empty".into());
	}
	if server.delimiter.is_empty() {
		return Err("permission delimiter must not be empty".into());
	}

	for resource in &server.resources {
		if resource.handle.trim().is_empty() {
			return Err(format!("resource `{}` is missing a handle", resource.name));
		}

		for action in &resource.actions {
			if action.handle.trim().is_empty() {
				return Err(format!("action `{}` is missing a handle", action.name));
			}
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryStore;

	fn action(handle: &str) -> ServerAction {
		ServerAction {
			name: handle.to_uppercase(),
			handle: handle.into(),
			description: None,
			permission: String::new(),
		}
	}

	fn resource(handle: &str, parent: Option<&str>, actions: Vec<ServerAction>) -> ServerResource {
		ServerResource {
			name: handle.to_uppercase(),
			handle: handle.into(),
			description: None,
			parent: parent.map(str::to_owned),
			actions,
			permission: String::new(),
		}
	}

	fn request(resources: Vec<ServerResource>) -> ResourceServerRequest {
		ResourceServerRequest {
			id: Some("rs-1".into()),
			name: "Orders API".into(),
			identifier: "orders".into(),
			ou_id: None,
			delimiter: None,
			resources,
		}
	}

	#[test]
	fn permissions_join_identifier_ancestors_and_handle() {
		let server = resolve(
			request(vec![
				resource("invoices", None, vec![action("read")]),
				resource("lines", Some("invoices"), vec![action("write")]),
				resource("taxes", Some("lines"), vec![]),
			]),
			false,
		)
		.expect("Permissions should compute.");

		assert_eq!(server.resources[0].permission, "orders:invoices");
		assert_eq!(server.resources[0].actions[0].permission, "orders:invoices:read");
		assert_eq!(server.resources[1].permission, "orders:invoices:lines");
		assert_eq!(server.resources[1].actions[0].permission, "orders:invoices:lines:write");
		assert_eq!(server.resources[2].permission, "orders:invoices:lines:taxes");
	}

	#[test]
	fn custom_delimiters_apply() {
		let mut req = request(vec![resource("invoices", None, vec![])]);

		req.delimiter = Some("/".into());

		let server = resolve(req, false).expect("Permissions should compute.");

		assert_eq!(server.resources[0].permission, "orders/invoices");
	}

	#[test]
	fn duplicate_handles_fail() {
		let err = resolve(
			request(vec![resource("invoices", None, vec![]), resource("invoices", None, vec![])]),
			false,
		)
		.expect_err("Duplicate handles must fail.");

		assert_eq!(err, ResourceServerError::DuplicateHandle { handle: "invoices".into() });
	}

	#[test]
	fn unknown_parents_and_cycles_fail() {
		let err = resolve(
			request(vec![resource("lines", Some("missing"), vec![])]),
			false,
		)
		.expect_err("Unknown parents must fail.");

		assert!(matches!(err, ResourceServerError::UnknownParent { .. }));

		let err = resolve(
			request(vec![
				resource("a", Some("b"), vec![]),
				resource("b", Some("a"), vec![]),
			]),
			false,
		)
		.expect_err("Parent cycles must fail.");

		assert!(matches!(err, ResourceServerError::ParentCycle { .. }));
	}

	#[tokio::test]
	async fn create_and_read_back() {
		let service = ResourceServerService::new(
			StoreMode::Mutable,
			Arc::new(MemoryStore::new()),
			FileStore::new(),
		);
		let created = service
			.create(request(vec![resource("invoices", None, vec![action("read")])]))
			.await
			.expect("Create should succeed.");

		assert_eq!(created.resources[0].actions[0].permission, "orders:invoices:read");
		assert_eq!(
			service.get_by_name("Orders API").await.expect("Name lookup should work.").id,
			"rs-1"
		);
	}
}
