//! User schema resource family: OU-scoped JSON schemas describing user profiles.

// self
use crate::{
	_prelude::*,
	auth::{OuId, id::random_string},
	config::StoreMode,
	resource::{Backend, ResourceExporter, ResourceRules, embedded_json},
	store::{
		DeclarativeSource, FileStore, Precedence, RecordStore, ResourceRecord, StoreError,
		StoreFuture, declarative::parse_yaml,
	},
};

/// User schema payload stored by the family.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserSchema {
	/// Unique schema id.
	pub id: String,
	/// Schema name, unique within the deployment.
	pub name: String,
	/// Organization unit the schema is scoped to.
	pub ou_id: OuId,
	/// True when users may register themselves under this schema.
	pub allow_self_registration: bool,
	/// JSON schema document describing profile attributes.
	pub schema: serde_json::Value,
	/// Attribute rendered as the user's display name, when configured.
	pub display_attribute: Option<String>,
}

/// Incoming user schema document (API request or declarative YAML).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserSchemaRequest {
	/// Explicit id; generated when omitted on API create.
	#[serde(default)]
	pub id: Option<String>,
	/// Schema name.
	#[serde(default)]
	pub name: String,
	/// Owning organization unit; YAML accepts `organization_unit_id` or `ou_id`.
	#[serde(default, alias = "organization_unit_id")]
	pub ou_id: String,
	/// Self-registration switch.
	#[serde(default)]
	pub allow_self_registration: bool,
	/// Schema document; accepts an object or an embedded JSON string.
	#[serde(default, deserialize_with = "embedded_json")]
	pub schema: serde_json::Value,
	/// Optional display attribute.
	#[serde(default)]
	pub display_attribute: Option<String>,
}

/// Projection returned by user schema list queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserSchemaListItem {
	/// Unique schema id.
	pub id: String,
	/// Schema name.
	pub name: String,
	/// Owning organization unit.
	pub ou_id: OuId,
	/// True when the schema is declarative and therefore read-only.
	pub read_only: bool,
}

/// Errors raised by the user schema family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum UserSchemaError {
	/// The request is structurally invalid.
	#[error("Invalid user schema request: {message}.")]
	InvalidRequest {
		/// Validation failure text.
		message: String,
	},
	/// No schema matched the requested id or name.
	#[error("User schema `{id}` was not found.")]
	NotFound {
		/// Requested id or name.
		id: String,
	},
	/// A schema with the same id already exists.
	#[error("User schema `{id}` already exists.")]
	Duplicate {
		/// Offending id.
		id: String,
	},
	/// The schema is declarative and cannot be modified.
	#[error("User schema `{id}` is declarative and cannot be modified.")]
	Immutable {
		/// Declarative schema id.
		id: String,
	},
	/// The schema document is not a JSON object.
	#[error("Invalid schema document: {message}.")]
	InvalidSchema {
		/// Validation failure text.
		message: String,
	},
	/// The combined store count exceeds the composite cap.
	#[error("User schema list exceeds the composite record limit.")]
	LimitExceeded,
	/// Underlying storage failure.
	#[error("User schema storage failure: {message}.")]
	Backend {
		/// Redacted upstream failure text.
		message: String,
	},
}
impl UserSchemaError {
	/// Returns the stable client-facing code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidRequest { .. } => "USC-1001",
			Self::NotFound { .. } => "USC-1002",
			Self::Duplicate { .. } => "USC-1003",
			Self::Immutable { .. } => "USC-1004",
			Self::InvalidSchema { .. } => "USC-1005",
			Self::LimitExceeded => "USC-5001",
			Self::Backend { .. } => "USC-5002",
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

/// Service exposing the user schema family over its configured backend.
pub struct UserSchemaService {
	backend: Backend<UserSchema>,
	database: Arc<dyn RecordStore<UserSchema>>,
}
impl Debug for UserSchemaService {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("UserSchemaService").field("backend", &self.backend).finish()
	}
}
impl UserSchemaService {
	/// Family key used for store-mode configuration.
	pub const FAMILY: &'static str = "user_schemas";

	/// Wires the family for the configured store mode; composite reads prefer the database.
	pub fn new(
		mode: StoreMode,
		database: Arc<dyn RecordStore<UserSchema>>,
		file: FileStore<UserSchema>,
	) -> Self {
		Self {
			backend: Backend::select(mode, database.clone(), file, Precedence::Database),
			database,
		}
	}

	/// Creates a mutable user schema after conflict checks.
	pub async fn create(&self, request: UserSchemaRequest) -> Result<UserSchema, UserSchemaError> {
		let schema = resolve(request, true)?;

		if self.backend.exists(&schema.id).await.map_err(UserSchemaError::from_store)? {
			return Err(UserSchemaError::Duplicate { id: schema.id });
		}

		self.backend
			.create(ResourceRecord::new(schema.id.clone(), schema.clone()))
			.await
			.map_err(UserSchemaError::from_store)?;

		Ok(schema)
	}

	/// Fetches a user schema by id.
	pub async fn get_by_id(&self, id: &str) -> Result<UserSchema, UserSchemaError> {
		self.backend
			.get(id)
			.await
			.map(|record| record.payload)
			.map_err(UserSchemaError::from_store)
	}

	/// Fetches a user schema by name.
	pub async fn get_by_name(&self, name: &str) -> Result<UserSchema, UserSchemaError> {
		self.backend
			.get_by_field(name, |schema| Some(schema.name.clone()))
			.await
			.map(|record| record.payload)
			.map_err(UserSchemaError::from_store)
	}

	/// Pages through user schemas.
	pub async fn list(
		&self,
		limit: u32,
		offset: u32,
	) -> Result<Vec<UserSchemaListItem>, UserSchemaError> {
		Ok(self
			.backend
			.list(limit, offset)
			.await
			.map_err(UserSchemaError::from_store)?
			.into_iter()
			.map(list_item)
			.collect())
	}

	/// Pages through user schemas scoped to any of the provided OU ids.
	///
	/// Mirrors the repository-level `ou_id IN (…)` filter.
	pub async fn list_by_ous(
		&self,
		ou_ids: &[OuId],
		limit: u32,
		offset: u32,
	) -> Result<Vec<UserSchemaListItem>, UserSchemaError> {
		Ok(self
			.backend
			.list(u32::MAX, 0)
			.await
			.map_err(UserSchemaError::from_store)?
			.into_iter()
			.filter(|record| ou_ids.contains(&record.payload.ou_id))
			.skip(offset as usize)
			.take(limit as usize)
			.map(list_item)
			.collect())
	}

	/// Total user schema count across the configured backend.
	pub async fn count(&self) -> Result<u32, UserSchemaError> {
		self.backend.count().await.map_err(UserSchemaError::from_store)
	}

	/// Replaces a mutable user schema.
	pub async fn update(
		&self,
		id: &str,
		mut request: UserSchemaRequest,
	) -> Result<UserSchema, UserSchemaError> {
		request.id = Some(id.to_owned());

		let schema = resolve(request, false)?;

		self.backend
			.update(ResourceRecord::new(id, schema.clone()))
			.await
			.map_err(UserSchemaError::from_store)?;

		Ok(schema)
	}

	/// Deletes a mutable user schema.
	pub async fn delete(&self, id: &str) -> Result<(), UserSchemaError> {
		self.backend.delete(id).await.map_err(UserSchemaError::from_store)
	}

	/// Returns true if a schema with the id exists.
	pub async fn exists(&self, id: &str) -> Result<bool, UserSchemaError> {
		self.backend.exists(id).await.map_err(UserSchemaError::from_store)
	}

	/// Returns true if the id is backed by a declarative file.
	pub async fn is_declarative(&self, id: &str) -> bool {
		self.backend.is_declarative(id).await
	}

	/// Declarative loader wiring for the family.
	pub fn declarative_source() -> DeclarativeSource<UserSchema> {
		DeclarativeSource {
			resource_type: "user schema",
			directory: "user_schemas",
			parse: |bytes| {
				parse_yaml::<UserSchemaRequest>(bytes).map(|request| UserSchema {
					id: request.id.unwrap_or_default(),
					name: request.name,
					ou_id: OuId::new(&request.ou_id).unwrap_or_else(|_| {
						OuId::new("-").expect("Placeholder OU id is statically valid.")
					}),
					allow_self_registration: request.allow_self_registration,
					schema: request.schema,
					display_attribute: request.display_attribute,
				})
			},
			validate: |schema| validate(schema),
			extract_id: |schema| schema.id.clone(),
		}
	}

	/// Exporter round-tripping mutable user schemas into YAML documents.
	pub fn exporter(&self) -> UserSchemaExporter {
		UserSchemaExporter { database: self.database.clone() }
	}
}

/// [`ResourceExporter`] implementation for user schemas.
#[derive(Clone)]
pub struct UserSchemaExporter {
	database: Arc<dyn RecordStore<UserSchema>>,
}
impl Debug for UserSchemaExporter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("UserSchemaExporter(..)")
	}
}
impl ResourceExporter for UserSchemaExporter {
	fn resource_type(&self) -> &'static str {
		"user_schemas"
	}

	fn parameterizer_type(&self) -> &'static str {
		"user_schema"
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
		let schema: UserSchema = serde_json::from_value(payload.clone())
			.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

		if schema.id != id {
			return Err(StoreError::Serialization {
				message: format!("exported document id `{}` does not match `{id}`", schema.id),
			});
		}

		validate(&schema).map_err(|message| StoreError::Serialization { message })
	}

	fn resource_rules(&self) -> ResourceRules {
		ResourceRules {
			variables: vec!["id", "name", "organization_unit_id", "display_attribute"],
			array_variables: vec![],
		}
	}
}

fn list_item(record: crate::store::CompositeRecord<UserSchema>) -> UserSchemaListItem {
	UserSchemaListItem {
		id: record.id,
		name: record.payload.name,
		ou_id: record.payload.ou_id,
		read_only: record.read_only,
	}
}

fn resolve(request: UserSchemaRequest, allow_generated_id: bool) -> Result<UserSchema, UserSchemaError> {
	let id = match request.id {
		Some(id) if !id.is_empty() => id,
		_ if allow_generated_id => format!("schema-{}", random_string(16)),
		_ => String::new(),
	};
	let ou_id = OuId::new(&request.ou_id)
		.map_err(|e| UserSchemaError::InvalidRequest { message: e.to_string() })?;
	let schema = UserSchema {
		id,
		name: request.name,
		ou_id,
		allow_self_registration: request.allow_self_registration,
		schema: request.schema,
		display_attribute: request.display_attribute,
	};

	validate(&schema).map_err(|message| {
		if schema.schema.is_object() {
			UserSchemaError::InvalidRequest { message }
		} else {
			UserSchemaError::InvalidSchema { message }
		}
	})?;

	Ok(schema)
}

fn validate(schema: &UserSchema) -> Result<(), String> {
	if schema.id.is_empty() {
		return Err("user schema id must not be empty".into());
	}
	if schema.name.trim().is_empty() {
		return Err("user schema name must not be empty".into());
	}
	if schema.ou_id.as_ref() == "-" {
		return Err("organization unit id must be valid".into());
	}
	if !schema.schema.is_object() {
		return Err("schema document must be a JSON object".into());
	}

	Ok(())
}
