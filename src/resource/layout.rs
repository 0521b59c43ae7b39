//! Layout resource family: named JSON documents driving login page rendering.

// self
use crate::{
	_prelude::*,
	auth::id::random_string,
	config::StoreMode,
	resource::{Backend, ResourceExporter, ResourceRules},
	store::{
		DeclarativeSource, FileStore, Precedence, RecordStore, ResourceRecord, StoreError,
		StoreFuture, declarative::parse_yaml,
	},
};

/// Layout payload stored by the family.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layout {
	/// Unique layout id.
	pub id: String,
	/// Display name shown in administration tooling.
	pub display_name: String,
	/// Optional free-form description.
	pub description: Option<String>,
	/// The layout document.
	pub layout: serde_json::Value,
}

/// Incoming layout document (API request or declarative YAML).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayoutRequest {
	/// Explicit id; generated when omitted on API create.
	#[serde(default)]
	pub id: Option<String>,
	/// Display name shown in administration tooling.
	#[serde(default)]
	pub display_name: String,
	/// Optional free-form description.
	#[serde(default)]
	pub description: Option<String>,
	/// Layout document; accepts an object or an embedded JSON string.
	#[serde(default, deserialize_with = "crate::resource::embedded_json")]
	pub layout: serde_json::Value,
}

/// Projection returned by layout list queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutListItem {
	/// Unique layout id.
	pub id: String,
	/// Display name shown in administration tooling.
	pub display_name: String,
	/// True when the layout is declarative and therefore read-only.
	pub read_only: bool,
}

/// Errors raised by the layout family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum LayoutError {
	/// The request is structurally invalid.
	#[error("Invalid layout request: {message}.")]
	InvalidRequest {
		/// Validation failure text.
		message: String,
	},
	/// No layout matched the requested id or name.
	#[error("Layout `{id}` was not found.")]
	NotFound {
		/// Requested id or name.
		id: String,
	},
	/// A layout with the same id already exists.
	#[error("Layout `{id}` already exists.")]
	Duplicate {
		/// Offending id.
		id: String,
	},
	/// The layout is declarative and cannot be modified.
	#[error("Layout `{id}` is declarative and cannot be modified.")]
	Immutable {
		/// Declarative layout id.
		id: String,
	},
	/// The layout document is not a JSON object.
	#[error("Invalid layout definition: {message}.")]
	InvalidDefinition {
		/// Validation failure text.
		message: String,
	},
	/// The combined store count exceeds the composite cap.
	#[error("Layout list exceeds the composite record limit.")]
	LimitExceeded,
	/// Underlying storage failure.
	#[error("Layout storage failure: {message}.")]
	Backend {
		/// Redacted upstream failure text.
		message: String,
	},
}
impl LayoutError {
	/// Returns the stable client-facing code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidRequest { .. } => "LAY-1001",
			Self::NotFound { .. } => "LAY-1002",
			Self::Duplicate { .. } => "LAY-1003",
			Self::Immutable { .. } => "LAY-1004",
			Self::InvalidDefinition { .. } => "LAY-1005",
			Self::LimitExceeded => "LAY-5001",
			Self::Backend { .. } => "LAY-5002",
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

/// Service exposing the layout family over its configured backend.
pub struct LayoutService {
	backend: Backend<Layout>,
	database: Arc<dyn RecordStore<Layout>>,
}
impl Debug for LayoutService {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LayoutService").field("backend", &self.backend).finish()
	}
}
impl LayoutService {
	/// Family key used for store-mode configuration.
	pub const FAMILY: &'static str = "layouts";

	/// Wires the family for the configured store mode; composite reads prefer files.
	pub fn new(
		mode: StoreMode,
		database: Arc<dyn RecordStore<Layout>>,
		file: FileStore<Layout>,
	) -> Self {
		Self {
			backend: Backend::select(mode, database.clone(), file, Precedence::File),
			database,
		}
	}

	/// Creates a mutable layout after conflict checks.
	pub async fn create(&self, request: LayoutRequest) -> Result<Layout, LayoutError> {
		let layout = resolve(request, true)?;

		if self
			.backend
			.exists(&layout.id)
			.await
			.map_err(LayoutError::from_store)?
		{
			return Err(LayoutError::Duplicate { id: layout.id });
		}

		self.backend
			.create(ResourceRecord::new(layout.id.clone(), layout.clone()))
			.await
			.map_err(LayoutError::from_store)?;

		Ok(layout)
	}

	/// Fetches a layout by id.
	pub async fn get_by_id(&self, id: &str) -> Result<Layout, LayoutError> {
		self.backend.get(id).await.map(|record| record.payload).map_err(LayoutError::from_store)
	}

	/// Fetches a layout by display name.
	pub async fn get_by_name(&self, name: &str) -> Result<Layout, LayoutError> {
		self.backend
			.get_by_field(name, |layout| Some(layout.display_name.clone()))
			.await
			.map(|record| record.payload)
			.map_err(LayoutError::from_store)
	}

	/// Pages through layouts, enforcing the composite cap.
	pub async fn list(&self, limit: u32, offset: u32) -> Result<Vec<LayoutListItem>, LayoutError> {
		Ok(self
			.backend
			.list(limit, offset)
			.await
			.map_err(LayoutError::from_store)?
			.into_iter()
			.map(|record| LayoutListItem {
				id: record.id,
				display_name: record.payload.display_name,
				read_only: record.read_only,
			})
			.collect())
	}

	/// Total layout count across the configured backend.
	pub async fn count(&self) -> Result<u32, LayoutError> {
		self.backend.count().await.map_err(LayoutError::from_store)
	}

	/// Replaces a mutable layout.
	pub async fn update(&self, id: &str, mut request: LayoutRequest) -> Result<Layout, LayoutError> {
		request.id = Some(id.to_owned());

		let layout = resolve(request, false)?;

		self.backend
			.update(ResourceRecord::new(id, layout.clone()))
			.await
			.map_err(LayoutError::from_store)?;

		Ok(layout)
	}

	/// Deletes a mutable layout.
	pub async fn delete(&self, id: &str) -> Result<(), LayoutError> {
		self.backend.delete(id).await.map_err(LayoutError::from_store)
	}

	/// Returns true if a layout with the id exists.
	pub async fn exists(&self, id: &str) -> Result<bool, LayoutError> {
		self.backend.exists(id).await.map_err(LayoutError::from_store)
	}

	/// Returns true if the id is backed by a declarative file.
	pub async fn is_declarative(&self, id: &str) -> bool {
		self.backend.is_declarative(id).await
	}

	/// Declarative loader wiring for the family.
	pub fn declarative_source() -> DeclarativeSource<Layout> {
		DeclarativeSource {
			resource_type: "layout",
			directory: "layouts",
			parse: |bytes| {
				parse_yaml::<LayoutRequest>(bytes).map(|request| Layout {
					id: request.id.unwrap_or_default(),
					display_name: request.display_name,
					description: request.description,
					layout: request.layout,
				})
			},
			validate: |layout| validate(layout),
			extract_id: |layout| layout.id.clone(),
		}
	}

	/// Exporter round-tripping mutable layouts into YAML documents.
	pub fn exporter(&self) -> LayoutExporter {
		LayoutExporter { database: self.database.clone() }
	}
}

/// [`ResourceExporter`] implementation for layouts.
#[derive(Clone)]
pub struct LayoutExporter {
	database: Arc<dyn RecordStore<Layout>>,
}
impl Debug for LayoutExporter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("LayoutExporter(..)")
	}
}
impl ResourceExporter for LayoutExporter {
	fn resource_type(&self) -> &'static str {
		"layouts"
	}

	fn parameterizer_type(&self) -> &'static str {
		"layout"
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
			let display_name = record.payload.display_name.clone();
			let document = serde_json::to_value(&record.payload).map_err(|e| {
				StoreError::Serialization { message: e.to_string() }
			})?;

			Ok((document, display_name))
		})
	}

	fn validate_resource(&self, payload: &serde_json::Value, id: &str) -> Result<(), StoreError> {
		let layout: Layout = serde_json::from_value(payload.clone())
			.map_err(|e| StoreError::Serialization { message: e.to_string() })?;

		if layout.id != id {
			return Err(StoreError::Serialization {
				message: format!("exported document id `{}` does not match `{id}`", layout.id),
			});
		}

		validate(&layout).map_err(|message| StoreError::Serialization { message })
	}

	fn resource_rules(&self) -> ResourceRules {
		ResourceRules {
			variables: vec!["id", "display_name", "description"],
			array_variables: vec![],
		}
	}
}

fn resolve(request: LayoutRequest, allow_generated_id: bool) -> Result<Layout, LayoutError> {
	let id = match request.id {
		Some(id) if !id.is_empty() => id,
		_ if allow_generated_id => format!("layout-{}", random_string(16)),
		_ => String::new(),
	};
	let layout = Layout {
		id,
		display_name: request.display_name,
		description: request.description,
		layout: request.layout,
	};

	validate(&layout).map_err(|message| {
		if layout.layout.is_object() {
			LayoutError::InvalidRequest { message }
		} else {
			LayoutError::InvalidDefinition { message }
		}
	})?;

	Ok(layout)
}

fn validate(layout: &Layout) -> Result<(), String> {
	if layout.id.is_empty() {
		return Err("layout id must not be empty".into());
	}
	if layout.display_name.trim().is_empty() {
		return Err("display name must not be empty".into());
	}
	if !layout.layout.is_object() {
		return Err("layout definition must be a JSON object".into());
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::MemoryStore;

	fn service(mode: StoreMode) -> (LayoutService, FileStore<Layout>) {
		let file = FileStore::new();

		(LayoutService::new(mode, Arc::new(MemoryStore::new()), file.clone()), file)
	}

	fn request(id: &str, name: &str) -> LayoutRequest {
		LayoutRequest {
			id: Some(id.into()),
			display_name: name.into(),
			description: None,
			layout: serde_json::json!({ "blocks": [] }),
		}
	}

	#[tokio::test]
	async fn create_and_read_back() {
		let (service, _) = service(StoreMode::Mutable);
		let created =
			service.create(request("l1", "Login")).await.expect("Create should succeed.");

		assert_eq!(created.id, "l1");
		assert_eq!(
			service.get_by_name("Login").await.expect("Name lookup should succeed.").id,
			"l1"
		);
		assert_eq!(
			service.create(request("l1", "Other")).await.expect_err("Duplicate must fail."),
			LayoutError::Duplicate { id: "l1".into() }
		);
	}

	#[tokio::test]
	async fn declarative_layouts_are_read_only() {
		let (service, file) = service(StoreMode::Composite);

		file.insert(ResourceRecord::new(
			"l-file",
			Layout {
				id: "l-file".into(),
				display_name: "File".into(),
				description: None,
				layout: serde_json::json!({}),
			},
		))
		.expect("File fixture should insert.");

		assert!(service.is_declarative("l-file").await);
		assert_eq!(
			service.delete("l-file").await.expect_err("Declarative delete must fail."),
			LayoutError::Immutable { id: "l-file".into() }
		);
	}

	#[tokio::test]
	async fn embedded_json_strings_parse() {
		let yaml = b"id: l1\ndisplay_name: Login\nlayout: '{\"blocks\": [1, 2]}'\n";
		let parsed = (LayoutService::declarative_source().parse)(yaml)
			.expect("Embedded JSON string should parse.");

		assert_eq!(parsed.layout["blocks"], serde_json::json!([1, 2]));
	}

	#[tokio::test]
	async fn invalid_definitions_are_rejected() {
		let (service, _) = service(StoreMode::Mutable);
		let mut bad = request("l1", "Login");

		bad.layout = serde_json::json!(42);

		assert!(matches!(
			service.create(bad).await,
			Err(LayoutError::InvalidDefinition { .. })
		));
	}
}
