//! Resource families layered over the store kernel.
//!
//! Every family follows the same shape: a payload model, a service exposing
//! the uniform CRUD surface over a [`Backend`] selected by the configured
//! store mode, a [`DeclarativeSource`](crate::store::DeclarativeSource) for
//! YAML load, and a [`ResourceExporter`] for the reverse trip.

pub mod application;
pub mod invitation;
pub mod layout;
pub mod resource_server;
pub mod user_schema;

pub use application::{Application, ApplicationError, ApplicationService};
pub use invitation::{Invitation, InvitationError, InvitationService, InvitationStatus};
pub use layout::{Layout, LayoutError, LayoutService};
pub use resource_server::{ResourceServer, ResourceServerError, ResourceServerService};
pub use user_schema::{UserSchema, UserSchemaError, UserSchemaService};

// self
use crate::{
	_prelude::*,
	config::StoreMode,
	store::{
		CompositeRecord, CompositeStore, FieldExtractor, FileStore, Precedence, RecordStore,
		ResourceRecord, StoreError, StoreFuture,
	},
};

/// Serialization rules guiding YAML export of one resource family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRules {
	/// Scalar fields that parameterize an exported document.
	pub variables: Vec<&'static str>,
	/// Array-valued fields that parameterize an exported document.
	pub array_variables: Vec<&'static str>,
}

/// Round-trips database-backed records of one family into declarative YAML.
pub trait ResourceExporter
where
	Self: Send + Sync,
{
	/// Directory name the family loads from (`applications`, `layouts`, ...).
	fn resource_type(&self) -> &'static str;

	/// Parameterizer label used by export tooling.
	fn parameterizer_type(&self) -> &'static str;

	/// Ids of every database-backed record eligible for export.
	fn all_resource_ids(&self) -> StoreFuture<'_, Vec<String>>;

	/// Returns the exportable document and display name for one record.
	fn resource_by_id<'a>(&'a self, id: &'a str) -> StoreFuture<'a, (serde_json::Value, String)>;

	/// Validates an exported document against the family schema.
	fn validate_resource(&self, payload: &serde_json::Value, id: &str) -> Result<(), StoreError>;

	/// Parameterization rules for the family.
	fn resource_rules(&self) -> ResourceRules;
}

/// Store backend selected by a family's configured mode.
pub(crate) enum Backend<T> {
	Mutable(Arc<dyn RecordStore<T>>),
	Declarative(FileStore<T>),
	Composite(CompositeStore<T>),
}
impl<T> Backend<T>
where
	T: Clone + Send + Sync + 'static,
{
	pub fn select(
		mode: StoreMode,
		database: Arc<dyn RecordStore<T>>,
		file: FileStore<T>,
		precedence: Precedence,
	) -> Self {
		match mode {
			StoreMode::Mutable => Self::Mutable(database),
			StoreMode::Declarative => Self::Declarative(file),
			StoreMode::Composite =>
				Self::Composite(CompositeStore::new(database, file, precedence)),
		}
	}

	pub async fn get(&self, id: &str) -> Result<CompositeRecord<T>, StoreError> {
		match self {
			Self::Mutable(store) => store.get(id).await.map(|record| tag(record, false)),
			Self::Declarative(store) => store.get(id).await.map(|record| tag(record, true)),
			Self::Composite(store) => store.get(id).await,
		}
	}

	pub async fn get_by_field(
		&self,
		value: &str,
		extractor: FieldExtractor<T>,
	) -> Result<CompositeRecord<T>, StoreError> {
		match self {
			Self::Mutable(store) =>
				store.get_by_field(value, extractor).await.map(|record| tag(record, false)),
			Self::Declarative(store) =>
				store.get_by_field(value, extractor).await.map(|record| tag(record, true)),
			Self::Composite(store) => store.get_by_field(value, extractor).await,
		}
	}

	pub async fn list(&self, limit: u32, offset: u32) -> Result<Vec<CompositeRecord<T>>, StoreError> {
		match self {
			Self::Mutable(store) => Ok(page(store.list().await?, limit, offset, false)),
			Self::Declarative(store) => Ok(page(store.list().await?, limit, offset, true)),
			Self::Composite(store) => store.list(limit, offset).await,
		}
	}

	pub async fn count(&self) -> Result<u32, StoreError> {
		match self {
			Self::Mutable(store) => store.count().await,
			Self::Declarative(store) => store.count().await,
			Self::Composite(store) => store.count().await,
		}
	}

	pub async fn create(&self, record: ResourceRecord<T>) -> Result<(), StoreError> {
		match self {
			Self::Mutable(store) => store.create(record).await,
			Self::Declarative(store) => store.create(record).await,
			Self::Composite(store) => store.create(record).await,
		}
	}

	pub async fn update(&self, record: ResourceRecord<T>) -> Result<(), StoreError> {
		match self {
			Self::Mutable(store) => store.update(record).await,
			Self::Declarative(store) => store.update(record).await,
			Self::Composite(store) => store.update(record).await,
		}
	}

	pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
		match self {
			Self::Mutable(store) => store.delete(id).await,
			Self::Declarative(store) => store.delete(id).await,
			Self::Composite(store) => store.delete(id).await,
		}
	}

	pub async fn exists(&self, id: &str) -> Result<bool, StoreError> {
		match self.get(id).await {
			Ok(_) => Ok(true),
			Err(StoreError::NotFound { .. }) => Ok(false),
			Err(e) => Err(e),
		}
	}

	pub async fn is_declarative(&self, id: &str) -> bool {
		match self {
			Self::Mutable(_) => false,
			Self::Declarative(store) => store.contains(id),
			Self::Composite(store) => store.is_declarative(id).await,
		}
	}
}
impl<T> Debug for Backend<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let mode = match self {
			Self::Mutable(_) => "mutable",
			Self::Declarative(_) => "declarative",
			Self::Composite(_) => "composite",
		};

		f.debug_tuple("Backend").field(&mode).finish()
	}
}

/// Deserializes a field that may be a JSON-compatible value or an embedded JSON string.
///
/// Declarative YAML allows `layout:`/`schema:` documents either inline or as a
/// quoted JSON string; both arrive here as the decoded object.
pub fn embedded_json<'de, D>(deserializer: D) -> Result<serde_json::Value, D::Error>
where
	D: serde::Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Raw {
		Text(String),
		Value(serde_json::Value),
	}

	match Raw::deserialize(deserializer)? {
		Raw::Text(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
		Raw::Value(value) => Ok(value),
	}
}

fn tag<T>(record: ResourceRecord<T>, read_only: bool) -> CompositeRecord<T> {
	CompositeRecord { id: record.id, payload: record.payload, read_only }
}

fn page<T>(
	mut records: Vec<ResourceRecord<T>>,
	limit: u32,
	offset: u32,
	read_only: bool,
) -> Vec<CompositeRecord<T>> {
	records.sort_by(|a, b| a.id.cmp(&b.id));

	records
		.into_iter()
		.skip(offset as usize)
		.take(limit as usize)
		.map(|record| tag(record, read_only))
		.collect()
}
