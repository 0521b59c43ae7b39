//! Storage contracts and built-in store implementations for resource records.

pub mod composite;
pub mod declarative;
pub mod file;
pub mod memory;
#[cfg(feature = "postgres")] pub mod postgres;

pub use composite::{CompositeRecord, CompositeStore, MAX_COMPOSITE_STORE_RECORDS, Precedence};
pub use declarative::{DeclarativeError, DeclarativeSource, load_declarative};
pub use file::FileStore;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")] pub use postgres::PgRecordStore;

// self
use crate::_prelude::*;

/// Boxed future returned by every store operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Projection used by secondary-field lookups: returns the indexed value of a payload.
pub type FieldExtractor<T> = fn(&T) -> Option<String>;

/// Polymorphic record held by every resource store.
///
/// The payload is opaque to the store; only the owning resource family
/// interprets it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord<T> {
	/// Unique primary key within one store.
	pub id: String,
	/// Family-specific payload.
	pub payload: T,
}
impl<T> ResourceRecord<T> {
	/// Builds a record from an id and payload.
	pub fn new(id: impl Into<String>, payload: T) -> Self {
		Self { id: id.into(), payload }
	}
}

/// Storage backend contract implemented by every resource store.
///
/// Readers may run concurrently; writers are mutually exclusive with readers.
/// File-backed implementations reject every write with
/// [`StoreError::Immutable`].
pub trait RecordStore<T>
where
	Self: Send + Sync,
	T: Clone + Send + Sync + 'static,
{
	/// Inserts a new record; fails with [`StoreError::DuplicateKey`] if the id exists.
	fn create(&self, record: ResourceRecord<T>) -> StoreFuture<'_, ()>;

	/// Fetches the record with the provided id.
	fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ResourceRecord<T>>;

	/// Returns the first record whose extracted field equals `value`.
	fn get_by_field<'a>(
		&'a self,
		value: &'a str,
		extractor: FieldExtractor<T>,
	) -> StoreFuture<'a, ResourceRecord<T>>;

	/// Returns a snapshot of every record; insertion order is not preserved.
	fn list(&self) -> StoreFuture<'_, Vec<ResourceRecord<T>>>;

	/// Number of records currently stored.
	fn count(&self) -> StoreFuture<'_, u32>;

	/// Replaces the payload of an existing record.
	fn update(&self, record: ResourceRecord<T>) -> StoreFuture<'_, ()>;

	/// Removes the record with the provided id.
	fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`RecordStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// A record with the same id already exists.
	#[error("Record `{id}` already exists.")]
	DuplicateKey {
		/// Offending record id.
		id: String,
	},
	/// No record matched the requested id or field value.
	#[error("Record `{id}` was not found.")]
	NotFound {
		/// Requested id or field value.
		id: String,
	},
	/// The store is file-backed and rejects mutation.
	#[error("Record `{id}` is declarative and cannot be modified.")]
	Immutable {
		/// Id of the declarative record.
		id: String,
	},
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// A composite list would exceed the hard record cap.
	#[error("Combined result count {count} exceeds the composite limit of {limit}.")]
	ResultLimitExceeded {
		/// Combined count across both underlying stores.
		count: u32,
		/// The configured hard cap.
		limit: u32,
	},
}
impl StoreError {
	/// Returns the stable client-facing code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::DuplicateKey { .. } => "STO-40001",
			Self::NotFound { .. } => "STO-40002",
			Self::Immutable { .. } => "STO-40003",
			Self::Serialization { .. } => "STO-50001",
			Self::Backend { .. } => "STO-50002",
			Self::ResultLimitExceeded { .. } => "STO-50003",
		}
	}

	/// Classifies the error as a client or server failure.
	pub fn kind(&self) -> crate::error::ErrorKind {
		match self {
			Self::DuplicateKey { .. } | Self::NotFound { .. } | Self::Immutable { .. } =>
				crate::error::ErrorKind::Client,
			Self::Serialization { .. } | Self::Backend { .. } | Self::ResultLimitExceeded { .. } =>
				crate::error::ErrorKind::Server,
		}
	}
}
