//! Immutable in-memory [`RecordStore`] populated from declarative resource files.

// self
use crate::{
	_prelude::*,
	store::{FieldExtractor, RecordStore, ResourceRecord, StoreError, StoreFuture},
};

/// Read-only store holding resources materialized from YAML files.
///
/// The declarative loader populates the store during startup through
/// [`insert`](Self::insert); afterwards every write through the
/// [`RecordStore`] surface fails with [`StoreError::Immutable`].
#[derive(Clone)]
pub struct FileStore<T> {
	inner: Arc<RwLock<HashMap<String, T>>>,
}
impl<T> FileStore<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Creates an empty store awaiting declarative load.
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a loaded resource; fails with [`StoreError::DuplicateKey`] on id reuse.
	///
	/// Reserved for the declarative loader; not reachable through the
	/// [`RecordStore`] write surface.
	pub fn insert(&self, record: ResourceRecord<T>) -> Result<(), StoreError> {
		let mut guard = self.inner.write();

		if guard.contains_key(&record.id) {
			return Err(StoreError::DuplicateKey { id: record.id });
		}

		guard.insert(record.id, record.payload);

		Ok(())
	}

	/// Returns true if the store holds a resource with the provided id.
	pub fn contains(&self, id: &str) -> bool {
		self.inner.read().contains_key(id)
	}
}
impl<T> Default for FileStore<T> {
	fn default() -> Self {
		Self { inner: Arc::new(RwLock::new(HashMap::new())) }
	}
}
impl<T> Debug for FileStore<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FileStore").field("records", &self.inner.read().len()).finish()
	}
}
impl<T> RecordStore<T> for FileStore<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn create(&self, record: ResourceRecord<T>) -> StoreFuture<'_, ()> {
		Box::pin(async move { Err(StoreError::Immutable { id: record.id }) })
	}

	fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ResourceRecord<T>> {
		Box::pin(async move {
			self.inner
				.read()
				.get(id)
				.map(|payload| ResourceRecord::new(id, payload.clone()))
				.ok_or_else(|| StoreError::NotFound { id: id.to_owned() })
		})
	}

	fn get_by_field<'a>(
		&'a self,
		value: &'a str,
		extractor: FieldExtractor<T>,
	) -> StoreFuture<'a, ResourceRecord<T>> {
		Box::pin(async move {
			self.inner
				.read()
				.iter()
				.find(|(_, payload)| extractor(payload).as_deref() == Some(value))
				.map(|(id, payload)| ResourceRecord::new(id.clone(), payload.clone()))
				.ok_or_else(|| StoreError::NotFound { id: value.to_owned() })
		})
	}

	fn list(&self) -> StoreFuture<'_, Vec<ResourceRecord<T>>> {
		Box::pin(async move {
			Ok(self
				.inner
				.read()
				.iter()
				.map(|(id, payload)| ResourceRecord::new(id.clone(), payload.clone()))
				.collect())
		})
	}

	fn count(&self) -> StoreFuture<'_, u32> {
		Box::pin(async move { Ok(self.inner.read().len() as u32) })
	}

	fn update(&self, record: ResourceRecord<T>) -> StoreFuture<'_, ()> {
		Box::pin(async move { Err(StoreError::Immutable { id: record.id }) })
	}

	fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move { Err(StoreError::Immutable { id: id.to_owned() }) })
	}
}
