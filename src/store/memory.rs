//! Thread-safe in-memory [`RecordStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	store::{FieldExtractor, RecordStore, ResourceRecord, StoreError, StoreFuture},
};

type StoreMap<T> = Arc<RwLock<HashMap<String, T>>>;

/// Mutable storage backend that keeps records in-process.
///
/// This is the development/test stand-in for a database-backed store; it
/// supports the full write surface, unlike [`FileStore`](crate::store::FileStore).
#[derive(Clone)]
pub struct MemoryStore<T>(StoreMap<T>);
impl<T> MemoryStore<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Creates an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	fn create_now(map: &StoreMap<T>, record: ResourceRecord<T>) -> Result<(), StoreError> {
		let mut guard = map.write();

		if guard.contains_key(&record.id) {
			return Err(StoreError::DuplicateKey { id: record.id });
		}

		guard.insert(record.id, record.payload);

		Ok(())
	}

	fn get_now(map: &StoreMap<T>, id: &str) -> Result<ResourceRecord<T>, StoreError> {
		map.read()
			.get(id)
			.map(|payload| ResourceRecord::new(id, payload.clone()))
			.ok_or_else(|| StoreError::NotFound { id: id.to_owned() })
	}

	fn get_by_field_now(
		map: &StoreMap<T>,
		value: &str,
		extractor: FieldExtractor<T>,
	) -> Result<ResourceRecord<T>, StoreError> {
		map.read()
			.iter()
			.find(|(_, payload)| extractor(payload).as_deref() == Some(value))
			.map(|(id, payload)| ResourceRecord::new(id.clone(), payload.clone()))
			.ok_or_else(|| StoreError::NotFound { id: value.to_owned() })
	}

	fn update_now(map: &StoreMap<T>, record: ResourceRecord<T>) -> Result<(), StoreError> {
		let mut guard = map.write();

		match guard.get_mut(&record.id) {
			Some(slot) => {
				*slot = record.payload;

				Ok(())
			},
			None => Err(StoreError::NotFound { id: record.id }),
		}
	}

	fn delete_now(map: &StoreMap<T>, id: &str) -> Result<(), StoreError> {
		map.write()
			.remove(id)
			.map(|_| ())
			.ok_or_else(|| StoreError::NotFound { id: id.to_owned() })
	}
}
impl<T> Default for MemoryStore<T> {
	fn default() -> Self {
		Self(Arc::new(RwLock::new(HashMap::new())))
	}
}
impl<T> Debug for MemoryStore<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MemoryStore").field("records", &self.0.read().len()).finish()
	}
}
impl<T> RecordStore<T> for MemoryStore<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn create(&self, record: ResourceRecord<T>) -> StoreFuture<'_, ()> {
		Box::pin(async move { Self::create_now(&self.0, record) })
	}

	fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ResourceRecord<T>> {
		Box::pin(async move { Self::get_now(&self.0, id) })
	}

	fn get_by_field<'a>(
		&'a self,
		value: &'a str,
		extractor: FieldExtractor<T>,
	) -> StoreFuture<'a, ResourceRecord<T>> {
		Box::pin(async move { Self::get_by_field_now(&self.0, value, extractor) })
	}

	fn list(&self) -> StoreFuture<'_, Vec<ResourceRecord<T>>> {
		Box::pin(async move {
			Ok(self
				.0
				.read()
				.iter()
				.map(|(id, payload)| ResourceRecord::new(id.clone(), payload.clone()))
				.collect())
		})
	}

	fn count(&self) -> StoreFuture<'_, u32> {
		Box::pin(async move { Ok(self.0.read().len() as u32) })
	}

	fn update(&self, record: ResourceRecord<T>) -> StoreFuture<'_, ()> {
		Box::pin(async move { Self::update_now(&self.0, record) })
	}

	fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move { Self::delete_now(&self.0, id) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn create_get_round_trip() {
		let store = MemoryStore::new();

		store
			.create(ResourceRecord::new("app-1", "payload".to_owned()))
			.await
			.expect("Creating a fresh record should succeed.");

		let record = store.get("app-1").await.expect("Stored record should be readable.");

		assert_eq!(record.payload, "payload");
		assert_eq!(store.count().await.expect("Count should succeed."), 1);
	}

	#[tokio::test]
	async fn duplicate_create_is_rejected() {
		let store = MemoryStore::new();

		store
			.create(ResourceRecord::new("app-1", 1_u8))
			.await
			.expect("First create should succeed.");

		let err = store
			.create(ResourceRecord::new("app-1", 2_u8))
			.await
			.expect_err("Second create with the same id must fail.");

		assert_eq!(err, StoreError::DuplicateKey { id: "app-1".into() });
	}

	#[tokio::test]
	async fn field_lookup_finds_first_match() {
		let store = MemoryStore::new();

		store
			.create(ResourceRecord::new("a", "alpha".to_owned()))
			.await
			.expect("Create should succeed.");

		let record = store
			.get_by_field("alpha", |payload| Some(payload.clone()))
			.await
			.expect("Field lookup should find the record.");

		assert_eq!(record.id, "a");

		let missing = store
			.get_by_field("beta", |payload| Some(payload.clone()))
			.await
			.expect_err("Missing value should produce NotFound.");

		assert_eq!(missing, StoreError::NotFound { id: "beta".into() });
	}

	#[tokio::test]
	async fn update_and_delete_mutate_in_place() {
		let store = MemoryStore::new();

		store
			.create(ResourceRecord::new("a", "one".to_owned()))
			.await
			.expect("Create should succeed.");
		store
			.update(ResourceRecord::new("a", "two".to_owned()))
			.await
			.expect("Update of an existing record should succeed.");

		assert_eq!(store.get("a").await.expect("Record should exist.").payload, "two");

		store.delete("a").await.expect("Delete of an existing record should succeed.");

		assert_eq!(
			store.delete("a").await.expect_err("Deleting twice must fail."),
			StoreError::NotFound { id: "a".into() }
		);
	}
}
