//! Composite store merging an immutable file store with a mutable database store.

// self
use crate::{
	_prelude::*,
	store::{FieldExtractor, FileStore, RecordStore, ResourceRecord, StoreError},
};

/// Hard cap on the combined record count a composite list may materialize.
pub const MAX_COMPOSITE_STORE_RECORDS: u32 = 1000;

/// Which underlying store wins when both contain the same id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precedence {
	/// File-backed records shadow database records (applications, layouts).
	File,
	/// Database records shadow file-backed records (resource servers, user schemas).
	Database,
}

/// Record surfaced by composite reads, tagged with its mutability.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeRecord<T> {
	/// Unique record id.
	pub id: String,
	/// Family-specific payload.
	pub payload: T,
	/// True when the record originates from the file store.
	pub read_only: bool,
}
impl<T> CompositeRecord<T> {
	fn from_record(record: ResourceRecord<T>, read_only: bool) -> Self {
		Self { id: record.id, payload: record.payload, read_only }
	}
}

/// Transparently merges a mutable database store with an immutable file store.
///
/// Reads follow the configured [`Precedence`]; writes always land on the
/// database store after the file store confirmed the id is not declarative.
#[derive(Clone)]
pub struct CompositeStore<T> {
	database: Arc<dyn RecordStore<T>>,
	file: FileStore<T>,
	precedence: Precedence,
}
impl<T> CompositeStore<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Builds a composite over the provided stores.
	pub fn new(database: Arc<dyn RecordStore<T>>, file: FileStore<T>, precedence: Precedence) -> Self {
		Self { database, file, precedence }
	}

	/// Returns the record from the precedence-winning store.
	pub async fn get(&self, id: &str) -> Result<CompositeRecord<T>, StoreError> {
		let (winner, winner_file) = self.winner();

		match winner.get(id).await {
			Ok(record) => Ok(CompositeRecord::from_record(record, winner_file)),
			Err(StoreError::NotFound { .. }) => {
				let (loser, loser_file) = self.loser();

				loser.get(id).await.map(|record| CompositeRecord::from_record(record, loser_file))
			},
			Err(e) => Err(e),
		}
	}

	/// Returns the first record whose extracted field matches, respecting precedence.
	pub async fn get_by_field(
		&self,
		value: &str,
		extractor: FieldExtractor<T>,
	) -> Result<CompositeRecord<T>, StoreError> {
		let (winner, winner_file) = self.winner();

		match winner.get_by_field(value, extractor).await {
			Ok(record) => Ok(CompositeRecord::from_record(record, winner_file)),
			Err(StoreError::NotFound { .. }) => {
				let (loser, loser_file) = self.loser();

				loser
					.get_by_field(value, extractor)
					.await
					.map(|record| CompositeRecord::from_record(record, loser_file))
			},
			Err(e) => Err(e),
		}
	}

	/// Combined record count across both stores.
	///
	/// Errors from either store propagate unmodified; no partial totals.
	pub async fn count(&self) -> Result<u32, StoreError> {
		Ok(self.database.count().await? + self.file.count().await?)
	}

	/// Merged, deduplicated, paginated snapshot of both stores.
	///
	/// The combined count is checked against [`MAX_COMPOSITE_STORE_RECORDS`]
	/// before any page is materialized. Pages are merged winner-first with a
	/// first-seen-wins dedup; each side is ordered by id so pagination is
	/// stable across calls.
	pub async fn list(
		&self,
		limit: u32,
		offset: u32,
	) -> Result<Vec<CompositeRecord<T>>, StoreError> {
		let combined = self.count().await?;

		if combined > MAX_COMPOSITE_STORE_RECORDS {
			return Err(StoreError::ResultLimitExceeded {
				count: combined,
				limit: MAX_COMPOSITE_STORE_RECORDS,
			});
		}

		let (winner, winner_file) = self.winner();
		let (loser, loser_file) = self.loser();
		let mut winner_page = winner.list().await?;
		let mut loser_page = loser.list().await?;

		winner_page.sort_by(|a, b| a.id.cmp(&b.id));
		loser_page.sort_by(|a, b| a.id.cmp(&b.id));

		let mut seen = std::collections::HashSet::with_capacity(winner_page.len());
		let mut merged = Vec::with_capacity(winner_page.len() + loser_page.len());

		for record in winner_page {
			seen.insert(record.id.clone());
			merged.push(CompositeRecord::from_record(record, winner_file));
		}
		for record in loser_page {
			if seen.contains(&record.id) {
				continue;
			}

			merged.push(CompositeRecord::from_record(record, loser_file));
		}

		Ok(merged.into_iter().skip(offset as usize).take(limit as usize).collect())
	}

	/// Creates a record in the database store.
	///
	/// Conflict checks against declarative ids belong to the service layer.
	pub async fn create(&self, record: ResourceRecord<T>) -> Result<(), StoreError> {
		self.database.create(record).await
	}

	/// Updates a database record; declarative ids fail with [`StoreError::Immutable`].
	pub async fn update(&self, record: ResourceRecord<T>) -> Result<(), StoreError> {
		if self.is_declarative(&record.id).await {
			return Err(StoreError::Immutable { id: record.id });
		}

		self.database.update(record).await
	}

	/// Deletes a database record; declarative ids fail with [`StoreError::Immutable`].
	pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
		if self.is_declarative(id).await {
			return Err(StoreError::Immutable { id: id.to_owned() });
		}

		self.database.delete(id).await
	}

	/// True iff the file store contains the id; file-store errors surface as false.
	pub async fn is_declarative(&self, id: &str) -> bool {
		self.file.contains(id)
	}

	fn winner(&self) -> (&dyn RecordStore<T>, bool) {
		match self.precedence {
			Precedence::File => (&self.file, true),
			Precedence::Database => (self.database.as_ref(), false),
		}
	}

	fn loser(&self) -> (&dyn RecordStore<T>, bool) {
		match self.precedence {
			Precedence::File => (self.database.as_ref(), false),
			Precedence::Database => (&self.file, true),
		}
	}
}
impl<T> Debug for CompositeStore<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CompositeStore").field("precedence", &self.precedence).finish()
	}
}
