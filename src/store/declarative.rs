//! Startup loader materializing declarative YAML resources into file stores.

// std
use std::{ffi::OsStr, fs, path::Path};
// self
use crate::{
	_prelude::*,
	store::{FileStore, RecordStore, ResourceRecord, StoreError},
};

/// Per-family description of how declarative files become store payloads.
///
/// Each resource family supplies the parser/validator/id-extractor triple;
/// the loader owns directory traversal, ordering, and failure policy.
pub struct DeclarativeSource<T> {
	/// Resource family label used in diagnostics.
	pub resource_type: &'static str,
	/// Directory name under `declarative_resources/`.
	pub directory: &'static str,
	/// Parses raw file bytes into a payload; failures skip the file.
	pub parse: fn(&[u8]) -> Result<T, String>,
	/// Validates a parsed payload and computes derived state; failures abort the whole load.
	pub validate: fn(&mut T) -> Result<(), String>,
	/// Extracts the primary key from a payload.
	pub extract_id: fn(&T) -> String,
}
impl<T> Debug for DeclarativeSource<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DeclarativeSource")
			.field("resource_type", &self.resource_type)
			.field("directory", &self.directory)
			.finish()
	}
}

/// Errors aborting a declarative resource load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum DeclarativeError {
	/// Filesystem failure while enumerating or reading resource files.
	#[error("Failed to read `{path}`: {message}.")]
	Io {
		/// Offending path.
		path: String,
		/// Underlying IO error text.
		message: String,
	},
	/// A parsed payload failed family validation.
	#[error("Resource file `{file}` failed validation: {message}.")]
	Validation {
		/// Offending file name.
		file: String,
		/// Validator-provided explanation.
		message: String,
	},
	/// Two files within the family declared the same id.
	#[error("Resource file `{file}` declares duplicate id `{id}`.")]
	DuplicateId {
		/// Offending file name.
		file: String,
		/// The duplicated id.
		id: String,
	},
	/// A declarative id collides with a database record in composite mode.
	#[error("Resource file `{file}` declares id `{id}` which already exists in the database.")]
	DatabaseCollision {
		/// Offending file name.
		file: String,
		/// The colliding id.
		id: String,
	},
	/// Underlying store failure while populating or cross-checking.
	#[error("{0}")]
	Store(
		#[from]
		#[source]
		StoreError,
	),
}

/// Parses YAML bytes with path-aware error diagnostics.
pub fn parse_yaml<T>(bytes: &[u8]) -> Result<T, String>
where
	T: serde::de::DeserializeOwned,
{
	let deserializer = serde_yaml::Deserializer::from_slice(bytes);

	serde_path_to_error::deserialize(deserializer).map_err(|e| e.to_string())
}

/// Loads one family's declarative directory into its file store.
///
/// Files are visited in lexical order. Unparsable files are skipped with a
/// log line; validation failures, duplicate ids, and database collisions
/// abort the load (and therefore startup). A missing directory is not an
/// error. When `database` is provided (composite mode), declarative ids that
/// already exist in the database fail the load.
pub async fn load_declarative<T>(
	root: &Path,
	source: &DeclarativeSource<T>,
	target: &FileStore<T>,
	database: Option<&dyn RecordStore<T>>,
) -> Result<u32, DeclarativeError>
where
	T: Clone + Send + Sync + 'static,
{
	let dir = root.join("declarative_resources").join(source.directory);

	if !dir.is_dir() {
		return Ok(0);
	}

	let mut paths = fs::read_dir(&dir)
		.map_err(|e| DeclarativeError::Io { path: dir.display().to_string(), message: e.to_string() })?
		.filter_map(|entry| entry.ok().map(|entry| entry.path()))
		.filter(|path| {
			matches!(
				path.extension().and_then(OsStr::to_str),
				Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
			)
		})
		.collect::<Vec<_>>();

	paths.sort();

	let mut loaded = 0;

	for path in paths {
		let file = path
			.file_name()
			.and_then(OsStr::to_str)
			.unwrap_or(source.directory)
			.to_owned();
		let bytes = fs::read(&path).map_err(|e| DeclarativeError::Io {
			path: path.display().to_string(),
			message: e.to_string(),
		})?;

		if bytes.iter().all(u8::is_ascii_whitespace) {
			continue;
		}

		let mut payload = match (source.parse)(&bytes) {
			Ok(payload) => payload,
			Err(reason) => {
				note_skipped(&path, &reason);

				continue;
			},
		};

		(source.validate)(&mut payload)
			.map_err(|message| DeclarativeError::Validation { file: file.clone(), message })?;

		let id = (source.extract_id)(&payload);

		if id.is_empty() {
			return Err(DeclarativeError::Validation {
				file,
				message: "resource id must not be empty".into(),
			});
		}
		if let Some(database) = database {
			match database.get(&id).await {
				Ok(_) => return Err(DeclarativeError::DatabaseCollision { file, id }),
				Err(StoreError::NotFound { .. }) => {},
				Err(e) => return Err(e.into()),
			}
		}

		target.insert(ResourceRecord::new(id.clone(), payload)).map_err(|e| match e {
			StoreError::DuplicateKey { id } => DeclarativeError::DuplicateId { file, id },
			other => other.into(),
		})?;

		loaded += 1;
	}

	Ok(loaded)
}

fn note_skipped(path: &Path, reason: &str) {
	#[cfg(feature = "tracing")]
	tracing::warn!(
		file = %path.display(),
		reason,
		"Skipping unparsable declarative resource file."
	);
	#[cfg(not(feature = "tracing"))]
	let _ = (path, reason);
}

#[cfg(test)]
mod tests {
	// std
	use std::path::PathBuf;
	// self
	use super::*;

	#[derive(Clone, Debug, Deserialize)]
	struct Doc {
		id: String,
		name: String,
	}

	fn doc_source() -> DeclarativeSource<Doc> {
		DeclarativeSource {
			resource_type: "doc",
			directory: "docs",
			parse: parse_yaml::<Doc>,
			validate: |doc| {
				if doc.name.is_empty() { Err("name must not be empty".into()) } else { Ok(()) }
			},
			extract_id: |doc| doc.id.clone(),
		}
	}

	fn scratch_root(tag: &str) -> PathBuf {
		let root = std::env::temp_dir()
			.join("authn-broker-declarative-tests")
			.join(format!("{tag}-{}", crate::auth::id::random_string(8)));

		fs::create_dir_all(root.join("declarative_resources").join("docs"))
			.expect("Scratch directory should be creatable.");

		root
	}

	fn write_doc(root: &Path, file: &str, contents: &str) {
		fs::write(root.join("declarative_resources").join("docs").join(file), contents)
			.expect("Fixture file should be writable.");
	}

	#[tokio::test]
	async fn loads_files_in_lexical_order() {
		let root = scratch_root("order");

		write_doc(&root, "b.yaml", "id: doc-b\nname: B\n");
		write_doc(&root, "a.yaml", "id: doc-a\nname: A\n");

		let store = FileStore::new();
		let loaded = load_declarative(&root, &doc_source(), &store, None)
			.await
			.expect("Load should succeed.");

		assert_eq!(loaded, 2);
		assert!(store.contains("doc-a") && store.contains("doc-b"));
	}

	#[tokio::test]
	async fn missing_directory_is_not_an_error() {
		let root = std::env::temp_dir().join("authn-broker-declarative-missing");
		let store = FileStore::new();
		let loaded = load_declarative(&root, &doc_source(), &store, None)
			.await
			.expect("Missing directory should load zero records.");

		assert_eq!(loaded, 0);
	}

	#[tokio::test]
	async fn unparsable_files_are_skipped_but_validation_aborts() {
		let root = scratch_root("mixed");

		write_doc(&root, "a.yaml", ": not yaml [\n");
		write_doc(&root, "b.yaml", "id: doc-b\nname: B\n");

		let store = FileStore::new();
		let loaded = load_declarative(&root, &doc_source(), &store, None)
			.await
			.expect("Parse failures should be skipped.");

		assert_eq!(loaded, 1);

		write_doc(&root, "c.yaml", "id: doc-c\nname: \"\"\n");

		let err = load_declarative(&root, &doc_source(), &FileStore::new(), None)
			.await
			.expect_err("Validation failures must abort the load.");

		assert!(matches!(err, DeclarativeError::Validation { .. }));
	}

	#[tokio::test]
	async fn duplicate_ids_abort_the_load() {
		let root = scratch_root("dup");

		write_doc(&root, "a.yaml", "id: doc-1\nname: A\n");
		write_doc(&root, "b.yaml", "id: doc-1\nname: B\n");

		let err = load_declarative(&root, &doc_source(), &FileStore::new(), None)
			.await
			.expect_err("Duplicate ids must abort the load.");

		assert_eq!(err, DeclarativeError::DuplicateId { file: "b.yaml".into(), id: "doc-1".into() });
	}

	#[tokio::test]
	async fn composite_mode_rejects_database_collisions() {
		let root = scratch_root("collision");

		write_doc(&root, "a.yaml", "id: doc-1\nname: A\n");

		let database = crate::store::MemoryStore::new();

		database
			.create(ResourceRecord::new(
				"doc-1",
				Doc { id: "doc-1".into(), name: "db".into() },
			))
			.await
			.expect("Database fixture should insert.");

		let err = load_declarative(&root, &doc_source(), &FileStore::new(), Some(&database))
			.await
			.expect_err("Database collisions must abort the load.");

		assert!(matches!(err, DeclarativeError::DatabaseCollision { .. }));
	}
}
