//! Postgres-backed stores using runtime queries over a shared pool.
//!
//! The generic resource table holds one JSONB payload per `(deployment_id,
//! resource_id)`; each resource family points the store at its own table.
//! Flow contexts span two rows (context + user data) written inside a single
//! transaction. Schema management lives with the embedding service.

// crates.io
use sqlx::{PgPool, Row, postgres::PgRow, types::Json};
// self
use crate::{
	_prelude::*,
	auth::{DeploymentId, FlowId},
	crypt::TokenCipher,
	flow::{FlowContext, FlowContextStore, StoredFlowContext, from_stored, to_stored},
	store::{FieldExtractor, RecordStore, ResourceRecord, StoreError, StoreFuture},
};

/// Generic Postgres [`RecordStore`] holding JSONB payloads.
pub struct PgRecordStore<T> {
	pool: PgPool,
	table: &'static str,
	deployment: DeploymentId,
	_marker: std::marker::PhantomData<fn() -> T>,
}
impl<T> PgRecordStore<T>
where
	T: Clone + Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
	/// Builds a store over one table, scoped to the deployment partition.
	pub fn new(pool: PgPool, table: &'static str, deployment: DeploymentId) -> Self {
		Self { pool, table, deployment, _marker: std::marker::PhantomData }
	}

	fn backend(e: sqlx::Error) -> StoreError {
		StoreError::Backend { message: e.to_string() }
	}
}
impl<T> Debug for PgRecordStore<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PgRecordStore").field("table", &self.table).finish()
	}
}
impl<T> RecordStore<T> for PgRecordStore<T>
where
	T: Clone + Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
	fn create(&self, record: ResourceRecord<T>) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let statement = format!(
				"INSERT INTO {} (deployment_id, resource_id, payload) VALUES ($1, $2, $3)",
				self.table
			);
			let result = sqlx::query(&statement)
				.bind(self.deployment.as_ref())
				.bind(&record.id)
				.bind(Json(&record.payload))
				.execute(&self.pool)
				.await;

			match result {
				Ok(_) => Ok(()),
				Err(e)
					if e.as_database_error()
						.map(|db| db.is_unique_violation())
						.unwrap_or(false) =>
					Err(StoreError::DuplicateKey { id: record.id }),
				Err(e) => Err(Self::backend(e)),
			}
		})
	}

	fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ResourceRecord<T>> {
		Box::pin(async move {
			let statement = format!(
				"SELECT payload FROM {} WHERE deployment_id = $1 AND resource_id = $2",
				self.table
			);
			let payload: Option<Json<T>> = sqlx::query_scalar(&statement)
				.bind(self.deployment.as_ref())
				.bind(id)
				.fetch_optional(&self.pool)
				.await
				.map_err(Self::backend)?;

			payload
				.map(|Json(payload)| ResourceRecord::new(id, payload))
				.ok_or_else(|| StoreError::NotFound { id: id.to_owned() })
		})
	}

	fn get_by_field<'a>(
		&'a self,
		value: &'a str,
		extractor: FieldExtractor<T>,
	) -> StoreFuture<'a, ResourceRecord<T>> {
		// Secondary lookups scan the partition; JSON-path indexes are a
		// schema concern of the embedding service.
		Box::pin(async move {
			self.list()
				.await?
				.into_iter()
				.find(|record| extractor(&record.payload).as_deref() == Some(value))
				.ok_or_else(|| StoreError::NotFound { id: value.to_owned() })
		})
	}

	fn list(&self) -> StoreFuture<'_, Vec<ResourceRecord<T>>> {
		Box::pin(async move {
			let statement = format!(
				"SELECT resource_id, payload FROM {} WHERE deployment_id = $1 ORDER BY resource_id",
				self.table
			);
			let rows = sqlx::query(&statement)
				.bind(self.deployment.as_ref())
				.fetch_all(&self.pool)
				.await
				.map_err(Self::backend)?;

			rows.into_iter()
				.map(|row: PgRow| {
					let id: String = row.try_get("resource_id").map_err(Self::backend)?;
					let Json(payload): Json<T> =
						row.try_get("payload").map_err(Self::backend)?;

					Ok(ResourceRecord::new(id, payload))
				})
				.collect()
		})
	}

	fn count(&self) -> StoreFuture<'_, u32> {
		Box::pin(async move {
			let statement =
				format!("SELECT COUNT(*) FROM {} WHERE deployment_id = $1", self.table);
			let count: i64 = sqlx::query_scalar(&statement)
				.bind(self.deployment.as_ref())
				.fetch_one(&self.pool)
				.await
				.map_err(Self::backend)?;

			Ok(count as u32)
		})
	}

	fn update(&self, record: ResourceRecord<T>) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			let statement = format!(
				"UPDATE {} SET payload = $3 WHERE deployment_id = $1 AND resource_id = $2",
				self.table
			);
			let result = sqlx::query(&statement)
				.bind(self.deployment.as_ref())
				.bind(&record.id)
				.bind(Json(&record.payload))
				.execute(&self.pool)
				.await
				.map_err(Self::backend)?;

			if result.rows_affected() == 0 {
				return Err(StoreError::NotFound { id: record.id });
			}

			Ok(())
		})
	}

	fn delete<'a>(&'a self, id: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let statement = format!(
				"DELETE FROM {} WHERE deployment_id = $1 AND resource_id = $2",
				self.table
			);
			let result = sqlx::query(&statement)
				.bind(self.deployment.as_ref())
				.bind(id)
				.execute(&self.pool)
				.await
				.map_err(Self::backend)?;

			if result.rows_affected() == 0 {
				return Err(StoreError::NotFound { id: id.to_owned() });
			}

			Ok(())
		})
	}
}

const CONTEXT_TABLE: &str = "flow_context";
const USER_DATA_TABLE: &str = "flow_context_user_data";

/// Postgres [`FlowContextStore`] writing both context rows in one transaction.
pub struct PgFlowContextStore {
	pool: PgPool,
	cipher: TokenCipher,
}
impl PgFlowContextStore {
	/// Builds the store over a shared pool, sealing tokens with the cipher.
	pub fn new(pool: PgPool, cipher: TokenCipher) -> Self {
		Self { pool, cipher }
	}

	fn backend(e: sqlx::Error) -> StoreError {
		StoreError::Backend { message: e.to_string() }
	}
}
impl Debug for PgFlowContextStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("PgFlowContextStore(..)")
	}
}
impl FlowContextStore for PgFlowContextStore {
	fn store<'a>(&'a self, ctx: &'a FlowContext) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let stored = to_stored(ctx, &self.cipher)?;
			let mut tx = self.pool.begin().await.map_err(Self::backend)?;
			let context_statement = format!(
				"INSERT INTO {CONTEXT_TABLE} (deployment_id, flow_id, app_id, flow_type, \
				 graph_id, current_node_id, current_action, verbose, steps_taken, user_inputs, \
				 runtime_data, history) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
				 ON CONFLICT (deployment_id, flow_id) DO UPDATE SET current_node_id = $6, \
				 current_action = $7, verbose = $8, steps_taken = $9, user_inputs = $10, \
				 runtime_data = $11, history = $12"
			);

			sqlx::query(&context_statement)
				.bind(&stored.deployment_id)
				.bind(&stored.flow_id)
				.bind(&stored.app_id)
				.bind(&stored.flow_type)
				.bind(&stored.graph_id)
				.bind(&stored.current_node_id)
				.bind(&stored.current_action)
				.bind(stored.verbose)
				.bind(stored.steps_taken as i64)
				.bind(&stored.user_inputs)
				.bind(&stored.runtime_data)
				.bind(&stored.history)
				.execute(&mut *tx)
				.await
				.map_err(Self::backend)?;

			let user_statement = format!(
				"INSERT INTO {USER_DATA_TABLE} (deployment_id, flow_id, is_authenticated, \
				 user_id, ou_id, user_type, sealed_token, attributes, available_attributes) \
				 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) ON CONFLICT (deployment_id, flow_id) \
				 DO UPDATE SET is_authenticated = $3, user_id = $4, ou_id = $5, user_type = $6, \
				 sealed_token = $7, attributes = $8, available_attributes = $9"
			);

			sqlx::query(&user_statement)
				.bind(&stored.deployment_id)
				.bind(&stored.flow_id)
				.bind(stored.is_authenticated)
				.bind(&stored.user_id)
				.bind(&stored.ou_id)
				.bind(&stored.user_type)
				.bind(&stored.sealed_token)
				.bind(&stored.attributes)
				.bind(&stored.available_attributes)
				.execute(&mut *tx)
				.await
				.map_err(Self::backend)?;

			tx.commit().await.map_err(Self::backend)
		})
	}

	fn load<'a>(
		&'a self,
		deployment: &'a DeploymentId,
		flow_id: &'a FlowId,
	) -> StoreFuture<'a, FlowContext> {
		Box::pin(async move {
			let context_statement = format!(
				"SELECT app_id, flow_type, graph_id, current_node_id, current_action, verbose, \
				 steps_taken, user_inputs, runtime_data, history FROM {CONTEXT_TABLE} \
				 WHERE deployment_id = $1 AND flow_id = $2"
			);
			let context_row = sqlx::query(&context_statement)
				.bind(deployment.as_ref())
				.bind(flow_id.as_ref())
				.fetch_optional(&self.pool)
				.await
				.map_err(Self::backend)?
				.ok_or_else(|| StoreError::NotFound { id: flow_id.to_string() })?;
			let user_statement = format!(
				"SELECT is_authenticated, user_id, ou_id, user_type, sealed_token, attributes, \
				 available_attributes FROM {USER_DATA_TABLE} \
				 WHERE deployment_id = $1 AND flow_id = $2"
			);
			let user_row = sqlx::query(&user_statement)
				.bind(deployment.as_ref())
				.bind(flow_id.as_ref())
				.fetch_optional(&self.pool)
				.await
				.map_err(Self::backend)?
				.ok_or_else(|| StoreError::NotFound { id: flow_id.to_string() })?;
			let stored = StoredFlowContext {
				flow_id: flow_id.to_string(),
				app_id: context_row.try_get("app_id").map_err(Self::backend)?,
				flow_type: context_row.try_get("flow_type").map_err(Self::backend)?,
				graph_id: context_row.try_get("graph_id").map_err(Self::backend)?,
				current_node_id: context_row
					.try_get("current_node_id")
					.map_err(Self::backend)?,
				current_action: context_row
					.try_get("current_action")
					.map_err(Self::backend)?,
				verbose: context_row.try_get("verbose").map_err(Self::backend)?,
				steps_taken: context_row
					.try_get::<i64, _>("steps_taken")
					.map_err(Self::backend)? as u32,
				deployment_id: deployment.to_string(),
				user_inputs: context_row.try_get("user_inputs").map_err(Self::backend)?,
				runtime_data: context_row.try_get("runtime_data").map_err(Self::backend)?,
				history: context_row.try_get("history").map_err(Self::backend)?,
				is_authenticated: user_row
					.try_get("is_authenticated")
					.map_err(Self::backend)?,
				user_id: user_row.try_get("user_id").map_err(Self::backend)?,
				ou_id: user_row.try_get("ou_id").map_err(Self::backend)?,
				user_type: user_row.try_get("user_type").map_err(Self::backend)?,
				sealed_token: user_row.try_get("sealed_token").map_err(Self::backend)?,
				attributes: user_row.try_get("attributes").map_err(Self::backend)?,
				available_attributes: user_row
					.try_get("available_attributes")
					.map_err(Self::backend)?,
			};

			from_stored(stored, &self.cipher)
		})
	}

	fn remove<'a>(
		&'a self,
		deployment: &'a DeploymentId,
		flow_id: &'a FlowId,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let mut tx = self.pool.begin().await.map_err(Self::backend)?;

			sqlx::query(&format!(
				"DELETE FROM {USER_DATA_TABLE} WHERE deployment_id = $1 AND flow_id = $2"
			))
			.bind(deployment.as_ref())
			.bind(flow_id.as_ref())
			.execute(&mut *tx)
			.await
			.map_err(Self::backend)?;
			sqlx::query(&format!(
				"DELETE FROM {CONTEXT_TABLE} WHERE deployment_id = $1 AND flow_id = $2"
			))
			.bind(deployment.as_ref())
			.bind(flow_id.as_ref())
			.execute(&mut *tx)
			.await
			.map_err(Self::backend)?;

			tx.commit().await.map_err(Self::backend)
		})
	}
}
