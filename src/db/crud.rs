//! Metadata-driven CRUD engine and batch executor.
//!
//! `CrudEngine` pairs the `StatementBuilder` with a `QueryExecutor` and the
//! application's pool. Write operations take an optional open transaction;
//! without one each call runs on its own pooled connection.

use crate::db::executor::{QueryExecutor, Target};
use crate::db::pool::DbPool;
use crate::db::statement::{COUNT_COLUMN, StatementBuilder};
use crate::db::transaction::DbTransaction;
use crate::error::{DbError, DbResult};
use crate::models::{
    Entity, EntityMetadata, OpKind, QueryParam, Row, Statement, TransactionBatch, integer_column,
};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct CrudEngine {
    pool: DbPool,
    executor: QueryExecutor,
    builder: StatementBuilder,
}

impl CrudEngine {
    pub fn new(pool: DbPool, executor: QueryExecutor) -> Self {
        let builder = StatementBuilder::new(pool.db_type());
        Self {
            pool,
            executor,
            builder,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn builder(&self) -> &StatementBuilder {
        &self.builder
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    fn target<'a>(&'a self, conn: Option<&'a mut DbTransaction>) -> Target<'a> {
        match conn {
            Some(tx) => Target::Transaction(tx),
            None => Target::Pool(&self.pool),
        }
    }

    async fn fetch(&self, stmt: &Statement) -> DbResult<Vec<Row>> {
        self.executor.fetch_all(Target::Pool(&self.pool), stmt).await
    }

    async fn fetch_count(&self, stmt: &Statement) -> DbResult<i64> {
        let rows = self.fetch(stmt).await?;
        rows.first()
            .and_then(|row| integer_column(row, COUNT_COLUMN))
            .ok_or_else(|| {
                DbError::internal(format!("Count query returned no {} column", COUNT_COLUMN))
            })
    }

    /// Run caller-supplied SQL with positional parameters.
    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<Vec<Row>> {
        self.fetch(&Statement::new(sql, params.to_vec())).await
    }

    /// Run caller-supplied DDL/DML and return the affected row count.
    pub async fn query_execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        self.executor
            .execute(
                Target::Pool(&self.pool),
                &Statement::new(sql, params.to_vec()),
            )
            .await
    }

    /// Number of rows the given query would return.
    pub async fn get_query_count(&self, sql: &str, params: &[QueryParam]) -> DbResult<i64> {
        let stmt = self.builder.count_of(sql, params.to_vec());
        self.fetch_count(&stmt).await
    }

    /// Point lookup by id; `None` when no row matches. String keys such as
    /// `SEQUENCE_DATA.sequence_name` work too.
    pub async fn get_entity_by_id(
        &self,
        metadata: &dyn EntityMetadata,
        id: impl Into<QueryParam>,
    ) -> DbResult<Option<Row>> {
        let stmt = self.builder.select_by_id(metadata, id)?;
        Ok(self.fetch(&stmt).await?.into_iter().next())
    }

    /// Point lookup that also requires `owner_field = owner_id`.
    pub async fn get_owned_entity_by_id(
        &self,
        metadata: &dyn EntityMetadata,
        id: impl Into<QueryParam>,
        owner_field: &str,
        owner_id: i64,
    ) -> DbResult<Option<Row>> {
        let stmt = self
            .builder
            .select_owned_by_id(metadata, id, owner_field, owner_id)?;
        Ok(self.fetch(&stmt).await?.into_iter().next())
    }

    /// Rows matching every `column = value` filter; no filters scans the table.
    pub async fn get_entities(
        &self,
        metadata: &dyn EntityMetadata,
        filters: &[(&str, QueryParam)],
    ) -> DbResult<Vec<Row>> {
        let stmt = self.builder.select_filtered(metadata, filters)?;
        self.fetch(&stmt).await
    }

    pub async fn get_entities_count(
        &self,
        metadata: &dyn EntityMetadata,
        filters: &[(&str, QueryParam)],
    ) -> DbResult<i64> {
        let stmt = self.builder.count_filtered(metadata, filters)?;
        self.fetch_count(&stmt).await
    }

    pub async fn get_entities_by_ids(
        &self,
        metadata: &dyn EntityMetadata,
        ids: &[i64],
    ) -> DbResult<Vec<Row>> {
        let stmt = self.builder.select_in(metadata, metadata.id_field(), ids)?;
        self.fetch(&stmt).await
    }

    /// Rows whose foreign-key column `field` holds one of `ids`.
    pub async fn get_entities_by_reference_ids(
        &self,
        metadata: &dyn EntityMetadata,
        field: &str,
        ids: &[i64],
    ) -> DbResult<Vec<Row>> {
        let stmt = self.builder.select_in(metadata, field, ids)?;
        self.fetch(&stmt).await
    }

    /// SQL for one page of `metadata`'s table. See [`StatementBuilder::paged`].
    pub fn get_list_paged_query(
        &self,
        metadata: &dyn EntityMetadata,
        conditions: &str,
        page_number: u32,
        rows_per_page: u32,
        order_by: &str,
        ascending: bool,
    ) -> DbResult<String> {
        self.builder.paged(
            metadata,
            conditions,
            page_number,
            rows_per_page,
            order_by,
            ascending,
        )
    }

    /// Fetch one page; `params` bind placeholders inside `conditions`.
    #[allow(clippy::too_many_arguments)]
    pub async fn get_list_paged(
        &self,
        metadata: &dyn EntityMetadata,
        conditions: &str,
        params: &[QueryParam],
        page_number: u32,
        rows_per_page: u32,
        order_by: &str,
        ascending: bool,
    ) -> DbResult<Vec<Row>> {
        let sql = self.get_list_paged_query(
            metadata,
            conditions,
            page_number,
            rows_per_page,
            order_by,
            ascending,
        )?;
        self.fetch(&Statement::new(sql, params.to_vec())).await
    }

    pub async fn add<E: Entity + ?Sized>(
        &self,
        metadata: &dyn EntityMetadata,
        entity: &E,
        conn: Option<&mut DbTransaction>,
    ) -> DbResult<u64> {
        let stmt = self.builder.insert(metadata, entity)?;
        self.executor.execute(self.target(conn), &stmt).await
    }

    pub async fn update<E: Entity + ?Sized>(
        &self,
        metadata: &dyn EntityMetadata,
        entity: &E,
        conn: Option<&mut DbTransaction>,
    ) -> DbResult<u64> {
        let stmt = self.builder.update(metadata, entity)?;
        self.executor.execute(self.target(conn), &stmt).await
    }

    pub async fn delete<E: Entity + ?Sized>(
        &self,
        metadata: &dyn EntityMetadata,
        entity: &E,
        conn: Option<&mut DbTransaction>,
    ) -> DbResult<u64> {
        let stmt = self.builder.delete(metadata, entity)?;
        self.executor.execute(self.target(conn), &stmt).await
    }

    /// Apply every operation of `batch`, in order, inside one transaction.
    ///
    /// Returns the total number of affected rows. The first failing operation
    /// rolls the whole batch back and its error is returned; a failed commit
    /// becomes `DbError::Transaction`. The batch itself is left untouched.
    pub async fn execute_transaction(&self, batch: &TransactionBatch) -> DbResult<u64> {
        let batch_id = generate_batch_id();
        let mut tx = self.pool.begin().await?;

        info!(
            batch_id = %batch_id,
            operations = batch.size(),
            "Transaction started"
        );

        let mut affected = 0u64;
        for (index, op) in batch.iter().enumerate() {
            let metadata = op.metadata.as_ref();
            let entity = op.entity.as_ref();
            let result = match op.kind {
                OpKind::Add => self.add(metadata, entity, Some(&mut tx)).await,
                OpKind::Update => self.update(metadata, entity, Some(&mut tx)).await,
                OpKind::Delete => self.delete(metadata, entity, Some(&mut tx)).await,
            };

            match result {
                Ok(rows) => affected += rows,
                Err(e) => {
                    warn!(
                        batch_id = %batch_id,
                        index = index,
                        kind = %op.kind,
                        table = %metadata.table_name(),
                        error = %e,
                        "Batch operation failed, rolling back"
                    );
                    if let Err(rollback_err) = tx.rollback().await {
                        error!(
                            batch_id = %batch_id,
                            error = %rollback_err,
                            "Rollback failed"
                        );
                    }
                    return Err(e);
                }
            }
        }

        if let Err(e) = tx.commit().await {
            error!(batch_id = %batch_id, error = %e, "Commit failed");
            return Err(DbError::transaction(
                format!("Commit failed: {}", e),
                batch_id,
            ));
        }

        info!(
            batch_id = %batch_id,
            rows_affected = affected,
            "Transaction committed"
        );
        Ok(affected)
    }
}

fn generate_batch_id() -> String {
    format!("batch_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_batch_id_format() {
        let id = generate_batch_id();
        assert!(id.starts_with("batch_"));
        assert_eq!(id.len(), "batch_".len() + 32);
        assert_ne!(id, generate_batch_id());
    }
}
