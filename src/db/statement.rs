//! Metadata-driven statement builder.
//!
//! Every function here is pure: it turns entity metadata plus request values
//! into a `Statement` without touching the database. Values are always bound
//! as parameters; identifiers are checked against a conservative character
//! set before they are spliced into SQL text.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Entity, EntityMetadata, QueryParam, SEQUENCE_DATA, Statement};

/// Literal appended to every `IN (...)` list so an empty id list still forms
/// valid SQL that matches no row.
pub const ID_LIST_SENTINEL: i64 = -100;

/// Column alias used by count statements.
pub const COUNT_COLUMN: &str = "entity_count";

/// Check that `name` is safe to splice into SQL as an identifier.
///
/// Accepts ASCII alphanumerics, `_`, `$` and `.` (for `schema.table`).
pub fn check_identifier(name: &str) -> DbResult<&str> {
    if name.is_empty() {
        return Err(DbError::invalid_input("Identifier cannot be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.')
    {
        return Err(DbError::invalid_input(format!(
            "Invalid identifier: {:?}",
            name
        )));
    }
    Ok(name)
}

/// Builds SQL text in the dialect of one backend.
#[derive(Debug, Clone, Copy)]
pub struct StatementBuilder {
    db_type: DatabaseType,
}

impl StatementBuilder {
    pub fn new(db_type: DatabaseType) -> Self {
        Self { db_type }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Positional placeholder for the `index`-th (1-based) parameter.
    fn placeholder(&self, index: usize) -> String {
        match self.db_type {
            DatabaseType::PostgreSQL => format!("${}", index),
            DatabaseType::MySQL | DatabaseType::SQLite => "?".to_string(),
        }
    }

    /// `SELECT * FROM <table> WHERE <id> = ?`
    pub fn select_by_id(
        &self,
        metadata: &dyn EntityMetadata,
        id: impl Into<QueryParam>,
    ) -> DbResult<Statement> {
        let table = check_identifier(metadata.table_name())?;
        let id_field = check_identifier(metadata.id_field())?;
        Ok(Statement::new(
            format!(
                "SELECT * FROM {} WHERE {} = {}",
                table,
                id_field,
                self.placeholder(1)
            ),
            vec![id.into()],
        ))
    }

    /// Point lookup additionally scoped by an owner column.
    pub fn select_owned_by_id(
        &self,
        metadata: &dyn EntityMetadata,
        id: impl Into<QueryParam>,
        owner_field: &str,
        owner_id: i64,
    ) -> DbResult<Statement> {
        let mut stmt = self.select_by_id(metadata, id)?;
        let owner_field = check_identifier(owner_field)?;
        stmt.sql
            .push_str(&format!(" AND {} = {}", owner_field, self.placeholder(2)));
        stmt.params.push(QueryParam::Int(owner_id));
        Ok(stmt)
    }

    /// Fold `filters` into `WHERE 1 = 1 AND k1 = ? AND k2 = ? ...`.
    fn filtered(
        &self,
        projection: &str,
        metadata: &dyn EntityMetadata,
        filters: &[(&str, QueryParam)],
    ) -> DbResult<Statement> {
        let table = check_identifier(metadata.table_name())?;
        let mut sql = format!("SELECT {} FROM {} WHERE 1 = 1", projection, table);
        let mut params = Vec::with_capacity(filters.len());
        for (index, (column, value)) in filters.iter().enumerate() {
            let column = check_identifier(column)?;
            sql.push_str(&format!(
                " AND {} = {}",
                column,
                self.placeholder(index + 1)
            ));
            params.push(value.clone());
        }
        Ok(Statement::new(sql, params))
    }

    pub fn select_filtered(
        &self,
        metadata: &dyn EntityMetadata,
        filters: &[(&str, QueryParam)],
    ) -> DbResult<Statement> {
        self.filtered("*", metadata, filters)
    }

    pub fn count_filtered(
        &self,
        metadata: &dyn EntityMetadata,
        filters: &[(&str, QueryParam)],
    ) -> DbResult<Statement> {
        self.filtered(&format!("COUNT(1) AS {}", COUNT_COLUMN), metadata, filters)
    }

    /// Count the rows an arbitrary query returns by wrapping it as a derived table.
    pub fn count_of(&self, sql: &str, params: Vec<QueryParam>) -> Statement {
        let inner = sql.trim().trim_end_matches(';');
        Statement::new(
            format!(
                "SELECT COUNT(1) AS {} FROM ({}) counted",
                COUNT_COLUMN, inner
            ),
            params,
        )
    }

    /// `SELECT * FROM <table> WHERE <field> IN (?, ?, -100)`
    pub fn select_in(
        &self,
        metadata: &dyn EntityMetadata,
        field: &str,
        ids: &[i64],
    ) -> DbResult<Statement> {
        let table = check_identifier(metadata.table_name())?;
        let field = check_identifier(field)?;
        let mut items: Vec<String> = (1..=ids.len()).map(|i| self.placeholder(i)).collect();
        items.push(ID_LIST_SENTINEL.to_string());
        Ok(Statement::new(
            format!(
                "SELECT * FROM {} WHERE {} IN ({})",
                table,
                field,
                items.join(", ")
            ),
            ids.iter().copied().map(QueryParam::Int).collect(),
        ))
    }

    /// Paged listing. `page_number` is 1-based; `conditions` is a raw,
    /// caller-owned fragment such as `WHERE ACTIVE = 1` (may be empty).
    pub fn paged(
        &self,
        metadata: &dyn EntityMetadata,
        conditions: &str,
        page_number: u32,
        rows_per_page: u32,
        order_by: &str,
        ascending: bool,
    ) -> DbResult<String> {
        if page_number == 0 {
            return Err(DbError::invalid_input("page_number is 1-based"));
        }
        if rows_per_page == 0 {
            return Err(DbError::invalid_input("rows_per_page must be greater than 0"));
        }
        let table = check_identifier(metadata.table_name())?;
        let order_by = check_identifier(order_by)?;
        let offset = u64::from(page_number - 1) * u64::from(rows_per_page);
        let direction = if ascending { "ASC" } else { "DESC" };

        let mut sql = format!("SELECT * FROM {}", table);
        let conditions = conditions.trim();
        if !conditions.is_empty() {
            sql.push(' ');
            sql.push_str(conditions);
        }
        sql.push_str(&format!(" ORDER BY {} {}", order_by, direction));
        match self.db_type {
            DatabaseType::PostgreSQL => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", rows_per_page, offset))
            }
            DatabaseType::MySQL | DatabaseType::SQLite => {
                sql.push_str(&format!(" LIMIT {},{}", offset, rows_per_page))
            }
        }
        Ok(sql)
    }

    /// `INSERT INTO <table> (f1, f2) VALUES (?, ?)` bound in insertable order.
    ///
    /// Fields missing from the entity are bound as NULL.
    pub fn insert<E: Entity + ?Sized>(
        &self,
        metadata: &dyn EntityMetadata,
        entity: &E,
    ) -> DbResult<Statement> {
        let table = check_identifier(metadata.table_name())?;
        let fields = metadata.insertable_fields();
        if fields.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Table {} has no insertable fields",
                table
            )));
        }

        let mut columns = Vec::with_capacity(fields.len());
        let mut placeholders = Vec::with_capacity(fields.len());
        let mut params = Vec::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            columns.push(check_identifier(field)?);
            placeholders.push(self.placeholder(index + 1));
            params.push(entity.field(field).unwrap_or(QueryParam::Null));
        }

        Ok(Statement::new(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders.join(", ")
            ),
            params,
        ))
    }

    /// `UPDATE <table> SET f1 = ?, f2 = ? WHERE <id> = ?`; the id is bound last.
    pub fn update<E: Entity + ?Sized>(
        &self,
        metadata: &dyn EntityMetadata,
        entity: &E,
    ) -> DbResult<Statement> {
        let table = check_identifier(metadata.table_name())?;
        let id_field = check_identifier(metadata.id_field())?;
        let fields = metadata.updatable_fields();
        if fields.is_empty() {
            return Err(DbError::invalid_input(format!(
                "Table {} has no updatable fields",
                table
            )));
        }

        let mut assignments = Vec::with_capacity(fields.len());
        let mut params = Vec::with_capacity(fields.len() + 1);
        for (index, field) in fields.iter().enumerate() {
            let field = check_identifier(field)?;
            assignments.push(format!("{} = {}", field, self.placeholder(index + 1)));
            params.push(entity.field(field).unwrap_or(QueryParam::Null));
        }
        params.push(id_value(metadata, entity)?);

        Ok(Statement::new(
            format!(
                "UPDATE {} SET {} WHERE {} = {}",
                table,
                assignments.join(", "),
                id_field,
                self.placeholder(fields.len() + 1)
            ),
            params,
        ))
    }

    /// Fetch the next value of a database sequence as column `nextval`.
    ///
    /// SQLite has no sequences; the `SEQUENCE_DATA` row is advanced by its
    /// increment and the value it held before the update is returned.
    pub fn next_sequence_value(&self, sequence_name: &str) -> DbResult<Statement> {
        let name = QueryParam::String(check_identifier(sequence_name)?.to_string());
        let sql = match self.db_type {
            DatabaseType::MySQL => "SELECT nextval(?) AS nextval".to_string(),
            DatabaseType::PostgreSQL => "SELECT nextval($1::regclass) AS nextval".to_string(),
            DatabaseType::SQLite => format!(
                "UPDATE {table} SET sequence_cur_value = sequence_cur_value + sequence_increment \
                 WHERE sequence_name = ? \
                 AND sequence_cur_value + sequence_increment <= sequence_max_value \
                 RETURNING sequence_cur_value - sequence_increment AS nextval",
                table = SEQUENCE_DATA.table_name()
            ),
        };
        Ok(Statement::new(sql, vec![name]))
    }

    /// `DELETE FROM <table> WHERE <id> = ?`
    pub fn delete<E: Entity + ?Sized>(
        &self,
        metadata: &dyn EntityMetadata,
        entity: &E,
    ) -> DbResult<Statement> {
        let table = check_identifier(metadata.table_name())?;
        let id_field = check_identifier(metadata.id_field())?;
        Ok(Statement::new(
            format!(
                "DELETE FROM {} WHERE {} = {}",
                table,
                id_field,
                self.placeholder(1)
            ),
            vec![id_value(metadata, entity)?],
        ))
    }
}

/// The entity's id value; a missing or NULL id would silently match nothing.
fn id_value<E: Entity + ?Sized>(metadata: &dyn EntityMetadata, entity: &E) -> DbResult<QueryParam> {
    match entity.field(metadata.id_field()) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(DbError::invalid_input(format!(
            "Entity for {} has no value for id field {}",
            metadata.table_name(),
            metadata.id_field()
        ))),
    }
}
